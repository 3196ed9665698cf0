//! Integration tests for pipeline execution.

#[cfg(test)]
mod tests {
    use crate::context::{PipelineContext, RunIdentity, StageContext};
    use crate::core::{StageOutput, StageStatus};
    use crate::events::CollectingEventSink;
    use crate::pipeline::{PipelineBuilder, RetryConfig, StageSpec};
    use crate::stages::Stage;
    use crate::testing::MockStage;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct CountingStage {
        name: String,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for CountingStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _ctx: &StageContext) -> StageOutput {
            self.counter.fetch_add(1, Ordering::SeqCst);
            StageOutput::ok_empty()
        }
    }

    #[derive(Debug)]
    struct DataProducerStage {
        name: String,
        key: String,
        value: serde_json::Value,
    }

    #[async_trait]
    impl Stage for DataProducerStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _ctx: &StageContext) -> StageOutput {
            StageOutput::ok_value(&self.key, self.value.clone())
        }
    }

    /// Sums `rows` from both declared parents.
    #[derive(Debug)]
    struct SummingStage {
        name: String,
        parents: [&'static str; 2],
    }

    #[async_trait]
    impl Stage for SummingStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, ctx: &StageContext) -> StageOutput {
            let mut total = 0;
            for parent in self.parents {
                match ctx.inputs().get_value(parent, "rows") {
                    Ok(Some(v)) => total += v.as_i64().unwrap_or(0),
                    Ok(None) => return StageOutput::fail(format!("no rows from {parent}")),
                    Err(e) => return StageOutput::fail(e.to_string()),
                }
            }
            StageOutput::ok_value("rows", serde_json::json!(total))
        }
    }

    /// Reads a stage it never declared.
    #[derive(Debug)]
    struct SnoopingStage;

    #[async_trait]
    impl Stage for SnoopingStage {
        fn name(&self) -> &str {
            "snoop"
        }

        async fn execute(&self, ctx: &StageContext) -> StageOutput {
            match ctx.inputs().get_value("root", "rows") {
                Ok(_) => StageOutput::ok_empty(),
                Err(e) => StageOutput::fail(e.to_string()),
            }
        }
    }

    fn test_context() -> Arc<PipelineContext> {
        let run = RunIdentity::new("integration", NaiveDate::from_ymd_opt(2026, 5, 4).unwrap());
        Arc::new(PipelineContext::new(run).with_event_sink(Arc::new(CollectingEventSink::new())))
    }

    fn producer(name: &str, rows: i64) -> Arc<dyn Stage> {
        Arc::new(DataProducerStage {
            name: name.to_string(),
            key: "rows".to_string(),
            value: serde_json::json!(rows),
        })
    }

    #[test]
    fn test_pipeline_builder_single_stage() {
        let stage = Arc::new(MockStage::new("single"));
        let mut builder = PipelineBuilder::new("test_pipeline");
        builder.add_stage_spec(StageSpec::new("single", stage)).unwrap();

        let graph = builder.build().unwrap();
        assert_eq!(graph.stage_count(), 1);
        assert_eq!(graph.execution_order(), ["single"]);
    }

    #[tokio::test]
    async fn test_diamond_passes_data_to_join() {
        let graph = PipelineBuilder::new("diamond")
            .stage("root", producer("root", 1), &[])
            .unwrap()
            .stage("left", producer("left", 2), &["root"])
            .unwrap()
            .stage("right", producer("right", 3), &["root"])
            .unwrap()
            .stage(
                "join",
                Arc::new(SummingStage {
                    name: "join".to_string(),
                    parents: ["left", "right"],
                }),
                &["left", "right"],
            )
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.execution_order().first().map(String::as_str), Some("root"));
        assert_eq!(graph.execution_order().last().map(String::as_str), Some("join"));

        let result = graph.execute(test_context()).await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output("join").unwrap().get("rows"), Some(&serde_json::json!(5)));
    }

    #[tokio::test]
    async fn test_independent_stages_all_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut builder = PipelineBuilder::new("fan_out");
        for i in 0..4 {
            let name = format!("s{i}");
            builder
                .add_stage_spec(StageSpec::new(
                    name.clone(),
                    Arc::new(CountingStage {
                        name,
                        counter: counter.clone(),
                    }),
                ))
                .unwrap();
        }

        let result = builder.build().unwrap().execute(test_context()).await.unwrap();
        assert!(result.success);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_strict_inputs_reject_undeclared_reads() {
        let graph = PipelineBuilder::new("strict")
            .with_default_retry(RetryConfig::no_retry())
            .stage("root", producer("root", 1), &[])
            .unwrap()
            .stage("middle", producer("middle", 1), &["root"])
            .unwrap()
            .stage("snoop", Arc::new(SnoopingStage), &["middle"])
            .unwrap()
            .build()
            .unwrap();

        let result = graph.execute(test_context()).await.unwrap();
        assert!(!result.success);
        let snoop = result.output("snoop").unwrap();
        assert_eq!(snoop.status, StageStatus::Fail);
        assert!(snoop.error.as_deref().unwrap_or_default().contains("root"));
    }

    #[tokio::test]
    async fn test_branch_failure_marks_join_upstream_failed() {
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = PipelineBuilder::new("diamond")
            .with_default_retry(RetryConfig::from_retries(1, Duration::from_millis(1)))
            .stage("root", producer("root", 1), &[])
            .unwrap()
            .stage(
                "left",
                Arc::new(crate::testing::FailingStage::new("left", "disk full")),
                &["root"],
            )
            .unwrap()
            .stage(
                "join",
                Arc::new(CountingStage {
                    name: "join".to_string(),
                    counter: counter.clone(),
                }),
                &["left"],
            )
            .unwrap()
            .build()
            .unwrap();

        let result = graph.execute(test_context()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.status("root"), Some(StageStatus::Ok));
        assert_eq!(result.status("left"), Some(StageStatus::Fail));
        assert_eq!(
            result.output("left").unwrap().metadata.get("attempts"),
            Some(&serde_json::json!(2))
        );
        assert_eq!(result.status("join"), Some(StageStatus::UpstreamFailed));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
