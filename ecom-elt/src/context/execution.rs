//! Mutable execution contexts for pipeline and stage execution.

use super::{RunIdentity, StageInputs};
use crate::events::{EventSink, NoOpEventSink};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Trait unifying pipeline and stage context behaviors.
pub trait ExecutionContext: Send + Sync {
    /// Returns the run identity.
    fn run(&self) -> &RunIdentity;

    /// Tries to emit an event.
    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Checks if the context is cancelled.
    fn is_cancelled(&self) -> bool;
}

/// The mutable context for a pipeline execution.
pub struct PipelineContext {
    /// Run identity.
    run_id: RunIdentity,
    /// Extra `{{ name }}` values (e.g. `project_id`) on top of the run's own.
    params: HashMap<String, String>,
    /// Event sink for emitting events.
    event_sink: Arc<dyn EventSink>,
    /// Cancellation flag.
    cancelled: AtomicBool,
    /// Cancel reason.
    cancel_reason: RwLock<Option<String>>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run_id", &self.run_id)
            .field("params", &self.params)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Creates a new pipeline context.
    #[must_use]
    pub fn new(run_id: RunIdentity) -> Self {
        Self {
            run_id,
            params: HashMap::new(),
            event_sink: Arc::new(NoOpEventSink),
            cancelled: AtomicBool::new(false),
            cancel_reason: RwLock::new(None),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Adds a template parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Marks the context as cancelled with a reason.
    pub fn mark_cancelled_with_reason(&self, reason: impl Into<String>) {
        self.cancelled.store(true, Ordering::SeqCst);
        *self.cancel_reason.write() = Some(reason.into());
    }

    /// Returns the cancel reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.read().clone()
    }

    /// Returns the run identity.
    #[must_use]
    pub fn run_id(&self) -> &RunIdentity {
        &self.run_id
    }

    /// All values available to templates for this run.
    #[must_use]
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = self.run_id.template_vars();
        vars.extend(self.params.clone());
        vars
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }
}

impl ExecutionContext for PipelineContext {
    fn run(&self) -> &RunIdentity {
        &self.run_id
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or(serde_json::json!({}));

        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert("run_id".to_string(), serde_json::json!(self.run_id.run_id.to_string()));
            map.insert("dag_id".to_string(), serde_json::json!(&self.run_id.dag_id));
            map.insert("logical_date".to_string(), serde_json::json!(self.run_id.ds()));
        }

        self.event_sink.try_emit(event_type, Some(enriched));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The context for a single stage attempt.
pub struct StageContext {
    /// The pipeline context.
    pipeline_ctx: Arc<PipelineContext>,
    /// The stage name.
    stage_name: String,
    /// The stage inputs.
    inputs: StageInputs,
    /// 1-based attempt number.
    try_number: usize,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(
        pipeline_ctx: Arc<PipelineContext>,
        stage_name: impl Into<String>,
        inputs: StageInputs,
    ) -> Self {
        Self {
            pipeline_ctx,
            stage_name: stage_name.into(),
            inputs,
            try_number: 1,
        }
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_try_number(mut self, try_number: usize) -> Self {
        self.try_number = try_number;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the stage inputs.
    #[must_use]
    pub fn inputs(&self) -> &StageInputs {
        &self.inputs
    }

    /// Returns the attempt number (1 for the first try).
    #[must_use]
    pub fn try_number(&self) -> usize {
        self.try_number
    }

    /// Returns the pipeline context.
    #[must_use]
    pub fn pipeline_ctx(&self) -> &Arc<PipelineContext> {
        &self.pipeline_ctx
    }

    /// Template values for this attempt.
    #[must_use]
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = self.pipeline_ctx.template_vars();
        vars.insert("task_id".to_string(), self.stage_name.clone());
        vars.insert("try_number".to_string(), self.try_number.to_string());
        vars
    }
}

impl ExecutionContext for StageContext {
    fn run(&self) -> &RunIdentity {
        self.pipeline_ctx.run_id()
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = data.unwrap_or(serde_json::json!({}));

        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert("stage".to_string(), serde_json::json!(&self.stage_name));
            map.insert("try_number".to_string(), serde_json::json!(self.try_number));
        }

        self.pipeline_ctx.try_emit_event(event_type, Some(enriched));
    }

    fn is_cancelled(&self) -> bool {
        self.pipeline_ctx.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use chrono::NaiveDate;

    fn run() -> RunIdentity {
        RunIdentity::new("ecom_elt_daily", NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
    }

    #[test]
    fn test_pipeline_context_events_are_enriched() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = PipelineContext::new(run()).with_event_sink(sink.clone());

        ctx.try_emit_event("pipeline.started", None);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let data = events[0].1.as_ref().unwrap();
        assert_eq!(data["dag_id"], "ecom_elt_daily");
        assert_eq!(data["logical_date"], "2026-03-01");
    }

    #[test]
    fn test_stage_context_adds_stage_and_try() {
        let sink = Arc::new(CollectingEventSink::new());
        let ctx = Arc::new(PipelineContext::new(run()).with_event_sink(sink.clone()));
        let stage_ctx =
            StageContext::new(ctx, "load_raw", StageInputs::default()).with_try_number(2);

        stage_ctx.try_emit_event("stage.started", Some(serde_json::json!({"x": 1})));

        let data = sink.events()[0].1.clone().unwrap();
        assert_eq!(data["stage"], "load_raw");
        assert_eq!(data["try_number"], 2);
        assert_eq!(data["x"], 1);
    }

    #[test]
    fn test_cancellation() {
        let ctx = PipelineContext::new(run());
        assert!(!ctx.is_cancelled());

        ctx.mark_cancelled_with_reason("ctrl-c");
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cancel_reason().as_deref(), Some("ctrl-c"));
    }

    #[test]
    fn test_template_vars_merge_params() {
        let ctx = Arc::new(PipelineContext::new(run()).with_param("project_id", "p1"));
        let stage_ctx = StageContext::new(ctx, "build_stg", StageInputs::default());
        let vars = stage_ctx.template_vars();

        assert_eq!(vars["ds"], "2026-03-01");
        assert_eq!(vars["project_id"], "p1");
        assert_eq!(vars["task_id"], "build_stg");
        assert_eq!(vars["try_number"], "1");
    }
}
