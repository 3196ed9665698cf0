//! StageGraph DAG execution engine.
//!
//! Executes stages as soon as their dependencies are met. A stage that fails
//! after exhausting its retries halts the run: nothing new is scheduled,
//! in-flight stages are awaited, and every stage that never ran is reported
//! as `upstream_failed`.

use super::{should_retry, RetryConfig, RetryDecision, RetryState, StageSpec};
use crate::context::{ExecutionContext, PipelineContext, StageContext, StageInputs};
use crate::core::{StageOutput, StageStatus};
use crate::errors::EltError;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};

/// Granularity at which retry waits re-check for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(250);

/// Result of executing a stage graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphExecutionResult {
    /// Per-stage outputs, including placeholders for stages that never ran.
    pub outputs: HashMap<String, StageOutput>,
    /// Stage names in execution order.
    pub order: Vec<String>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
    /// Whether every stage succeeded.
    pub success: bool,
    /// Error message if failed.
    pub error: Option<String>,
}

impl GraphExecutionResult {
    /// Returns the output of one stage.
    #[must_use]
    pub fn output(&self, stage: &str) -> Option<&StageOutput> {
        self.outputs.get(stage)
    }

    /// Returns the status of one stage.
    #[must_use]
    pub fn status(&self, stage: &str) -> Option<StageStatus> {
        self.outputs.get(stage).map(|o| o.status)
    }

    /// Summary of the run with stages listed in execution order.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        let tasks: Vec<serde_json::Value> = self
            .order
            .iter()
            .filter_map(|name| {
                self.outputs.get(name).map(|out| {
                    serde_json::json!({
                        "task_id": name,
                        "status": out.status,
                        "attempts": out.metadata.get("attempts"),
                        "duration_ms": out.metadata.get("duration_ms"),
                        "data": out.data,
                        "error": out.error,
                    })
                })
            })
            .collect();

        serde_json::json!({
            "success": self.success,
            "duration_ms": self.duration_ms,
            "error": self.error,
            "tasks": tasks,
        })
    }
}

/// A directed acyclic graph of stages for execution.
#[derive(Debug)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
    /// Retry policy for stages without their own.
    default_retry: RetryConfig,
}

impl StageGraph {
    /// Creates a new stage graph.
    #[must_use]
    pub fn new(
        name: String,
        stages: HashMap<String, StageSpec>,
        stage_order: &[String],
        default_retry: RetryConfig,
    ) -> Self {
        let execution_order = topological_sort(&stages, stage_order);

        Self {
            name,
            stages,
            execution_order,
            default_retry,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns a stage specification by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Iterates over stage specifications in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.execution_order.iter().filter_map(|n| self.stages.get(n))
    }

    /// Returns the retry policy that applies to a stage.
    #[must_use]
    pub fn retry_for(&self, name: &str) -> &RetryConfig {
        self.stages
            .get(name)
            .and_then(|s| s.retry.as_ref())
            .unwrap_or(&self.default_retry)
    }

    /// Executes the stage graph.
    ///
    /// # Errors
    ///
    /// Returns an error only when the executor itself breaks (a stage task
    /// panicked or the graph deadlocked). Stage failures are reported through
    /// the returned [`GraphExecutionResult`].
    pub async fn execute(
        &self,
        ctx: Arc<PipelineContext>,
    ) -> Result<GraphExecutionResult, EltError> {
        let start = Instant::now();
        let span = tracing::info_span!(
            "pipeline",
            dag_id = %ctx.run().dag_id,
            run_id = %ctx.run().run_id,
            logical_date = %ctx.run().ds(),
        );

        async move {
            ctx.try_emit_event(
                "pipeline.started",
                Some(serde_json::json!({
                    "pipeline": &self.name,
                    "stages": &self.execution_order,
                })),
            );

            let mut outputs: HashMap<String, StageOutput> = HashMap::new();
            let mut completed_data: HashMap<String, HashMap<String, serde_json::Value>> =
                HashMap::new();
            let mut in_degree: HashMap<&str, usize> = self
                .stages
                .iter()
                .map(|(name, spec)| (name.as_str(), spec.dependencies.len()))
                .collect();
            let mut scheduled: HashSet<String> = HashSet::new();
            let mut active = FuturesUnordered::new();
            let mut halted_by: Option<(String, StageStatus)> = None;

            for name in &self.execution_order {
                if in_degree.get(name.as_str()) == Some(&0) {
                    active.push(self.spawn_stage_task(name, ctx.clone(), &completed_data));
                    scheduled.insert(name.clone());
                }
            }

            while let Some(joined) = active.next().await {
                let (stage_name, output) = joined
                    .map_err(|e| EltError::Internal(format!("Task join error: {e}")))?;

                if output.is_success() {
                    completed_data.insert(stage_name.clone(), output.data_or_empty());
                } else if halted_by.is_none() {
                    halted_by = Some((stage_name.clone(), output.status));
                }
                outputs.insert(stage_name.clone(), output);

                if halted_by.is_some() || ctx.is_cancelled() {
                    continue;
                }

                for name in &self.execution_order {
                    let Some(spec) = self.stages.get(name) else { continue };
                    if !spec.dependencies.contains(&stage_name) {
                        continue;
                    }
                    if let Some(count) = in_degree.get_mut(name.as_str()) {
                        *count = count.saturating_sub(1);
                        if *count == 0 && scheduled.insert(name.clone()) {
                            active.push(self.spawn_stage_task(name, ctx.clone(), &completed_data));
                        }
                    }
                }
            }

            let error = if let Some((failed, status)) = &halted_by {
                let reason = ctx.cancel_reason().unwrap_or_else(|| "cancelled".to_string());
                for name in &self.execution_order {
                    outputs.entry(name.clone()).or_insert_with(|| {
                        if *status == StageStatus::Cancel {
                            return StageOutput::cancel(reason.clone());
                        }
                        ctx.try_emit_event(
                            "stage.upstream_failed",
                            Some(serde_json::json!({"stage": name, "upstream": failed})),
                        );
                        StageOutput::upstream_failed(failed)
                    });
                }
                Some(if *status == StageStatus::Cancel {
                    format!("Stage '{failed}' cancelled pipeline")
                } else {
                    format!("Stage '{failed}' failed")
                })
            } else if outputs.len() < self.stages.len() {
                if !ctx.is_cancelled() {
                    let pending: Vec<_> = self
                        .execution_order
                        .iter()
                        .filter(|n| !outputs.contains_key(*n))
                        .cloned()
                        .collect();
                    return Err(EltError::Internal(format!(
                        "Deadlocked stage graph; remaining stages: {pending:?}"
                    )));
                }
                let reason = ctx.cancel_reason().unwrap_or_else(|| "cancelled".to_string());
                for name in &self.execution_order {
                    outputs
                        .entry(name.clone())
                        .or_insert_with(|| StageOutput::cancel(reason.clone()));
                }
                Some("Pipeline cancelled".to_string())
            } else {
                None
            };

            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
            let success = error.is_none();
            let event = match (&error, ctx.is_cancelled()) {
                (None, _) => "pipeline.completed",
                (Some(_), true) => "pipeline.cancelled",
                (Some(_), false) => "pipeline.failed",
            };
            ctx.try_emit_event(
                event,
                Some(serde_json::json!({"duration_ms": duration_ms, "error": &error})),
            );

            Ok(GraphExecutionResult {
                outputs,
                order: self.execution_order.clone(),
                duration_ms,
                success,
                error,
            })
        }
        .instrument(span)
        .await
    }

    /// Spawns a task that runs one stage with its retry policy.
    fn spawn_stage_task(
        &self,
        stage_name: &str,
        ctx: Arc<PipelineContext>,
        completed_data: &HashMap<String, HashMap<String, serde_json::Value>>,
    ) -> tokio::task::JoinHandle<(String, StageOutput)> {
        let spec = self.stages.get(stage_name).cloned();
        let retry = self.retry_for(stage_name).clone();
        let stage_name = stage_name.to_string();
        let prior = completed_data.clone();
        let span = tracing::info_span!("stage", stage = %stage_name);

        tokio::spawn(
            async move {
                let Some(spec) = spec else {
                    let output = StageOutput::fail(format!("Unknown stage '{stage_name}'"));
                    return (stage_name, output);
                };
                let inputs = StageInputs::new(prior, spec.dependencies.clone(), &stage_name, true);
                let output = run_with_retry(&spec, &retry, ctx, inputs).await;
                (stage_name, output)
            }
            .instrument(span),
        )
    }
}

/// Runs attempts of one stage until it succeeds, is cancelled or runs out of retries.
async fn run_with_retry(
    spec: &StageSpec,
    retry: &RetryConfig,
    ctx: Arc<PipelineContext>,
    inputs: StageInputs,
) -> StageOutput {
    let started = Instant::now();
    let mut state = RetryState::new();

    loop {
        if ctx.is_cancelled() {
            let reason = ctx.cancel_reason().unwrap_or_else(|| "cancelled".to_string());
            return finish(StageOutput::cancel(reason), &state, started);
        }

        state.increment(retry);
        let stage_ctx = StageContext::new(ctx.clone(), &spec.name, inputs.clone())
            .with_try_number(state.attempt);

        stage_ctx.try_emit_event(
            "stage.started",
            Some(serde_json::json!({"kind": spec.kind, "max_attempts": retry.max_attempts})),
        );
        let attempt_start = Instant::now();
        let output = spec.runner.execute(&stage_ctx).await;
        let attempt_ms = attempt_start.elapsed().as_secs_f64() * 1000.0;

        match output.status {
            StageStatus::Ok => {
                info!(attempt = state.attempt, duration_ms = attempt_ms, "Stage succeeded");
                stage_ctx.try_emit_event(
                    "stage.completed",
                    Some(serde_json::json!({"duration_ms": attempt_ms, "data": &output.data})),
                );
                return finish(output, &state, started);
            }
            StageStatus::Cancel => {
                stage_ctx.try_emit_event(
                    "stage.cancelled",
                    Some(serde_json::json!({"reason": &output.cancel_reason})),
                );
                return finish(output, &state, started);
            }
            _ => {
                let error = output
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("stage returned status '{}'", output.status));

                match should_retry(&state, retry) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            attempt = state.attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %error,
                            "Stage attempt failed; retrying"
                        );
                        stage_ctx.try_emit_event(
                            "stage.retrying",
                            Some(serde_json::json!({
                                "error": &error,
                                "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "next_try": state.attempt + 1,
                            })),
                        );
                        if !sleep_unless_cancelled(&ctx, delay).await {
                            let reason =
                                ctx.cancel_reason().unwrap_or_else(|| "cancelled".to_string());
                            return finish(StageOutput::cancel(reason), &state, started);
                        }
                    }
                    RetryDecision::GiveUp => {
                        warn!(attempt = state.attempt, error = %error, "Stage failed");
                        stage_ctx.try_emit_event(
                            "stage.failed",
                            Some(serde_json::json!({"error": &error, "duration_ms": attempt_ms})),
                        );
                        let failed = StageOutput {
                            status: StageStatus::Fail,
                            error: Some(error),
                            ..output
                        };
                        return finish(failed, &state, started);
                    }
                }
            }
        }
    }
}

fn finish(output: StageOutput, state: &RetryState, started: Instant) -> StageOutput {
    output
        .add_metadata("attempts", serde_json::json!(state.attempt))
        .add_metadata(
            "duration_ms",
            serde_json::json!(started.elapsed().as_secs_f64() * 1000.0),
        )
}

/// Sleeps for `delay`; returns false if the run was cancelled meanwhile.
async fn sleep_unless_cancelled(ctx: &PipelineContext, delay: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if ctx.is_cancelled() {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
    }
}

/// Performs topological sort on the stage graph.
fn topological_sort(stages: &HashMap<String, StageSpec>, stage_order: &[String]) -> Vec<String> {
    fn visit(
        node: &str,
        stages: &HashMap<String, StageSpec>,
        visited: &mut HashSet<String>,
        temp_visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) || temp_visited.contains(node) {
            return;
        }

        temp_visited.insert(node.to_string());

        if let Some(spec) = stages.get(node) {
            let mut deps: Vec<&String> = spec.dependencies.iter().collect();
            deps.sort();
            for dep in deps {
                visit(dep, stages, visited, temp_visited, result);
            }
        }

        temp_visited.remove(node);
        visited.insert(node.to_string());
        result.push(node.to_string());
    }

    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut temp_visited = HashSet::new();

    // Insertion order keeps the result deterministic.
    for name in stage_order {
        visit(name, stages, &mut visited, &mut temp_visited, &mut result);
    }

    result
}
