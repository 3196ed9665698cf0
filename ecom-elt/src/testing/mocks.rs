//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::stages::Stage;

/// A mock stage that records calls and returns a configurable output.
#[derive(Debug)]
pub struct MockStage {
    name: String,
    output: Mutex<StageOutput>,
    tries: Mutex<Vec<usize>>,
}

impl MockStage {
    /// Creates a new mock stage with a success output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: Mutex::new(StageOutput::ok_empty()),
            tries: Mutex::new(Vec::new()),
        }
    }

    /// Sets the output to return.
    pub fn set_output(&self, output: StageOutput) {
        *self.output.lock() = output;
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.tries.lock().len()
    }

    /// Try numbers seen on each call.
    #[must_use]
    pub fn recorded_tries(&self) -> Vec<usize> {
        self.tries.lock().clone()
    }
}

#[async_trait]
impl Stage for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        self.tries.lock().push(ctx.try_number());
        self.output.lock().clone()
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
    calls: Mutex<usize>,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        *self.calls.lock() += 1;
        StageOutput::fail(&self.error)
    }
}

/// Fails its first `failures` calls, then succeeds.
#[derive(Debug)]
pub struct FlakyStage {
    name: String,
    failures: usize,
    calls: Mutex<usize>,
}

impl FlakyStage {
    /// Creates a stage that fails `failures` times before succeeding.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            failures,
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Stage for FlakyStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };
        if call <= self.failures {
            StageOutput::fail(format!("transient failure {call}"))
        } else {
            StageOutput::ok_value("try_number", serde_json::json!(ctx.try_number()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stage_context;
    use chrono::NaiveDate;

    fn ctx() -> StageContext {
        stage_context("test", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap())
    }

    #[tokio::test]
    async fn test_mock_stage() {
        let stage = MockStage::new("mock");
        stage.set_output(StageOutput::fail("nope"));

        let output = stage.execute(&ctx()).await;
        assert!(output.is_failure());
        assert_eq!(stage.call_count(), 1);
        assert_eq!(stage.recorded_tries(), vec![1]);
    }

    #[tokio::test]
    async fn test_flaky_stage() {
        let stage = FlakyStage::new("flaky", 2);
        assert!(stage.execute(&ctx()).await.is_failure());
        assert!(stage.execute(&ctx()).await.is_failure());
        assert!(stage.execute(&ctx()).await.is_success());
        assert_eq!(stage.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let stage = FailingStage::new("fail", "boom");
        let output = stage.execute(&ctx()).await;
        assert_eq!(output.error.as_deref(), Some("boom"));
        assert_eq!(stage.call_count(), 1);
    }
}
