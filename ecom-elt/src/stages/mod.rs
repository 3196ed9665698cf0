//! Stage trait and implementations.
//!
//! Stages are the units of work of a DAG. The operators in
//! [`crate::operators`] are the stages that drive external services.

use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage reports every outcome through its [`StageOutput`]; it never panics
/// or returns `Err`, so the executor can retry and report it uniformly.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// The kind of job this stage drives.
    fn kind(&self) -> StageKind {
        StageKind::Work
    }

    /// A short human-readable description of what the stage will touch.
    fn describe(&self, _vars: &std::collections::HashMap<String, String>) -> String {
        self.name().to_string()
    }

    /// Executes one attempt of the stage.
    async fn execute(&self, ctx: &StageContext) -> StageOutput;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stage_context, MockStage};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_default_kind_and_description() {
        let stage = MockStage::new("noop");
        assert_eq!(stage.name(), "noop");
        assert_eq!(stage.kind(), StageKind::Work);
        assert_eq!(stage.describe(&Default::default()), "noop");

        let ctx = stage_context("noop", NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert!(stage.execute(&ctx).await.is_success());
    }
}
