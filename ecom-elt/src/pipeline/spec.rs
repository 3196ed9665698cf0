//! Stage specifications.

use super::RetryConfig;
use crate::core::StageKind;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::collections::HashSet;
use std::sync::Arc;

/// Specification for a single stage (task) in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Names of stages this stage depends on.
    pub dependencies: HashSet<String>,
    /// The kind of stage.
    pub kind: StageKind,
    /// Retry policy; `None` uses the graph default.
    pub retry: Option<RetryConfig>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        let kind = runner.kind();
        Self {
            name: name.into(),
            runner,
            dependencies: HashSet::new(),
            kind,
            retry: None,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Overrides the retry policy for this stage.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the stage depends on itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name must not be empty")
                .with_error_info(ContractErrorInfo::new(
                    "CONTRACT-004-EMPTY_NAME",
                    "Stage has an empty name",
                )));
        }

        if self.dependencies.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-SELF_DEP",
                    format!("Stage '{}' lists itself as a dependency", self.name),
                )
                .with_fix_hint("Remove the self-reference from the dependency list."),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStage;

    fn noop() -> Arc<dyn Stage> {
        Arc::new(MockStage::new("s"))
    }

    #[test]
    fn test_stage_spec_defaults() {
        let spec = StageSpec::new("s", noop());
        assert!(spec.dependencies.is_empty());
        assert_eq!(spec.kind, StageKind::Work);
        assert!(spec.retry.is_none());
    }

    #[test]
    fn test_stage_spec_dependencies() {
        let spec = StageSpec::new("b", noop())
            .with_dependencies(["a"])
            .with_dependency("c");
        assert_eq!(spec.dependencies.len(), 2);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = StageSpec::new("a", noop()).with_dependency("a").validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-SELF_DEP"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = StageSpec::new(" ", noop()).validate().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY_NAME"));
    }
}
