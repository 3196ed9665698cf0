//! Stage inputs with strictness enforcement.

use crate::errors::UndeclaredDependencyError;
use std::collections::{HashMap, HashSet};

/// Provides an immutable view of prior stage outputs.
///
/// In strict mode, accessing undeclared dependencies raises an error.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    /// The available outputs from prior stages.
    outputs: HashMap<String, HashMap<String, serde_json::Value>>,
    /// The declared dependencies for this stage.
    declared_dependencies: HashSet<String>,
    /// The name of the current stage (for error messages).
    stage_name: String,
    /// Whether strict mode is enabled.
    strict: bool,
}

impl StageInputs {
    /// Creates new stage inputs.
    #[must_use]
    pub fn new(
        outputs: HashMap<String, HashMap<String, serde_json::Value>>,
        declared_dependencies: HashSet<String>,
        stage_name: impl Into<String>,
        strict: bool,
    ) -> Self {
        Self {
            outputs,
            declared_dependencies,
            stage_name: stage_name.into(),
            strict,
        }
    }

    /// Gets a specific value from a stage's output.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredDependencyError` in strict mode if the stage
    /// is not a declared dependency.
    pub fn get_value(
        &self,
        stage: &str,
        key: &str,
    ) -> Result<Option<&serde_json::Value>, UndeclaredDependencyError> {
        if self.strict && !self.declared_dependencies.contains(stage) {
            return Err(UndeclaredDependencyError::new(&self.stage_name, stage));
        }
        Ok(self.outputs.get(stage).and_then(|o| o.get(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(strict: bool) -> StageInputs {
        let mut outputs = HashMap::new();
        outputs.insert(
            "copy_source_to_today".to_string(),
            HashMap::from([("destination_uri".to_string(), serde_json::json!("gs://b/o.csv"))]),
        );
        outputs.insert(
            "other".to_string(),
            HashMap::from([("rows".to_string(), serde_json::json!(3))]),
        );
        StageInputs::new(
            outputs,
            HashSet::from(["copy_source_to_today".to_string()]),
            "load_raw",
            strict,
        )
    }

    #[test]
    fn test_declared_access() {
        let inputs = inputs(true);
        let value = inputs
            .get_value("copy_source_to_today", "destination_uri")
            .unwrap();
        assert_eq!(value, Some(&serde_json::json!("gs://b/o.csv")));
    }

    #[test]
    fn test_strict_rejects_undeclared() {
        let inputs = inputs(true);
        let err = inputs.get_value("other", "rows").unwrap_err();
        assert_eq!(err.stage, "load_raw");
        assert_eq!(err.key, "other");
    }

    #[test]
    fn test_missing_key_is_none() {
        let inputs = inputs(true);
        assert_eq!(inputs.get_value("copy_source_to_today", "rows").unwrap(), None);
    }

    #[test]
    fn test_permissive_allows_undeclared() {
        let inputs = inputs(false);
        assert_eq!(
            inputs.get_value("other", "rows").unwrap(),
            Some(&serde_json::json!(3))
        );
    }
}
