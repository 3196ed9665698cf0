//! Fully-qualified table references.

use super::WarehouseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static PROJECT_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$").expect("invalid project pattern")
});

static IDENTIFIER_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,1023}$").expect("invalid identifier pattern")
});

/// A `project.dataset.table` reference.
///
/// Datasets become schemas in the warehouse; the project only scopes names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    /// Creates a validated table reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTableRef` if any part is malformed.
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self, WarehouseError> {
        let table_ref = Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        };
        table_ref.validate()?;
        Ok(table_ref)
    }

    /// Parses `dataset.table` or `project.dataset.table`, filling in
    /// `default_project` when the project is omitted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTableRef` if the reference is malformed.
    pub fn parse_with_project(value: &str, default_project: &str) -> Result<Self, WarehouseError> {
        let parts: Vec<&str> = value.split('.').collect();
        match parts.as_slice() {
            [dataset, table] => Self::new(default_project, *dataset, *table),
            [project, dataset, table] => Self::new(*project, *dataset, *table),
            _ => Err(WarehouseError::InvalidTableRef(value.to_string())),
        }
    }

    fn validate(&self) -> Result<(), WarehouseError> {
        let valid = PROJECT_PATTERN.is_match(&self.project)
            && IDENTIFIER_PATTERN.is_match(&self.dataset)
            && IDENTIFIER_PATTERN.is_match(&self.table);
        if valid {
            Ok(())
        } else {
            Err(WarehouseError::InvalidTableRef(self.to_string()))
        }
    }

    /// `"dataset"."table"`, the name the table has inside the warehouse.
    #[must_use]
    pub fn sql_ident(&self) -> String {
        format!("\"{}\".\"{}\"", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableRef {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table] => Self::new(*project, *dataset, *table),
            _ => Err(WarehouseError::InvalidTableRef(s.to_string())),
        }
    }
}
