//! Analytical warehouse the pipeline loads into and transforms in.
//!
//! ## Backends
//!
//! - [`DuckDbWarehouse`] - embedded DuckDB database file (or in-memory)
//!
//! Jobs mirror the two job shapes the pipeline submits: a bulk CSV load
//! ([`LoadJob`]) and a SQL statement that materializes a table ([`QueryJob`]).

mod duckdb;
mod table;

pub use self::duckdb::DuckDbWarehouse;
pub use table::TableRef;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("Failed to open warehouse: {0}")]
    Connection(String),

    #[error("Load into {table} failed: {message}")]
    Load { table: String, message: String },

    #[error("Query job failed: {0}")]
    Query(String),

    #[error("Table {table} is missing expected columns: {missing:?}")]
    SchemaMismatch { table: String, missing: Vec<String> },

    #[error("Table {0} is not empty")]
    TableNotEmpty(String),

    #[error("Invalid table reference '{0}'")]
    InvalidTableRef(String),

    #[error("Invalid write disposition '{0}'")]
    InvalidWriteDisposition(String),

    #[error("Warehouse worker failed: {0}")]
    Internal(String),
}

/// Result type for warehouse operations.
pub type Result<T> = std::result::Result<T, WarehouseError>;

/// What a load does with rows already in the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace the table with the loaded rows.
    #[default]
    WriteTruncate,
    /// Add the loaded rows to the table.
    WriteAppend,
    /// Fail unless the table is missing or empty.
    WriteEmpty,
}

impl WriteDisposition {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WriteTruncate => "WRITE_TRUNCATE",
            Self::WriteAppend => "WRITE_APPEND",
            Self::WriteEmpty => "WRITE_EMPTY",
        }
    }
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteDisposition {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WRITE_TRUNCATE" => Ok(Self::WriteTruncate),
            "WRITE_APPEND" => Ok(Self::WriteAppend),
            "WRITE_EMPTY" => Ok(Self::WriteEmpty),
            _ => Err(WarehouseError::InvalidWriteDisposition(s.to_string())),
        }
    }
}

/// A bulk CSV load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadJob {
    /// Locations readable by the warehouse.
    pub source_uris: Vec<String>,
    pub destination: TableRef,
    /// Header rows to skip; the last skipped row supplies column names.
    pub skip_leading_rows: u32,
    /// Infer column types from the data.
    pub autodetect: bool,
    pub write_disposition: WriteDisposition,
    /// Columns the file must provide.
    pub expected_columns: Vec<String>,
}

impl LoadJob {
    /// A truncating, autodetecting load with one header row.
    #[must_use]
    pub fn csv(source_uris: Vec<String>, destination: TableRef) -> Self {
        Self {
            source_uris,
            destination,
            skip_leading_rows: 1,
            autodetect: true,
            write_disposition: WriteDisposition::WriteTruncate,
            expected_columns: Vec::new(),
        }
    }
}

/// A SQL job, optionally materializing a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryJob {
    pub sql: String,
    /// Table the statement writes, used for schema setup and row counts.
    pub destination: Option<TableRef>,
}

/// Statistics of a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: String,
    pub destination: Option<String>,
    /// Rows in the destination after the job.
    pub output_rows: Option<u64>,
    pub duration_ms: f64,
}

/// Warehouse backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Runs a bulk CSV load.
    async fn load_csv(&self, job: &LoadJob) -> Result<JobStats>;

    /// Runs a SQL job.
    async fn run_query(&self, job: &QueryJob) -> Result<JobStats>;

    /// Counts rows in a table.
    async fn row_count(&self, table: &TableRef) -> Result<u64>;

    /// Column names of a table, in order.
    async fn columns(&self, table: &TableRef) -> Result<Vec<String>>;
}

/// Columns of `expected` absent from `actual` (case-insensitive).
#[must_use]
pub fn missing_columns(expected: &[String], actual: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|want| !actual.iter().any(|have| have.eq_ignore_ascii_case(want)))
        .cloned()
        .collect()
}

/// A BigQuery-style job id.
pub(crate) fn new_job_id() -> String {
    format!("job_{}", uuid::Uuid::new_v4().simple())
}
