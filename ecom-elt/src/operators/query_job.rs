//! Submits one SQL statement as a warehouse job.

use super::render_in;
use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::EltError;
use crate::stages::Stage;
use crate::templating::{render, TemplateError};
use crate::warehouse::{QueryJob, TableRef, Warehouse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs a templated SQL statement that materializes a table.
#[derive(Clone)]
pub struct QueryJobStage {
    name: String,
    warehouse: Arc<dyn Warehouse>,
    sql: String,
    destination: Option<TableRef>,
}

impl fmt::Debug for QueryJobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryJobStage")
            .field("name", &self.name)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

impl QueryJobStage {
    /// Creates a query stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        warehouse: Arc<dyn Warehouse>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            warehouse,
            sql: sql.into(),
            destination: None,
        }
    }

    /// Sets the table the statement writes.
    #[must_use]
    pub fn with_destination(mut self, table: TableRef) -> Self {
        self.destination = Some(table);
        self
    }

    /// The statement with placeholders rendered.
    ///
    /// # Errors
    ///
    /// Returns a template error for unknown or malformed placeholders.
    pub fn rendered_sql(&self, vars: &HashMap<String, String>) -> Result<String, TemplateError> {
        render(&self.sql, vars)
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, EltError> {
        let sql = render_in(ctx, &self.sql)?;
        debug!(stage = %self.name, sql = %sql, "Submitting query job");

        let stats = self
            .warehouse
            .run_query(&QueryJob {
                sql,
                destination: self.destination.clone(),
            })
            .await?;

        info!(
            table = %stats.destination.as_deref().unwrap_or("-"),
            rows = stats.output_rows.unwrap_or(0),
            job_id = %stats.job_id,
            "Query job done"
        );

        let mut data = HashMap::new();
        data.insert("job_id".to_string(), serde_json::json!(stats.job_id));
        data.insert("table".to_string(), serde_json::json!(stats.destination));
        data.insert("rows".to_string(), serde_json::json!(stats.output_rows));
        Ok(StageOutput::ok(data))
    }
}

#[async_trait]
impl Stage for QueryJobStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn describe(&self, _vars: &HashMap<String, String>) -> String {
        match &self.destination {
            Some(table) => format!("query -> {table}"),
            None => "query".to_string(),
        }
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.run(ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!(stage = %self.name, error = %e, "Query job failed");
                StageOutput::fail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stage_context;
    use crate::warehouse::{DuckDbWarehouse, MockWarehouse, WarehouseError};
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()
    }

    #[tokio::test]
    async fn test_runs_rendered_sql() {
        let warehouse = Arc::new(DuckDbWarehouse::open_in_memory().unwrap());
        let table: TableRef = "proj-test.ecom_ml.dates".parse().unwrap();
        let stage = QueryJobStage::new(
            "build",
            warehouse.clone(),
            format!(
                "CREATE OR REPLACE TABLE {} AS SELECT DATE '{{{{ ds }}}}' AS d;",
                table.sql_ident()
            ),
        )
        .with_destination(table.clone());

        let output = stage.execute(&stage_context("build", day())).await;

        assert!(output.is_success(), "{:?}", output.error);
        assert_eq!(output.get("rows"), Some(&serde_json::json!(1)));
        assert_eq!(output.get("table"), Some(&serde_json::json!("proj-test.ecom_ml.dates")));
        let d: String = warehouse
            .with_connection(|conn| {
                conn.query_row("SELECT CAST(d AS VARCHAR) FROM ecom_ml.dates", [], |r| r.get(0))
            })
            .await
            .unwrap();
        assert_eq!(d, "2026-01-02");
    }

    #[tokio::test]
    async fn test_query_failure_fails_stage() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_run_query()
            .times(1)
            .returning(|_| Err(WarehouseError::Query("Catalog Error: no such table".to_string())));
        let stage = QueryJobStage::new("build", Arc::new(warehouse), "SELECT 1");

        let output = stage.execute(&stage_context("build", day())).await;

        assert_eq!(
            output.error.as_deref(),
            Some("Query job failed: Catalog Error: no such table")
        );
    }

    #[tokio::test]
    async fn test_bad_template_never_submits() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_run_query().never();
        let stage = QueryJobStage::new("build", Arc::new(warehouse), "SELECT '{{ tomorrow }}'");

        let output = stage.execute(&stage_context("build", day())).await;
        assert!(output.is_failure());
    }

    #[test]
    fn test_rendered_sql() {
        let stage = QueryJobStage::new(
            "build",
            Arc::new(MockWarehouse::new()),
            "SELECT '{{ ds_nodash }}'",
        );
        let vars = HashMap::from([("ds_nodash".to_string(), "20260102".to_string())]);
        assert_eq!(stage.rendered_sql(&vars).unwrap(), "SELECT '20260102'");
        assert_eq!(stage.describe(&vars), "query");
    }
}
