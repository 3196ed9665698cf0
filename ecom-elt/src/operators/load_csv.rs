//! Bulk-loads CSV objects into a warehouse table.

use super::render_in;
use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::errors::EltError;
use crate::stages::Stage;
use crate::storage::{ObjectRef, ObjectStore, StorageError};
use crate::templating::render;
use crate::warehouse::{LoadJob, TableRef, Warehouse, WriteDisposition};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Loads one or more CSV objects from a bucket into a table.
#[derive(Clone)]
pub struct LoadCsvStage {
    name: String,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    bucket: String,
    source_objects: Vec<String>,
    destination: TableRef,
    skip_leading_rows: u32,
    autodetect: bool,
    write_disposition: WriteDisposition,
    expected_columns: Vec<String>,
    source_from: Option<String>,
}

impl fmt::Debug for LoadCsvStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCsvStage")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("source_objects", &self.source_objects)
            .field("destination", &self.destination)
            .field("write_disposition", &self.write_disposition)
            .field("source_from", &self.source_from)
            .finish_non_exhaustive()
    }
}

impl LoadCsvStage {
    /// A truncating, autodetecting load with one header row.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        bucket: impl Into<String>,
        source_objects: Vec<String>,
        destination: TableRef,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            warehouse,
            bucket: bucket.into(),
            source_objects,
            destination,
            skip_leading_rows: 1,
            autodetect: true,
            write_disposition: WriteDisposition::WriteTruncate,
            expected_columns: Vec::new(),
            source_from: None,
        }
    }

    #[must_use]
    pub fn with_skip_leading_rows(mut self, rows: u32) -> Self {
        self.skip_leading_rows = rows;
        self
    }

    #[must_use]
    pub fn with_autodetect(mut self, autodetect: bool) -> Self {
        self.autodetect = autodetect;
        self
    }

    #[must_use]
    pub fn with_write_disposition(mut self, disposition: WriteDisposition) -> Self {
        self.write_disposition = disposition;
        self
    }

    /// Fails the load when the file lacks any of these columns.
    #[must_use]
    pub fn with_expected_columns(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.expected_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Loads the object reported by upstream stage `stage` (its `bucket` and
    /// `object` outputs) instead of rendering `source_objects`.
    #[must_use]
    pub fn with_source_from(mut self, stage: impl Into<String>) -> Self {
        self.source_from = Some(stage.into());
        self
    }

    /// The destination table.
    #[must_use]
    pub fn destination(&self) -> &TableRef {
        &self.destination
    }

    fn upstream_object(ctx: &StageContext, upstream: &str) -> Result<ObjectRef, EltError> {
        let field = |key: &str| -> Result<String, EltError> {
            ctx.inputs()
                .get_value(upstream, key)?
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    EltError::StageExecution(format!(
                        "Upstream stage '{upstream}' did not report '{key}'"
                    ))
                })
        };
        Ok(ObjectRef::new(field("bucket")?, field("object")?))
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, EltError> {
        let objects = match &self.source_from {
            Some(upstream) => vec![Self::upstream_object(ctx, upstream)?],
            None => {
                let mut objects = Vec::with_capacity(self.source_objects.len());
                for template in &self.source_objects {
                    objects.push(ObjectRef::new(&self.bucket, render_in(ctx, template)?));
                }
                objects
            }
        };

        let mut source_uris = Vec::with_capacity(objects.len());
        for object in &objects {
            if !self.store.exists(object).await? {
                return Err(StorageError::NotFound(object.uri()).into());
            }
            source_uris.push(self.store.read_uri(object)?);
        }

        let job = LoadJob {
            source_uris,
            destination: self.destination.clone(),
            skip_leading_rows: self.skip_leading_rows,
            autodetect: self.autodetect,
            write_disposition: self.write_disposition,
            expected_columns: self.expected_columns.clone(),
        };
        let stats = self.warehouse.load_csv(&job).await?;

        info!(
            table = %self.destination,
            rows = stats.output_rows.unwrap_or(0),
            job_id = %stats.job_id,
            "CSV loaded"
        );

        let mut data = HashMap::new();
        data.insert(
            "source_uris".to_string(),
            serde_json::json!(objects.iter().map(ObjectRef::uri).collect::<Vec<_>>()),
        );
        data.insert("table".to_string(), serde_json::json!(self.destination.to_string()));
        data.insert("rows".to_string(), serde_json::json!(stats.output_rows));
        data.insert("job_id".to_string(), serde_json::json!(stats.job_id));
        data.insert(
            "write_disposition".to_string(),
            serde_json::json!(self.write_disposition),
        );
        Ok(StageOutput::ok(data))
    }
}

#[async_trait]
impl Stage for LoadCsvStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Load
    }

    fn describe(&self, vars: &HashMap<String, String>) -> String {
        let sources: Vec<String> = self
            .source_objects
            .iter()
            .map(|t| match render(t, vars) {
                Ok(name) => ObjectRef::new(&self.bucket, name).uri(),
                Err(e) => format!("<{e}>"),
            })
            .collect();
        format!(
            "load {} -> {} ({})",
            sources.join(", "),
            self.destination,
            self.write_disposition
        )
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.run(ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!(stage = %self.name, table = %self.destination, error = %e, "Load failed");
                StageOutput::fail(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StageInputs;
    use crate::events::NoOpEventSink;
    use crate::storage::MockObjectStore;
    use crate::testing::{pipeline_context, sample_csv, stage_context, TestBucket};
    use crate::warehouse::{DuckDbWarehouse, MockWarehouse, WarehouseError};
    use chrono::NaiveDate;
    use std::collections::HashSet;

    const OBJECT: &str = "raw/ingestion_dt={{ ds }}/file.csv";

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 2).unwrap()
    }

    fn raw_table() -> TableRef {
        "proj-test.ecom_raw.raw_online_retail".parse().unwrap()
    }

    #[tokio::test]
    async fn test_loads_rendered_object() {
        let bucket = TestBucket::new().await;
        bucket.put("raw/ingestion_dt=2026-01-02/file.csv", sample_csv().as_bytes()).await;
        let warehouse = Arc::new(DuckDbWarehouse::open_in_memory().unwrap());
        let stage = LoadCsvStage::new(
            "load_raw",
            bucket.store(),
            warehouse.clone(),
            &bucket.name,
            vec![OBJECT.to_string()],
            raw_table(),
        )
        .with_expected_columns(crate::sql::RAW_COLUMNS);

        let output = stage.execute(&stage_context("load_raw", day())).await;

        assert!(output.is_success(), "{:?}", output.error);
        let rows = warehouse.row_count(&raw_table()).await.unwrap();
        assert_eq!(output.get("rows"), Some(&serde_json::json!(rows)));
        assert_eq!(output.get("write_disposition"), Some(&serde_json::json!("WRITE_TRUNCATE")));
    }

    #[tokio::test]
    async fn test_missing_object_fails_without_loading() {
        let bucket = TestBucket::new().await;
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_load_csv().never();
        let stage = LoadCsvStage::new(
            "load_raw",
            bucket.store(),
            Arc::new(warehouse),
            &bucket.name,
            vec![OBJECT.to_string()],
            raw_table(),
        );

        let output = stage.execute(&stage_context("load_raw", day())).await;

        assert!(output.error.unwrap().contains("ingestion_dt=2026-01-02"));
    }

    #[tokio::test]
    async fn test_builds_job_from_settings() {
        let mut store = MockObjectStore::new();
        store.expect_exists().returning(|_| Ok(true));
        store
            .expect_read_uri()
            .returning(|obj| Ok(format!("/data/{}", obj.name)));
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_load_csv()
            .withf(|job| {
                job.source_uris == vec!["/data/raw/ingestion_dt=2026-01-02/file.csv".to_string()]
                    && job.skip_leading_rows == 2
                    && !job.autodetect
                    && job.write_disposition == WriteDisposition::WriteAppend
            })
            .times(1)
            .returning(|job| {
                Ok(crate::warehouse::JobStats {
                    job_id: "job_1".to_string(),
                    destination: Some(job.destination.to_string()),
                    output_rows: Some(10),
                    duration_ms: 1.0,
                })
            });

        let stage = LoadCsvStage::new(
            "load_raw",
            Arc::new(store),
            Arc::new(warehouse),
            "b-1",
            vec![OBJECT.to_string()],
            raw_table(),
        )
        .with_skip_leading_rows(2)
        .with_autodetect(false)
        .with_write_disposition(WriteDisposition::WriteAppend);

        let output = stage.execute(&stage_context("load_raw", day())).await;
        assert_eq!(output.get("rows"), Some(&serde_json::json!(10)));
        assert_eq!(output.get("job_id"), Some(&serde_json::json!("job_1")));
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails() {
        let mut store = MockObjectStore::new();
        store.expect_exists().returning(|_| Ok(true));
        store.expect_read_uri().returning(|obj| Ok(obj.name.clone()));
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_load_csv().returning(|job| {
            Err(WarehouseError::SchemaMismatch {
                table: job.destination.to_string(),
                missing: vec!["Customer ID".to_string()],
            })
        });

        let stage = LoadCsvStage::new(
            "load_raw",
            Arc::new(store),
            Arc::new(warehouse),
            "b-1",
            vec![OBJECT.to_string()],
            raw_table(),
        );

        let output = stage.execute(&stage_context("load_raw", day())).await;
        assert!(output.error.unwrap().contains("missing expected columns"));
    }

    /// A `load_raw` context downstream of a copy that reported `output`.
    fn context_after_copy(output: &[(&str, &str)]) -> StageContext {
        let data = output
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::json!(v)))
            .collect();
        let outputs = HashMap::from([("copy_source_to_today".to_string(), data)]);
        let inputs = StageInputs::new(
            outputs,
            HashSet::from(["copy_source_to_today".to_string()]),
            "load_raw",
            true,
        );
        StageContext::new(pipeline_context(day(), Arc::new(NoOpEventSink)), "load_raw", inputs)
    }

    fn mock_store_expecting(name: &'static str) -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store
            .expect_exists()
            .withf(move |obj| obj.bucket == "b-copied" && obj.name == name)
            .returning(|_| Ok(true));
        store.expect_read_uri().returning(|obj| Ok(format!("/data/{}", obj.name)));
        store
    }

    #[tokio::test]
    async fn test_loads_object_reported_upstream() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_load_csv()
            .withf(|job| job.source_uris == vec!["/data/copied/today.csv".to_string()])
            .times(1)
            .returning(|job| {
                Ok(crate::warehouse::JobStats {
                    job_id: "job_2".to_string(),
                    destination: Some(job.destination.to_string()),
                    output_rows: Some(4),
                    duration_ms: 1.0,
                })
            });
        let stage = LoadCsvStage::new(
            "load_raw",
            Arc::new(mock_store_expecting("copied/today.csv")),
            Arc::new(warehouse),
            "b-1",
            vec![OBJECT.to_string()],
            raw_table(),
        )
        .with_source_from("copy_source_to_today");

        let ctx =
            context_after_copy(&[("bucket", "b-copied"), ("object", "copied/today.csv")]);
        let output = stage.execute(&ctx).await;

        assert!(output.is_success(), "{:?}", output.error);
        assert_eq!(
            output.get("source_uris"),
            Some(&serde_json::json!(["gs://b-copied/copied/today.csv"]))
        );
    }

    #[tokio::test]
    async fn test_missing_upstream_object_fails() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_load_csv().never();
        let stage = LoadCsvStage::new(
            "load_raw",
            Arc::new(MockObjectStore::new()),
            Arc::new(warehouse),
            "b-1",
            vec![OBJECT.to_string()],
            raw_table(),
        )
        .with_source_from("copy_source_to_today");

        let output = stage
            .execute(&context_after_copy(&[("bucket", "b-copied")]))
            .await;

        assert!(output.error.unwrap().contains("did not report 'object'"));
    }

    #[tokio::test]
    async fn test_undeclared_upstream_is_rejected() {
        let mut warehouse = MockWarehouse::new();
        warehouse.expect_load_csv().never();
        let stage = LoadCsvStage::new(
            "load_raw",
            Arc::new(MockObjectStore::new()),
            Arc::new(warehouse),
            "b-1",
            vec![OBJECT.to_string()],
            raw_table(),
        )
        .with_source_from("some_other_task");

        let output = stage
            .execute(&context_after_copy(&[
                ("bucket", "b-copied"),
                ("object", "copied/today.csv"),
            ]))
            .await;

        assert!(output.error.unwrap().contains("Undeclared dependency"));
    }

    #[test]
    fn test_describe() {
        let stage = LoadCsvStage::new(
            "load_raw",
            Arc::new(MockObjectStore::new()),
            Arc::new(MockWarehouse::new()),
            "b-1",
            vec![OBJECT.to_string()],
            raw_table(),
        );
        let vars = HashMap::from([("ds".to_string(), "2026-01-02".to_string())]);
        assert_eq!(
            stage.describe(&vars),
            "load gs://b-1/raw/ingestion_dt=2026-01-02/file.csv -> proj-test.ecom_raw.raw_online_retail (WRITE_TRUNCATE)"
        );
        assert_eq!(stage.kind(), StageKind::Load);
    }
}
