//! Fixtures: contexts, a temporary bucket and a sample retail CSV.

use chrono::NaiveDate;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use crate::context::{PipelineContext, RunIdentity, StageContext, StageInputs};
use crate::events::{CollectingEventSink, EventSink};
use crate::storage::{LocalObjectStore, ObjectRef, ObjectStore};

/// A pipeline context for `date` that records events into `sink`.
#[must_use]
pub fn pipeline_context(date: NaiveDate, sink: Arc<dyn EventSink>) -> Arc<PipelineContext> {
    let run = RunIdentity::new("test_dag", date);
    Arc::new(
        PipelineContext::new(run)
            .with_param("project_id", "proj-test")
            .with_event_sink(sink),
    )
}

/// A first-attempt stage context for `date` with no upstream outputs.
#[must_use]
pub fn stage_context(stage: &str, date: NaiveDate) -> StageContext {
    StageContext::new(
        pipeline_context(date, Arc::new(CollectingEventSink::new())),
        stage,
        StageInputs::default(),
    )
}

/// Online-retail rows relative to a 2011-12-09 snapshot.
///
/// - 17850: three lines over two invoices, latest 45 days before the snapshot,
///   one invoice outside the 12 month window
/// - 13047: one order 120 days before the snapshot
/// - 12583: one invoice listing the same product twice
/// - a return (negative quantity), a free line (zero price) and a line
///   without a customer, all of which staging drops
#[must_use]
pub fn sample_csv() -> &'static str {
    "Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country
536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,3,2011-10-25 08:26:00,2.5,17850.0,United Kingdom
536365,71053, WHITE METAL LANTERN ,6,2011-10-25 08:26:00,3.39,17850.0,United Kingdom
536366,22633,HAND WARMERS UNION JACK,6,2010-12-01 08:28:00,1.85,17850.0,United Kingdom
536367,84879,ASSORTED COLOUR BIRD ORNAMENT,32,2011-08-11 08:34:00,1.69,13047.0,United Kingdom
C536379,D,Discount,-1,2011-08-11 09:41:00,27.5,14527.0,United Kingdom
536370,22728,ALARM CLOCK BAKELIKE PINK,24,2011-09-01 08:45:00,3.75,,France
536414,22139,,56,2011-09-01 11:52:00,0.0,14911.0,United Kingdom
536380,22961,JAM MAKING SET PRINTED,24,2011-11-30 09:41:00,1.45,12583.0,France
536380,22961,JAM MAKING SET PRINTED,12,2011-11-30 09:41:00,1.45,12583.0,France
"
}

/// A bucket in a temporary directory.
#[derive(Debug)]
pub struct TestBucket {
    pub name: String,
    store: Arc<LocalObjectStore>,
    _dir: TempDir,
}

impl TestBucket {
    /// Creates an empty bucket named `test-bucket`.
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();
        let name = "test-bucket".to_string();
        store.create_bucket(&name).await.unwrap();
        Self {
            name,
            store: Arc::new(store),
            _dir: dir,
        }
    }

    /// The store as the pipeline sees it.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    #[must_use]
    pub fn local(&self) -> &LocalObjectStore {
        &self.store
    }

    /// Filesystem root holding the bucket directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    fn object(&self, name: &str) -> ObjectRef {
        ObjectRef::new(&self.name, name)
    }

    pub async fn put(&self, name: &str, content: &[u8]) {
        self.store.put_object(&self.object(name), content).await.unwrap();
    }

    pub async fn read(&self, name: &str) -> Vec<u8> {
        let path = self.store.read_uri(&self.object(name)).unwrap();
        tokio::fs::read(path).await.unwrap()
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.store.exists(&self.object(name)).await.unwrap()
    }
}
