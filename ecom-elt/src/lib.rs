//! # ecom-elt
//!
//! A daily e-commerce ELT pipeline built on a small stage/DAG runtime.
//!
//! One run, for one logical date, executes a linear chain of five tasks:
//!
//! - **copy_source_to_today**: copy the raw CSV drop to a date-partitioned object
//! - **load_raw**: bulk-load that object into the raw table (full replace)
//! - **build_stg**: clean, type and filter order lines
//! - **build_fact_orders**: aggregate lines per invoice
//! - **build_features**: per-customer recency/frequency/monetary features
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ecom_elt::prelude::*;
//!
//! let dag = EcomEltDaily::new(EltConfig::load(None)?)?;
//! let store = Arc::new(LocalObjectStore::new("./data/gcs").await?);
//! let warehouse = Arc::new(DuckDbWarehouse::open("./data/warehouse.duckdb")?);
//!
//! let graph = dag.build(store, warehouse)?;
//! let ctx = Arc::new(dag.context(logical_date, Arc::new(NoOpEventSink)));
//! let result = graph.execute(ctx).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod dags;
pub mod errors;
pub mod events;
pub mod operators;
pub mod pipeline;
pub mod sql;
pub mod stages;
pub mod storage;
pub mod telemetry;
pub mod templating;
pub mod warehouse;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EltConfig;
    pub use crate::context::{
        ExecutionContext, PipelineContext, RunIdentity, StageContext, StageInputs,
    };
    pub use crate::core::{StageKind, StageOutput, StageStatus};
    pub use crate::dags::{DagDefinition, EcomEltDaily};
    pub use crate::errors::{EltError, PipelineValidationError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::operators::{CopyObjectStage, LoadCsvStage, QueryJobStage};
    pub use crate::pipeline::{
        GraphExecutionResult, PipelineBuilder, RetryConfig, StageGraph, StageSpec,
    };
    pub use crate::stages::Stage;
    pub use crate::storage::{LocalObjectStore, ObjectRef, ObjectStore};
    pub use crate::warehouse::{DuckDbWarehouse, TableRef, Warehouse, WriteDisposition};
}
