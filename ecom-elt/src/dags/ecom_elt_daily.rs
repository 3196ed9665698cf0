//! `ecom_elt_daily`: stage the day's retail file, load it and build the
//! staging, fact and feature tables.
//!
//! ```text
//! copy_source_to_today >> load_raw >> build_stg >> build_fact_orders >> build_features
//! ```

use super::DagDefinition;
use crate::config::{ConfigError, EltConfig, Tables};
use crate::context::{PipelineContext, RunIdentity};
use crate::errors::EltError;
use crate::events::EventSink;
use crate::operators::{CopyObjectStage, LoadCsvStage, QueryJobStage};
use crate::pipeline::{PipelineBuilder, StageGraph};
use crate::sql::{fact_orders_sql, features_sql, staging_sql, RAW_COLUMNS};
use crate::storage::ObjectStore;
use crate::templating::render;
use crate::warehouse::{Warehouse, WriteDisposition};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const COPY_SOURCE_TO_TODAY: &str = "copy_source_to_today";
pub const LOAD_RAW: &str = "load_raw";
pub const BUILD_STG: &str = "build_stg";
pub const BUILD_FACT_ORDERS: &str = "build_fact_orders";
pub const BUILD_FEATURES: &str = "build_features";

/// Task ids in chain order.
pub const TASK_IDS: [&str; 5] = [
    COPY_SOURCE_TO_TODAY,
    LOAD_RAW,
    BUILD_STG,
    BUILD_FACT_ORDERS,
    BUILD_FEATURES,
];

/// The daily e-commerce ELT DAG for one configuration.
#[derive(Debug, Clone)]
pub struct EcomEltDaily {
    config: EltConfig,
    tables: Tables,
    definition: DagDefinition,
}

impl EcomEltDaily {
    /// Validates `config` and resolves its tables.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found.
    pub fn new(config: EltConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let tables = config.tables()?;
        let definition = DagDefinition::from_config(&config.dag)?;
        Ok(Self {
            config,
            tables,
            definition,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EltConfig {
        &self.config
    }

    #[must_use]
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    #[must_use]
    pub fn definition(&self) -> &DagDefinition {
        &self.definition
    }

    /// The SQL template a query task submits, or `None` for other tasks.
    #[must_use]
    pub fn task_sql(&self, task_id: &str) -> Option<String> {
        let t = &self.tables;
        match task_id {
            BUILD_STG => Some(staging_sql(&t.raw, &t.staging)),
            BUILD_FACT_ORDERS => Some(fact_orders_sql(&t.staging, &t.fact)),
            BUILD_FEATURES => Some(features_sql(
                &t.fact,
                &t.features,
                self.config.features.snapshot_date,
            )),
            _ => None,
        }
    }

    /// The SQL of a query task rendered for `logical_date`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown task or an unrenderable template.
    pub fn rendered_task_sql(
        &self,
        task_id: &str,
        logical_date: NaiveDate,
    ) -> Result<String, EltError> {
        let sql = self.task_sql(task_id).ok_or_else(|| {
            EltError::StageExecution(format!(
                "'{task_id}' is not a query task of {} (expected one of {BUILD_STG}, {BUILD_FACT_ORDERS}, {BUILD_FEATURES})",
                self.definition.dag_id
            ))
        })?;
        let mut vars = self.template_vars(logical_date);
        vars.insert("task_id".to_string(), task_id.to_string());
        vars.insert("try_number".to_string(), "1".to_string());
        Ok(render(&sql, &vars)?)
    }

    /// Assembles the five-task chain against the given services.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the chain cannot be built.
    pub fn build(
        &self,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Result<StageGraph, EltError> {
        let storage = &self.config.storage;
        let t = &self.tables;

        let copy = CopyObjectStage::new(
            COPY_SOURCE_TO_TODAY,
            store.clone(),
            &storage.bucket,
            &storage.source_object,
            &storage.destination_object,
        )
        .with_move_object(storage.move_object);

        let load = LoadCsvStage::new(
            LOAD_RAW,
            store,
            warehouse.clone(),
            &storage.bucket,
            vec![storage.destination_object.clone()],
            t.raw.clone(),
        )
        .with_skip_leading_rows(1)
        .with_autodetect(true)
        .with_write_disposition(WriteDisposition::WriteTruncate)
        .with_expected_columns(RAW_COLUMNS)
        .with_source_from(COPY_SOURCE_TO_TODAY);

        let stg = QueryJobStage::new(BUILD_STG, warehouse.clone(), staging_sql(&t.raw, &t.staging))
            .with_destination(t.staging.clone());

        let fact = QueryJobStage::new(
            BUILD_FACT_ORDERS,
            warehouse.clone(),
            fact_orders_sql(&t.staging, &t.fact),
        )
        .with_destination(t.fact.clone());

        let features = QueryJobStage::new(
            BUILD_FEATURES,
            warehouse,
            features_sql(&t.fact, &t.features, self.config.features.snapshot_date),
        )
        .with_destination(t.features.clone());

        let graph = PipelineBuilder::new(&self.definition.dag_id)
            .with_default_retry(self.config.retry_config())
            .stage(COPY_SOURCE_TO_TODAY, Arc::new(copy), &[])?
            .stage(LOAD_RAW, Arc::new(load), &[COPY_SOURCE_TO_TODAY])?
            .stage(BUILD_STG, Arc::new(stg), &[LOAD_RAW])?
            .stage(BUILD_FACT_ORDERS, Arc::new(fact), &[BUILD_STG])?
            .stage(BUILD_FEATURES, Arc::new(features), &[BUILD_FACT_ORDERS])?
            .build()?;

        debug!(dag_id = %self.definition.dag_id, stages = graph.stage_count(), "DAG assembled");
        Ok(graph)
    }

    /// A fresh run context for `logical_date`.
    #[must_use]
    pub fn context(&self, logical_date: NaiveDate, sink: Arc<dyn EventSink>) -> PipelineContext {
        let mut ctx = PipelineContext::new(RunIdentity::new(&self.definition.dag_id, logical_date))
            .with_event_sink(sink);
        for (key, value) in self.config.template_params() {
            ctx = ctx.with_param(key, value);
        }
        ctx
    }

    /// Run-level template variables for `logical_date`.
    #[must_use]
    pub fn template_vars(&self, logical_date: NaiveDate) -> HashMap<String, String> {
        let mut vars = RunIdentity::new(&self.definition.dag_id, logical_date).template_vars();
        vars.extend(self.config.template_params());
        vars
    }
}
