//! Layered configuration for the daily ELT DAG.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults ([`EltConfig::default`])
//! 2. an optional TOML file
//! 3. `ECOM_ELT__SECTION__KEY` environment variables

use crate::pipeline::{BackoffStrategy, JitterStrategy, RetryConfig};
use crate::storage::ObjectRef;
use crate::templating::{placeholders, render};
use crate::warehouse::TableRef;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the TOML file.
pub const DEFAULT_CONFIG_PATH: &str = "config/ecom_elt.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ECOM_ELT";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Scheduling and retry settings of the DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    pub dag_id: String,
    pub owner: String,
    /// Extra attempts per task after a failure.
    pub retries: usize,
    /// Delay before the first retry.
    pub retry_delay_secs: u64,
    /// How the delay grows with each further retry.
    pub retry_backoff: BackoffStrategy,
    pub max_retry_delay_secs: u64,
    pub retry_jitter: JitterStrategy,
    pub schedule: String,
    pub catchup: bool,
    pub tags: Vec<String>,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            dag_id: "ecom_elt_daily".to_string(),
            owner: "data".to_string(),
            retries: 1,
            retry_delay_secs: 300,
            retry_backoff: BackoffStrategy::Constant,
            max_retry_delay_secs: 3600,
            retry_jitter: JitterStrategy::None,
            schedule: "@daily".to_string(),
            catchup: false,
            tags: vec![
                "ecommerce".to_string(),
                "elt".to_string(),
                "bigquery".to_string(),
            ],
        }
    }
}

/// Where the raw file drops live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per bucket.
    pub root: PathBuf,
    pub bucket: String,
    pub source_object: String,
    /// Partitioned destination; must contain `{{ ds }}`.
    pub destination_object: String,
    pub move_object: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/gcs"),
            bucket: "gcs-elt-ecom-raw-euw1".to_string(),
            source_object: "raw/online_retail/ingestion_dt=2025-12-28/online_retail_II.csv"
                .to_string(),
            destination_object: "raw/online_retail/ingestion_dt={{ ds }}/online_retail_II.csv"
                .to_string(),
            move_object: false,
        }
    }
}

/// Warehouse location and table names (`dataset.table` or fully qualified).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// DuckDB file, or `:memory:`.
    pub path: String,
    pub raw_table: String,
    pub staging_table: String,
    pub fact_table: String,
    pub features_table: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: "./data/warehouse.duckdb".to_string(),
            raw_table: "ecom_raw.raw_online_retail".to_string(),
            staging_table: "ecom_transformed.stg_online_retail".to_string(),
            fact_table: "ecom_transformed.fact_orders".to_string(),
            features_table: "ecom_ml.features_customer_snapshot".to_string(),
        }
    }
}

/// Feature snapshot settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Fixed reference date; never derived from the run date.
    pub snapshot_date: NaiveDate,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            snapshot_date: NaiveDate::from_ymd_opt(2011, 12, 9).unwrap_or_default(),
        }
    }
}

/// Full configuration of the ELT DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EltConfig {
    pub project_id: String,
    pub dag: DagConfig,
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    pub features: FeaturesConfig,
}

impl Default for EltConfig {
    fn default() -> Self {
        Self {
            project_id: "online-retail-project1".to_string(),
            dag: DagConfig::default(),
            storage: StorageConfig::default(),
            warehouse: WarehouseConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

/// The four tables of the pipeline, resolved against the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub raw: TableRef,
    pub staging: TableRef,
    pub fact: TableRef,
    pub features: TableRef,
}

impl EltConfig {
    /// Loads configuration from defaults, `path` and the process environment.
    ///
    /// A missing file is only an error when `path` was given explicitly.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`EltConfig::load`], reading variables from `env` instead of the
    /// process environment when given.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Self::default())?)
            .add_source(
                ::config::File::from(file)
                    .required(required)
                    .format(::config::FileFormat::Toml),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env.map(|vars| vars.into_iter().collect())),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks ids, bucket and object names, templates and table references.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id_ok = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        };
        if !id_ok(&self.dag.dag_id) {
            return Err(ConfigError::invalid("dag.dag_id", "must be a non-empty identifier"));
        }
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::invalid("project_id", "must not be empty"));
        }

        ObjectRef::new(&self.storage.bucket, "object")
            .validate()
            .map_err(|e| ConfigError::invalid("storage.bucket", e.to_string()))?;

        if !placeholders(&self.storage.destination_object).iter().any(|p| p == "ds") {
            return Err(ConfigError::invalid(
                "storage.destination_object",
                "must contain a {{ ds }} partition",
            ));
        }

        let sample_vars = self.sample_template_vars();
        for (field, template) in [
            ("storage.source_object", &self.storage.source_object),
            ("storage.destination_object", &self.storage.destination_object),
        ] {
            let rendered = render(template, &sample_vars)
                .map_err(|e| ConfigError::invalid(field, e.to_string()))?;
            ObjectRef::new(&self.storage.bucket, rendered)
                .validate()
                .map_err(|e| ConfigError::invalid(field, e.to_string()))?;
        }

        self.tables()?;
        Ok(())
    }

    /// Resolves the configured table names.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for a malformed table reference.
    pub fn tables(&self) -> Result<Tables, ConfigError> {
        let resolve = |field: &str, value: &str| {
            TableRef::parse_with_project(value, &self.project_id)
                .map_err(|e| ConfigError::invalid(field, e.to_string()))
        };
        Ok(Tables {
            raw: resolve("warehouse.raw_table", &self.warehouse.raw_table)?,
            staging: resolve("warehouse.staging_table", &self.warehouse.staging_table)?,
            fact: resolve("warehouse.fact_table", &self.warehouse.fact_table)?,
            features: resolve("warehouse.features_table", &self.warehouse.features_table)?,
        })
    }

    /// Per-task retry policy.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        let dag = &self.dag;
        RetryConfig::from_retries(dag.retries, Duration::from_secs(dag.retry_delay_secs))
            .with_max_delay_ms(dag.max_retry_delay_secs.saturating_mul(1000))
            .with_backoff(dag.retry_backoff)
            .with_jitter(dag.retry_jitter)
    }

    /// Parameters added to every run's template variables.
    #[must_use]
    pub fn template_params(&self) -> HashMap<String, String> {
        HashMap::from([("project_id".to_string(), self.project_id.clone())])
    }

    fn sample_template_vars(&self) -> HashMap<String, String> {
        let run = crate::context::RunIdentity::new(&self.dag.dag_id, self.features.snapshot_date);
        let mut vars = run.template_vars();
        vars.extend(self.template_params());
        vars.insert("task_id".to_string(), "validate".to_string());
        vars.insert("try_number".to_string(), "1".to_string());
        vars
    }
}
