//! DAG definitions.
//!
//! A DAG pairs scheduling metadata ([`DagDefinition`]) with a function that
//! assembles its tasks into a [`StageGraph`](crate::pipeline::StageGraph).

pub mod ecom_elt_daily;


pub use ecom_elt_daily::EcomEltDaily;

use crate::config::{ConfigError, DagConfig};
use crate::pipeline::StageGraph;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How often a DAG runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Schedule {
    /// One run per calendar day (UTC), covering the previous day.
    #[serde(rename = "@daily")]
    Daily,
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("@daily"),
        }
    }
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "@daily" | "0 0 * * *" => Ok(Self::Daily),
            other => Err(format!("unsupported schedule '{other}' (expected @daily)")),
        }
    }
}

/// Scheduling metadata of a DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DagDefinition {
    pub dag_id: String,
    pub owner: String,
    pub schedule: Schedule,
    pub catchup: bool,
    pub tags: Vec<String>,
    pub retries: usize,
    #[serde(rename = "retry_delay_secs", serialize_with = "serialize_secs")]
    pub retry_delay: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

impl DagDefinition {
    /// Builds the definition from the `dag` config section.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for an unsupported schedule.
    pub fn from_config(config: &DagConfig) -> Result<Self, ConfigError> {
        let schedule = config
            .schedule
            .parse::<Schedule>()
            .map_err(|reason: String| ConfigError::Invalid {
                field: "dag.schedule".to_string(),
                reason,
            })?;
        Ok(Self {
            dag_id: config.dag_id.clone(),
            owner: config.owner.clone(),
            schedule,
            catchup: config.catchup,
            tags: config.tags.clone(),
            retries: config.retries,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    /// The most recent fully elapsed interval as of `now`.
    ///
    /// A daily run for date D starts once D has ended, so this is the day
    /// before `now` in UTC.
    #[must_use]
    pub fn latest_logical_date(&self, now: DateTime<Utc>) -> NaiveDate {
        match self.schedule {
            Schedule::Daily => {
                let today = now.date_naive();
                today.checked_sub_days(Days::new(1)).unwrap_or(today)
            }
        }
    }

    /// Logical dates a scheduler should run now, given the last completed one.
    ///
    /// Without catchup only the latest interval is run, whatever was missed.
    #[must_use]
    pub fn due_dates(&self, last_run: Option<NaiveDate>, now: DateTime<Utc>) -> Vec<NaiveDate> {
        let latest = self.latest_logical_date(now);
        match last_run {
            Some(last) if last >= latest => Vec::new(),
            Some(last) if self.catchup => last
                .iter_days()
                .skip(1)
                .take_while(|d| *d <= latest)
                .collect(),
            _ => vec![latest],
        }
    }
}

/// Tasks of `graph` in execution order with what each will touch.
#[must_use]
pub fn plan(graph: &StageGraph, vars: &HashMap<String, String>) -> serde_json::Value {
    let tasks: Vec<serde_json::Value> = graph
        .stages()
        .map(|spec| {
            let mut upstream: Vec<&String> = spec.dependencies.iter().collect();
            upstream.sort();
            serde_json::json!({
                "task_id": spec.name,
                "kind": spec.kind,
                "upstream": upstream,
                "retries": graph.retry_for(&spec.name).retries(),
                "action": spec.runner.describe(vars),
            })
        })
        .collect();

    serde_json::json!({
        "dag_id": graph.name(),
        "tasks": tasks,
    })
}
