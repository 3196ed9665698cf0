//! Run identity for tracking pipeline executions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifies one run of a DAG for one logical date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique ID for this pipeline run.
    pub run_id: Uuid,

    /// The DAG this run belongs to.
    pub dag_id: String,

    /// The logical date the run processes (`{{ ds }}`).
    pub logical_date: NaiveDate,
}

impl RunIdentity {
    /// Creates a new run identity with a generated run ID.
    #[must_use]
    pub fn new(dag_id: impl Into<String>, logical_date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dag_id: dag_id.into(),
            logical_date,
        }
    }

    /// Sets a specific run ID.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// The logical date as `YYYY-MM-DD`.
    #[must_use]
    pub fn ds(&self) -> String {
        self.logical_date.format("%Y-%m-%d").to_string()
    }

    /// The logical date as `YYYYMMDD`.
    #[must_use]
    pub fn ds_nodash(&self) -> String {
        self.logical_date.format("%Y%m%d").to_string()
    }

    /// Values available to `{{ name }}` placeholders for this run.
    #[must_use]
    pub fn template_vars(&self) -> HashMap<String, String> {
        HashMap::from([
            ("ds".to_string(), self.ds()),
            ("ds_nodash".to_string(), self.ds_nodash()),
            ("dag_id".to_string(), self.dag_id.clone()),
            ("run_id".to_string(), self.run_id.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_new_generates_unique_ids() {
        let a = RunIdentity::new("dag", date(2025, 12, 28));
        let b = RunIdentity::new("dag", date(2025, 12, 28));
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_ds_formats() {
        let id = RunIdentity::new("dag", date(2026, 1, 5));
        assert_eq!(id.ds(), "2026-01-05");
        assert_eq!(id.ds_nodash(), "20260105");
    }

    #[test]
    fn test_template_vars() {
        let run_id = Uuid::new_v4();
        let id = RunIdentity::new("ecom_elt_daily", date(2026, 1, 5)).with_run_id(run_id);
        let vars = id.template_vars();

        assert_eq!(vars["ds"], "2026-01-05");
        assert_eq!(vars["dag_id"], "ecom_elt_daily");
        assert_eq!(vars["run_id"], run_id.to_string());
    }
}
