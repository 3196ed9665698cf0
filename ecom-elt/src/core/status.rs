//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of external job a stage drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Moves or copies objects inside the object store.
    Transfer,
    /// Bulk-loads a file into a warehouse table.
    Load,
    /// Submits a SQL job that materializes a warehouse table.
    Transform,
    /// Anything else (test stages, hooks).
    #[default]
    Work,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer => write!(f, "transfer"),
            Self::Load => write!(f, "load"),
            Self::Transform => write!(f, "transform"),
            Self::Work => write!(f, "work"),
        }
    }
}

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Ok,
    /// Stage failed after exhausting its retries.
    Fail,
    /// Stage was cancelled before or while running.
    Cancel,
    /// Stage failed an attempt and is waiting to be retried.
    Retry,
    /// Stage never ran because an upstream stage failed.
    UpstreamFailed,
    /// Stage is pending execution.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
            Self::Cancel => write!(f, "cancel"),
            Self::Retry => write!(f, "retry"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Ok | Self::Fail | Self::Cancel | Self::UpstreamFailed
        )
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail | Self::Cancel | Self::UpstreamFailed)
    }
}
