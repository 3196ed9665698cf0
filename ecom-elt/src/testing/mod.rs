//! Testing utilities for pipeline and operator tests.
//!
//! This module provides:
//! - Mock stages with call tracking
//! - Contexts, a temporary bucket and sample data

mod fixtures;
mod mocks;

pub use fixtures::{pipeline_context, sample_csv, stage_context, TestBucket};
pub use mocks::{FailingStage, FlakyStage, MockStage};
