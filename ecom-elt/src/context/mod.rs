//! Context management for pipeline execution.
//!
//! - Run identity (run id, DAG id, logical date)
//! - Mutable pipeline and stage execution contexts
//! - Strict views of upstream stage outputs

mod execution;
mod identity;
mod inputs;

pub use execution::{ExecutionContext, PipelineContext, StageContext};
pub use identity::RunIdentity;
pub use inputs::StageInputs;
