//! Stages that drive the object store and the warehouse.
//!
//! Each operator renders its templated arguments against the attempt's
//! variables, submits one job and reports what it touched in its output.

mod copy_object;
mod load_csv;
mod query_job;

pub use copy_object::CopyObjectStage;
pub use load_csv::LoadCsvStage;
pub use query_job::QueryJobStage;

use crate::context::StageContext;
use crate::templating::{render, TemplateError};

/// Renders `template` with the variables of this attempt.
fn render_in(ctx: &StageContext, template: &str) -> Result<String, TemplateError> {
    render(template, &ctx.template_vars())
}
