//! Copies (or moves) one object to a templated destination.

use super::render_in;
use crate::context::StageContext;
use crate::core::{StageKind, StageOutput};
use crate::stages::Stage;
use crate::storage::{ObjectRef, ObjectStore};
use crate::templating::{render, TemplateError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Object copy within or across buckets.
#[derive(Clone)]
pub struct CopyObjectStage {
    name: String,
    store: Arc<dyn ObjectStore>,
    source_bucket: String,
    source_object: String,
    destination_bucket: String,
    destination_object: String,
    move_object: bool,
}

impl fmt::Debug for CopyObjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyObjectStage")
            .field("name", &self.name)
            .field("source_bucket", &self.source_bucket)
            .field("source_object", &self.source_object)
            .field("destination_bucket", &self.destination_bucket)
            .field("destination_object", &self.destination_object)
            .field("move_object", &self.move_object)
            .finish_non_exhaustive()
    }
}

impl CopyObjectStage {
    /// Creates a copy of `source_object` to `destination_object`, both in `bucket`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        source_object: impl Into<String>,
        destination_object: impl Into<String>,
    ) -> Self {
        let bucket = bucket.into();
        Self {
            name: name.into(),
            store,
            source_bucket: bucket.clone(),
            source_object: source_object.into(),
            destination_bucket: bucket,
            destination_object: destination_object.into(),
            move_object: false,
        }
    }

    /// Writes the copy into another bucket.
    #[must_use]
    pub fn with_destination_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.destination_bucket = bucket.into();
        self
    }

    /// Deletes the source after a successful copy.
    #[must_use]
    pub fn with_move_object(mut self, move_object: bool) -> Self {
        self.move_object = move_object;
        self
    }

    /// Source and destination with templates rendered.
    ///
    /// # Errors
    ///
    /// Returns a template error if either object name cannot be rendered.
    pub fn resolve(
        &self,
        vars: &HashMap<String, String>,
    ) -> Result<(ObjectRef, ObjectRef), TemplateError> {
        Ok((
            ObjectRef::new(&self.source_bucket, render(&self.source_object, vars)?),
            ObjectRef::new(&self.destination_bucket, render(&self.destination_object, vars)?),
        ))
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, crate::errors::EltError> {
        let source = ObjectRef::new(&self.source_bucket, render_in(ctx, &self.source_object)?);
        let destination =
            ObjectRef::new(&self.destination_bucket, render_in(ctx, &self.destination_object)?);

        let meta = self.store.copy_object(&source, &destination).await?;

        let moved = self.move_object && source != destination;
        if moved {
            self.store.delete_object(&source).await?;
        }

        info!(
            source = %source,
            destination = %destination,
            bytes = meta.size,
            moved,
            "Object copied"
        );

        let mut data = HashMap::new();
        data.insert("source_uri".to_string(), serde_json::json!(source.uri()));
        data.insert("destination_uri".to_string(), serde_json::json!(destination.uri()));
        data.insert("bucket".to_string(), serde_json::json!(destination.bucket));
        data.insert("object".to_string(), serde_json::json!(destination.name));
        data.insert("bytes".to_string(), serde_json::json!(meta.size));
        data.insert("md5_hash".to_string(), serde_json::json!(meta.md5_hash));
        data.insert("moved".to_string(), serde_json::json!(moved));
        Ok(StageOutput::ok(data))
    }
}

#[async_trait]
impl Stage for CopyObjectStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Transfer
    }

    fn describe(&self, vars: &HashMap<String, String>) -> String {
        let verb = if self.move_object { "move" } else { "copy" };
        match self.resolve(vars) {
            Ok((source, destination)) => format!("{verb} {source} -> {destination}"),
            Err(e) => format!("{verb} <{e}>"),
        }
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        match self.run(ctx).await {
            Ok(output) => output,
            Err(e) => {
                warn!(stage = %self.name, error = %e, "Object copy failed");
                StageOutput::fail(e.to_string())
            }
        }
    }
}
