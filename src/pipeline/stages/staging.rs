use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cloud::{staging_key, ObjectStore, CSV_CONTENT_TYPE};
use crate::error::IngestResult;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::schema::TableSchema;

/// Stage that writes the dataset to the object store as CSV
///
/// The dataset is laid out in schema column order: extra source columns are
/// dropped and absent ones are left empty. The object key is derived from
/// the run start time, and an existing object is never overwritten.
///
/// # Context Requirements
/// - dataset (moved out of the context)
///
/// # Context Outputs
/// - staged object (the only reference the load stage gets)
pub struct StageUploadStage {
    object_store: Arc<dyn ObjectStore>,
    bucket: String,
    schema: TableSchema,
}

impl StageUploadStage {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        schema: TableSchema,
    ) -> Self {
        Self {
            object_store,
            bucket: bucket.into(),
            schema,
        }
    }
}

#[async_trait]
impl PipelineStage for StageUploadStage {
    async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()> {
        let dataset = context.take_dataset()?;
        let columns = self.schema.column_names();

        let missing = dataset.missing_columns(&columns);
        if !missing.is_empty() {
            warn!(
                run_id = %context.run_id(),
                "Dataset lacks schema columns, staging them empty: {}",
                missing.join(", ")
            );
        }
        let dropped = dataset.headers().len() + missing.len() - columns.len();
        if dropped > 0 {
            info!(run_id = %context.run_id(), dropped, "Dropping columns outside the schema");
        }

        let body = dataset.project(&columns).to_csv()?;
        let key = staging_key(context.start_time());

        let staged = self
            .object_store
            .upload(&self.bucket, &key, body, CSV_CONTENT_TYPE)
            .await?;

        info!(
            run_id = %context.run_id(),
            uri = %staged.uri(),
            filename = staged.filename(),
            bytes = staged.size,
            "Staged dataset"
        );
        context.set_staged(staged);

        Ok(())
    }

    fn name(&self) -> &str {
        "Stage to Object Store"
    }

    fn pre_execute(&self, context: &PipelineContext) -> IngestResult<()> {
        context.dataset().map(|_| ())
    }
}
