use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::dataset::{Dataset, DatasetSource};
use crate::error::IngestResult;
use crate::pipeline::{PipelineContext, PipelineStage};

/// Stage that fetches and parses the dataset
///
/// A non-2xx response or a parse error fails the stage; there is no partial
/// result.
///
/// # Context Outputs
/// - dataset (taken by the staging stage)
/// - dataset summary (row count, date range, distinct locations, nulls)
/// - metadata `source`
pub struct DownloadStage {
    source: Arc<dyn DatasetSource>,
}

impl DownloadStage {
    pub fn new(source: Arc<dyn DatasetSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PipelineStage for DownloadStage {
    async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()> {
        let location = self.source.describe();
        info!(run_id = %context.run_id(), source = %location, "Downloading dataset");

        let body = self.source.fetch().await?;
        info!(run_id = %context.run_id(), bytes = body.len(), "Download complete");

        let dataset = Dataset::from_bytes(&body)?;
        let summary = dataset.summary();

        info!(run_id = %context.run_id(), records = summary.row_count, "Total records");
        info!(
            run_id = %context.run_id(),
            "Date range: {} to {}",
            summary.min_date.map(|d| d.to_string()).unwrap_or_else(|| "n/a".into()),
            summary.max_date.map(|d| d.to_string()).unwrap_or_else(|| "n/a".into())
        );
        info!(
            run_id = %context.run_id(),
            locations = summary.distinct_locations,
            "Distinct locations"
        );
        info!(run_id = %context.run_id(), nulls = summary.null_values, "Missing values");

        context.set_metadata("source", location);
        context.set_summary(summary);
        context.set_dataset(dataset);

        Ok(())
    }

    fn name(&self) -> &str {
        "Download Dataset"
    }
}
