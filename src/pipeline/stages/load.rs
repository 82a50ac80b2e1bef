use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cloud::{LoadJobConfig, Warehouse};
use crate::error::IngestResult;
use crate::pipeline::{PipelineContext, PipelineStage};

/// Stage that bulk-loads the staged object into the target table
///
/// Waits for the load job to finish. The row count read afterwards is only
/// reported; failing to read it does not fail the stage.
///
/// # Context Requirements
/// - staged object
/// - target table id
///
/// # Context Outputs
/// - loaded row count (when available)
pub struct LoadStage {
    warehouse: Arc<dyn Warehouse>,
    config: LoadJobConfig,
}

impl LoadStage {
    pub fn new(warehouse: Arc<dyn Warehouse>, config: LoadJobConfig) -> Self {
        Self { warehouse, config }
    }
}

#[async_trait]
impl PipelineStage for LoadStage {
    async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()> {
        let uri = context.staged()?.uri();
        let table = context.table()?.clone();

        info!(
            run_id = %context.run_id(),
            source = %uri,
            table = %table,
            disposition = ?self.config.write_disposition,
            "Starting load job"
        );
        let outcome = self
            .warehouse
            .load_from_uri(&uri, &table, &self.config)
            .await?;
        info!(
            run_id = %context.run_id(),
            job_id = %outcome.job_id,
            output_rows = ?outcome.output_rows,
            "Load job finished"
        );

        match self.warehouse.table_row_count(&table).await {
            Ok(rows) => {
                info!(run_id = %context.run_id(), rows, "Loaded rows into {}", table);
                context.set_loaded_rows(rows);
            }
            Err(e) => warn!(run_id = %context.run_id(), "Could not read row count: {}", e),
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "Load Table"
    }

    fn pre_execute(&self, context: &PipelineContext) -> IngestResult<()> {
        context.staged()?;
        context.table()?;
        Ok(())
    }
}
