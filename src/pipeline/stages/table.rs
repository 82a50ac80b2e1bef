use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::cloud::{Creation, TableId, Warehouse};
use crate::error::IngestResult;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::schema::TableSchema;

/// Stage that creates the target dataset and table if absent
///
/// # Context Outputs
/// - target table id
pub struct EnsureTableStage {
    warehouse: Arc<dyn Warehouse>,
    table: TableId,
    schema: TableSchema,
}

impl EnsureTableStage {
    pub fn new(warehouse: Arc<dyn Warehouse>, table: TableId, schema: TableSchema) -> Self {
        Self {
            warehouse,
            table,
            schema,
        }
    }
}

#[async_trait]
impl PipelineStage for EnsureTableStage {
    async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()> {
        if self.warehouse.ensure_dataset(&self.table).await? == Creation::Created {
            info!(
                run_id = %context.run_id(),
                dataset = %self.table.dataset,
                "Created dataset"
            );
        }

        match self.warehouse.create_table(&self.table, &self.schema).await? {
            Creation::Created => info!(
                run_id = %context.run_id(),
                table = %self.table,
                fields = self.schema.len(),
                "Created table"
            ),
            Creation::AlreadyExists => {
                info!(run_id = %context.run_id(), table = %self.table, "Table already exists")
            }
        }

        context.set_table(self.table.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "Ensure Target Table"
    }
}
