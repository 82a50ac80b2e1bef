use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::cloud::{ObjectStore, Warehouse};
use crate::error::IngestResult;
use crate::pipeline::{PipelineContext, PipelineStage};

/// Stage that verifies the warehouse and object store are reachable
///
/// Creates the staging bucket when it does not exist yet. Nothing else is
/// mutated.
///
/// # Context Outputs
/// - metadata `bucket_created` (`"true"` / `"false"`)
pub struct ConnectivityStage {
    object_store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    bucket: String,
}

impl ConnectivityStage {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            object_store,
            warehouse,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl PipelineStage for ConnectivityStage {
    async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()> {
        let datasets = self.warehouse.list_datasets().await?;
        info!(
            run_id = %context.run_id(),
            project = self.warehouse.project_id(),
            datasets = datasets.len(),
            "Warehouse reachable"
        );

        let created = if self.object_store.bucket_exists(&self.bucket).await? {
            info!(run_id = %context.run_id(), bucket = %self.bucket, "Bucket exists");
            false
        } else {
            self.object_store.create_bucket(&self.bucket).await?;
            info!(run_id = %context.run_id(), bucket = %self.bucket, "Created bucket");
            true
        };
        context.set_metadata("bucket_created", created.to_string());

        Ok(())
    }

    fn name(&self) -> &str {
        "Connectivity Check"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MemoryObjectStore, MemoryWarehouse};

    fn stage(objects: Arc<MemoryObjectStore>) -> ConnectivityStage {
        let warehouse = Arc::new(MemoryWarehouse::new("proj", objects.clone()));
        ConnectivityStage::new(objects, warehouse, "covid-raw")
    }

    #[tokio::test]
    async fn test_creates_missing_bucket() {
        let objects = Arc::new(MemoryObjectStore::new());
        let mut context = PipelineContext::new();

        stage(objects.clone()).execute(&mut context).await.unwrap();

        assert!(objects.bucket_exists("covid-raw").await.unwrap());
        assert_eq!(context.get_metadata("bucket_created"), Some("true"));
    }

    #[tokio::test]
    async fn test_existing_bucket_untouched() {
        let objects = Arc::new(MemoryObjectStore::with_bucket("covid-raw"));
        let mut context = PipelineContext::new();

        stage(objects).execute(&mut context).await.unwrap();

        assert_eq!(context.get_metadata("bucket_created"), Some("false"));
    }

    #[test]
    fn test_stage_is_gating() {
        let stage = stage(Arc::new(MemoryObjectStore::new()));
        assert!(stage.is_gating());
        assert_eq!(stage.name(), "Connectivity Check");
    }
}
