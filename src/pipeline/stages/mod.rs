//! Pipeline stages for the ingest run
//!
//! This module contains the individual stages that make up the ingest pipeline:
//! 1. ConnectivityStage - Check warehouse and object store, create the bucket
//! 2. DownloadStage - Fetch and parse the dataset, report statistics
//! 3. StageUploadStage - Write the dataset to the object store as CSV
//! 4. EnsureTableStage - Create the target dataset and table if absent
//! 5. LoadStage - Bulk-load the staged object, replacing the table contents
//! 6. QualityStage - Run the read-only quality queries (non-gating)

pub mod connectivity;
pub mod download;
pub mod load;
pub mod quality;
pub mod staging;
pub mod table;

// Re-export stages
pub use connectivity::ConnectivityStage;
pub use download::DownloadStage;
pub use load::LoadStage;
pub use quality::QualityStage;
pub use staging::StageUploadStage;
pub use table::EnsureTableStage;

use std::sync::Arc;

use super::executor::Pipeline;
use crate::cloud::{CloudClients, LoadJobConfig};
use crate::config::PipelineConfig;
use crate::dataset::DatasetSource;
use crate::quality::QualityQuery;
use crate::schema::covid_schema;

pub const PIPELINE_NAME: &str = "covid-ingest";

/// The six-stage ingest pipeline
pub fn ingest_pipeline(
    config: &PipelineConfig,
    source: Arc<dyn DatasetSource>,
    clients: &CloudClients,
) -> Pipeline {
    let schema = covid_schema();

    Pipeline::builder(PIPELINE_NAME)
        .add_stage(ConnectivityStage::new(
            clients.object_store.clone(),
            clients.warehouse.clone(),
            &config.bucket_name,
        ))
        .add_stage(DownloadStage::new(source))
        .add_stage(StageUploadStage::new(
            clients.object_store.clone(),
            &config.bucket_name,
            schema.clone(),
        ))
        .add_stage(EnsureTableStage::new(
            clients.warehouse.clone(),
            config.table_id(),
            schema.clone(),
        ))
        .add_stage(LoadStage::new(
            clients.warehouse.clone(),
            LoadJobConfig::csv_replace(schema),
        ))
        .add_stage(QualityStage::new(
            clients.warehouse.clone(),
            QualityQuery::standard_checks(),
        ))
        .build()
}
