//! Batch loader for the Our World in Data COVID-19 dataset
//!
//! One run downloads the CSV, stages it in an object store, makes sure the
//! target table exists, loads the staged file into it (replacing previous
//! contents), and runs a few read-only quality queries.

pub mod cloud;
pub mod config;
pub mod dataset;
pub mod diagnostics;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod quality;
pub mod schema;

use std::sync::Arc;

use cloud::CloudClients;
use config::PipelineConfig;
use dataset::{DatasetSource, HttpDatasetSource};
use error::IngestResult;
use pipeline::{ingest_pipeline, PipelineContext, PipelineResult};

/// Outcome of one ingest run
pub struct IngestRun {
    pub result: PipelineResult,
    pub context: PipelineContext,
}

/// Run the pipeline against the backend named by `config`
pub async fn run(config: &PipelineConfig) -> IngestResult<IngestRun> {
    let clients = CloudClients::from_config(config)?;
    let source = Arc::new(HttpDatasetSource::new(&config.dataset_source_url)?);
    Ok(run_with(config, source, &clients).await)
}

/// Run the pipeline with explicit collaborators
pub async fn run_with(
    config: &PipelineConfig,
    source: Arc<dyn DatasetSource>,
    clients: &CloudClients,
) -> IngestRun {
    let pipeline = ingest_pipeline(config, source, clients);
    let mut context = PipelineContext::new();
    let result = pipeline.execute(&mut context).await;
    IngestRun { result, context }
}
