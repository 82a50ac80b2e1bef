//! Backend selection
//!
//! Client handles are built once per run and handed to every stage by
//! reference; nothing here is global.

use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use super::auth::AmbientCredentials;
use super::bigquery::BigQueryWarehouse;
use super::gcs::GcsObjectStore;
use super::memory::{MemoryObjectStore, MemoryWarehouse};
use super::rest::RestClient;
use super::{ObjectStore, Warehouse};
use crate::config::{Backend, PipelineConfig};
use crate::error::IngestResult;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Object store + warehouse pair used by a run
#[derive(Clone)]
pub struct CloudClients {
    pub object_store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn Warehouse>,
}

impl CloudClients {
    pub fn new(object_store: Arc<dyn ObjectStore>, warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            object_store,
            warehouse,
        }
    }

    /// Build the clients named by `config.backend`
    ///
    /// Construction does not touch the network; credentials are resolved on
    /// the first call.
    pub fn from_config(config: &PipelineConfig) -> IngestResult<Self> {
        debug!(backend = ?config.backend, project = %config.project_id, "Building cloud clients");

        match config.backend {
            Backend::Gcp => {
                let http = Client::builder().user_agent(USER_AGENT).build()?;
                let rest = RestClient::new(http, Arc::new(AmbientCredentials::new()));
                Ok(Self::new(
                    Arc::new(GcsObjectStore::new(rest.clone(), &config.project_id)),
                    Arc::new(BigQueryWarehouse::new(
                        rest,
                        &config.project_id,
                        config.poll_interval(),
                    )),
                ))
            }
            Backend::Memory => Ok(Self::in_memory(&config.project_id)),
        }
    }

    /// Fresh in-process backend with no buckets, datasets or tables
    pub fn in_memory(project_id: &str) -> Self {
        let objects = Arc::new(MemoryObjectStore::new());
        let warehouse = Arc::new(MemoryWarehouse::new(project_id, objects.clone()));
        Self::new(objects, warehouse)
    }
}
