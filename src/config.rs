//! Configuration for the ingest pipeline.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! The config file is `covid-ingest.toml` in the working directory, if present,
//! or the path named by `COVID_INGEST_CONFIG`, which must exist. Environment
//! variables use the `COVID_INGEST_` prefix (`COVID_INGEST_PROJECT_ID`,
//! `COVID_INGEST_BACKEND`, ...).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cloud::TableId;
use crate::error::{IngestError, IngestResult};

pub const DEFAULT_PROJECT_ID: &str = "data-engineering-bootcamp";
pub const DEFAULT_BUCKET_NAME: &str = "data-eng-bootcamp-covid-raw";
pub const DEFAULT_DATASET_URL: &str =
    "https://raw.githubusercontent.com/owid/covid-19-data/master/public/data/owid-covid-data.csv";
pub const DEFAULT_TARGET_DATASET: &str = "covid_staging";
pub const DEFAULT_TARGET_TABLE: &str = "raw_covid_data";

const CONFIG_FILE_NAME: &str = "covid-ingest.toml";
const CONFIG_PATH_VAR: &str = "COVID_INGEST_CONFIG";
const ENV_PREFIX: &str = "COVID_INGEST_";

/// Which implementation backs the object store and warehouse
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Cloud Storage + BigQuery
    Gcp,

    /// In-process stand-ins (dry runs, tests)
    Memory,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cloud project that owns the bucket and the warehouse dataset
    pub project_id: String,

    /// Bucket holding the staged CSV objects
    pub bucket_name: String,

    /// URL of the CSV dataset
    pub dataset_source_url: String,

    /// Warehouse dataset of the target table
    pub target_dataset: String,

    /// Target table name
    pub target_table: String,

    pub backend: Backend,

    /// Poll interval while waiting on load jobs and queries
    pub load_poll_interval_ms: u64,

    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT_ID.to_string(),
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            dataset_source_url: DEFAULT_DATASET_URL.to_string(),
            target_dataset: DEFAULT_TARGET_DATASET.to_string(),
            target_table: DEFAULT_TARGET_TABLE.to_string(),
            backend: Backend::Gcp,
            load_poll_interval_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Fully qualified target table
    pub fn table_id(&self) -> TableId {
        TableId::new(&self.project_id, &self.target_dataset, &self.target_table)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.load_poll_interval_ms)
    }

    /// Reject configurations that would fail late in the run
    pub fn validate(&self) -> IngestResult<()> {
        let required = [
            ("project_id", &self.project_id),
            ("bucket_name", &self.bucket_name),
            ("target_dataset", &self.target_dataset),
            ("target_table", &self.target_table),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(IngestError::ConfigError(format!("{} must not be empty", name)));
            }
        }

        let url = url::Url::parse(&self.dataset_source_url).map_err(|e| {
            IngestError::ConfigError(format!(
                "Invalid dataset_source_url '{}': {}",
                self.dataset_source_url, e
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(IngestError::ConfigError(format!(
                "dataset_source_url must be http(s), got '{}'",
                url.scheme()
            )));
        }

        if self.load_poll_interval_ms == 0 {
            return Err(IngestError::ConfigError(
                "load_poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load configuration from defaults, the config file and the environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `COVID_INGEST_`)
/// 2. Config file (`$COVID_INGEST_CONFIG` or `./covid-ingest.toml`)
/// 3. Built-in defaults
pub fn load_config() -> IngestResult<PipelineConfig> {
    let explicit = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
    let config: PipelineConfig = figment_from(config_source(explicit)?)
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from defaults and an optional TOML file only.
///
/// A path that is given must exist.
pub fn load_config_file(path: Option<&Path>) -> IngestResult<PipelineConfig> {
    let source = match path {
        Some(path) => ConfigSource::Required(require_file(path.to_path_buf())?),
        None => ConfigSource::Defaults,
    };
    let config: PipelineConfig = figment_from(source).extract()?;
    config.validate()?;
    Ok(config)
}

/// Where the config file layer comes from
#[derive(Debug, PartialEq, Eq)]
enum ConfigSource {
    /// Named explicitly; checked to exist
    Required(PathBuf),
    /// `./covid-ingest.toml`, merged only when present
    Optional(PathBuf),
    Defaults,
}

fn config_source(explicit: Option<PathBuf>) -> IngestResult<ConfigSource> {
    match explicit {
        Some(path) => Ok(ConfigSource::Required(require_file(path)?)),
        None => Ok(ConfigSource::Optional(PathBuf::from(CONFIG_FILE_NAME))),
    }
}

fn require_file(path: PathBuf) -> IngestResult<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(IngestError::ConfigError(format!(
            "config file {} does not exist",
            path.display()
        )))
    }
}

fn figment_from(source: ConfigSource) -> Figment {
    let figment = Figment::from(Serialized::defaults(PipelineConfig::default()));
    match source {
        ConfigSource::Required(path) => figment.merge(Toml::file(path)),
        ConfigSource::Optional(path) if path.exists() => figment.merge(Toml::file(path)),
        ConfigSource::Optional(_) | ConfigSource::Defaults => figment,
    }
}
