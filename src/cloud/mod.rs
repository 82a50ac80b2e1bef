//! Object store and warehouse contracts
//!
//! The pipeline only talks to the cloud through [`ObjectStore`] and
//! [`Warehouse`]. Two implementations exist: Cloud Storage + BigQuery over
//! their REST APIs, and in-process stand-ins for dry runs and tests.

pub mod auth;
pub mod bigquery;
pub mod factory;
pub mod gcs;
pub mod memory;
pub mod rest;

pub use auth::{AmbientCredentials, StaticToken, TokenProvider};
pub use bigquery::BigQueryWarehouse;
pub use factory::CloudClients;
pub use gcs::GcsObjectStore;
pub use memory::{MemoryObjectStore, MemoryWarehouse};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, IngestResult};
use crate::quality::QualityQuery;
use crate::schema::TableSchema;

/// Prefix under which raw files are staged
pub const STAGING_PREFIX: &str = "raw";

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Object key for a run started at `started_at`: `raw/covid_data_YYYYMMDD_HHMMSS.csv`
pub fn staging_key(started_at: DateTime<Utc>) -> String {
    format!(
        "{}/covid_data_{}.csv",
        STAGING_PREFIX,
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/// `gs://` URI of an object
pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("gs://{}/{}", bucket, key)
}

/// Split a `gs://bucket/key` URI
pub fn parse_object_uri(uri: &str) -> IngestResult<(&str, &str)> {
    uri.strip_prefix("gs://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .ok_or_else(|| IngestError::LoadJobFailed(format!("Invalid source URI: {}", uri)))
}

/// A fully written, immutable staged object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedObject {
    pub bucket: String,
    pub key: String,

    /// Size of the uploaded body
    pub size: u64,
}

impl StagedObject {
    /// Location reference handed to the load stage
    pub fn uri(&self) -> String {
        object_uri(&self.bucket, &self.key)
    }

    /// Last path segment of the key
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// `project.dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Parse `project.dataset.table`
    pub fn parse(s: &str) -> IngestResult<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(Self::new(*project, *dataset, *table))
            }
            _ => Err(IngestError::ConfigError(format!(
                "Expected project.dataset.table, got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Outcome of an idempotent create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Csv,
}

/// What a load job does with rows already in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace existing contents
    WriteTruncate,

    /// Add to existing contents
    WriteAppend,

    /// Fail unless the table is empty
    WriteEmpty,
}

/// Options for a bulk load from a staged object
#[derive(Debug, Clone, PartialEq)]
pub struct LoadJobConfig {
    pub source_format: SourceFormat,
    pub skip_leading_rows: u32,
    pub autodetect: bool,
    pub write_disposition: WriteDisposition,
    pub allow_quoted_newlines: bool,
    pub allow_jagged_rows: bool,

    /// Declared schema; staged columns are laid out to match it
    pub schema: TableSchema,
}

impl LoadJobConfig {
    /// CSV with one header row, replacing the table contents
    pub fn csv_replace(schema: TableSchema) -> Self {
        Self {
            source_format: SourceFormat::Csv,
            skip_leading_rows: 1,
            autodetect: true,
            write_disposition: WriteDisposition::WriteTruncate,
            allow_quoted_newlines: true,
            allow_jagged_rows: true,
            schema,
        }
    }
}

/// Terminal state of a successful load job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobOutcome {
    pub job_id: String,

    /// Rows written, when the warehouse reports it
    pub output_rows: Option<u64>,
}

/// Untyped query result: column names plus nullable string cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Cell `column` of row `row`; `None` for NULL or unknown column
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Bucket-and-blob store used for staging
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> IngestResult<bool>;

    async fn create_bucket(&self, bucket: &str) -> IngestResult<()>;

    /// Write a new object. Fails with `ObjectAlreadyExists` instead of overwriting.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> IngestResult<StagedObject>;
}

/// Schema'd table store with bulk loads and the canned quality queries
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Project the client is bound to
    fn project_id(&self) -> &str;

    /// Names of the datasets visible to the configured identity
    async fn list_datasets(&self) -> IngestResult<Vec<String>>;

    /// Create the dataset of `table` if absent
    async fn ensure_dataset(&self, table: &TableId) -> IngestResult<Creation>;

    /// Create `table` with `schema` if absent
    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> IngestResult<Creation>;

    /// Submit a load job and wait for it to reach a terminal state
    async fn load_from_uri(
        &self,
        source_uri: &str,
        table: &TableId,
        config: &LoadJobConfig,
    ) -> IngestResult<LoadJobOutcome>;

    async fn table_row_count(&self, table: &TableId) -> IngestResult<u64>;

    async fn run_quality_query(
        &self,
        table: &TableId,
        query: &QualityQuery,
    ) -> IngestResult<RowSet>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_staging_key_format() {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        assert_eq!(staging_key(started_at), "raw/covid_data_20240309_070502.csv");
    }

    #[test]
    fn test_staging_keys_differ_per_second() {
        let first = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        let second = first + chrono::Duration::seconds(1);
        assert_ne!(staging_key(first), staging_key(second));
    }

    #[test]
    fn test_staged_object_uri_and_filename() {
        let staged = StagedObject {
            bucket: "bucket".to_string(),
            key: "raw/covid_data_20240309_070502.csv".to_string(),
            size: 10,
        };
        assert_eq!(staged.uri(), "gs://bucket/raw/covid_data_20240309_070502.csv");
        assert_eq!(staged.filename(), "covid_data_20240309_070502.csv");
        assert_eq!(
            parse_object_uri(&staged.uri()).unwrap(),
            ("bucket", "raw/covid_data_20240309_070502.csv")
        );
    }

    #[test]
    fn test_parse_object_uri_rejects_garbage() {
        assert!(parse_object_uri("s3://bucket/key").is_err());
        assert!(parse_object_uri("gs://bucket").is_err());
        assert!(parse_object_uri("gs:///key").is_err());
    }

    #[test]
    fn test_table_id_parse_and_display() {
        let id = TableId::parse("proj.covid_staging.raw_covid_data").unwrap();
        assert_eq!(id.project, "proj");
        assert_eq!(id.dataset, "covid_staging");
        assert_eq!(id.to_string(), "proj.covid_staging.raw_covid_data");
        assert!(TableId::parse("proj.table").is_err());
        assert!(TableId::parse("a..c").is_err());
    }

    #[test]
    fn test_load_config_defaults() {
        let config = LoadJobConfig::csv_replace(crate::schema::covid_schema());
        assert_eq!(config.skip_leading_rows, 1);
        assert!(config.autodetect);
        assert!(config.allow_quoted_newlines);
        assert!(config.allow_jagged_rows);
        assert_eq!(config.write_disposition, WriteDisposition::WriteTruncate);
        assert_eq!(
            serde_json::to_value(config.write_disposition).unwrap(),
            "WRITE_TRUNCATE"
        );
    }

    #[test]
    fn test_row_set_cell_lookup() {
        let rows = RowSet::new(
            vec!["location".into(), "max_cases".into()],
            vec![vec![Some("Albania".into()), None]],
        );
        assert_eq!(rows.cell(0, "location"), Some("Albania"));
        assert_eq!(rows.cell(0, "max_cases"), None);
        assert_eq!(rows.cell(0, "missing"), None);
        assert_eq!(rows.cell(1, "location"), None);
    }
}
