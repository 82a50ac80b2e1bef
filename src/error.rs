use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Central error type for the ingest pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    // ============================================================================
    // Connectivity Errors
    // ============================================================================
    #[error("Warehouse unreachable: {0}")]
    WarehouseUnreachable(String),

    #[error("Bucket unavailable: {0}")]
    BucketUnavailable(String),

    // ============================================================================
    // Download Errors
    // ============================================================================
    #[error("Failed to download dataset: {0}")]
    DownloadFailed(String),

    #[error("Dataset source returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to parse dataset: {0}")]
    DatasetParse(String),

    #[error("Dataset is missing required column: {0}")]
    MissingColumn(String),

    // ============================================================================
    // Staging Errors
    // ============================================================================
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Staged object already exists: {0}")]
    ObjectAlreadyExists(String),

    #[error("Failed to encode dataset: {0}")]
    DatasetEncode(String),

    // ============================================================================
    // Warehouse Errors
    // ============================================================================
    #[error("Failed to create table: {0}")]
    TableCreationFailed(String),

    #[error("Load job failed: {0}")]
    LoadJobFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Unexpected query result: {0}")]
    UnexpectedRows(String),

    // ============================================================================
    // Credential Errors
    // ============================================================================
    #[error("Credentials unavailable: {0}")]
    CredentialsUnavailable(String),

    // ============================================================================
    // Pipeline Errors
    // ============================================================================
    #[error("Required context value not found: {0}")]
    MissingContext(&'static str),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Coarse classification of failures, one per pipeline concern
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Download,
    Upload,
    Schema,
    LoadJob,
    QualityCheck,
    Credentials,
    Configuration,
    Internal,
}

impl IngestError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::WarehouseUnreachable(_) | IngestError::BucketUnavailable(_) => {
                ErrorKind::Connectivity
            }
            IngestError::DownloadFailed(_)
            | IngestError::HttpStatus { .. }
            | IngestError::DatasetParse(_)
            | IngestError::MissingColumn(_) => ErrorKind::Download,
            IngestError::UploadFailed(_)
            | IngestError::ObjectAlreadyExists(_)
            | IngestError::DatasetEncode(_) => ErrorKind::Upload,
            IngestError::TableCreationFailed(_) => ErrorKind::Schema,
            IngestError::LoadJobFailed(_) => ErrorKind::LoadJob,
            IngestError::QueryFailed(_) | IngestError::UnexpectedRows(_) => {
                ErrorKind::QualityCheck
            }
            IngestError::CredentialsUnavailable(_) => ErrorKind::Credentials,
            IngestError::ConfigError(_) => ErrorKind::Configuration,
            IngestError::MissingContext(_)
            | IngestError::PipelineError(_)
            | IngestError::HttpClient(_) => ErrorKind::Internal,
        }
    }
}

impl From<figment::Error> for IngestError {
    fn from(err: figment::Error) -> Self {
        IngestError::ConfigError(err.to_string())
    }
}

// Helper type alias for Results
pub type IngestResult<T> = Result<T, IngestError>;
