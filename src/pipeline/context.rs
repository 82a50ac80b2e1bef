use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::cloud::{StagedObject, TableId};
use crate::dataset::{Dataset, DatasetSummary};
use crate::error::{IngestError, IngestResult};
use crate::quality::QualityReport;

/// Pipeline context that holds data passed between stages
///
/// The downloaded dataset and the staged object are single-owner handoffs:
/// the download stage puts the dataset here, the staging stage takes it out
/// and leaves the [`StagedObject`] as the only reference to the uploaded
/// bytes.
///
/// # Example
/// ```
/// use covid_ingest::pipeline::PipelineContext;
///
/// let mut context = PipelineContext::new();
/// context.set_metadata("source", "http://localhost/data.csv");
///
/// assert!(context.dataset().is_err());
/// assert_eq!(context.get_metadata("source"), Some("http://localhost/data.csv"));
/// ```
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Identifier of this run, attached to every log line
    run_id: Uuid,

    /// Wall-clock start of the run; names the staged object
    started_at: DateTime<Utc>,

    /// Stage currently executing
    current_stage: Option<(usize, String)>,

    dataset: Option<Dataset>,
    summary: Option<DatasetSummary>,
    staged: Option<StagedObject>,
    table: Option<TableId>,
    loaded_rows: Option<u64>,
    quality: Option<QualityReport>,

    /// Metadata about the pipeline execution
    metadata: HashMap<String, String>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    /// Create a context for a run starting now
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    /// Create a context for a run that started at `started_at`
    pub fn started_at(started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            current_stage: None,
            dataset: None,
            summary: None,
            staged: None,
            table: None,
            loaded_rows: None,
            quality: None,
            metadata: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record the stage about to run (zero-based index)
    pub fn enter_stage(&mut self, index: usize, name: impl Into<String>) {
        self.current_stage = Some((index, name.into()));
    }

    pub fn current_stage(&self) -> Option<(usize, &str)> {
        self.current_stage
            .as_ref()
            .map(|(index, name)| (*index, name.as_str()))
    }

    pub fn set_dataset(&mut self, dataset: Dataset) {
        self.dataset = Some(dataset);
    }

    pub fn dataset(&self) -> IngestResult<&Dataset> {
        self.dataset
            .as_ref()
            .ok_or(IngestError::MissingContext("dataset"))
    }

    /// Move the dataset out of the context
    pub fn take_dataset(&mut self) -> IngestResult<Dataset> {
        self.dataset
            .take()
            .ok_or(IngestError::MissingContext("dataset"))
    }

    pub fn set_summary(&mut self, summary: DatasetSummary) {
        self.summary = Some(summary);
    }

    pub fn summary(&self) -> Option<&DatasetSummary> {
        self.summary.as_ref()
    }

    pub fn set_staged(&mut self, staged: StagedObject) {
        self.staged = Some(staged);
    }

    pub fn staged(&self) -> IngestResult<&StagedObject> {
        self.staged
            .as_ref()
            .ok_or(IngestError::MissingContext("staged object"))
    }

    pub fn set_table(&mut self, table: TableId) {
        self.table = Some(table);
    }

    pub fn table(&self) -> IngestResult<&TableId> {
        self.table
            .as_ref()
            .ok_or(IngestError::MissingContext("target table"))
    }

    pub fn set_loaded_rows(&mut self, rows: u64) {
        self.loaded_rows = Some(rows);
    }

    pub fn loaded_rows(&self) -> Option<u64> {
        self.loaded_rows
    }

    pub fn set_quality(&mut self, report: QualityReport) {
        self.quality = Some(report);
    }

    pub fn quality(&self) -> Option<&QualityReport> {
        self.quality.as_ref()
    }

    /// Set metadata
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Get metadata
    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Get all metadata
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}
