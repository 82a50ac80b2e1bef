use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::context::PipelineContext;
use crate::error::{ErrorKind, IngestError, IngestResult};

/// A single stage in a pipeline
///
/// Each stage reads its inputs from the pipeline context, talks to an
/// external collaborator, and writes its outputs back. Stages are executed
/// sequentially by the pipeline executor.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use covid_ingest::error::IngestResult;
/// use covid_ingest::pipeline::{PipelineContext, PipelineStage};
///
/// struct MyStage;
///
/// #[async_trait]
/// impl PipelineStage for MyStage {
///     async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()> {
///         context.set_metadata("greeting", "hello");
///         Ok(())
///     }
///
///     fn name(&self) -> &str {
///         "My Stage"
///     }
/// }
/// ```
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Execute this stage
    ///
    /// A returned error fails the stage. For gating stages that also stops
    /// the pipeline.
    async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()>;

    /// Get stage name for logging and results
    fn name(&self) -> &str;

    /// Whether a failure of this stage aborts the run
    fn is_gating(&self) -> bool {
        true
    }

    /// Called before execute() - checks the context holds the stage inputs
    fn pre_execute(&self, _context: &PipelineContext) -> IngestResult<()> {
        Ok(())
    }
}

/// Result of a pipeline stage execution
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Stage name
    pub stage_name: String,

    /// Whether the stage succeeded
    pub success: bool,

    /// Whether a failure of this stage stops the run
    pub gating: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Classification of the failure
    pub error_kind: Option<ErrorKind>,

    /// Duration of execution
    pub duration: Duration,
}

impl StageResult {
    /// Create a successful stage result
    pub fn success(stage_name: impl Into<String>, gating: bool, duration: Duration) -> Self {
        Self {
            stage_name: stage_name.into(),
            success: true,
            gating,
            error: None,
            error_kind: None,
            duration,
        }
    }

    /// Create a failed stage result
    pub fn failure(
        stage_name: impl Into<String>,
        gating: bool,
        error: &IngestError,
        duration: Duration,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            success: false,
            gating,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            duration,
        }
    }
}

/// Result of a complete pipeline execution
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// Pipeline name
    pub pipeline_name: String,

    /// Whether every gating stage succeeded
    pub success: bool,

    /// Results from each attempted stage, in order
    pub stage_results: Vec<StageResult>,

    /// Total duration
    pub total_duration: Duration,

    /// Error message if failed
    pub error: Option<String>,
}

impl PipelineResult {
    /// Create a successful pipeline result
    pub fn success(
        pipeline_name: impl Into<String>,
        stage_results: Vec<StageResult>,
        total_duration: Duration,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            success: true,
            stage_results,
            total_duration,
            error: None,
        }
    }

    /// Create a failed pipeline result
    pub fn failure(
        pipeline_name: impl Into<String>,
        stage_results: Vec<StageResult>,
        error: impl Into<String>,
        total_duration: Duration,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            success: false,
            stage_results,
            total_duration,
            error: Some(error.into()),
        }
    }

    /// Number of stages that were attempted
    pub fn executed_stages(&self) -> usize {
        self.stage_results.len()
    }

    /// The gating stage that stopped the run (if any)
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| !r.success && r.gating)
    }

    /// Non-gating stages that failed without affecting the outcome
    pub fn warnings(&self) -> impl Iterator<Item = &StageResult> {
        self.stage_results.iter().filter(|r| !r.success && !r.gating)
    }
}
