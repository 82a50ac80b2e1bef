use std::time::Instant;
use tracing::{error, info, warn};

use super::context::PipelineContext;
use super::core::{PipelineResult, PipelineStage, StageResult};

/// Pipeline executor that runs stages sequentially
///
/// A failing gating stage stops the run; later stages are never attempted.
/// A failing non-gating stage is recorded and the run continues.
///
/// # Example
/// ```ignore
/// let pipeline = Pipeline::builder("my-pipeline")
///     .add_stage(Stage1::new())
///     .add_stage(Stage2::new())
///     .build();
///
/// let mut context = PipelineContext::new();
/// let result = pipeline.execute(&mut context).await;
/// ```
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Execute the pipeline
    pub async fn execute(&self, context: &mut PipelineContext) -> PipelineResult {
        let run_id = context.run_id();
        let total = self.stages.len();
        info!(%run_id, pipeline = %self.name, stages = total, "Starting pipeline");

        let pipeline_start = Instant::now();
        let mut stage_results = Vec::with_capacity(total);

        context.set_metadata("pipeline_name", &self.name);

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_name = stage.name();
            let gating = stage.is_gating();
            context.enter_stage(index, stage_name);

            info!(
                %run_id,
                stage = stage_name,
                "Executing stage {}/{}: {}",
                index + 1,
                total,
                stage_name
            );

            let stage_start = Instant::now();
            let outcome = match stage.pre_execute(context) {
                Ok(()) => stage.execute(context).await,
                Err(e) => Err(e),
            };
            let duration = stage_start.elapsed();

            match outcome {
                Ok(()) => {
                    info!(
                        %run_id,
                        stage = stage_name,
                        "Stage '{}' completed in {:.2}s",
                        stage_name,
                        duration.as_secs_f64()
                    );
                    stage_results.push(StageResult::success(stage_name, gating, duration));
                }
                Err(e) if !gating => {
                    warn!(
                        %run_id,
                        stage = stage_name,
                        kind = ?e.kind(),
                        "Non-gating stage '{}' failed, continuing: {}",
                        stage_name,
                        e
                    );
                    stage_results.push(StageResult::failure(stage_name, gating, &e, duration));
                }
                Err(e) => {
                    error!(
                        %run_id,
                        stage = stage_name,
                        kind = ?e.kind(),
                        "Stage '{}' failed: {}",
                        stage_name,
                        e
                    );
                    stage_results.push(StageResult::failure(stage_name, gating, &e, duration));
                    return PipelineResult::failure(
                        &self.name,
                        stage_results,
                        format!("Pipeline failed at stage '{}': {}", stage_name, e),
                        pipeline_start.elapsed(),
                    );
                }
            }
        }

        let total_duration = pipeline_start.elapsed();
        info!(
            %run_id,
            pipeline = %self.name,
            "Pipeline completed successfully in {:.2}s",
            total_duration.as_secs_f64()
        );

        PipelineResult::success(&self.name, stage_results, total_duration)
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Add a stage to the pipeline
    pub fn add_stage<S: PipelineStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Add a boxed stage to the pipeline
    pub fn add_boxed_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            stages: self.stages,
        }
    }
}
