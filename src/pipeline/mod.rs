//! Pipeline pattern implementation for the sequential ingest run
//!
//! This module provides a small pipeline system for executing sequential
//! stages. Each stage can read from and write to a shared context, and the
//! pipeline handles the short-circuit policy, per-stage results and logging.
//!
//! Stages are gating by default: the first failing gating stage ends the
//! run. A stage that overrides [`PipelineStage::is_gating`] to `false` has
//! its failure recorded without changing the outcome.
//!
//! # Example
//! ```ignore
//! let pipeline = Pipeline::builder("my-pipeline")
//!     .add_stage(MyStage)
//!     .build();
//!
//! let mut context = PipelineContext::new();
//! let result = pipeline.execute(&mut context).await;
//! assert!(result.success);
//! ```

pub mod context;
pub mod core;
pub mod executor;
pub mod stages;

// Re-export main types
pub use context::PipelineContext;
pub use self::core::{PipelineResult, PipelineStage, StageResult};
pub use executor::{Pipeline, PipelineBuilder};
pub use stages::ingest_pipeline;
