//! Martflow Runner: pipeline orchestration on top of `martflow-core`.
//!
//! This crate provides:
//! - TOML pipeline configuration with validation and fingerprinting
//! - The step graph with trigger rules, branch skipping and resume planning
//! - A sequential executor with a bounded retry policy
//! - The concrete raw → core → mart steps
//! - Run context persistence and JSON run reports

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod report;
pub mod steps;

pub use config::{ConfigError, PipelineConfig};
pub use context::{ContextError, RunContext};
pub use error::{ErrorKind, StepError};
pub use graph::{GraphError, PipelineGraph, StepId, StepState, TriggerRule};
pub use pipeline::{
    run_pipeline, Execution, Executor, RetryPolicy, RunOptions, StepOutcome, StepRunner,
};
pub use report::{RunOutcome, RunReport, StepRecord};
pub use steps::{wait_for_file, EtlSteps};
