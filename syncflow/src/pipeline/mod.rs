//! Pipeline definition and execution.
//!
//! This module provides:
//! - Steps and the dependency graph
//! - Sequential and concurrent schedulers with retry
//! - Run statistics and results
//! - State snapshots and resume
//! - The default migration pipeline

mod concurrent;
mod defaults;
mod graph;
mod persistence;
mod retry;
mod runner;
mod stats;
mod step;

#[cfg(test)]
mod integration_tests;

pub use defaults::{build_default_pipeline, DEFAULT_STEP_NAMES};
pub use graph::DependencyGraph;
pub use persistence::{cancel_persisted, PersistedStep, PipelineState};
pub use retry::{should_retry, BackoffPolicy};
pub use runner::{generate_pipeline_id, Pipeline, PIPELINE_DLQ_ENTITY};
pub use stats::{ErrorRecord, PipelineResult, PipelineStats, StatsReport};
pub use step::{step_id_from_name, FailurePolicy, Step, StepState, CRITICAL_STEP_IDS};
