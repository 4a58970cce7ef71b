//! Error types for the syncflow engine.
//!
//! Configuration and persistence problems are surfaced as typed errors.
//! Executor failures are not errors of the engine: they are recorded on the
//! pipeline result and in the dead letter queue.

use crate::core::PipelineStatus;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for syncflow operations.
#[derive(Debug, Error)]
pub enum SyncflowError {
    /// The pipeline's dependency graph is invalid.
    #[error("{0}")]
    Config(#[from] PipelineConfigError),

    /// A step with the same id was already registered.
    #[error("{0}")]
    DuplicateStep(#[from] DuplicateStepError),

    /// `run` was invoked on a pipeline that is already running.
    #[error("Pipeline is already running: {0}")]
    AlreadyRunning(String),

    /// No executor is registered for a step name.
    #[error("No executor registered for step '{0}'")]
    MissingExecutor(String),

    /// A persisted state file could not be used.
    #[error("{0}")]
    State(#[from] StateError),

    /// A dead letter queue operation failed.
    #[error("{0}")]
    Dlq(#[from] DlqError),

    /// Configuration could not be loaded.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when the dependency graph fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineConfigError {
    /// The graph contains a cycle.
    #[error("Pipeline has circular dependencies: {}", path.join(" -> "))]
    Cycle {
        /// The step ids forming the cycle, first id repeated at the end.
        path: Vec<String>,
    },

    /// A step depends on an id that is not part of the pipeline.
    #[error("Dependency '{dependency}' referenced by '{step}' does not exist")]
    MissingDependency {
        /// The step declaring the dependency.
        step: String,
        /// The unknown dependency id.
        dependency: String,
    },
}

impl PipelineConfigError {
    /// Returns the step ids involved in the error.
    #[must_use]
    pub fn steps(&self) -> Vec<String> {
        match self {
            Self::Cycle { path } => path.clone(),
            Self::MissingDependency { step, dependency } => {
                vec![step.clone(), dependency.clone()]
            }
        }
    }
}

/// Error raised when adding a step whose id already exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Step {step_id} already exists")]
pub struct DuplicateStepError {
    /// The duplicated step id.
    pub step_id: String,
}

impl DuplicateStepError {
    /// Creates a new duplicate step error.
    #[must_use]
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
        }
    }
}

/// Errors raised while restoring or rewriting a persisted pipeline state.
#[derive(Debug, Error)]
pub enum StateError {
    /// The persisted pipeline is not in a resumable status.
    #[error("Pipeline {pipeline_id} cannot be resumed from status '{status}'")]
    NotResumable {
        /// The persisted pipeline id.
        pipeline_id: String,
        /// The persisted status.
        status: PipelineStatus,
    },

    /// Resume was requested before the steps were re-registered.
    #[error("Pipeline {0} has no registered steps; add steps before resuming")]
    NoSteps(String),

    /// The state file could not be read or parsed.
    #[error("Invalid state file {path}: {reason}")]
    Invalid {
        /// The offending file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

/// Errors raised by the dead letter queue.
#[derive(Debug, Error)]
pub enum DlqError {
    /// Items must be JSON objects so metadata can be attached.
    #[error("DLQ items must be JSON objects, got {0}")]
    NotAnObject(String),

    /// Writing a batch or export failed.
    #[error("DLQ write failed for {path}: {source}")]
    Write {
        /// Target file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// CSV export failed.
    #[error("DLQ CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error.
    #[error("DLQ serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("DLQ IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, SyncflowError>;
