//! # Syncflow
//!
//! A pipeline orchestration engine for migrating catalog and customer data
//! between e-commerce platforms.
//!
//! Syncflow provides:
//!
//! - **Step-based execution**: named steps wrapping executors, with dependencies
//! - **Sequential and concurrent schedulers**: retry with exponential backoff,
//!   per-step failure policies and timeouts
//! - **Dead letter queue**: failed items batched to JSON files, CSV export, replay
//! - **State persistence**: snapshots on interruption and resume
//! - **Event-driven observability**: lifecycle events and structured tracing
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use syncflow::prelude::*;
//!
//! let registry = ExecutorRegistry::new();
//! // register one executor per default step name...
//!
//! let mut pipeline = Pipeline::new(SyncflowConfig::from_env()?)?;
//! build_default_pipeline(&mut pipeline, &registry)?;
//!
//! let result = pipeline.run(false).await?;
//! result.save(&pipeline.config().report_dir)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod dlq;
pub mod errors;
pub mod events;
pub mod executors;
pub mod observability;
pub mod pipeline;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{LogConfig, SyncflowConfig};
    pub use crate::core::PipelineStatus;
    pub use crate::dlq::DeadLetterQueue;
    pub use crate::errors::{
        DlqError, DuplicateStepError, PipelineConfigError, StateError, SyncflowError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executors::{
        AsyncExecutor, BlockingExecutor, Executor, ExecutorRegistry, ExecutorResult, StepParams,
    };
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        build_default_pipeline, FailurePolicy, Pipeline, PipelineResult, PipelineState, Step,
    };
    pub use crate::utils::{iso_timestamp, Timestamp};
}
