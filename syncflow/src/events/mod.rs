//! Lifecycle event emission.
//!
//! The scheduler reports `pipeline.*` and `step.*` events to an
//! [`EventSink`] attached to the pipeline.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event emitted when a run starts.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Event emitted when a run ends as completed.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// Event emitted when a run ends as failed.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// Event emitted when a run is interrupted.
pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
/// Event emitted before each attempt.
pub const STEP_STARTED: &str = "step.started";
/// Event emitted when a step completes.
pub const STEP_COMPLETED: &str = "step.completed";
/// Event emitted for every failed attempt.
pub const STEP_FAILED: &str = "step.failed";
/// Event emitted before a retry backoff.
pub const STEP_RETRYING: &str = "step.retrying";
/// Event emitted when a step is skipped.
pub const STEP_SKIPPED: &str = "step.skipped";
