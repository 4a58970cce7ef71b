//! Testing utilities for syncflow pipelines.
//!
//! Mock executors that count calls, fail on demand or take time.

mod mocks;

pub use mocks::{FailingExecutor, FlakyExecutor, RecordingExecutor, SlowExecutor};
