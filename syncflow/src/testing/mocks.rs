//! Mock executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::executors::{AsyncExecutor, Executor, ExecutorResult, StepParams};

/// An executor that records every call and returns a configurable result.
#[derive(Debug)]
pub struct RecordingExecutor {
    name: String,
    output: Mutex<Value>,
    calls: Mutex<Vec<StepParams>>,
}

impl RecordingExecutor {
    /// Creates a recording executor returning `{"ok": true}`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            output: Mutex::new(json!({"ok": true})),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Sets the result to return.
    pub fn set_output(&self, output: Value) {
        *self.output.lock() = output;
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the parameters of each call.
    #[must_use]
    pub fn recorded_params(&self) -> Vec<StepParams> {
        self.calls.lock().clone()
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wraps a shared handle as a step executor.
    #[must_use]
    pub fn executor(self: &Arc<Self>) -> Executor {
        Executor::Cooperative(Arc::clone(self) as Arc<dyn AsyncExecutor>)
    }
}

#[async_trait]
impl AsyncExecutor for RecordingExecutor {
    async fn execute(&self, params: StepParams) -> ExecutorResult {
        self.calls.lock().push(params);
        Ok(self.output.lock().clone())
    }
}

/// An executor that fails a set number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyExecutor {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyExecutor {
    /// Creates an executor failing the first `failures` calls.
    #[must_use]
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wraps a shared handle as a step executor.
    #[must_use]
    pub fn executor(self: &Arc<Self>) -> Executor {
        Executor::Cooperative(Arc::clone(self) as Arc<dyn AsyncExecutor>)
    }
}

#[async_trait]
impl AsyncExecutor for FlakyExecutor {
    async fn execute(&self, _params: StepParams) -> ExecutorResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            anyhow::bail!("transient failure {call}");
        }
        Ok(json!({"calls": call}))
    }
}

/// An executor that always fails.
#[derive(Debug)]
pub struct FailingExecutor {
    error: String,
}

impl FailingExecutor {
    /// Creates a failing executor.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Wraps the executor for a step.
    #[must_use]
    pub fn executor(error: impl Into<String>) -> Executor {
        Executor::cooperative(Self::new(error))
    }
}

#[async_trait]
impl AsyncExecutor for FailingExecutor {
    async fn execute(&self, _params: StepParams) -> ExecutorResult {
        Err(anyhow::anyhow!("{}", self.error))
    }
}

/// An executor that sleeps before succeeding.
#[derive(Debug)]
pub struct SlowExecutor {
    delay: Duration,
}

impl SlowExecutor {
    /// Creates a slow executor.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Wraps a slow executor sleeping `ms` milliseconds.
    #[must_use]
    pub fn executor(ms: u64) -> Executor {
        Executor::cooperative(Self::new(Duration::from_millis(ms)))
    }
}

#[async_trait]
impl AsyncExecutor for SlowExecutor {
    async fn execute(&self, _params: StepParams) -> ExecutorResult {
        tokio::time::sleep(self.delay).await;
        Ok(json!({"slept_ms": u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)}))
    }
}
