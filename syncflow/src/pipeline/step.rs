//! Step definitions.

use crate::core::PipelineStatus;
use crate::executors::Executor;
use crate::utils::{elapsed_secs, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Step ids whose failure stops the whole pipeline by default.
pub const CRITICAL_STEP_IDS: [&str; 2] = ["step_test_connections", "step_sync_categories"];

/// Derives a step id from its name: `"Sync Categories"` becomes
/// `"step_sync_categories"`.
#[must_use]
pub fn step_id_from_name(name: &str) -> String {
    format!("step_{}", name.to_lowercase().replace(' ', "_"))
}

/// What the scheduler does once a step has exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the pipeline.
    Halt,
    /// Settle the branch as failed; independent steps keep running.
    #[default]
    Continue,
}

impl FailurePolicy {
    /// Default policy for a step id.
    #[must_use]
    pub fn for_step_id(step_id: &str) -> Self {
        if CRITICAL_STEP_IDS.contains(&step_id) {
            Self::Halt
        } else {
            Self::Continue
        }
    }
}

/// Runtime state of a step, mutated only by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    /// Current status.
    pub status: PipelineStatus,
    /// When the latest attempt started.
    pub start_time: Option<Timestamp>,
    /// When the step settled.
    pub end_time: Option<Timestamp>,
    /// Last error message.
    pub error: Option<String>,
    /// Number of executor invocations.
    pub attempts: u32,
}

impl StepState {
    /// A skipped step carrying an error was blocked by a failed dependency,
    /// unlike a disabled one. Blocked steps do not satisfy dependents.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.status == PipelineStatus::Skipped && self.error.is_some()
    }
}

impl Default for StepState {
    fn default() -> Self {
        Self {
            status: PipelineStatus::Pending,
            start_time: None,
            end_time: None,
            error: None,
            attempts: 0,
        }
    }
}

/// A named unit of work in a pipeline.
#[derive(Debug, Clone)]
pub struct Step {
    id: String,
    name: String,
    executor: Executor,
    dependencies: Vec<String>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    enabled: bool,
    params: Map<String, Value>,
    failure_policy: FailurePolicy,
    pub(crate) state: StepState,
}

impl Step {
    /// Creates a step. The id is derived from the name.
    #[must_use]
    pub fn new(name: impl Into<String>, executor: Executor) -> Self {
        let name = name.into();
        let id = step_id_from_name(&name);
        let failure_policy = FailurePolicy::for_step_id(&id);

        Self {
            id,
            name,
            executor,
            dependencies: Vec::new(),
            timeout: None,
            retries: None,
            enabled: true,
            params: Map::new(),
            failure_policy,
            state: StepState::default(),
        }
    }

    /// Sets the dependency ids. Duplicates are dropped, order is kept.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies.clear();
        for dep in deps {
            self = self.with_dependency(dep);
        }
        self
    }

    /// Adds a dependency id.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Sets the timeout for a single attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the timeout in seconds.
    #[must_use]
    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    /// Sets the number of retries after the first attempt.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Enables or disables the step. Disabled steps are skipped.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Disables the step.
    #[must_use]
    pub fn disabled(self) -> Self {
        self.enabled(false)
    }

    /// Replaces the parameter map.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Sets one parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Marks the step as critical (`Halt`) or not (`Continue`).
    #[must_use]
    pub fn critical(self, critical: bool) -> Self {
        self.with_failure_policy(if critical {
            FailurePolicy::Halt
        } else {
            FailurePolicy::Continue
        })
    }

    /// Returns the step id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the executor.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Returns the dependency ids in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Returns the explicit timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the explicit retry count, if any.
    #[must_use]
    pub const fn retries(&self) -> Option<u32> {
        self.retries
    }

    /// Returns true if the step is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the parameters.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Returns the failure policy.
    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Returns true if a failure halts the pipeline.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.failure_policy == FailurePolicy::Halt
    }

    /// Returns the runtime state.
    #[must_use]
    pub const fn state(&self) -> &StepState {
        &self.state
    }

    /// Returns the current status.
    #[must_use]
    pub const fn status(&self) -> PipelineStatus {
        self.state.status
    }

    /// Returns the number of attempts made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.state.attempts
    }

    /// Returns the last error.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    /// Seconds between start and end of the latest attempt.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f64> {
        match (&self.state.start_time, &self.state.end_time) {
            (Some(start), Some(end)) => Some(elapsed_secs(start, end)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Executor {
        Executor::from_fn("noop", |_p| Ok(Value::Null))
    }

    #[test]
    fn test_id_from_name() {
        assert_eq!(step_id_from_name("Sync Categories"), "step_sync_categories");
        assert_eq!(step_id_from_name("Process DLQ"), "step_process_dlq");
    }

    #[test]
    fn test_defaults() {
        let step = Step::new("Sync Products", noop());

        assert_eq!(step.id(), "step_sync_products");
        assert!(step.is_enabled());
        assert_eq!(step.timeout(), None);
        assert_eq!(step.retries(), None);
        assert_eq!(step.status(), PipelineStatus::Pending);
        assert_eq!(step.attempts(), 0);
        assert!(!step.is_critical());
        assert!(step.duration_secs().is_none());
    }

    #[test]
    fn test_critical_ids_halt_by_default() {
        assert!(Step::new("Test Connections", noop()).is_critical());
        assert!(Step::new("Sync Categories", noop()).is_critical());
        assert!(!Step::new("Sync Categories", noop()).critical(false).is_critical());
        assert!(Step::new("Generate Report", noop()).critical(true).is_critical());
    }

    #[test]
    fn test_dependencies_deduplicated_in_order() {
        let step = Step::new("Process DLQ", noop())
            .with_dependencies(["step_b", "step_a", "step_b"])
            .with_dependency("step_a");

        assert_eq!(step.dependencies(), ["step_b", "step_a"]);
    }

    #[test]
    fn test_builder_settings() {
        let step = Step::new("Sync Products", noop())
            .with_timeout_secs(3600)
            .with_retries(1)
            .with_param("batch_size", json!(50))
            .with_param("max_pages", Value::Null)
            .disabled();

        assert_eq!(step.timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(step.retries(), Some(1));
        assert_eq!(step.params().get("batch_size"), Some(&json!(50)));
        assert!(!step.is_enabled());
    }
}
