//! Pipeline definition, run bookkeeping and the sequential scheduler.

use super::graph::DependencyGraph;
use super::retry::{should_retry, BackoffPolicy};
use super::stats::{ErrorRecord, PipelineResult, PipelineStats};
use super::step::{FailurePolicy, Step, StepState};
use crate::cancellation::CancellationToken;
use crate::config::SyncflowConfig;
use crate::core::PipelineStatus;
use crate::dlq::DeadLetterQueue;
use crate::errors::{DuplicateStepError, PipelineConfigError, SyncflowError};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::executors::{invoke, Executor, StepParams, WorkerPool};
use crate::utils::{compact_timestamp, iso_timestamp, now_utc};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// DLQ entity receiving step failures.
pub const PIPELINE_DLQ_ENTITY: &str = "pipeline";

/// Generates a pipeline id of the form `pipeline_YYYYmmdd_HHMMSS`.
#[must_use]
pub fn generate_pipeline_id() -> String {
    format!("pipeline_{}", compact_timestamp(&now_utc()))
}

/// How a scheduler loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RunEnd {
    /// Every reachable step settled.
    Drained,
    /// A `Halt` step failed.
    Halted,
    /// Steps remain that can never become ready.
    Deadlocked,
    /// The cancellation token fired.
    Cancelled,
}

/// Outcome of one step in the sequential scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Completed,
    Failed(FailurePolicy),
    Interrupted,
}

/// Everything needed to invoke a step's executor.
#[derive(Debug, Clone)]
pub(super) struct Invocation {
    pub(super) executor: Executor,
    pub(super) params: StepParams,
    pub(super) timeout: Duration,
    pub(super) retries: u32,
    pub(super) enabled: bool,
}

/// A named, ordered set of steps with their run state.
///
/// Steps are added with [`add_step`](Self::add_step) and executed with
/// [`run`](Self::run) (one step at a time) or
/// [`run_concurrent`](Self::run_concurrent). Step failures never surface
/// as `Err`: they are recorded in the result, the error list and the DLQ.
#[derive(Debug)]
pub struct Pipeline {
    pub(super) id: String,
    pub(super) steps: HashMap<String, Step>,
    pub(super) graph: DependencyGraph,
    pub(super) stats: PipelineStats,
    pub(super) results: Map<String, Value>,
    pub(super) errors: Vec<ErrorRecord>,
    pub(super) status: PipelineStatus,
    pub(super) dry_run: bool,
    pub(super) config: SyncflowConfig,
    pub(super) dlq: Arc<DeadLetterQueue>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) cancel: Arc<CancellationToken>,
    pub(super) pool: WorkerPool,
    pub(super) backoff: BackoffPolicy,
}

impl Pipeline {
    /// Creates an empty pipeline.
    ///
    /// The pipeline DLQ (entity `pipeline`) is created under `config.dlq_dir`.
    pub fn new(config: SyncflowConfig) -> Result<Self, SyncflowError> {
        config.validate()?;
        let dlq = DeadLetterQueue::new(PIPELINE_DLQ_ENTITY, config.dlq_dir.clone())?
            .with_batch_size(config.dlq_batch_size);

        Ok(Self {
            id: generate_pipeline_id(),
            steps: HashMap::new(),
            graph: DependencyGraph::new(),
            stats: PipelineStats::default(),
            results: Map::new(),
            errors: Vec::new(),
            status: PipelineStatus::Pending,
            dry_run: false,
            pool: WorkerPool::new(config.max_blocking_workers),
            backoff: BackoffPolicy::new(config.backoff_base_ms),
            config,
            dlq: Arc::new(dlq),
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        })
    }

    /// Sets the pipeline id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replaces the pipeline DLQ.
    #[must_use]
    pub fn with_dlq(mut self, dlq: Arc<DeadLetterQueue>) -> Self {
        self.dlq = dlq;
        self
    }

    /// Attaches an event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the pipeline status.
    #[must_use]
    pub const fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Returns the run statistics.
    #[must_use]
    pub const fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Returns executor results by step id.
    #[must_use]
    pub const fn results(&self) -> &Map<String, Value> {
        &self.results
    }

    /// Returns the accumulated error records.
    #[must_use]
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncflowConfig {
        &self.config
    }

    /// Returns the pipeline DLQ.
    #[must_use]
    pub const fn dlq(&self) -> &Arc<DeadLetterQueue> {
        &self.dlq
    }

    /// Returns the cancellation token observed by the schedulers.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// Returns a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Iterates steps in insertion order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.graph.ids().iter().filter_map(|id| self.steps.get(id))
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if no step was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Adds a step. Fails if a step with the same id exists.
    pub fn add_step(&mut self, step: Step) -> Result<(), SyncflowError> {
        if self.steps.contains_key(step.id()) {
            return Err(DuplicateStepError::new(step.id()).into());
        }

        info!(pipeline_id = %self.id, step_id = %step.id(), step_name = %step.name(), "Added step");
        self.graph.insert(step.id(), step.dependencies().to_vec());
        self.steps.insert(step.id().to_string(), step);
        self.stats.total_steps = self.steps.len();
        Ok(())
    }

    /// Adds several steps, stopping at the first duplicate.
    pub fn add_steps(&mut self, steps: impl IntoIterator<Item = Step>) -> Result<(), SyncflowError> {
        for step in steps {
            self.add_step(step)?;
        }
        Ok(())
    }

    /// Checks the dependency graph.
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        self.graph.validate()
    }

    /// Step ids in a valid execution order.
    #[must_use]
    pub fn execution_plan(&self) -> Vec<String> {
        self.graph.topological_order()
    }

    /// Requests cancellation; the running scheduler stops between steps.
    ///
    /// A request made while no run is active is cleared when the next run
    /// starts.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self.status == PipelineStatus::Running {
            warn!(pipeline_id = %self.id, "Cancelling pipeline");
        } else {
            info!(pipeline_id = %self.id, status = %self.status, "Pipeline is not running");
        }
        self.cancel.cancel(reason);
    }

    /// Runs the pipeline one step at a time.
    ///
    /// Ready steps run in waves ordered by dependency count. A failed
    /// attempt is retried with exponential backoff until the step's retries
    /// are used up; the step's failure policy then decides whether the
    /// pipeline stops. On cancellation the state is saved for
    /// [`resume`](Self::resume).
    pub async fn run(&mut self, dry_run: bool) -> Result<PipelineResult, SyncflowError> {
        self.begin_run(dry_run)?;

        let (mut satisfied, mut dead) = self.settled_sets();
        let total = self.steps.len();
        let mut end = RunEnd::Drained;

        'waves: while satisfied.len() + dead.len() < total {
            self.settle_blocked(&satisfied, &mut dead);

            let ready: Vec<String> = self
                .graph
                .ready_steps(&satisfied)
                .into_iter()
                .filter(|id| !dead.contains(id))
                .collect();

            if ready.is_empty() {
                let unresolved = self.unresolved(&satisfied, &dead);
                if !unresolved.is_empty() {
                    self.record_deadlock(&unresolved);
                    end = RunEnd::Deadlocked;
                }
                break;
            }

            for id in ready {
                if self.cancel.is_cancelled() {
                    end = RunEnd::Cancelled;
                    break 'waves;
                }

                let Some(invocation) = self.invocation(&id) else {
                    continue;
                };
                if !invocation.enabled {
                    self.skip_disabled(&id);
                    satisfied.insert(id);
                    continue;
                }

                match self.execute_step(&id, invocation).await {
                    StepOutcome::Completed => {
                        satisfied.insert(id);
                    }
                    StepOutcome::Failed(policy) => {
                        dead.insert(id);
                        if policy == FailurePolicy::Halt {
                            end = RunEnd::Halted;
                            break 'waves;
                        }
                    }
                    StepOutcome::Interrupted => {
                        end = RunEnd::Cancelled;
                        break 'waves;
                    }
                }
                self.checkpoint();
            }
        }

        Ok(self.finish_run(end))
    }

    /// Runs one step with retries.
    async fn execute_step(&mut self, id: &str, invocation: Invocation) -> StepOutcome {
        let mut tries = 0;
        loop {
            tries += 1;
            self.mark_step_started(id);

            let outcome = invoke(
                &invocation.executor,
                self.attempt_params(&invocation),
                invocation.timeout,
                &self.pool,
            )
            .await;

            let err = match outcome {
                Ok(result) => {
                    self.record_success(id, result);
                    return StepOutcome::Completed;
                }
                Err(err) => err,
            };

            let will_retry = should_retry(tries, invocation.retries);
            self.record_attempt_failure(id, &err, will_retry);
            if !will_retry {
                return StepOutcome::Failed(self.mark_step_failed(id));
            }

            let delay = self.backoff.delay(tries);
            self.mark_retrying(id, tries, invocation.retries, delay);

            let cancel = Arc::clone(&self.cancel);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    warn!(pipeline_id = %self.id, step_id = %id, "Cancelled during retry backoff");
                    return StepOutcome::Interrupted;
                }
            }
        }
    }

    /// Validates and marks the pipeline running.
    pub(super) fn begin_run(&mut self, dry_run: bool) -> Result<(), SyncflowError> {
        if self.status == PipelineStatus::Running {
            return Err(SyncflowError::AlreadyRunning(self.id.clone()));
        }
        if self.cancel.is_cancelled() {
            debug!(
                pipeline_id = %self.id,
                reason = ?self.cancel.reason(),
                "Clearing cancellation left by an earlier run"
            );
            self.cancel.reset();
        }
        if self.status != PipelineStatus::Paused {
            self.reset_run_state();
        }

        info!(pipeline_id = %self.id, dry_run, steps = self.steps.len(), "Starting pipeline");
        self.status = PipelineStatus::Running;
        self.dry_run = dry_run;
        self.stats.total_steps = self.steps.len();
        self.stats.start_time = Some(now_utc());
        self.stats.end_time = None;

        if let Err(e) = self.validate() {
            error!(pipeline_id = %self.id, error = %e, "Pipeline validation failed");
            self.status = PipelineStatus::Failed;
            self.errors
                .push(ErrorRecord::pipeline(e.to_string(), "PipelineConfigError"));
            self.stats.end_time = Some(now_utc());
            self.log_summary();
            self.emit(
                events::PIPELINE_FAILED,
                json!({"pipeline_id": self.id, "error": e.to_string()}),
            );
            return Err(e.into());
        }

        debug!(pipeline_id = %self.id, plan = ?self.execution_plan(), "Execution plan");
        self.emit(
            events::PIPELINE_STARTED,
            json!({"pipeline_id": self.id, "dry_run": dry_run, "total_steps": self.steps.len()}),
        );
        Ok(())
    }

    /// Clears step states, results, errors and counters from an earlier run.
    fn reset_run_state(&mut self) {
        for step in self.steps.values_mut() {
            step.state = StepState::default();
        }
        self.results.clear();
        self.errors.clear();
        self.stats = PipelineStats::default();
    }

    /// Splits steps settled by an earlier (restored) run into satisfied and dead.
    pub(super) fn settled_sets(&self) -> (HashSet<String>, HashSet<String>) {
        let mut satisfied = HashSet::new();
        let mut dead = HashSet::new();
        for (id, step) in &self.steps {
            let state = step.state();
            if state.status == PipelineStatus::Failed || state.is_blocked() {
                dead.insert(id.clone());
            } else if state.status.satisfies_dependents() {
                satisfied.insert(id.clone());
            }
        }
        (satisfied, dead)
    }

    /// Skips every step downstream of a dead step and marks it dead too.
    pub(super) fn settle_blocked(&mut self, satisfied: &HashSet<String>, dead: &mut HashSet<String>) {
        let blocked = self.graph.blocked_steps(dead, satisfied);
        if blocked.is_empty() {
            return;
        }

        let blocked_set: HashSet<&String> = blocked.iter().collect();
        let now = now_utc();
        for id in &blocked {
            let culprits: Vec<&str> = self
                .graph
                .dependencies_of(id)
                .iter()
                .filter(|dep| dead.contains(*dep) || blocked_set.contains(dep))
                .map(String::as_str)
                .collect();
            let reason = format!("Blocked by failed dependency: {}", culprits.join(", "));

            if let Some(step) = self.steps.get_mut(id) {
                step.state.status = PipelineStatus::Skipped;
                step.state.error = Some(reason.clone());
                step.state.end_time = Some(now);
            }
            self.stats.skipped_steps += 1;

            warn!(pipeline_id = %self.id, step_id = %id, reason = %reason, "Skipping blocked step");
            self.emit(
                events::STEP_SKIPPED,
                json!({"step_id": id, "reason": "blocked", "error": reason}),
            );
        }
        dead.extend(blocked);
    }

    /// Marks a disabled step skipped.
    pub(super) fn skip_disabled(&mut self, id: &str) {
        let Some(step) = self.steps.get_mut(id) else {
            return;
        };
        step.state.status = PipelineStatus::Skipped;
        step.state.end_time = Some(now_utc());
        let name = step.name().to_string();
        self.stats.skipped_steps += 1;

        info!(pipeline_id = %self.id, step_id = %id, step_name = %name, "Skipping disabled step");
        self.emit(
            events::STEP_SKIPPED,
            json!({"step_id": id, "step_name": name, "reason": "disabled"}),
        );
    }

    /// Resolves a step's executor, parameters and policies.
    pub(super) fn invocation(&self, id: &str) -> Option<Invocation> {
        let step = self.steps.get(id)?;
        Some(Invocation {
            executor: step.executor().clone(),
            params: StepParams::new(step.params().clone(), self.dry_run),
            timeout: step.timeout().unwrap_or_else(|| self.config.default_timeout()),
            retries: step.retries().unwrap_or(self.config.default_retries),
            enabled: step.is_enabled(),
        })
    }

    /// Parameters for an attempt that has just started, with the run report
    /// attached when the executor reads it.
    pub(super) fn attempt_params(&self, invocation: &Invocation) -> StepParams {
        let params = invocation.params.clone();
        if invocation.executor.needs_run_report() {
            params.with_run_report(self.sync_report())
        } else {
            params
        }
    }

    /// Records the start of an attempt.
    pub(super) fn mark_step_started(&mut self, id: &str) {
        let Some(step) = self.steps.get_mut(id) else {
            return;
        };
        step.state.attempts += 1;
        step.state.status = PipelineStatus::Running;
        step.state.start_time = Some(now_utc());
        step.state.end_time = None;
        let attempt = step.state.attempts;
        let name = step.name().to_string();

        info!(pipeline_id = %self.id, step_id = %id, step_name = %name, attempt, "Executing step");
        self.emit(
            events::STEP_STARTED,
            json!({"step_id": id, "step_name": name, "attempt": attempt}),
        );
    }

    /// Records a successful attempt.
    pub(super) fn record_success(&mut self, id: &str, result: Value) {
        let Some(step) = self.steps.get_mut(id) else {
            return;
        };
        step.state.status = PipelineStatus::Completed;
        step.state.end_time = Some(now_utc());
        step.state.error = None;
        let name = step.name().to_string();
        let duration = step.duration_secs();

        self.stats.merge_result(&result);
        self.stats.completed_steps += 1;
        self.results.insert(id.to_string(), result);

        info!(
            pipeline_id = %self.id,
            step_id = %id,
            step_name = %name,
            duration_secs = duration.unwrap_or_default(),
            "Step completed"
        );
        self.emit(
            events::STEP_COMPLETED,
            json!({"step_id": id, "step_name": name, "duration": duration}),
        );
    }

    /// Records a failed attempt in the error list and the DLQ.
    pub(super) fn record_attempt_failure(&mut self, id: &str, err: &anyhow::Error, will_retry: bool) {
        let message = format!("{err:#}");
        let Some(step) = self.steps.get_mut(id) else {
            return;
        };
        step.state.end_time = Some(now_utc());
        step.state.error = Some(message.clone());
        let attempt = step.state.attempts;
        let name = step.name().to_string();
        let duration = step.duration_secs();
        let params = Value::Object(step.params().clone());

        error!(
            pipeline_id = %self.id,
            step_id = %id,
            step_name = %name,
            attempt,
            error = %message,
            "Step failed"
        );

        self.errors
            .push(ErrorRecord::step(id, name.as_str(), message.as_str(), attempt, duration));

        let item = json!({
            "pipeline_id": self.id,
            "step_id": id,
            "step_name": name,
            "error": message,
            "timestamp": iso_timestamp(),
            "attempt": attempt,
            "operation": "execute_step",
            "source_data": {
                "step_id": id,
                "step_name": name,
                "attempt": attempt,
                "params": params,
            },
        });
        if let Err(e) = self.dlq.add_item(item) {
            warn!(pipeline_id = %self.id, step_id = %id, error = %e, "Failed to add step failure to DLQ");
        }

        self.emit(
            events::STEP_FAILED,
            json!({
                "step_id": id,
                "step_name": name,
                "attempt": attempt,
                "error": message,
                "will_retry": will_retry,
            }),
        );
    }

    /// Marks a step waiting for its next attempt.
    fn mark_retrying(&mut self, id: &str, tries: u32, retries: u32, delay: Duration) {
        if let Some(step) = self.steps.get_mut(id) {
            step.state.status = PipelineStatus::Retrying;
        }
        warn!(
            pipeline_id = %self.id,
            step_id = %id,
            retry = tries,
            retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Retrying step"
        );
        self.emit(
            events::STEP_RETRYING,
            json!({"step_id": id, "retry": tries, "retries": retries, "delay_secs": delay.as_secs_f64()}),
        );
    }

    /// Marks a step failed for good and returns its failure policy.
    pub(super) fn mark_step_failed(&mut self, id: &str) -> FailurePolicy {
        let Some(step) = self.steps.get_mut(id) else {
            return FailurePolicy::Continue;
        };
        step.state.status = PipelineStatus::Failed;
        let policy = step.failure_policy();
        let attempts = step.state.attempts;
        self.stats.failed_steps += 1;

        match policy {
            FailurePolicy::Halt => {
                error!(pipeline_id = %self.id, step_id = %id, attempts, "Critical step failed, stopping pipeline");
            }
            FailurePolicy::Continue => {
                warn!(pipeline_id = %self.id, step_id = %id, attempts, "Non-critical step failed, continuing pipeline");
            }
        }
        policy
    }

    /// Steps neither satisfied nor dead, with their outstanding dependencies.
    pub(super) fn unresolved(
        &self,
        satisfied: &HashSet<String>,
        dead: &HashSet<String>,
    ) -> Vec<(String, Vec<String>)> {
        self.graph
            .unresolved_dependencies(satisfied)
            .into_iter()
            .filter(|(id, _)| !dead.contains(id))
            .collect()
    }

    /// Records a pipeline-level deadlock error.
    pub(super) fn record_deadlock(&mut self, unresolved: &[(String, Vec<String>)]) {
        let detail: Vec<String> = unresolved
            .iter()
            .map(|(id, deps)| format!("{id} -> [{}]", deps.join(", ")))
            .collect();
        let message = format!("Unresolved dependencies: {}", detail.join("; "));

        error!(pipeline_id = %self.id, error = %message, "Pipeline deadlocked");
        self.errors.push(ErrorRecord::pipeline(message, "Deadlock"));
    }

    /// Writes a `running` checkpoint when per-step checkpoints are enabled.
    pub(super) fn checkpoint(&self) {
        if !self.config.checkpoint_each_step {
            return;
        }
        if let Err(e) = self.save_state(PipelineStatus::Running) {
            warn!(pipeline_id = %self.id, error = %e, "Failed to write checkpoint");
        }
    }

    /// Marks the run cancelled and saves a resumable snapshot.
    fn handle_interruption(&mut self) {
        self.status = PipelineStatus::Cancelled;
        warn!(
            pipeline_id = %self.id,
            reason = ?self.cancel.reason(),
            "Pipeline interrupted, saving state"
        );
        match self.save_state(PipelineStatus::Paused) {
            Ok(path) => info!(pipeline_id = %self.id, path = %path.display(), "Pipeline state saved"),
            Err(e) => error!(pipeline_id = %self.id, error = %e, "Failed to save pipeline state"),
        }
    }

    /// Settles the final status and builds the result.
    pub(super) fn finish_run(&mut self, end: RunEnd) -> PipelineResult {
        self.stats.end_time = Some(now_utc());

        match end {
            RunEnd::Cancelled => self.handle_interruption(),
            RunEnd::Halted | RunEnd::Deadlocked => self.status = PipelineStatus::Failed,
            RunEnd::Drained => {
                self.status = if self.steps.values().all(|s| s.status().is_success()) {
                    PipelineStatus::Completed
                } else {
                    PipelineStatus::Failed
                };
            }
        }

        if let Err(e) = self.dlq.flush() {
            warn!(pipeline_id = %self.id, error = %e, "Failed to flush pipeline DLQ");
        }
        self.log_summary();

        let event = match self.status {
            PipelineStatus::Completed => {
                info!(pipeline_id = %self.id, "Pipeline completed successfully");
                events::PIPELINE_COMPLETED
            }
            PipelineStatus::Cancelled => events::PIPELINE_CANCELLED,
            _ => {
                error!(pipeline_id = %self.id, "Pipeline failed");
                events::PIPELINE_FAILED
            }
        };
        self.emit(
            event,
            json!({
                "pipeline_id": self.id,
                "status": self.status,
                "duration": self.stats.duration(),
            }),
        );

        self.result()
    }

    /// Snapshot of the current outcome.
    #[must_use]
    pub fn result(&self) -> PipelineResult {
        PipelineResult {
            pipeline_id: self.id.clone(),
            status: self.status,
            stats: self.stats.report(),
            results: self.results.clone(),
            errors: self.errors.clone(),
            dry_run: self.dry_run,
            dlq_count: self.dlq.count(),
        }
    }

    /// Logs the run summary and per-step timing.
    pub fn log_summary(&self) {
        let stats = &self.stats;
        info!(
            pipeline_id = %self.id,
            status = %self.status,
            duration_secs = stats.duration().unwrap_or_default(),
            total_steps = stats.total_steps,
            completed_steps = stats.completed_steps,
            failed_steps = stats.failed_steps,
            skipped_steps = stats.skipped_steps,
            total_items = stats.total_items_processed,
            successful_items = stats.successful_items,
            failed_items = stats.failed_items,
            success_rate = %format!("{:.1}%", stats.success_rate()),
            "Pipeline summary"
        );

        for step in self.steps() {
            match step.duration_secs() {
                Some(secs) => info!(step_name = %step.name(), status = %step.status(), duration_secs = secs, "Step timing"),
                None => info!(step_name = %step.name(), status = %step.status(), "Step timing"),
            }
        }
    }

    /// Current status of the pipeline and every step.
    #[must_use]
    pub fn status_report(&self) -> Value {
        let steps: Map<String, Value> = self
            .steps()
            .map(|step| {
                let state = step.state();
                (
                    step.id().to_string(),
                    json!({
                        "name": step.name(),
                        "status": state.status,
                        "attempts": state.attempts,
                        "start_time": state.start_time,
                        "end_time": state.end_time,
                        "error": state.error,
                        "enabled": step.is_enabled(),
                    }),
                )
            })
            .collect();

        json!({
            "pipeline_id": self.id,
            "status": self.status,
            "stats": self.stats.report(),
            "steps": steps,
            "errors": self.errors,
            "timestamp": iso_timestamp(),
        })
    }

    /// Run report with per-step outcomes and the item counters each step
    /// reported.
    #[must_use]
    pub fn sync_report(&self) -> Value {
        let step_results: Map<String, Value> = self
            .steps()
            .map(|step| {
                let state = step.state();
                let stats = self
                    .results
                    .get(step.id())
                    .and_then(|r| r.get("stats"))
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                (
                    step.id().to_string(),
                    json!({
                        "name": step.name(),
                        "status": state.status,
                        "start_time": state.start_time,
                        "end_time": state.end_time,
                        "attempts": state.attempts,
                        "error": state.error,
                        "stats": stats,
                    }),
                )
            })
            .collect();

        json!({
            "pipeline_id": self.id,
            "status": self.status,
            "timestamp": iso_timestamp(),
            "stats": self.stats.report(),
            "step_results": step_results,
            "errors": self.errors,
        })
    }

    pub(super) fn emit(&self, event: &str, data: Value) {
        self.events.try_emit(event, Some(data));
    }
}
