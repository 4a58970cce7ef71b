//! Concurrent scheduler.
//!
//! Every step whose dependencies are satisfied is spawned as its own task;
//! results are settled in completion order by the scheduler loop.

use super::runner::{Pipeline, RunEnd};
use super::stats::PipelineResult;
use super::step::FailurePolicy;
use crate::errors::SyncflowError;
use crate::executors::{invoke, ExecutorResult};
use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use tokio::task::JoinError;
use tracing::{info, warn};

type StepTask = BoxFuture<'static, (String, Result<ExecutorResult, JoinError>)>;

impl Pipeline {
    /// Runs independent steps concurrently.
    ///
    /// A step is launched once all of its dependencies are satisfied.
    /// Cooperative executors run as tokio tasks; blocking executors go
    /// through the worker pool. Steps are attempted once: a failure is
    /// recorded without aborting siblings, and a `Halt` failure stops
    /// further launches while in-flight steps drain. Cancellation also
    /// drains in-flight steps before the state is saved.
    pub async fn run_concurrent(&mut self, dry_run: bool) -> Result<PipelineResult, SyncflowError> {
        self.begin_run(dry_run)?;

        let (mut satisfied, mut dead) = self.settled_sets();
        let total = self.steps.len();
        let mut launched: HashSet<String> = HashSet::new();
        let mut in_flight: FuturesUnordered<StepTask> = FuturesUnordered::new();
        let mut end = RunEnd::Drained;

        loop {
            if end == RunEnd::Drained {
                if self.cancel.is_cancelled() {
                    warn!(
                        pipeline_id = %self.id,
                        in_flight = in_flight.len(),
                        "Cancellation requested, draining in-flight steps"
                    );
                    end = RunEnd::Cancelled;
                } else {
                    self.launch_ready(&mut satisfied, &mut dead, &mut launched, &mut in_flight);
                }
            }

            let Some((id, joined)) = in_flight.next().await else {
                if end == RunEnd::Drained && satisfied.len() + dead.len() < total {
                    let unresolved = self.unresolved(&satisfied, &dead);
                    warn!(
                        pipeline_id = %self.id,
                        remaining = total - satisfied.len() - dead.len(),
                        "No runnable steps left, possible deadlock"
                    );
                    self.record_deadlock(&unresolved);
                    end = RunEnd::Deadlocked;
                }
                break;
            };

            match joined.unwrap_or_else(|e| Err(anyhow!("step task failed: {e}"))) {
                Ok(result) => {
                    self.record_success(&id, result);
                    satisfied.insert(id);
                }
                Err(err) => {
                    self.record_attempt_failure(&id, &err, false);
                    let policy = self.mark_step_failed(&id);
                    dead.insert(id);
                    if policy == FailurePolicy::Halt && end == RunEnd::Drained {
                        end = RunEnd::Halted;
                    }
                }
            }
            self.checkpoint();
        }

        Ok(self.finish_run(end))
    }

    /// Settles blocked and disabled steps, then spawns every ready step.
    fn launch_ready(
        &mut self,
        satisfied: &mut HashSet<String>,
        dead: &mut HashSet<String>,
        launched: &mut HashSet<String>,
        in_flight: &mut FuturesUnordered<StepTask>,
    ) {
        loop {
            self.settle_blocked(satisfied, dead);

            let ready: Vec<String> = self
                .graph
                .ready_steps(satisfied)
                .into_iter()
                .filter(|id| !dead.contains(id) && !launched.contains(id))
                .collect();

            // Skipping a disabled step can make its dependents ready.
            let mut skipped_any = false;
            for id in ready {
                let Some(invocation) = self.invocation(&id) else {
                    continue;
                };
                if !invocation.enabled {
                    self.skip_disabled(&id);
                    satisfied.insert(id);
                    skipped_any = true;
                    continue;
                }

                self.mark_step_started(&id);
                let params = self.attempt_params(&invocation);
                let pool = self.pool.clone();
                let handle = tokio::spawn(async move {
                    invoke(
                        &invocation.executor,
                        params,
                        invocation.timeout,
                        &pool,
                    )
                    .await
                });

                info!(pipeline_id = %self.id, step_id = %id, in_flight = in_flight.len() + 1, "Step launched");
                launched.insert(id.clone());
                in_flight.push(async move { (id, handle.await) }.boxed());
            }

            if !skipped_any {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SyncflowConfig;
    use crate::core::PipelineStatus;
    use crate::executors::Executor;
    use crate::pipeline::{Pipeline, Step};
    use crate::testing::{RecordingExecutor, SlowExecutor};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        Pipeline::new(
            SyncflowConfig::default()
                .with_dlq_dir(dir.join("dlq"))
                .with_state_dir(dir),
        )
        .unwrap()
    }

    fn sleeper(name: &str, millis: u64) -> Step {
        Step::new(name, SlowExecutor::executor(millis))
    }

    /// A step logging `<tag>_start` and `<tag>_end` around a short sleep.
    fn traced(name: &str, tag: &str, millis: u64, log: &Arc<Mutex<Vec<String>>>) -> Step {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Step::new(
            name,
            Executor::from_async_fn(name, move |_p| {
                let log = Arc::clone(&log);
                let tag = tag.clone();
                async move {
                    log.lock().push(format!("{tag}_start"));
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    log.lock().push(format!("{tag}_end"));
                    Ok(json!({}))
                }
            }),
        )
    }

    fn position(log: &[String], entry: &str) -> usize {
        log.iter().position(|e| e == entry).unwrap()
    }

    #[tokio::test]
    async fn test_independent_steps_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        pipeline.add_step(sleeper("A", 150)).unwrap();
        pipeline.add_step(sleeper("B", 150)).unwrap();
        pipeline.add_step(sleeper("C", 150)).unwrap();

        let started = std::time::Instant::now();
        let result = pipeline.run_concurrent(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(result.results.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        pipeline
            .add_step(Step::new(
                "Broken",
                Executor::from_fn("broken", |_p| Err(anyhow::anyhow!("bad gateway"))),
            ))
            .unwrap();
        pipeline.add_step(sleeper("Slow", 50)).unwrap();
        pipeline
            .add_step(sleeper("After Broken", 0).with_dependency("step_broken"))
            .unwrap();

        let result = pipeline.run_concurrent(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(pipeline.step("step_slow").unwrap().status(), PipelineStatus::Completed);
        assert_eq!(pipeline.step("step_broken").unwrap().attempts(), 1);
        assert_eq!(pipeline.step("step_after_broken").unwrap().status(), PipelineStatus::Skipped);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.dlq_count, 1);
    }

    #[tokio::test]
    async fn test_critical_failure_stops_launches() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        pipeline
            .add_step(Step::new(
                "Test Connections",
                Executor::from_fn("connections", |_p| Err(anyhow::anyhow!("refused"))),
            ))
            .unwrap();
        pipeline
            .add_step(sleeper("Sync Customers", 0).with_dependency("step_test_connections"))
            .unwrap();

        let result = pipeline.run_concurrent(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(
            pipeline.step("step_sync_customers").unwrap().status(),
            PipelineStatus::Pending
        );
        assert_eq!(pipeline.step("step_sync_customers").unwrap().attempts(), 0);
    }

    #[tokio::test]
    async fn test_timeout_fails_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path());
        pipeline
            .add_step(sleeper("Slow", 5_000).with_timeout(Duration::from_millis(20)))
            .unwrap();

        let result = pipeline.run_concurrent(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert!(result.errors[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_drains_and_saves_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path()).with_id("pipeline_cancel_concurrent");
        let token = pipeline.cancellation_token();

        let cancel = Arc::clone(&token);
        pipeline
            .add_step(Step::new(
                "A",
                Executor::from_async_fn("a", move |_p| {
                    let cancel = Arc::clone(&cancel);
                    async move {
                        cancel.cancel("test");
                        Ok(json!({}))
                    }
                }),
            ))
            .unwrap();
        pipeline.add_step(sleeper("B", 0).with_dependency("step_a")).unwrap();

        let result = pipeline.run_concurrent(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Cancelled);
        assert_eq!(pipeline.step("step_a").unwrap().status(), PipelineStatus::Completed);
        assert_eq!(pipeline.step("step_b").unwrap().status(), PipelineStatus::Pending);
        assert!(dir
            .path()
            .join("pipeline_state_pipeline_cancel_concurrent.json")
            .exists());
    }

    #[tokio::test]
    async fn test_dependents_launch_after_dependencies_settle() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = pipeline(dir.path());
        pipeline.add_step(traced("A", "a", 80, &log)).unwrap();
        pipeline
            .add_step(traced("B", "b", 10, &log).with_dependency("step_a"))
            .unwrap();
        pipeline.add_step(traced("C", "c", 0, &log).disabled()).unwrap();
        pipeline
            .add_step(traced("D", "d", 0, &log).with_dependencies(["step_b", "step_c"]))
            .unwrap();

        let result = pipeline.run_concurrent(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(result.stats.stats.skipped_steps, 1);
        assert_eq!(pipeline.step("step_c").unwrap().status(), PipelineStatus::Skipped);
        assert_eq!(pipeline.step("step_d").unwrap().status(), PipelineStatus::Completed);

        let log = log.lock().clone();
        assert!(!log.iter().any(|e| e.starts_with('c')));
        assert!(position(&log, "a_end") < position(&log, "b_start"));
        assert!(position(&log, "b_end") < position(&log, "d_start"));
    }

    #[tokio::test]
    async fn test_concurrent_run_after_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline_state_pipeline_concurrent_resume.json");
        let state = json!({
            "pipeline_id": "pipeline_concurrent_resume",
            "status": "paused",
            "step_states": {
                "step_a": {"status": "completed", "attempts": 1, "error": null},
                "step_b": {"status": "running", "attempts": 1, "error": null},
                "step_c": {"status": "pending", "attempts": 0, "error": null}
            },
            "results": {"step_a": {"ok": true}},
            "stats": {"total_steps": 3, "completed_steps": 1},
            "timestamp": "2024-01-01T00:00:00.000000+00:00"
        });
        std::fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();

        let a = RecordingExecutor::new("a");
        let b = RecordingExecutor::new("b");
        let c = RecordingExecutor::new("c");
        let mut pipeline = pipeline(dir.path());
        pipeline.add_step(Step::new("A", a.executor())).unwrap();
        pipeline
            .add_step(Step::new("B", b.executor()).with_dependency("step_a"))
            .unwrap();
        pipeline.add_step(Step::new("C", c.executor())).unwrap();

        pipeline.restore(&path).unwrap();
        let result = pipeline.run_concurrent(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(result.pipeline_id, "pipeline_concurrent_resume");
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 1);
        assert_eq!(c.call_count(), 1);
        assert_eq!(pipeline.step("step_b").unwrap().attempts(), 2);
        assert_eq!(result.stats.stats.completed_steps, 3);
    }
}
