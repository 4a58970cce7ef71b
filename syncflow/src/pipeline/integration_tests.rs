//! End-to-end tests for pipeline execution, failure handling and resume.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::config::SyncflowConfig;
    use crate::core::PipelineStatus;
    use crate::dlq::DeadLetterQueue;
    use crate::errors::{PipelineConfigError, StateError, SyncflowError};
    use crate::executors::Executor;
    use crate::pipeline::{cancel_persisted, Pipeline, PipelineState, Step};
    use crate::testing::{FailingExecutor, FlakyExecutor, RecordingExecutor};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn config(dir: &Path) -> SyncflowConfig {
        SyncflowConfig::default()
            .with_dlq_dir(dir.join("dlq"))
            .with_state_dir(dir.join("state"))
            .with_backoff_base_ms(0)
    }

    fn pipeline(dir: &Path, id: &str) -> Pipeline {
        Pipeline::new(config(dir)).unwrap().with_id(id)
    }

    fn logging_step(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Step {
        let log = Arc::clone(log);
        let entry = name.to_string();
        Step::new(
            name,
            Executor::from_fn(name, move |_p| {
                log.lock().push(entry.clone());
                Ok(json!({}))
            }),
        )
    }

    /// A step that cancels `token` the first time it runs.
    fn cancel_once(name: &str, token: Arc<CancellationToken>) -> Step {
        let fired = AtomicBool::new(false);
        Step::new(
            name,
            Executor::from_fn(name, move |_p| {
                if !fired.swap(true, Ordering::SeqCst) {
                    token.cancel("operator interrupt");
                }
                Ok(json!({}))
            }),
        )
    }

    fn position(log: &[String], name: &str) -> usize {
        log.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_acyclic_graph_validates_and_cycle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ok = pipeline(dir.path(), "pipeline_ok");
        ok.add_step(Step::new("A", FailingExecutor::executor("unused")))
            .unwrap();
        ok.add_step(Step::new("B", FailingExecutor::executor("unused")).with_dependency("step_a"))
            .unwrap();
        assert!(ok.validate().is_ok());

        let mut cyclic = pipeline(dir.path(), "pipeline_cycle");
        cyclic
            .add_step(Step::new("A", FailingExecutor::executor("unused")).with_dependency("step_b"))
            .unwrap();
        cyclic
            .add_step(Step::new("B", FailingExecutor::executor("unused")).with_dependency("step_a"))
            .unwrap();
        assert!(matches!(
            cyclic.validate(),
            Err(PipelineConfigError::Cycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_diamond_dependencies_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = pipeline(dir.path(), "pipeline_diamond");
        pipeline
            .add_step(logging_step("D", &log).with_dependencies(["step_b", "step_c"]))
            .unwrap();
        pipeline
            .add_step(logging_step("B", &log).with_dependency("step_a"))
            .unwrap();
        pipeline
            .add_step(logging_step("C", &log).with_dependency("step_a"))
            .unwrap();
        pipeline.add_step(logging_step("A", &log)).unwrap();

        let result = pipeline.run(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Completed);
        let log = log.lock().clone();
        assert_eq!(log.len(), 4);
        assert!(position(&log, "A") < position(&log, "B"));
        assert!(position(&log, "A") < position(&log, "C"));
        assert!(position(&log, "B") < position(&log, "D"));
        assert!(position(&log, "C") < position(&log, "D"));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = FlakyExecutor::new(2);
        let mut pipeline = pipeline(dir.path(), "pipeline_retry");
        pipeline
            .add_step(Step::new("Sync Products", flaky.executor()).with_retries(2))
            .unwrap();

        let result = pipeline.run(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Completed);
        let step = pipeline.step("step_sync_products").unwrap();
        assert_eq!(step.status(), PipelineStatus::Completed);
        assert_eq!(step.attempts(), 3);
        assert_eq!(step.error(), None);
        assert_eq!(flaky.call_count(), 3);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].attempt, Some(1));
        assert_eq!(result.errors[1].attempt, Some(2));
        assert_eq!(result.dlq_count, 2);

        let items = pipeline.dlq().items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["entity_type"], "pipeline");
        assert_eq!(items[0]["step_id"], "step_sync_products");
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(dir.path(), "pipeline_exhausted");
        pipeline
            .add_step(Step::new("Sync Customers", FailingExecutor::executor("503")).with_retries(1))
            .unwrap();

        let result = pipeline.run(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(pipeline.step("step_sync_customers").unwrap().attempts(), 2);
        assert_eq!(pipeline.step("step_sync_customers").unwrap().error(), Some("503"));
        assert_eq!(result.stats.stats.failed_steps, 1);
    }

    #[tokio::test]
    async fn test_critical_failure_halts_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let customers = RecordingExecutor::new("customers");
        let mut pipeline = pipeline(dir.path(), "pipeline_halt");
        pipeline
            .add_step(Step::new("Test Connections", FailingExecutor::executor("refused")).with_retries(0))
            .unwrap();
        pipeline
            .add_step(Step::new("Sync Customers", customers.executor()))
            .unwrap();

        let result = pipeline.run(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(
            pipeline.step("step_test_connections").unwrap().status(),
            PipelineStatus::Failed
        );
        assert_eq!(
            pipeline.step("step_sync_customers").unwrap().status(),
            PipelineStatus::Pending
        );
        assert_eq!(customers.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_critical_failure_continues() {
        let dir = tempfile::tempdir().unwrap();
        let independent = RecordingExecutor::new("independent");
        let dependent = RecordingExecutor::new("dependent");
        let mut pipeline = pipeline(dir.path(), "pipeline_continue");
        pipeline
            .add_step(Step::new("Sync Products", FailingExecutor::executor("bad row")).with_retries(0))
            .unwrap();
        pipeline
            .add_step(Step::new("Sync Customers", independent.executor()))
            .unwrap();
        pipeline
            .add_step(Step::new("Process DLQ", dependent.executor()).with_dependency("step_sync_products"))
            .unwrap();

        let result = pipeline.run(false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(
            pipeline.step("step_sync_customers").unwrap().status(),
            PipelineStatus::Completed
        );
        assert_eq!(independent.call_count(), 1);

        let blocked = pipeline.step("step_process_dlq").unwrap();
        assert_eq!(blocked.status(), PipelineStatus::Skipped);
        assert!(blocked.state().is_blocked());
        assert_eq!(dependent.call_count(), 0);
        assert_eq!(result.stats.stats.completed_steps, 1);
        assert_eq!(result.stats.stats.failed_steps, 1);
        assert_eq!(result.stats.stats.skipped_steps, 1);
    }

    #[test]
    fn test_dlq_batches_250_items() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new("products", dir.path()).unwrap();

        for i in 0..250 {
            dlq.add_item(json!({"operation": "create", "error": "422", "source_data": {"sku": i}}))
                .unwrap();
        }

        let files = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
            .count();
        assert_eq!(files, 2);
        assert_eq!(dlq.pending(), 50);
        assert_eq!(dlq.count(), 250);
    }

    #[test]
    fn test_empty_dlq_export_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dlq = DeadLetterQueue::new("customers", dir.path()).unwrap();
        let path = dir.path().join("customers.csv");

        assert_eq!(dlq.export_to_csv(&path).unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_resume_skips_settled_steps() {
        let dir = tempfile::tempdir().unwrap();

        let first_a = RecordingExecutor::new("a");
        first_a.set_output(json!({"stats": {"total_processed": 4, "successful": 4, "failed": 0}}));
        let first_c = RecordingExecutor::new("c");
        let mut first = pipeline(dir.path(), "pipeline_resume");
        let token = first.cancellation_token();
        first.add_step(Step::new("A", first_a.executor())).unwrap();
        first
            .add_step(
                Step::new(
                    "B",
                    Executor::from_fn("b", move |_p| {
                        token.cancel("operator interrupt");
                        Ok(json!({"b": true}))
                    }),
                )
                .with_dependency("step_a"),
            )
            .unwrap();
        first
            .add_step(Step::new("C", first_c.executor()).with_dependency("step_b"))
            .unwrap();

        let interrupted = first.run(false).await.unwrap();
        assert_eq!(interrupted.status, PipelineStatus::Cancelled);
        assert_eq!(first_c.call_count(), 0);

        let state_path = dir
            .path()
            .join("state")
            .join(PipelineState::file_name("pipeline_resume"));
        let saved = PipelineState::load(&state_path).unwrap();
        assert_eq!(saved.status, PipelineStatus::Paused);
        assert_eq!(saved.step_states["step_a"].status, PipelineStatus::Completed);
        assert_eq!(saved.step_states["step_c"].status, PipelineStatus::Pending);

        let second_a = RecordingExecutor::new("a");
        let second_b = RecordingExecutor::new("b");
        let second_c = RecordingExecutor::new("c");
        let mut second = Pipeline::new(config(dir.path())).unwrap();
        second.add_step(Step::new("A", second_a.executor())).unwrap();
        second
            .add_step(Step::new("B", second_b.executor()).with_dependency("step_a"))
            .unwrap();
        second
            .add_step(Step::new("C", second_c.executor()).with_dependency("step_b"))
            .unwrap();

        let result = second.resume(&state_path, false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(result.pipeline_id, "pipeline_resume");
        assert_eq!(second_a.call_count(), 0);
        assert_eq!(second_b.call_count(), 0);
        assert_eq!(second_c.call_count(), 1);
        assert_eq!(second.step("step_a").unwrap().attempts(), 1);
        assert_eq!(second.step("step_b").unwrap().attempts(), 1);
        assert_eq!(result.results["step_b"], json!({"b": true}));
        assert_eq!(result.stats.stats.completed_steps, 3);
        assert_eq!(result.stats.stats.successful_items, 4);
        assert!(!state_path.exists());
    }

    #[tokio::test]
    async fn test_resume_keeps_failed_steps_settled() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        let path = state_dir.join("pipeline_state_pipeline_failed_branch.json");
        let state = json!({
            "pipeline_id": "pipeline_failed_branch",
            "status": "running",
            "step_states": {
                "step_a": {"status": "failed", "attempts": 4, "error": "gone"},
                "step_b": {"status": "skipped", "attempts": 0, "error": "Blocked by failed dependency: step_a"},
                "step_c": {"status": "running", "attempts": 1, "error": null}
            },
            "results": {},
            "stats": {"total_steps": 3, "failed_steps": 1, "skipped_steps": 1},
            "timestamp": "2024-01-01T00:00:00.000000+00:00"
        });
        std::fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();

        let a = RecordingExecutor::new("a");
        let b = RecordingExecutor::new("b");
        let c = RecordingExecutor::new("c");
        let mut pipeline = Pipeline::new(config(dir.path())).unwrap();
        pipeline.add_step(Step::new("A", a.executor())).unwrap();
        pipeline
            .add_step(Step::new("B", b.executor()).with_dependency("step_a"))
            .unwrap();
        pipeline.add_step(Step::new("C", c.executor())).unwrap();

        let result = pipeline.resume(&path, false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(a.call_count(), 0);
        assert_eq!(b.call_count(), 0);
        assert_eq!(c.call_count(), 1);
        assert_eq!(pipeline.step("step_c").unwrap().attempts(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_after_each_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config(dir.path()).with_checkpoint_each_step(true))
            .unwrap()
            .with_id("pipeline_checkpoint");
        pipeline
            .add_step(Step::new("A", RecordingExecutor::new("a").executor()))
            .unwrap();

        pipeline.run(false).await.unwrap();

        let state = PipelineState::load(
            dir.path()
                .join("state")
                .join("pipeline_state_pipeline_checkpoint.json"),
        )
        .unwrap();
        assert_eq!(state.status, PipelineStatus::Running);
        assert_eq!(state.step_states["step_a"].status, PipelineStatus::Completed);
        assert_eq!(state.results["step_a"], json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_cancelled_state_cannot_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = pipeline(dir.path(), "pipeline_operator_cancel");
        let token = first.cancellation_token();
        first.add_step(cancel_once("A", token)).unwrap();
        first
            .add_step(Step::new("B", RecordingExecutor::new("b").executor()).with_dependency("step_a"))
            .unwrap();
        let result = first.run(false).await.unwrap();
        assert_eq!(result.status, PipelineStatus::Cancelled);

        let state_path = first.state_file_path();
        let cancelled = cancel_persisted(&state_path).unwrap();
        assert!(!state_path.exists());

        let mut second = pipeline(dir.path(), "other");
        second
            .add_step(Step::new("A", RecordingExecutor::new("a").executor()))
            .unwrap();
        let err = second.resume(&cancelled, false).await.unwrap_err();
        assert!(matches!(
            err,
            SyncflowError::State(StateError::NotResumable { status: PipelineStatus::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn test_resume_same_pipeline_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let a = RecordingExecutor::new("a");
        let c = RecordingExecutor::new("c");
        let mut pipeline = pipeline(dir.path(), "pipeline_in_process_resume");
        let token = pipeline.cancellation_token();
        pipeline.add_step(Step::new("A", a.executor())).unwrap();
        pipeline
            .add_step(cancel_once("B", token).with_dependency("step_a"))
            .unwrap();
        pipeline
            .add_step(Step::new("C", c.executor()).with_dependency("step_b"))
            .unwrap();

        let interrupted = pipeline.run(false).await.unwrap();
        assert_eq!(interrupted.status, PipelineStatus::Cancelled);
        assert!(pipeline.cancellation_token().is_cancelled());

        let state_path = pipeline.state_file_path();
        let result = pipeline.resume(&state_path, false).await.unwrap();

        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(a.call_count(), 1);
        assert_eq!(c.call_count(), 1);
        assert!(!pipeline.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_rerun_with_external_token_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let token = Arc::new(CancellationToken::new());
        let b = RecordingExecutor::new("b");
        let mut pipeline = pipeline(dir.path(), "pipeline_external_token")
            .with_cancellation_token(Arc::clone(&token));
        pipeline.add_step(cancel_once("A", Arc::clone(&token))).unwrap();
        pipeline
            .add_step(Step::new("B", b.executor()).with_dependency("step_a"))
            .unwrap();

        let interrupted = pipeline.run(false).await.unwrap();
        assert_eq!(interrupted.status, PipelineStatus::Cancelled);
        assert!(token.is_cancelled());
        let state_path = pipeline.state_file_path();
        let saved = PipelineState::load(&state_path).unwrap();
        assert_eq!(saved.step_states["step_a"].status, PipelineStatus::Completed);

        let rerun = pipeline.run(false).await.unwrap();

        assert_eq!(rerun.status, PipelineStatus::Completed);
        assert_eq!(b.call_count(), 1);
        assert!(!token.is_cancelled());
        let kept = PipelineState::load(&state_path).unwrap();
        assert_eq!(kept.step_states["step_a"].status, PipelineStatus::Completed);
        assert_eq!(kept.status, PipelineStatus::Paused);
    }

    #[tokio::test]
    async fn test_dry_run_reaches_executors() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = RecordingExecutor::new("a");
        let mut pipeline = pipeline(dir.path(), "pipeline_dry");
        pipeline
            .add_step(Step::new("A", recorder.executor()).with_param("batch_size", json!(25)))
            .unwrap();

        let result = pipeline.run(true).await.unwrap();

        assert!(result.dry_run);
        let params = recorder.recorded_params();
        assert!(params[0].dry_run);
        assert_eq!(params[0].get("batch_size"), Some(&Value::from(25)));
    }
}
