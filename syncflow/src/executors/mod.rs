//! Step executors.
//!
//! An executor is the unit of work a step wraps. Cooperative executors are
//! awaited on the runtime; blocking executors (ordinary synchronous calls
//! into connectors and sync services) are dispatched to a bounded
//! [`WorkerPool`] so they never stall other tasks.

mod builtin;
mod registry;

pub use builtin::{
    ConnectionCheck, GenerateReportExecutor, ProcessDlqExecutor, SyncService,
    SyncServiceExecutor, TestConnectionsExecutor,
};
pub use registry::ExecutorRegistry;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// What an executor returns: a result mapping, or any error.
pub type ExecutorResult = anyhow::Result<Value>;

/// Parameters handed to an executor: the step's parameter map plus the
/// run-wide `dry_run` flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepParams {
    /// The step's configured parameters.
    pub values: Map<String, Value>,
    /// Whether the run must avoid side effects.
    pub dry_run: bool,
    /// Pipeline state at invocation time, for executors that ask for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_report: Option<Value>,
}

impl StepParams {
    /// Creates a new parameter set.
    #[must_use]
    pub fn new(values: Map<String, Value>, dry_run: bool) -> Self {
        Self {
            values,
            dry_run,
            run_report: None,
        }
    }

    /// Attaches the pipeline report.
    #[must_use]
    pub fn with_run_report(mut self, report: Value) -> Self {
        self.run_report = Some(report);
        self
    }

    /// Returns a raw parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns an unsigned integer parameter; `null` and non-numbers yield `None`.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    /// Returns a string parameter.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Returns the parameters as one mapping with `dry_run` injected.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = self.values.clone();
        map.insert("dry_run".to_string(), Value::Bool(self.dry_run));
        map
    }
}

/// An executor that cooperates with the async runtime.
#[async_trait]
pub trait AsyncExecutor: Send + Sync + Debug {
    /// Runs the step.
    async fn execute(&self, params: StepParams) -> ExecutorResult;

    /// Whether the scheduler should attach [`StepParams::run_report`].
    fn needs_run_report(&self) -> bool {
        false
    }
}

/// An executor that blocks the calling thread.
pub trait BlockingExecutor: Send + Sync + Debug {
    /// Runs the step.
    fn execute(&self, params: &StepParams) -> ExecutorResult;

    /// Whether the scheduler should attach [`StepParams::run_report`].
    fn needs_run_report(&self) -> bool {
        false
    }
}

/// A step's executor reference.
#[derive(Clone)]
pub enum Executor {
    /// Awaited directly on the runtime.
    Cooperative(Arc<dyn AsyncExecutor>),
    /// Off-loaded to the blocking worker pool.
    Blocking(Arc<dyn BlockingExecutor>),
}

impl Executor {
    /// Wraps a cooperative executor.
    pub fn cooperative(executor: impl AsyncExecutor + 'static) -> Self {
        Self::Cooperative(Arc::new(executor))
    }

    /// Wraps a blocking executor.
    pub fn blocking(executor: impl BlockingExecutor + 'static) -> Self {
        Self::Blocking(Arc::new(executor))
    }

    /// Builds a blocking executor from a closure.
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StepParams) -> ExecutorResult + Send + Sync + 'static,
    {
        Self::blocking(FnExecutor::new(name, func))
    }

    /// Builds a cooperative executor from an async closure.
    pub fn from_async_fn<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(StepParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExecutorResult> + Send + 'static,
    {
        Self::cooperative(AsyncFnExecutor::new(name, func))
    }

    /// Returns true if the executor reads the pipeline report.
    #[must_use]
    pub fn needs_run_report(&self) -> bool {
        match self {
            Self::Cooperative(inner) => inner.needs_run_report(),
            Self::Blocking(inner) => inner.needs_run_report(),
        }
    }

    /// Returns true if the executor needs the worker pool.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cooperative(inner) => f.debug_tuple("Cooperative").field(inner).finish(),
            Self::Blocking(inner) => f.debug_tuple("Blocking").field(inner).finish(),
        }
    }
}

/// A simple function-based blocking executor.
pub struct FnExecutor<F>
where
    F: Fn(&StepParams) -> ExecutorResult + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&StepParams) -> ExecutorResult + Send + Sync,
{
    /// Creates a new function-based executor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnExecutor<F>
where
    F: Fn(&StepParams) -> ExecutorResult + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor").field("name", &self.name).finish()
    }
}

impl<F> BlockingExecutor for FnExecutor<F>
where
    F: Fn(&StepParams) -> ExecutorResult + Send + Sync,
{
    fn execute(&self, params: &StepParams) -> ExecutorResult {
        (self.func)(params)
    }
}

/// An async function-based executor.
pub struct AsyncFnExecutor<F, Fut>
where
    F: Fn(StepParams) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutorResult> + Send,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnExecutor<F, Fut>
where
    F: Fn(StepParams) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutorResult> + Send,
{
    /// Creates a new async function-based executor.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnExecutor<F, Fut>
where
    F: Fn(StepParams) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutorResult> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnExecutor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> AsyncExecutor for AsyncFnExecutor<F, Fut>
where
    F: Fn(StepParams) -> Fut + Send + Sync,
    Fut: Future<Output = ExecutorResult> + Send,
{
    async fn execute(&self, params: StepParams) -> ExecutorResult {
        (self.func)(params).await
    }
}

/// Bounded pool for blocking executors.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool running at most `size` blocking executors at once.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Returns the pool size.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Runs a blocking executor on a pool thread.
    pub async fn run_blocking(
        &self,
        executor: Arc<dyn BlockingExecutor>,
        params: StepParams,
    ) -> ExecutorResult {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| anyhow!("worker pool closed: {e}"))?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            executor.execute(&params)
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("blocking executor panicked: {e}")),
        }
    }
}

/// Invokes an executor under a timeout.
///
/// Panics inside cooperative executors are converted into errors. A
/// blocking executor that times out keeps its pool thread until it returns.
pub async fn invoke(
    executor: &Executor,
    params: StepParams,
    timeout: Duration,
    pool: &WorkerPool,
) -> ExecutorResult {
    let run = async {
        match executor {
            Executor::Cooperative(inner) => AssertUnwindSafe(inner.execute(params))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow!("executor panicked"))),
            Executor::Blocking(inner) => pool.run_blocking(Arc::clone(inner), params).await,
        }
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "step timed out after {:.1}s",
            timeout.as_secs_f64()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn params(value: Value) -> StepParams {
        match value {
            Value::Object(map) => StepParams::new(map, false),
            _ => StepParams::default(),
        }
    }

    #[test]
    fn test_step_params_accessors() {
        let p = params(json!({"batch_size": 50, "max_pages": null, "entity": "products"}));
        assert_eq!(p.get_u64("batch_size"), Some(50));
        assert_eq!(p.get_u64("max_pages"), None);
        assert_eq!(p.get_str("entity"), Some("products"));

        let map = p.to_map();
        assert_eq!(map.get("dry_run"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_invoke_blocking_fn() {
        let executor = Executor::from_fn("double", |p| {
            let n = p.get_u64("n").unwrap_or(0);
            Ok(json!({"value": n * 2}))
        });
        assert!(executor.is_blocking());

        let pool = WorkerPool::new(2);
        let result = invoke(&executor, params(json!({"n": 21})), Duration::from_secs(5), &pool)
            .await
            .unwrap();
        assert_eq!(result, json!({"value": 42}));
    }

    #[tokio::test]
    async fn test_invoke_async_fn_sees_dry_run() {
        let executor = Executor::from_async_fn("echo", |p: StepParams| async move {
            Ok(json!({"dry_run": p.dry_run}))
        });
        assert!(!executor.is_blocking());

        let pool = WorkerPool::new(1);
        let p = StepParams::new(Map::new(), true);
        let result = invoke(&executor, p, Duration::from_secs(5), &pool).await.unwrap();
        assert_eq!(result, json!({"dry_run": true}));
    }

    #[tokio::test]
    async fn test_invoke_times_out() {
        let executor = Executor::from_async_fn("slow", |_p| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });

        let pool = WorkerPool::new(1);
        let err = invoke(&executor, StepParams::default(), Duration::from_millis(20), &pool)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_invoke_converts_panics() {
        let executor = Executor::from_async_fn("boom", |p: StepParams| async move {
            assert!(p.dry_run, "boom");
            Ok(Value::Null)
        });
        let pool = WorkerPool::new(1);
        let err = invoke(&executor, StepParams::default(), Duration::from_secs(1), &pool)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panicked"));

        let blocking = Executor::from_fn("boom", |_p| panic!("boom"));
        let err = invoke(&blocking, StepParams::default(), Duration::from_secs(1), &pool)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_pool_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let executor = {
            let active = active.clone();
            let peak = peak.clone();
            Executor::from_fn("busy", move |_p| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            })
        };

        let pool = WorkerPool::new(2);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let executor = executor.clone();
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                invoke(&executor, StepParams::default(), Duration::from_secs(5), &pool).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
