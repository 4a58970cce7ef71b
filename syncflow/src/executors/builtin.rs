//! Executors for the standard migration steps.
//!
//! The platform connectors and per-entity sync logic live outside this
//! crate; these executors adapt them through [`ConnectionCheck`] and
//! [`SyncService`].

use super::{BlockingExecutor, ExecutorResult, StepParams};
use crate::dlq::count_on_disk;
use anyhow::Context;
use serde_json::{json, Map, Value};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A platform connection that can be checked.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionCheck: Send + Sync {
    /// Performs a connectivity check, returning platform details.
    fn test_connection(&self) -> anyhow::Result<Value>;
}

/// A per-entity sync service.
///
/// The returned value may carry a `stats` object with `total_processed`,
/// `successful` and `failed` counts; the pipeline aggregates them.
#[cfg_attr(test, mockall::automock)]
pub trait SyncService: Send + Sync {
    /// Syncs every item of the entity.
    fn sync_all(&self, batch_size: u64, max_pages: Option<u64>) -> anyhow::Result<Value>;
}

/// Checks every configured platform connection.
///
/// A failed check fails the step, except in dry runs where it is only
/// reported in the result.
#[derive(Default)]
pub struct TestConnectionsExecutor {
    checks: Vec<(String, Arc<dyn ConnectionCheck>)>,
}

impl TestConnectionsExecutor {
    /// Creates an executor without checks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named check. Checks run in insertion order.
    #[must_use]
    pub fn with_check(mut self, platform: impl Into<String>, check: Arc<dyn ConnectionCheck>) -> Self {
        self.checks.push((platform.into(), check));
        self
    }
}

impl Debug for TestConnectionsExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let platforms: Vec<&str> = self.checks.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("TestConnectionsExecutor")
            .field("platforms", &platforms)
            .finish()
    }
}

impl BlockingExecutor for TestConnectionsExecutor {
    fn execute(&self, params: &StepParams) -> ExecutorResult {
        info!("Testing connections");
        let mut results = Map::new();

        for (platform, check) in &self.checks {
            match check.test_connection() {
                Ok(data) => {
                    info!(platform = %platform, "Connection successful");
                    results.insert(platform.clone(), json!({"success": true, "data": data}));
                }
                Err(e) => {
                    error!(platform = %platform, error = %format!("{e:#}"), "Connection failed");
                    if !params.dry_run {
                        return Err(e.context(format!("{platform} connection failed")));
                    }
                    results.insert(
                        platform.clone(),
                        json!({"success": false, "error": format!("{e:#}")}),
                    );
                }
            }
        }

        Ok(Value::Object(results))
    }
}

/// Runs a [`SyncService`] with the step's `batch_size` and `max_pages`.
pub struct SyncServiceExecutor {
    entity: String,
    service: Arc<dyn SyncService>,
    default_batch_size: u64,
}

impl SyncServiceExecutor {
    /// Creates an executor syncing `entity` through `service`.
    pub fn new(entity: impl Into<String>, service: Arc<dyn SyncService>) -> Self {
        Self {
            entity: entity.into(),
            service,
            default_batch_size: 100,
        }
    }

    /// Batch size used when the step does not set `batch_size`.
    #[must_use]
    pub fn with_default_batch_size(mut self, batch_size: u64) -> Self {
        self.default_batch_size = batch_size;
        self
    }
}

impl Debug for SyncServiceExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServiceExecutor")
            .field("entity", &self.entity)
            .field("default_batch_size", &self.default_batch_size)
            .finish_non_exhaustive()
    }
}

impl BlockingExecutor for SyncServiceExecutor {
    fn execute(&self, params: &StepParams) -> ExecutorResult {
        let batch_size = params.get_u64("batch_size").unwrap_or(self.default_batch_size);
        let max_pages = params.get_u64("max_pages");

        info!(
            entity = %self.entity,
            batch_size,
            max_pages = ?max_pages,
            dry_run = params.dry_run,
            "Syncing entity"
        );

        if params.dry_run {
            info!(entity = %self.entity, "Dry run - would sync");
            return Ok(json!({"dry_run": true, "would_sync": true}));
        }

        self.service
            .sync_all(batch_size, max_pages)
            .with_context(|| format!("{} sync failed", self.entity))
    }
}

/// Reports how many items sit in each entity's dead letter queue.
#[derive(Debug, Clone)]
pub struct ProcessDlqExecutor {
    dlq_dir: PathBuf,
    entities: Vec<String>,
}

impl ProcessDlqExecutor {
    /// Entities inspected by default.
    pub const DEFAULT_ENTITIES: [&'static str; 4] = ["products", "categories", "customers", "pipeline"];

    /// Creates an executor inspecting the default entities under `dlq_dir`.
    pub fn new(dlq_dir: impl Into<PathBuf>) -> Self {
        Self {
            dlq_dir: dlq_dir.into(),
            entities: Self::DEFAULT_ENTITIES.iter().map(ToString::to_string).collect(),
        }
    }

    /// Replaces the inspected entities.
    #[must_use]
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }
}

impl BlockingExecutor for ProcessDlqExecutor {
    fn execute(&self, params: &StepParams) -> ExecutorResult {
        info!(dlq_dir = %self.dlq_dir.display(), "Processing DLQ items");

        let mut counts = Map::new();
        let mut total = 0usize;
        for entity in &self.entities {
            let count = count_on_disk(&self.dlq_dir, entity);
            total += count;
            counts.insert(entity.clone(), json!(count));
        }

        if total == 0 {
            info!("No items in DLQ");
            return Ok(json!({"dlq_counts": counts, "processed": 0}));
        }

        warn!(total, "Found items in DLQ");
        for (entity, count) in &counts {
            if count.as_u64().unwrap_or(0) > 0 {
                warn!(entity = %entity, count = %count, "DLQ entity has items");
            }
        }

        if params.dry_run {
            info!("Dry run - would process DLQ items");
            return Ok(json!({"dry_run": true, "dlq_counts": counts}));
        }

        Ok(json!({"dlq_counts": counts, "processed": 0}))
    }
}

/// Writes the pipeline's run report to `sync_report_<pipeline id>.json`.
///
/// The scheduler attaches the report to the step parameters. Dry runs
/// return the report without writing it.
#[derive(Debug, Clone)]
pub struct GenerateReportExecutor {
    report_dir: PathBuf,
}

impl GenerateReportExecutor {
    /// Creates an executor writing reports into `report_dir`.
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
        }
    }

    /// Path of the report for a pipeline id.
    #[must_use]
    pub fn report_path(&self, pipeline_id: &str) -> PathBuf {
        self.report_dir.join(format!("sync_report_{pipeline_id}.json"))
    }
}

impl BlockingExecutor for GenerateReportExecutor {
    fn execute(&self, params: &StepParams) -> ExecutorResult {
        info!("Generating sync report");
        let report = params
            .run_report
            .clone()
            .context("no run report attached to step parameters")?;

        if params.dry_run {
            info!("Dry run - report not written");
            return Ok(report);
        }

        let pipeline_id = report
            .get("pipeline_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let path = self.report_path(pipeline_id);
        write_report(&self.report_dir, &path, &report)
            .with_context(|| format!("failed to write report {}", path.display()))?;

        info!(path = %path.display(), "Report saved");
        Ok(report)
    }

    fn needs_run_report(&self) -> bool {
        true
    }
}

fn write_report(dir: &Path, path: &Path, report: &Value) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(path, serde_json::to_vec_pretty(report)?)?;
    Ok(())
}
