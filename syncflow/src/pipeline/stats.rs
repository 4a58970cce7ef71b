//! Run statistics, error records and the pipeline result.

use crate::core::PipelineStatus;
use crate::errors::SyncflowError;
use crate::utils::{elapsed_secs, iso_timestamp, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Counters updated as steps settle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineStats {
    /// Steps registered in the pipeline.
    pub total_steps: usize,
    /// Steps that completed.
    pub completed_steps: usize,
    /// Steps that failed after their retries.
    pub failed_steps: usize,
    /// Steps skipped (disabled or blocked).
    pub skipped_steps: usize,
    /// Items reported by executors.
    pub total_items_processed: u64,
    /// Items reported as successful.
    pub successful_items: u64,
    /// Items reported as failed.
    pub failed_items: u64,
    /// When the run started.
    pub start_time: Option<Timestamp>,
    /// When the run ended.
    pub end_time: Option<Timestamp>,
}

impl PipelineStats {
    /// Run duration in seconds; measured to now while running.
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        let start = self.start_time.as_ref()?;
        let end = self.end_time.unwrap_or_else(now_utc);
        Some(elapsed_secs(start, &end))
    }

    /// Successful items as a percentage of processed items.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_items_processed == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successful_items as f64 / self.total_items_processed as f64 * 100.0;
        rate
    }

    /// Adds the `stats` counters of an executor result.
    ///
    /// Missing or non-integer counters count as zero.
    pub fn merge_result(&mut self, result: &Value) {
        let Some(stats) = result.get("stats").and_then(Value::as_object) else {
            return;
        };
        let counter = |key: &str| stats.get(key).and_then(Value::as_u64).unwrap_or(0);

        self.total_items_processed += counter("total_processed");
        self.successful_items += counter("successful");
        self.failed_items += counter("failed");
    }

    /// Snapshot with the derived values.
    #[must_use]
    pub fn report(&self) -> StatsReport {
        StatsReport {
            stats: self.clone(),
            duration: self.duration(),
            success_rate: self.success_rate(),
        }
    }
}

/// Stats plus derived duration and success rate, as written to reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    /// Raw counters.
    #[serde(flatten)]
    pub stats: PipelineStats,
    /// Run duration in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Success rate percentage.
    #[serde(default)]
    pub success_rate: f64,
}

/// An entry in the pipeline's error list.
///
/// Step failures carry the step fields; pipeline-level errors carry `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failing step id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Failing step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// When the error was recorded.
    pub timestamp: String,
    /// Error message.
    pub error: String,
    /// Attempt number that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Seconds spent in the failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Kind of pipeline-level error.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorRecord {
    /// Record for a failed step attempt.
    #[must_use]
    pub fn step(
        step_id: impl Into<String>,
        step_name: impl Into<String>,
        error: impl Into<String>,
        attempt: u32,
        duration: Option<f64>,
    ) -> Self {
        Self {
            step_id: Some(step_id.into()),
            step_name: Some(step_name.into()),
            timestamp: iso_timestamp(),
            error: error.into(),
            attempt: Some(attempt),
            duration,
            kind: None,
        }
    }

    /// Record for a pipeline-level error.
    #[must_use]
    pub fn pipeline(error: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            step_id: None,
            step_name: None,
            timestamp: iso_timestamp(),
            error: error.into(),
            attempt: None,
            duration: None,
            kind: Some(kind.into()),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Pipeline id.
    pub pipeline_id: String,
    /// Final status.
    pub status: PipelineStatus,
    /// Counters with derived values.
    pub stats: StatsReport,
    /// Executor results by step id.
    pub results: Map<String, Value>,
    /// Accumulated errors.
    pub errors: Vec<ErrorRecord>,
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// Items in the pipeline's dead letter queue.
    pub dlq_count: usize,
}

impl PipelineResult {
    /// Returns true if the run completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// Report file name for this result.
    #[must_use]
    pub fn file_name(&self) -> String {
        if self.dry_run {
            format!("pipeline_dry_run_{}.json", self.pipeline_id)
        } else {
            format!("pipeline_results_{}.json", self.pipeline_id)
        }
    }

    /// Writes the result as pretty JSON into `dir` and returns the path.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, SyncflowError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        tracing::info!(path = %path.display(), "Results saved");
        Ok(path)
    }
}
