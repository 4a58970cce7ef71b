//! State snapshots, restore and resume.
//!
//! A snapshot is written to `pipeline_state_<id>.json` when a run is
//! interrupted (and after every settled step when checkpoints are on).
//! Restoring archives the file as `archived_<file name>`.

use super::runner::Pipeline;
use super::stats::{PipelineResult, PipelineStats, StatsReport};
use crate::core::PipelineStatus;
use crate::errors::{StateError, SyncflowError};
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persisted state of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStep {
    /// Step status.
    pub status: PipelineStatus,
    /// Attempts made.
    #[serde(default)]
    pub attempts: u32,
    /// Last error.
    #[serde(default)]
    pub error: Option<String>,
}

/// Contents of a state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Pipeline id.
    pub pipeline_id: String,
    /// Pipeline status at snapshot time.
    pub status: PipelineStatus,
    /// Step states by id.
    #[serde(default)]
    pub step_states: BTreeMap<String, PersistedStep>,
    /// Executor results by step id.
    #[serde(default)]
    pub results: Map<String, Value>,
    /// Counters at snapshot time.
    pub stats: StatsReport,
    /// When the snapshot was taken.
    pub timestamp: String,
}

impl PipelineState {
    /// File name of the snapshot for a pipeline id.
    #[must_use]
    pub fn file_name(pipeline_id: &str) -> String {
        format!("pipeline_state_{pipeline_id}.json")
    }

    /// Reads a state file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        let invalid = |reason: String| StateError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let raw = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| invalid(e.to_string()))
    }

    /// Writes the state as pretty JSON through a temporary file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SyncflowError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Pipeline {
    /// Captures the current state with the given pipeline status.
    #[must_use]
    pub fn snapshot(&self, status: PipelineStatus) -> PipelineState {
        let step_states = self
            .steps
            .iter()
            .map(|(id, step)| {
                let state = step.state();
                (
                    id.clone(),
                    PersistedStep {
                        status: state.status,
                        attempts: state.attempts,
                        error: state.error.clone(),
                    },
                )
            })
            .collect();

        PipelineState {
            pipeline_id: self.id.clone(),
            status,
            step_states,
            results: self.results.clone(),
            stats: self.stats.report(),
            timestamp: iso_timestamp(),
        }
    }

    /// Path of this pipeline's state file.
    #[must_use]
    pub fn state_file_path(&self) -> PathBuf {
        self.config
            .state_dir
            .join(PipelineState::file_name(&self.id))
    }

    /// Writes a snapshot to the state directory.
    pub fn save_state(&self, status: PipelineStatus) -> Result<PathBuf, SyncflowError> {
        let path = self.state_file_path();
        self.snapshot(status).save(&path)?;
        Ok(path)
    }

    /// Loads a state file into this pipeline.
    ///
    /// The steps must already be registered. Step status, attempts and
    /// errors are restored for known ids; a step caught mid-attempt goes
    /// back to `pending`. Results and counters are restored. The file is
    /// renamed to `archived_<file name>`.
    pub fn restore(&mut self, path: impl AsRef<Path>) -> Result<PipelineState, SyncflowError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Restoring pipeline state");

        let state = PipelineState::load(path)?;
        if !state.status.is_resumable() {
            return Err(StateError::NotResumable {
                pipeline_id: state.pipeline_id,
                status: state.status,
            }
            .into());
        }
        if self.steps.is_empty() {
            return Err(StateError::NoSteps(state.pipeline_id).into());
        }

        self.id.clone_from(&state.pipeline_id);
        for (id, persisted) in &state.step_states {
            let Some(step) = self.steps.get_mut(id) else {
                warn!(pipeline_id = %self.id, step_id = %id, "State references unknown step");
                continue;
            };
            step.state.status = match persisted.status {
                PipelineStatus::Running | PipelineStatus::Retrying => PipelineStatus::Pending,
                other => other,
            };
            step.state.attempts = persisted.attempts;
            step.state.error.clone_from(&persisted.error);
        }

        self.results.clone_from(&state.results);
        let saved = &state.stats.stats;
        self.stats = PipelineStats {
            total_steps: self.steps.len(),
            completed_steps: saved.completed_steps,
            failed_steps: saved.failed_steps,
            skipped_steps: saved.skipped_steps,
            total_items_processed: saved.total_items_processed,
            successful_items: saved.successful_items,
            failed_items: saved.failed_items,
            start_time: None,
            end_time: None,
        };
        self.errors.clear();
        self.status = PipelineStatus::Paused;

        match archive_state_file(path) {
            Ok(archived) => info!(path = %archived.display(), "State file archived"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to archive state file"),
        }

        info!(
            pipeline_id = %self.id,
            restored_results = self.results.len(),
            "Pipeline state restored"
        );
        Ok(state)
    }

    /// Restores a state file and continues the run sequentially.
    ///
    /// Completed and skipped steps are not executed again, and neither are
    /// steps that had already failed.
    pub async fn resume(
        &mut self,
        path: impl AsRef<Path>,
        dry_run: bool,
    ) -> Result<PipelineResult, SyncflowError> {
        self.restore(path)?;
        self.run(dry_run).await
    }
}

/// Cancels a persisted run so it is no longer resumable.
///
/// The state is rewritten with status `cancelled` to
/// `pipeline_cancelled_<id>.json` next to the original, which is removed.
pub fn cancel_persisted(path: impl AsRef<Path>) -> Result<PathBuf, SyncflowError> {
    let path = path.as_ref();
    let mut state = PipelineState::load(path)?;
    state.status = PipelineStatus::Cancelled;
    state.timestamp = iso_timestamp();

    let target = path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(format!("pipeline_cancelled_{}.json", state.pipeline_id));
    state.save(&target)?;
    std::fs::remove_file(path)?;

    warn!(pipeline_id = %state.pipeline_id, path = %target.display(), "Persisted pipeline cancelled");
    Ok(target)
}

fn archive_state_file(path: &Path) -> std::io::Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let archived = path.with_file_name(format!("archived_{name}"));
    std::fs::rename(path, &archived)?;
    Ok(archived)
}
