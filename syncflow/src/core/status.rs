//! Pipeline and step status enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The execution status of a pipeline or of a single step.
///
/// A pipeline and each of its steps hold one value from this set
/// independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Interrupted with a resumable snapshot on disk.
    Paused,
    /// Finished successfully.
    Completed,
    /// Finished with a failure.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
    /// Not executed (disabled, or blocked by an upstream failure).
    Skipped,
    /// Failed an attempt and waiting for the next one.
    Retrying,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PipelineStatus {
    /// Returns the lower-case wire name of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
            Self::Retrying => "retrying",
        }
    }

    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }

    /// Returns true if a step in this status satisfies its dependents.
    #[must_use]
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    /// Returns true if a step in this status is acceptable for a completed pipeline.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Pending | Self::Skipped)
    }

    /// Returns true if a persisted pipeline in this status may be resumed.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "skipped" => Ok(Self::Skipped),
            "retrying" => Ok(Self::Retrying),
            other => Err(format!("unknown pipeline status '{other}'")),
        }
    }
}
