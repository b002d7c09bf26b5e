//! Job lifecycle states.

use serde::Serialize;
use std::fmt;

/// Lifecycle state of the import job slot.
///
/// `Idle → Uploading → Processing → Completed`, with `Failed` reachable
/// from `Uploading` and `Processing`. Terminal states return to `Idle`
/// when the next job is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Idle,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Uploading => "uploading",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Whether a job in this state holds the gate.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Uploading | JobState::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Uploading)
                | (Uploading, Processing)
                | (Processing, Completed)
                | (Uploading | Processing, Failed)
                | (Completed | Failed, Idle)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
