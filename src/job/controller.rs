//! The single-job gate and its views for pollers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::prelude::*;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::emit;
use crate::error::{AlreadyRunningSnafu, InvalidTransitionSnafu, JobError};
use crate::metrics::events::JobTransition;

use super::progress::{ProgressSnapshot, ProgressTracker};
use super::state::JobState;

/// Shared handle to the controller.
pub type JobControllerRef = Arc<JobController>;

/// Metadata of the current (or most recent) import job.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub feed: String,
    pub file_name: String,
    pub state: JobState,
    pub source_bytes: Option<u64>,
    pub estimated_rows: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// What a poller sees.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    pub job: Option<ImportJob>,
    pub progress: ProgressSnapshot,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn idle() -> Self {
        Self {
            state: JobState::Idle,
            job: None,
            progress: ProgressSnapshot::empty(),
            error: None,
        }
    }
}

/// Final report of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub job_id: Uuid,
    pub feed: String,
    pub total_rows: u64,
    pub imported_rows: u64,
    pub failed_rows: u64,
    pub skipped_rows: u64,
    /// Share of rows persisted, `imported / total × 100`.
    pub filter_percentage: f64,
    pub duration_ms: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub rows_per_second: f64,
}

#[derive(Debug)]
struct Slot {
    state: JobState,
    job: Option<ImportJob>,
    tracker: Option<Arc<ProgressTracker>>,
    error: Option<String>,
    summary: Option<ImportSummary>,
    maintenance: bool,
}

/// Owns the job slot: at most one job is uploading or processing at a time.
#[derive(Debug)]
pub struct JobController {
    slot: Mutex<Slot>,
}

impl Default for JobController {
    fn default() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: JobState::Idle,
                job: None,
                tracker: None,
                error: None,
                summary: None,
                maintenance: false,
            }),
        }
    }
}

impl JobController {
    pub fn new() -> JobControllerRef {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Whether `begin` would currently be refused.
    pub fn is_busy(&self) -> bool {
        let slot = self.lock();
        slot.state.is_active() || slot.maintenance
    }

    /// Accept a new job, replacing a finished one.
    ///
    /// Refused with [`JobError::AlreadyRunning`] while another job is active
    /// or a [`MaintenanceGuard`] is held; nothing changes in that case.
    pub fn begin(
        self: &Arc<Self>,
        feed: &str,
        file_name: &str,
    ) -> Result<JobHandle, JobError> {
        let mut slot = self.lock();
        ensure!(
            !slot.state.is_active(),
            AlreadyRunningSnafu {
                state: slot.state.as_str(),
            }
        );
        ensure!(
            !slot.maintenance,
            AlreadyRunningSnafu {
                state: "maintenance",
            }
        );

        if slot.state.is_terminal() {
            transition(&mut slot, JobState::Idle)?;
        }
        transition(&mut slot, JobState::Uploading)?;

        let id = Uuid::new_v4();
        let tracker = Arc::new(ProgressTracker::new());
        slot.job = Some(ImportJob {
            id,
            feed: feed.to_string(),
            file_name: file_name.to_string(),
            state: JobState::Uploading,
            source_bytes: None,
            estimated_rows: None,
            started_at: Utc::now(),
            ended_at: None,
        });
        slot.tracker = Some(Arc::clone(&tracker));
        slot.error = None;

        info!(job_id = %id, feed, file = file_name, "Import job accepted");
        Ok(JobHandle {
            controller: Arc::clone(self),
            id,
            tracker,
            finished: false,
        })
    }

    /// Current state, job metadata, progress and failure cause.
    pub fn status(&self) -> JobStatus {
        let (state, job, tracker, error) = {
            let slot = self.lock();
            (
                slot.state,
                slot.job.clone(),
                slot.tracker.clone(),
                slot.error.clone(),
            )
        };
        JobStatus {
            state,
            job,
            progress: tracker
                .map(|t| t.snapshot())
                .unwrap_or_else(ProgressSnapshot::empty),
            error,
        }
    }

    /// Summary of the most recently completed job.
    pub fn summary(&self) -> Option<ImportSummary> {
        self.lock().summary.clone()
    }

    /// Take the gate for an administrative operation.
    pub fn exclusive(self: &Arc<Self>) -> Result<MaintenanceGuard, JobError> {
        let mut slot = self.lock();
        ensure!(
            !slot.state.is_active(),
            AlreadyRunningSnafu {
                state: slot.state.as_str(),
            }
        );
        ensure!(
            !slot.maintenance,
            AlreadyRunningSnafu {
                state: "maintenance",
            }
        );
        slot.maintenance = true;
        Ok(MaintenanceGuard {
            controller: Arc::clone(self),
        })
    }

    fn advance(&self, id: Uuid, next: JobState) -> Result<(), JobError> {
        let mut slot = self.lock();
        ensure_current(&slot, id, next)?;
        transition(&mut slot, next)
    }

    fn finish(
        &self,
        id: Uuid,
        tracker: &ProgressTracker,
        outcome: Result<(), String>,
    ) -> Result<Option<ImportSummary>, JobError> {
        let mut slot = self.lock();
        let next = if outcome.is_ok() {
            JobState::Completed
        } else {
            JobState::Failed
        };
        ensure_current(&slot, id, next)?;
        transition(&mut slot, next)?;

        tracker.finish(outcome.is_ok());
        let end_time = Utc::now();
        if let Some(job) = slot.job.as_mut() {
            job.ended_at = Some(end_time);
        }

        match outcome {
            Ok(()) => {
                let summary = slot
                    .job
                    .as_ref()
                    .map(|job| build_summary(job, &tracker.snapshot(), end_time));
                if let Some(summary) = &summary {
                    info!(
                        job_id = %id,
                        total = summary.total_rows,
                        imported = summary.imported_rows,
                        failed = summary.failed_rows,
                        skipped = summary.skipped_rows,
                        duration_ms = summary.duration_ms,
                        "Import job completed"
                    );
                    slot.summary = Some(summary.clone());
                }
                Ok(summary)
            }
            Err(cause) => {
                warn!(job_id = %id, error = %cause, "Import job failed");
                slot.error = Some(cause);
                Ok(None)
            }
        }
    }
}

fn ensure_current(slot: &Slot, id: Uuid, next: JobState) -> Result<(), JobError> {
    ensure!(
        slot.job.as_ref().is_some_and(|job| job.id == id),
        InvalidTransitionSnafu {
            from: "superseded",
            to: next.as_str(),
        }
    );
    Ok(())
}

fn transition(slot: &mut Slot, next: JobState) -> Result<(), JobError> {
    ensure!(
        slot.state.can_transition_to(next),
        InvalidTransitionSnafu {
            from: slot.state.as_str(),
            to: next.as_str(),
        }
    );
    slot.state = next;
    if let Some(job) = slot.job.as_mut() {
        job.state = next;
    }
    emit!(JobTransition {
        state: next.as_str()
    });
    Ok(())
}

fn build_summary(
    job: &ImportJob,
    progress: &ProgressSnapshot,
    end_time: DateTime<Utc>,
) -> ImportSummary {
    let filter_percentage = if progress.total_rows == 0 {
        0.0
    } else {
        progress.imported_rows as f64 / progress.total_rows as f64 * 100.0
    };
    ImportSummary {
        job_id: job.id,
        feed: job.feed.clone(),
        total_rows: progress.total_rows,
        imported_rows: progress.imported_rows,
        failed_rows: progress.failed_rows,
        skipped_rows: progress.skipped_rows,
        filter_percentage,
        duration_ms: (progress.elapsed_seconds * 1000.0).round() as u64,
        start_time: job.started_at,
        end_time,
        rows_per_second: progress.rows_per_second,
    }
}

/// Owned by the task driving one job. Every state change of that job goes
/// through here.
///
/// Dropping a handle before `complete` or `fail` marks the job failed.
#[derive(Debug)]
pub struct JobHandle {
    controller: JobControllerRef,
    id: Uuid,
    tracker: Arc<ProgressTracker>,
    finished: bool,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// The upload is in hand: `Uploading → Processing`.
    pub fn start_processing(
        &mut self,
        source_bytes: u64,
        estimated_rows: u64,
    ) -> Result<(), JobError> {
        self.controller.advance(self.id, JobState::Processing)?;
        {
            let mut slot = self.controller.lock();
            if let Some(job) = slot.job.as_mut() {
                job.source_bytes = Some(source_bytes);
                job.estimated_rows = Some(estimated_rows);
            }
        }
        self.tracker.start(estimated_rows);
        info!(
            job_id = %self.id,
            source_bytes,
            estimated_rows,
            "Processing started"
        );
        Ok(())
    }

    /// `Processing → Completed`; stores and returns the summary.
    ///
    /// On an invalid transition the handle is dropped unfinished, which
    /// fails the job.
    pub fn complete(mut self) -> Result<ImportSummary, JobError> {
        let summary = self.controller.finish(self.id, &self.tracker, Ok(()))?;
        self.finished = true;
        summary.context(InvalidTransitionSnafu {
            from: "completed",
            to: "summary",
        })
    }

    /// Move the job to `Failed`, keeping its counters and exposing `cause`.
    pub fn fail(mut self, cause: impl Display) {
        self.finished = true;
        if let Err(e) = self
            .controller
            .finish(self.id, &self.tracker, Err(cause.to_string()))
        {
            warn!(job_id = %self.id, error = %e, "Could not mark job failed");
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.finished
            && let Err(e) =
                self.controller
                    .finish(self.id, &self.tracker, Err("job abandoned".to_string()))
        {
            warn!(job_id = %self.id, error = %e, "Could not mark abandoned job failed");
        }
    }
}

/// Holds the gate for an administrative operation until dropped.
#[derive(Debug)]
pub struct MaintenanceGuard {
    controller: JobControllerRef,
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.controller.lock().maintenance = false;
    }
}
