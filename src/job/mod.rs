//! Import job lifecycle and progress tracking.
//!
//! - `state`: the lifecycle state machine
//! - `progress`: lock-light counters shared with pipeline workers
//! - `controller`: the single-job gate, status views and summaries

mod controller;
mod progress;
mod state;

pub use controller::{
    ImportJob, ImportSummary, JobController, JobControllerRef, JobHandle, JobStatus,
    MaintenanceGuard,
};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use state::JobState;
