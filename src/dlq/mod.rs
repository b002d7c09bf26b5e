//! Dead Letter Queue for rejected rows.
//!
//! Rows that fail structural checks or validation, and rows of batches that
//! exhaust their write retries, are recorded as NDJSON to a configurable
//! storage location for later inspection and reprocessing.

mod queue;
mod types;

pub use queue::DeadLetterQueue;
pub use types::{FailureStats, RejectedRow};
