//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in an ingestion job.
//! Events implement [`InternalEvent`], which records the corresponding
//! Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// How a processed row was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Qualified,
    Skipped,
    Failed,
}

impl RowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowOutcome::Qualified => "qualified",
            RowOutcome::Skipped => "skipped",
            RowOutcome::Failed => "failed",
        }
    }
}

/// Stage at which a row or batch was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Structural,
    Validation,
    Storage,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Structural => "structural",
            FailureStage::Validation => "validation",
            FailureStage::Storage => "storage",
        }
    }
}

/// Event emitted when a worker finishes a row.
pub struct RowProcessed {
    pub outcome: RowOutcome,
}

impl InternalEvent for RowProcessed {
    fn emit(self) {
        counter!("sluice_rows_processed_total", "outcome" => self.outcome.as_str()).increment(1);
    }
}

/// Event emitted when the reader consumes source bytes.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("sluice_bytes_read_total").increment(self.bytes);
    }
}

/// Event emitted when an upload has been fully received.
pub struct UploadReceived {
    pub bytes: u64,
}

impl InternalEvent for UploadReceived {
    fn emit(self) {
        trace!(bytes = self.bytes, "Upload received");
        counter!("sluice_uploads_total").increment(1);
        histogram!("sluice_upload_size_bytes").record(self.bytes as f64);
    }
}

/// Event emitted when a batch is persisted.
pub struct BatchWritten {
    pub records: usize,
    pub duration: Duration,
}

impl InternalEvent for BatchWritten {
    fn emit(self) {
        trace!(
            records = self.records,
            duration_ms = self.duration.as_millis() as u64,
            "Batch written"
        );
        counter!("sluice_batches_written_total").increment(1);
        counter!("sluice_records_imported_total").increment(self.records as u64);
        histogram!("sluice_batch_write_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a batch write attempt fails and will be retried.
pub struct BatchRetried {
    pub attempt: usize,
}

impl InternalEvent for BatchRetried {
    fn emit(self) {
        trace!(attempt = self.attempt, "Batch retried");
        counter!("sluice_batch_retries_total").increment(1);
    }
}

/// Event emitted when a batch exhausts its retries.
pub struct BatchFailed {
    pub records: usize,
}

impl InternalEvent for BatchFailed {
    fn emit(self) {
        trace!(records = self.records, "Batch failed");
        counter!("sluice_batches_failed_total").increment(1);
        counter!("sluice_records_failed_total", "stage" => FailureStage::Storage.as_str())
            .increment(self.records as u64);
    }
}

/// Event emitted on every job state transition.
pub struct JobTransition {
    pub state: &'static str,
}

impl InternalEvent for JobTransition {
    fn emit(self) {
        trace!(state = self.state, "Job transition");
        counter!("sluice_job_transitions_total", "state" => self.state).increment(1);
    }
}

/// Gauge of records waiting in the accumulator's current batch.
pub struct PendingRecords {
    pub count: usize,
}

impl InternalEvent for PendingRecords {
    fn emit(self) {
        gauge!("sluice_pending_records").set(self.count as f64);
    }
}

/// Event emitted when a rejected row or batch is recorded to the DLQ.
pub struct DlqRecorded {
    pub stage: FailureStage,
}

impl InternalEvent for DlqRecorded {
    fn emit(self) {
        counter!("sluice_dlq_records_total", "stage" => self.stage.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_emit_without_recorder() {
        // With no recorder installed the metrics facade is a no-op.
        RowProcessed {
            outcome: RowOutcome::Failed,
        }
        .emit();
        BatchWritten {
            records: 10,
            duration: Duration::from_millis(5),
        }
        .emit();
        JobTransition { state: "processing" }.emit();
    }

    #[test]
    fn test_failure_stage_serialization() {
        let json = serde_json::to_string(&FailureStage::Validation).unwrap();
        assert_eq!(json, "\"validation\"");
        assert_eq!(FailureStage::Storage.as_str(), "storage");
    }
}
