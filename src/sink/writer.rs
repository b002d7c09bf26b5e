//! Retrying bulk writer in front of a [`RecordSink`].

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::dlq::{DeadLetterQueue, RejectedRow};
use crate::emit;
use crate::error::{PipelineError, SinkError};
use crate::job::ProgressTracker;
use crate::metrics::events::{BatchFailed, BatchRetried, BatchWritten, FailureStage};
use crate::record::FilteredRecord;

use super::traits::RecordSink;

/// Writes batches for one job, retrying with exponential backoff.
///
/// A batch that exhausts its retries counts its rows as failed and the job
/// carries on, unless `abort_after` consecutive batches have failed.
pub struct BatchWriter {
    sink: Arc<dyn RecordSink>,
    job_id: Uuid,
    tracker: Arc<ProgressTracker>,
    retry: RetryConfig,
    abort_after: usize,
    dlq: Option<Arc<DeadLetterQueue>>,
    consecutive_failures: usize,
}

impl BatchWriter {
    pub fn new(
        sink: Arc<dyn RecordSink>,
        job_id: Uuid,
        tracker: Arc<ProgressTracker>,
        retry: RetryConfig,
        abort_after: usize,
    ) -> Self {
        Self {
            sink,
            job_id,
            tracker,
            retry,
            abort_after,
            dlq: None,
            consecutive_failures: 0,
        }
    }

    pub fn with_dlq(mut self, dlq: Option<Arc<DeadLetterQueue>>) -> Self {
        self.dlq = dlq;
        self
    }

    /// Persist one batch. Only errors when the sink is deemed unavailable.
    pub async fn write(&mut self, batch: &[FilteredRecord]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let rows = batch.len();
        let mut attempt = 1;

        let error = loop {
            let start = Instant::now();
            match self.sink.append_batch(self.job_id, batch).await {
                Ok(()) => {
                    self.tracker.record_imported(rows as u64);
                    self.consecutive_failures = 0;
                    emit!(BatchWritten {
                        records: rows,
                        duration: start.elapsed(),
                    });
                    debug!(
                        job_id = %self.job_id,
                        sink = self.sink.name(),
                        rows,
                        attempt,
                        "Batch written"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        job_id = %self.job_id,
                        rows,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch write failed, retrying"
                    );
                    emit!(BatchRetried { attempt });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        self.give_up(batch, error).await
    }

    async fn give_up(
        &mut self,
        batch: &[FilteredRecord],
        error: SinkError,
    ) -> Result<(), PipelineError> {
        let rows = batch.len();
        error!(
            job_id = %self.job_id,
            sink = self.sink.name(),
            rows,
            attempts = self.retry.max_attempts,
            error = %error,
            "Batch write failed, rows counted as failed"
        );
        self.tracker.record_batch_failed(rows as u64);
        emit!(BatchFailed { records: rows });

        if let Some(dlq) = &self.dlq {
            let message = error.to_string();
            for record in batch {
                dlq.record_failure(RejectedRow::new(
                    self.job_id,
                    Some(record.line),
                    FailureStage::Storage,
                    message.clone(),
                ))
                .await;
            }
        }

        self.consecutive_failures += 1;
        if self.abort_after > 0 && self.consecutive_failures >= self.abort_after {
            return Err(PipelineError::StorageUnavailable {
                batches: self.consecutive_failures,
                source: error,
            });
        }
        Ok(())
    }
}
