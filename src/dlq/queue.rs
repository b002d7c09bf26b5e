//! Dead Letter Queue implementation.
//!
//! Buffers rejected rows and writes them as NDJSON parts to a configured
//! storage location. Each flush produces a new part, so earlier flushes are
//! never overwritten.

use bytes::Bytes;
use chrono::Utc;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::config::ErrorHandlingConfig;
use crate::emit;
use crate::error::{DlqError, DlqSerializeSnafu, DlqStorageSnafu, DlqWriteSnafu};
use crate::metrics::events::DlqRecorded;
use crate::storage::StorageProvider;

use super::types::{FailureStats, RejectedRow};

const FLUSH_THRESHOLD: usize = 100;

/// Dead Letter Queue for rejected rows.
///
/// Safe to share between the blocking reader and worker threads and the
/// async accumulator: buffering is synchronous, only flushing awaits.
pub struct DeadLetterQueue {
    storage: Arc<StorageProvider>,
    prefix: String,
    sequence: AtomicU64,
    buffer: Mutex<Vec<RejectedRow>>,
    stats: Mutex<FailureStats>,
    buffer_size: usize,
}

impl DeadLetterQueue {
    /// Create a new DLQ from configuration.
    ///
    /// Returns `None` if no DLQ path is configured.
    pub async fn from_config(config: &ErrorHandlingConfig) -> Result<Option<Self>, DlqError> {
        let Some(dlq_path) = &config.dlq_path else {
            return Ok(None);
        };

        let storage =
            StorageProvider::for_url_with_options(dlq_path, config.dlq_storage_options.clone())
                .await
                .context(DlqStorageSnafu)?;

        let prefix = format!("rejected-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        info!("DLQ enabled: {}/{}-*.ndjson", dlq_path, prefix);

        Ok(Some(Self::new(Arc::new(storage), prefix)))
    }

    fn new(storage: Arc<StorageProvider>, prefix: String) -> Self {
        Self {
            storage,
            prefix,
            sequence: AtomicU64::new(0),
            buffer: Mutex::new(Vec::new()),
            stats: Mutex::new(FailureStats::default()),
            buffer_size: FLUSH_THRESHOLD,
        }
    }

    /// Buffer a rejected row. Returns true once the buffer is due a flush.
    fn push(&self, row: RejectedRow) -> bool {
        debug!(
            job_id = %row.job_id,
            line = ?row.line,
            stage = row.stage.as_str(),
            "Recording DLQ row"
        );
        emit!(DlqRecorded { stage: row.stage });

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .increment(row.stage);

        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push(row);
        buffer.len() >= self.buffer_size
    }

    /// Record a rejected row from async code.
    pub async fn record_failure(&self, row: RejectedRow) {
        if self.push(row)
            && let Err(e) = self.flush().await
        {
            error!("Failed to flush DLQ: {}", e);
        }
    }

    /// Record a rejected row from a blocking thread.
    ///
    /// Must not be called from within an async context.
    pub fn record_failure_blocking(&self, runtime: &Handle, row: RejectedRow) {
        if self.push(row)
            && let Err(e) = runtime.block_on(self.flush())
        {
            error!("Failed to flush DLQ: {}", e);
        }
    }

    /// Flush buffered rows to a new NDJSON part.
    pub async fn flush(&self) -> Result<(), DlqError> {
        let rows = {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let mut ndjson = String::new();
        for row in &rows {
            let line = serde_json::to_string(row).context(DlqSerializeSnafu)?;
            ndjson.push_str(&line);
            ndjson.push('\n');
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = Path::from(format!("{}-{:05}.ndjson", self.prefix, seq));
        self.storage
            .put_payload(&path, PutPayload::from(Bytes::from(ndjson)))
            .await
            .context(DlqWriteSnafu)?;

        info!("Flushed {} rows to DLQ", rows.len());
        Ok(())
    }

    /// Flush remaining rows and log totals.
    pub async fn finalize(&self) -> Result<(), DlqError> {
        self.flush().await?;
        let stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        info!(
            "DLQ flushed: {} total rejections (structural={}, validation={}, storage={})",
            stats.total(),
            stats.structural,
            stats.validation,
            stats.storage
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::events::FailureStage;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn config(path: Option<String>) -> ErrorHandlingConfig {
        ErrorHandlingConfig {
            dlq_path: path,
            dlq_storage_options: HashMap::new(),
        }
    }

    fn read_all(dir: &std::path::Path) -> Vec<String> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        files.sort();
        files
            .iter()
            .flat_map(|p| {
                std::fs::read_to_string(p)
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dlq_from_config_none_when_no_path() {
        let dlq = DeadLetterQueue::from_config(&config(None)).await.unwrap();
        assert!(dlq.is_none());
    }

    #[tokio::test]
    async fn test_dlq_writes_ndjson_rows() {
        let temp_dir = TempDir::new().unwrap();
        let dlq_path = temp_dir.path().to_str().unwrap().to_string();
        let dlq = DeadLetterQueue::from_config(&config(Some(dlq_path)))
            .await
            .unwrap()
            .unwrap();

        let job = Uuid::new_v4();
        dlq.record_failure(RejectedRow::new(
            job,
            Some(3),
            FailureStage::Validation,
            "Invalid amount in `balance`: \"12x\"".into(),
        ))
        .await;
        dlq.record_failure(RejectedRow::new(
            job,
            None,
            FailureStage::Storage,
            "sink down".into(),
        ))
        .await;
        dlq.finalize().await.unwrap();

        let lines = read_all(temp_dir.path());
        assert_eq!(lines.len(), 2);
        for line in &lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["job_id"], job.to_string());
            assert!(value.get("stage").is_some());
            assert!(value.get("timestamp").is_some());
        }
        assert!(lines[0].contains("validation"));
    }

    #[tokio::test]
    async fn test_dlq_flushes_do_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let dlq_path = temp_dir.path().to_str().unwrap().to_string();
        let dlq = DeadLetterQueue::from_config(&config(Some(dlq_path)))
            .await
            .unwrap()
            .unwrap();

        let job = Uuid::new_v4();
        for line in 0..(FLUSH_THRESHOLD as u64 + 5) {
            dlq.record_failure(RejectedRow::new(
                job,
                Some(line + 1),
                FailureStage::Structural,
                "bad".into(),
            ))
            .await;
        }
        dlq.finalize().await.unwrap();

        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 2);
        assert_eq!(read_all(temp_dir.path()).len(), FLUSH_THRESHOLD + 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dlq_records_from_blocking_thread() {
        let storage = Arc::new(StorageProvider::in_memory());
        let dlq = Arc::new(DeadLetterQueue::new(Arc::clone(&storage), "t".into()));
        let runtime = Handle::current();

        let worker = Arc::clone(&dlq);
        tokio::task::spawn_blocking(move || {
            worker.record_failure_blocking(
                &runtime,
                RejectedRow::new(Uuid::new_v4(), Some(1), FailureStage::Validation, "x".into()),
            );
        })
        .await
        .unwrap();

        dlq.finalize().await.unwrap();
        assert_eq!(storage.list(None).await.unwrap().len(), 1);
    }
}
