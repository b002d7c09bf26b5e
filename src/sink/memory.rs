//! In-process sink, handy for tests and dry runs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::error::SinkError;
use crate::record::FilteredRecord;

use super::traits::{RecordSink, StoredRecord};

/// Keeps records in a vector. Can be told to refuse writes.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<StoredRecord>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` append attempts.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Refuse every append attempt until told otherwise.
    pub fn fail_always(&self) {
        self.fail_next(usize::MAX);
    }

    /// Append attempts seen so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append_batch(
        &self,
        job_id: Uuid,
        records: &[FilteredRecord],
    ) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if refused {
            return Err(SinkError::Unavailable {
                message: "memory sink refusing writes".to_string(),
            });
        }

        let mut stored = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        stored.extend(records.iter().map(|record| StoredRecord {
            job_id,
            record: record.clone(),
        }));
        Ok(())
    }

    async fn clear(&self) -> Result<u64, SinkError> {
        let mut stored = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = stored.len() as u64;
        stored.clear();
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, SinkError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len() as u64)
    }
}
