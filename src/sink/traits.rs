//! The persistence seam.
//!
//! The pipeline only needs a bulk append with success or failure feedback,
//! plus a bulk delete for maintenance. Implementations decide where records
//! actually live.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::SinkError;
use crate::record::FilteredRecord;

/// A persisted record, tagged with the job that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub record: FilteredRecord,
}

/// Destination for filtered records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Persist one batch. All-or-nothing from the caller's point of view:
    /// an error means the whole batch may be retried.
    async fn append_batch(&self, job_id: Uuid, records: &[FilteredRecord])
    -> Result<(), SinkError>;

    /// Remove every persisted record, returning how many were removed.
    async fn clear(&self) -> Result<u64, SinkError>;

    /// Number of persisted records.
    async fn count(&self) -> Result<u64, SinkError>;
}
