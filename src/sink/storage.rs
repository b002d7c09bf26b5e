//! Object storage sink writing NDJSON parts.
//!
//! Each batch becomes one object, `<feed>/part-<job>-<seq>.ndjson`, so a
//! failed attempt never leaves a partial batch behind.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SinkConfig;
use crate::error::{AppendSnafu, ClearSnafu, ReadSnafu, SerializeSnafu, SinkError, StorageError};
use crate::record::FilteredRecord;
use crate::storage::{StorageProvider, StorageProviderRef};

use super::traits::{RecordSink, StoredRecord};

/// Sink that stores a feed's records under its own prefix.
pub struct StorageSink {
    storage: StorageProviderRef,
    prefix: Path,
    name: String,
    sequence: AtomicU64,
}

impl StorageSink {
    /// Open the sink for `feed` at the configured location.
    pub async fn new(config: &SinkConfig, feed: &str) -> Result<Self, StorageError> {
        debug!(
            feed,
            path = %config.path,
            "Creating StorageSink"
        );
        let storage =
            StorageProvider::for_url_with_options(&config.path, config.storage_options.clone())
                .await?;
        Ok(Self::with_storage(Arc::new(storage), feed))
    }

    /// Sink for `feed` over an existing provider.
    pub fn with_storage(storage: StorageProviderRef, feed: &str) -> Self {
        Self {
            name: format!("{feed}@{}", storage.url()),
            storage,
            prefix: Path::from(feed),
            sequence: AtomicU64::new(0),
        }
    }

    fn encode(job_id: Uuid, records: &[FilteredRecord]) -> Result<Bytes, SinkError> {
        let mut buf = Vec::with_capacity(records.len() * 256);
        for record in records {
            let line = StoredRecord {
                job_id,
                record: record.clone(),
            };
            serde_json::to_writer(&mut buf, &line).context(SerializeSnafu)?;
            buf.push(b'\n');
        }
        Ok(Bytes::from(buf))
    }

    async fn parts(&self) -> Result<Vec<Path>, StorageError> {
        let parts = self.storage.list(Some(&self.prefix)).await?;
        Ok(parts
            .into_iter()
            .filter(|p| p.filename().is_some_and(|f| f.ends_with(".ndjson")))
            .collect())
    }

    async fn records_in(&self, part: &Path) -> Result<u64, StorageError> {
        let bytes = self.storage.get(part).await?;
        Ok(bytes.iter().filter(|&&b| b == b'\n').count() as u64)
    }
}

#[async_trait]
impl RecordSink for StorageSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn append_batch(
        &self,
        job_id: Uuid,
        records: &[FilteredRecord],
    ) -> Result<(), SinkError> {
        let payload = Self::encode(job_id, records)?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = self
            .prefix
            .child(format!("part-{}-{:06}.ndjson", job_id, seq));

        self.storage
            .put_payload(&path, PutPayload::from(payload))
            .await
            .context(AppendSnafu {
                records: records.len(),
            })?;

        debug!(path = %path, records = records.len(), "Wrote batch part");
        Ok(())
    }

    async fn clear(&self) -> Result<u64, SinkError> {
        let parts = self.parts().await.context(ClearSnafu)?;
        let mut removed = 0;
        for part in &parts {
            removed += self.records_in(part).await.context(ClearSnafu)?;
            self.storage.delete(part).await.context(ClearSnafu)?;
        }
        info!(sink = %self.name, parts = parts.len(), removed, "Cleared records");
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, SinkError> {
        let mut total = 0;
        for part in self.parts().await.context(ReadSnafu)? {
            total += self.records_in(&part).await.context(ReadSnafu)?;
        }
        Ok(total)
    }
}
