//! The ingestion pipeline.
//!
//! Runs one import job end to end:
//!
//! ```text
//! reader ──bounded──▶ N workers ──bounded──▶ accumulator ──▶ BatchWriter ──▶ RecordSink
//! ```
//!
//! - **Reader**: one blocking task tokenizing the upload in file order
//! - **Workers**: fixed pool on tokio's blocking threads (CPU bound)
//! - **Accumulator**: one async task batching qualifying records for the sink
//!
//! Both queues are bounded, so a slow sink backs up into the workers and
//! then the reader. Every stage exits once its input closes and drains.

mod accumulator;
mod workers;

use bytes::{Buf, Bytes};
use crossbeam_channel::Sender;
use indexmap::IndexMap;
use snafu::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::{Config, FeedConfig, IngestSettings};
use crate::dlq::DeadLetterQueue;
use crate::emit;
use crate::error::{
    ConfigSnafu, DlqSnafu, JobSnafu, PipelineError, PipelineStorageSnafu, ReadInputSnafu, ReaderError,
    StructuralSnafu, TaskJoinSnafu,
};
use crate::job::{ImportSummary, JobController, JobHandle};
use crate::metrics::events::{BytesRead, FailureStage};
use crate::record::RawRecord;
use crate::sink::{BatchWriter, RecordSink, StorageSink};
use crate::source::{DelimitedReader, estimate_rows};

use workers::RowContext;

/// Import pipeline for one feed.
pub struct Pipeline {
    feed_name: String,
    feed: FeedConfig,
    settings: IngestSettings,
    batch_size: usize,
    sink: Arc<dyn RecordSink>,
    dlq: Option<Arc<DeadLetterQueue>>,
}

impl Pipeline {
    pub fn new(
        feed_name: impl Into<String>,
        feed: FeedConfig,
        settings: IngestSettings,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let batch_size = feed.batch_size.unwrap_or(settings.batch_size);
        Self {
            feed_name: feed_name.into(),
            feed,
            settings,
            batch_size,
            sink,
            dlq: None,
        }
    }

    /// Pipeline for a configured feed, persisting through a [`StorageSink`].
    pub async fn open(
        config: &Config,
        feed_name: &str,
        dlq: Option<Arc<DeadLetterQueue>>,
    ) -> Result<Self, PipelineError> {
        let feed = config.feed(feed_name).context(ConfigSnafu)?;
        let sink = StorageSink::new(&config.sink, feed_name)
            .await
            .context(PipelineStorageSnafu)?;
        info!(feed = feed_name, sink = sink.name(), "Feed ready");
        Ok(Self::new(feed_name, feed.clone(), config.ingest.clone(), Arc::new(sink)).with_dlq(dlq))
    }

    pub fn with_dlq(mut self, dlq: Option<Arc<DeadLetterQueue>>) -> Self {
        self.dlq = dlq;
        self
    }

    pub fn feed_name(&self) -> &str {
        &self.feed_name
    }

    pub fn sink(&self) -> &Arc<dyn RecordSink> {
        &self.sink
    }

    /// Settings and feed checks, repeated here since a pipeline can be
    /// built without going through [`Config::from_yaml`].
    fn validate(&self) -> Result<(), PipelineError> {
        self.settings.validate().context(ConfigSnafu)?;
        self.feed.validate(&self.feed_name).context(ConfigSnafu)
    }

    /// Process `source` for the job behind `handle`, which must still be
    /// uploading. The job ends `Completed` or `Failed` either way.
    pub async fn run(
        &self,
        mut handle: JobHandle,
        source: Bytes,
    ) -> Result<ImportSummary, PipelineError> {
        if let Err(e) = self.validate() {
            error!(feed = %self.feed_name, "Refusing to start import: {}", e);
            handle.fail(&e);
            return Err(e);
        }

        let estimate = estimate_rows(&source);
        handle
            .start_processing(source.len() as u64, estimate)
            .context(JobSnafu)?;

        let result = self.execute(&handle, source).await;

        if let Some(dlq) = &self.dlq
            && let Err(e) = dlq.finalize().await
        {
            error!("Failed to flush DLQ: {}", e);
        }

        match result {
            Ok(()) => handle.complete().context(JobSnafu),
            Err(e) => {
                handle.fail(&e);
                Err(e)
            }
        }
    }

    async fn execute(&self, handle: &JobHandle, source: Bytes) -> Result<(), PipelineError> {
        let job_id = handle.id();
        info!(
            job_id = %job_id,
            feed = %self.feed_name,
            sink = self.sink.name(),
            workers = self.settings.workers,
            batch_size = self.batch_size,
            "Starting import"
        );

        let ctx = Arc::new(RowContext {
            job_id,
            tracker: Arc::clone(handle.tracker()),
            dlq: self.dlq.clone(),
            runtime: Handle::current(),
        });

        let (raw_tx, raw_rx) = crossbeam_channel::bounded(self.settings.queue_capacity);
        let (record_tx, record_rx) = mpsc::channel(self.settings.queue_capacity);

        let reader = {
            let feed = self.feed.clone();
            let ctx = Arc::clone(&ctx);
            tokio::task::spawn_blocking(move || read_source(source, &feed, raw_tx, &ctx))
        };
        let workers = workers::spawn(self.settings.workers, raw_rx, record_tx, Arc::clone(&ctx));

        let mut writer = BatchWriter::new(
            Arc::clone(&self.sink),
            job_id,
            Arc::clone(handle.tracker()),
            self.settings.retry.clone(),
            self.settings.abort_after_failed_batches,
        )
        .with_dlq(self.dlq.clone());
        let written = accumulator::run(record_rx, &mut writer, self.batch_size).await;

        let read = reader.await.context(TaskJoinSnafu)?;
        for worker in workers {
            worker.await.context(TaskJoinSnafu)?;
        }

        read.context(StructuralSnafu)?;
        let batches = written?;
        debug!(job_id = %job_id, batches, "All stages finished");
        Ok(())
    }
}

/// Reader stage: tokenize in file order and feed the worker queue.
///
/// Row-level structural errors are counted here, since they never reach a
/// worker. Returns early without error if the workers have gone away.
fn read_source(
    source: Bytes,
    feed: &FeedConfig,
    output: Sender<RawRecord>,
    ctx: &RowContext,
) -> Result<(), ReaderError> {
    let mut reader = DelimitedReader::new(source.reader(), feed.delimiter_byte(), &feed.header)?;

    while let Some(item) = reader.next() {
        ctx.tracker
            .record_read(reader.rows_read(), reader.bytes_consumed());
        match item {
            Ok(raw) => {
                if output.send(raw).is_err() {
                    debug!(job_id = %ctx.job_id, "Workers gone, reader stopping");
                    break;
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => ctx.reject(e.line(), FailureStage::Structural, &e),
        }
    }

    emit!(BytesRead {
        bytes: reader.bytes_consumed()
    });
    debug!(
        job_id = %ctx.job_id,
        rows = reader.rows_read(),
        bytes = reader.bytes_consumed(),
        "Reader finished"
    );
    Ok(())
}

/// Open a pipeline per configured feed, sharing one DLQ.
pub async fn open_pipelines(
    config: &Config,
) -> Result<IndexMap<String, Arc<Pipeline>>, PipelineError> {
    let dlq = open_dlq(config).await?;
    let mut pipelines = IndexMap::new();
    for name in config.feeds.keys() {
        let pipeline = Pipeline::open(config, name, dlq.clone()).await?;
        pipelines.insert(name.clone(), Arc::new(pipeline));
    }
    Ok(pipelines)
}

/// Import a file from disk as a single in-process job.
pub async fn run_import(
    config: &Config,
    feed: &str,
    path: &Path,
) -> Result<ImportSummary, PipelineError> {
    let pipeline = Pipeline::open(config, feed, open_dlq(config).await?).await?;

    let source = tokio::fs::read(path).await.context(ReadInputSnafu {
        path: path.display().to_string(),
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let controller = JobController::new();
    let handle = controller.begin(feed, &file_name).context(JobSnafu)?;
    pipeline.run(handle, Bytes::from(source)).await
}

async fn open_dlq(config: &Config) -> Result<Option<Arc<DeadLetterQueue>>, PipelineError> {
    Ok(DeadLetterQueue::from_config(&config.error_handling)
        .await
        .context(DlqSnafu)?
        .map(Arc::new))
}
