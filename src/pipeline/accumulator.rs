//! Groups qualifying records into fixed-size batches for the writer.

use tokio::sync::mpsc;
use tracing::debug;

use crate::emit;
use crate::error::PipelineError;
use crate::metrics::events::PendingRecords;
use crate::record::FilteredRecord;
use crate::sink::BatchWriter;

/// Drain `input`, writing every `batch_size` records and a final partial
/// batch once all workers have hung up.
///
/// Returns the number of batches handed to the writer. Stops early only
/// when the writer reports the sink unavailable.
pub(crate) async fn run(
    mut input: mpsc::Receiver<FilteredRecord>,
    writer: &mut BatchWriter,
    batch_size: usize,
) -> Result<u64, PipelineError> {
    let mut batch = Vec::with_capacity(batch_size);
    let mut batches = 0;

    while let Some(record) = input.recv().await {
        batch.push(record);
        if batch.len() >= batch_size {
            writer.write(&batch).await?;
            batch.clear();
            batches += 1;
        }
        emit!(PendingRecords { count: batch.len() });
    }

    if !batch.is_empty() {
        debug!(records = batch.len(), "Flushing final partial batch");
        writer.write(&batch).await?;
        batches += 1;
        emit!(PendingRecords { count: 0 });
    }
    Ok(batches)
}
