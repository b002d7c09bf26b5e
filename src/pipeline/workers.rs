//! Fixed pool of validator/transformer workers.
//!
//! Workers run on tokio's blocking pool: classification is CPU-bound and
//! both queues they touch are blocking on this side.

use std::fmt::Display;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::dlq::{DeadLetterQueue, RejectedRow};
use crate::emit;
use crate::job::ProgressTracker;
use crate::metrics::events::{FailureStage, RowOutcome, RowProcessed};
use crate::record::{Classification, FilteredRecord, RawRecord, classify};

/// Per-job state shared by the reader and every worker.
pub(crate) struct RowContext {
    pub job_id: Uuid,
    pub tracker: Arc<ProgressTracker>,
    pub dlq: Option<Arc<DeadLetterQueue>>,
    pub runtime: Handle,
}

impl RowContext {
    /// Count a rejected row and hand it to the DLQ.
    pub fn reject(&self, line: Option<u64>, stage: FailureStage, error: &dyn Display) {
        self.tracker.record_failed_row();
        emit!(RowProcessed {
            outcome: RowOutcome::Failed
        });
        trace!(job_id = %self.job_id, ?line, stage = stage.as_str(), %error, "Row rejected");
        if let Some(dlq) = &self.dlq {
            dlq.record_failure_blocking(
                &self.runtime,
                RejectedRow::new(self.job_id, line, stage, error.to_string()),
            );
        }
    }
}

/// Start `count` workers draining `input` until it is closed and empty.
///
/// Each worker returns the number of rows it handled.
pub(crate) fn spawn(
    count: usize,
    input: Receiver<RawRecord>,
    output: mpsc::Sender<FilteredRecord>,
    ctx: Arc<RowContext>,
) -> Vec<JoinHandle<u64>> {
    (0..count)
        .map(|id| {
            let input = input.clone();
            let output = output.clone();
            let ctx = Arc::clone(&ctx);
            tokio::task::spawn_blocking(move || work(id, input, output, &ctx))
        })
        .collect()
}

fn work(
    id: usize,
    input: Receiver<RawRecord>,
    output: mpsc::Sender<FilteredRecord>,
    ctx: &RowContext,
) -> u64 {
    let mut handled = 0;
    for raw in input.iter() {
        handled += 1;
        match classify(&raw) {
            Classification::Qualifies(record) => {
                ctx.tracker.record_qualified();
                emit!(RowProcessed {
                    outcome: RowOutcome::Qualified
                });
                if output.blocking_send(*record).is_err() {
                    debug!(worker = id, "Accumulator gone, worker stopping");
                    break;
                }
            }
            Classification::DoesNotQualify => {
                ctx.tracker.record_skipped();
                emit!(RowProcessed {
                    outcome: RowOutcome::Skipped
                });
            }
            Classification::Invalid(e) => {
                ctx.reject(Some(raw.line), FailureStage::Validation, &e);
            }
        }
    }
    debug!(worker = id, rows = handled, "Worker finished");
    handled
}
