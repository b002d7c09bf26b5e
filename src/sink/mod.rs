//! Persistence of filtered records.
//!
//! - `traits`: the [`RecordSink`] seam
//! - `storage`: NDJSON parts on object storage
//! - `memory`: in-process sink for tests and dry runs
//! - `writer`: retrying [`BatchWriter`] used by the accumulator

mod memory;
mod storage;
mod traits;
mod writer;

pub use memory::MemorySink;
pub use storage::StorageSink;
pub use traits::{RecordSink, StoredRecord};
pub use writer::BatchWriter;
