//! sluice: bulk ingestion of delimited balance extracts.
//!
//! An uploaded extract is tokenized, validated and classified in parallel.
//! Accounts whose balance dropped by at least half against their average
//! are persisted in batches to a record store, while progress is tracked
//! for polling clients.
//!
//! # Example
//!
//! ```ignore
//! use sluice::{Config, run_import, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("sluice.yaml").unwrap();
//!     let summary = run_import(&config, "di319", "extract.csv".as_ref()).await?;
//!     println!("Imported {} of {} rows", summary.imported_rows, summary.total_rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dlq;
pub mod error;
pub mod job;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod server;
pub mod sink;
pub mod source;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use job::{ImportSummary, JobController, JobControllerRef, JobState};
pub use pipeline::{Pipeline, open_pipelines, run_import};
pub use server::{AppState, build_router, serve};
pub use storage::{StorageProvider, StorageProviderRef};
