//! Error types for sluice using snafu.
//!
//! Row-level errors ([`ReaderError`] for line shape, [`ValidationError`] for
//! field contents) are absorbed into progress counters. Batch-level
//! [`SinkError`]s are retried and then absorbed. Only [`PipelineError`] aborts
//! a job.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },
}

// ============ Config Errors ============

/// Errors raised while loading or validating configuration.
///
/// All of these surface before a single row is read.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Sink path is empty.
    #[snafu(display("Sink path cannot be empty"))]
    EmptySinkPath,

    /// A numeric ingest setting is out of range.
    #[snafu(display("Invalid ingest setting `{name}`: {reason}"))]
    InvalidSetting { name: String, reason: String },

    /// A feed definition is malformed.
    #[snafu(display("Invalid feed `{feed}`: {reason}"))]
    InvalidFeed { feed: String, reason: String },

    /// The requested feed is not configured.
    #[snafu(display("Unknown feed `{feed}`"))]
    UnknownFeed { feed: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Reader Errors ============

/// Structural errors from the delimited source reader.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The source has no header line.
    #[snafu(display("Source is empty: missing header line"))]
    EmptySource,

    /// The header does not match the feed's expected columns.
    #[snafu(display("Header mismatch: expected [{}], found [{}]", expected.join(", "), found.join(", ")))]
    HeaderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// A data line has the wrong number of fields.
    #[snafu(display("Line {line}: expected {expected} fields, found {actual}"))]
    FieldCount {
        line: u64,
        expected: usize,
        actual: usize,
    },

    /// A data line is not valid UTF-8.
    #[snafu(display("Line {line}: undecodable record: {message}"))]
    Undecodable { line: u64, message: String },

    /// The reader lost its position in the stream and cannot continue.
    #[snafu(display("Unrecoverable read failure near line {line}: {message}"))]
    Unrecoverable { line: u64, message: String },
}

impl ReaderError {
    /// Returns true if this error aborts the whole job rather than one row.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReaderError::EmptySource
                | ReaderError::HeaderMismatch { .. }
                | ReaderError::Unrecoverable { .. }
        )
    }

    /// Line number the error refers to, when it refers to a data line.
    pub fn line(&self) -> Option<u64> {
        match self {
            ReaderError::FieldCount { line, .. }
            | ReaderError::Undecodable { line, .. }
            | ReaderError::Unrecoverable { line, .. } => Some(*line),
            _ => None,
        }
    }
}

// ============ Validation Errors ============

/// Field-level parse failures. These fail a single row.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ValidationError {
    /// A required field is empty.
    #[snafu(display("Missing required field `{field}`"))]
    MissingField { field: &'static str },

    /// A date field is not `YYYY-MM-DD`.
    #[snafu(display("Invalid date in `{field}`: {value:?}"))]
    InvalidDate { field: &'static str, value: String },

    /// An amount field is not a decimal number.
    #[snafu(display("Invalid amount in `{field}`: {value:?}"))]
    InvalidAmount { field: &'static str, value: String },
}

// ============ Sink Errors ============

/// Errors from the persistence collaborator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Writing a batch failed.
    #[snafu(display("Failed to append batch of {records} records"))]
    Append {
        records: usize,
        source: StorageError,
    },

    /// Serializing a record failed.
    #[snafu(display("Failed to serialize record"))]
    Serialize { source: serde_json::Error },

    /// Clearing persisted records failed.
    #[snafu(display("Failed to clear records"))]
    Clear { source: StorageError },

    /// Reading back persisted records failed.
    #[snafu(display("Failed to read records"))]
    Read { source: StorageError },

    /// The sink refused the write.
    #[snafu(display("Sink unavailable: {message}"))]
    Unavailable { message: String },
}

// ============ Job Errors ============

/// Errors from the job controller gate.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// Another job (or a maintenance operation) holds the gate.
    #[snafu(display("An import job is already running ({state})"))]
    AlreadyRunning { state: String },

    /// A job handle tried an invalid state transition.
    #[snafu(display("Invalid job transition from {from} to {to}"))]
    InvalidTransition { from: String, to: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Failed to bind the standalone exporter listener.
    #[snafu(display("Failed to bind metrics exporter to {addr}"))]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}

// ============ DLQ Errors ============

/// Errors that can occur during Dead Letter Queue operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
// Prefix avoids snafu selector conflicts (e.g., WriteSnafu)
#[allow(clippy::enum_variant_names)]
pub enum DlqError {
    /// Failed to write to DLQ.
    #[snafu(display("Failed to write to DLQ"))]
    DlqWrite { source: StorageError },

    /// Failed to serialize a rejected row.
    #[snafu(display("Failed to serialize DLQ record"))]
    DlqSerialize { source: serde_json::Error },

    /// Failed to create DLQ storage provider.
    #[snafu(display("Failed to create DLQ storage"))]
    DlqStorage { source: StorageError },
}

// ============ Pipeline Error (job abort) ============

/// Errors that abort an ingestion job and move it to `Failed`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Structural failure that the reader cannot recover from.
    #[snafu(display("Structural error: {source}"))]
    Structural { source: ReaderError },

    /// Storage collaborator unavailable for the job.
    #[snafu(display("Storage unavailable after {batches} consecutive failed batches: {source}"))]
    StorageUnavailable { batches: usize, source: SinkError },

    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Failed to open the sink.
    #[snafu(display("Failed to open sink"))]
    PipelineStorage { source: StorageError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// DLQ error.
    #[snafu(display("DLQ error"))]
    Dlq { source: DlqError },

    /// Job gate refused the request.
    #[snafu(display("Job error"))]
    Job { source: JobError },

    /// Failed to read the input file from disk.
    #[snafu(display("Failed to read input {path}"))]
    ReadInput {
        path: String,
        source: std::io::Error,
    },

    /// HTTP server failed.
    #[snafu(display("Server error"))]
    Serve { source: std::io::Error },
}
