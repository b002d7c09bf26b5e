//! Configuration loading and validation.
//!
//! Configuration is read from a YAML file (with environment variable
//! interpolation) and validated up front so that bad settings fail before
//! any row is read.

mod vars;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptySinkPathSnafu, EnvInterpolationSnafu, InvalidFeedSnafu, InvalidSettingSnafu,
    ReadFileSnafu, UnknownFeedSnafu, YamlParseSnafu,
};
use crate::record::DI319_COLUMNS;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Name of the built-in balance extract feed.
pub const DEFAULT_FEED: &str = "di319";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sink: SinkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestSettings,
    /// Feed definitions keyed by name (defaults to the `di319` feed).
    #[serde(default = "default_feeds")]
    pub feeds: IndexMap<String, FeedConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the API server (default: "0.0.0.0:8080").
    #[serde(default = "default_server_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Tunables for a single ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Number of parse workers (default: 8).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the reader -> worker and worker -> accumulator queues (default: 1000).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Records per bulk append (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upload size limit in bytes (default: 100 MiB).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Retry policy for failed batch writes.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Fail the job after this many consecutive batches exhaust their
    /// retries (0 = never).
    #[serde(default)]
    pub abort_after_failed_batches: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            max_upload_bytes: default_max_upload_bytes(),
            retry: RetryConfig::default(),
            abort_after_failed_batches: 0,
        }
    }
}

fn default_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_batch_size() -> usize {
    10_000
}

fn default_max_upload_bytes() -> usize {
    100 * MB
}

impl IngestSettings {
    /// Reject settings that would make a job misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive("workers", self.workers)?;
        ensure_positive("queue_capacity", self.queue_capacity)?;
        ensure_positive("batch_size", self.batch_size)?;
        ensure_positive("max_upload_bytes", self.max_upload_bytes)?;
        ensure_positive("retry.max_attempts", self.retry.max_attempts)?;
        ensure!(
            self.retry.initial_backoff_ms <= self.retry.max_backoff_ms,
            InvalidSettingSnafu {
                name: "retry.initial_backoff_ms",
                reason: "must not exceed retry.max_backoff_ms",
            }
        );
        Ok(())
    }
}

fn ensure_positive(name: &str, value: usize) -> Result<(), ConfigError> {
    ensure!(
        value > 0,
        InvalidSettingSnafu {
            name,
            reason: "must be greater than zero",
        }
    );
    Ok(())
}

/// Bounded retry with exponential backoff for batch writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per batch, including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Delay before the second attempt (default: 200ms).
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay (default: 2000ms).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    2000
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Shape of one delimited feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Field delimiter (default: ';').
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Expected header, in order. Matched exactly.
    #[serde(default = "default_header")]
    pub header: Vec<String>,
    /// Per-feed override of `ingest.batch_size`.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            header: default_header(),
            batch_size: None,
        }
    }
}

fn default_delimiter() -> char {
    ';'
}

fn default_header() -> Vec<String> {
    DI319_COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn default_feeds() -> IndexMap<String, FeedConfig> {
    let mut feeds = IndexMap::new();
    feeds.insert(DEFAULT_FEED.to_string(), FeedConfig::default());
    feeds
}

impl FeedConfig {
    /// Delimiter as the single byte the tokenizer expects.
    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees an ASCII delimiter
        self.delimiter as u8
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ConfigError> {
        ensure!(
            self.delimiter.is_ascii() && !matches!(self.delimiter, '"' | '\n' | '\r'),
            InvalidFeedSnafu {
                feed: name,
                reason: format!("unsupported delimiter {:?}", self.delimiter),
            }
        );
        ensure!(
            self.header.len() == DI319_COLUMNS.len(),
            InvalidFeedSnafu {
                feed: name,
                reason: format!(
                    "header must have {} columns, found {}",
                    DI319_COLUMNS.len(),
                    self.header.len()
                ),
            }
        );
        if let Some(size) = self.batch_size {
            ensure!(
                size > 0,
                InvalidFeedSnafu {
                    feed: name,
                    reason: "batch_size must be greater than zero",
                }
            );
        }
        Ok(())
    }
}

/// Sink configuration for persisted records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Storage URL for filtered records.
    /// Examples: "/var/lib/sluice/di319", "file:///data/out", "memory://"
    pub path: String,
    /// Storage options passed to the backend.
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Dead letter queue configuration for rejected rows and failed batches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    /// Where to write rejected rows (disabled when unset).
    #[serde(default)]
    pub dlq_path: Option<String>,
    /// Storage options for the DLQ backend.
    #[serde(default)]
    pub dlq_storage_options: HashMap<String, String>,
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Exporter address for the `import` command (default: "0.0.0.0:9090").
    /// `serve` exposes `/metrics` on the API listener instead.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, interpolating environment variables.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let interpolated = vars::interpolate(content);
        if !interpolated.errors.is_empty() {
            return EnvInterpolationSnafu {
                message: interpolated.errors.join("\n"),
            }
            .fail();
        }

        let config: Config = serde_yaml::from_str(&interpolated.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.sink.path.is_empty(), EmptySinkPathSnafu);
        self.ingest.validate()?;
        for (name, feed) in &self.feeds {
            feed.validate(name)?;
        }
        Ok(())
    }

    /// Look up a feed by name.
    pub fn feed(&self, name: &str) -> Result<&FeedConfig, ConfigError> {
        self.feeds
            .get(name)
            .context(UnknownFeedSnafu { feed: name })
    }

    /// Batch size for a feed, honoring its override.
    pub fn batch_size_for(&self, feed: &FeedConfig) -> usize {
        feed.batch_size.unwrap_or(self.ingest.batch_size)
    }
}
