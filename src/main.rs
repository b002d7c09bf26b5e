//! sluice: bulk ingestion of delimited balance extracts.
//!
//! `sluice serve` runs the upload API; `sluice import` processes one file
//! from disk and prints the job summary.

use clap::{Args as ClapArgs, Parser, Subcommand};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sluice::config::{Config, DEFAULT_FEED};
use sluice::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use sluice::{run_import, serve};

/// Delimited balance extract ingestion.
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP upload API.
    Serve {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Import one file from disk and print the summary.
    Import {
        #[command(flatten)]
        common: CommonArgs,

        /// Feed the file belongs to.
        #[arg(long, default_value = DEFAULT_FEED)]
        feed: String,

        /// Path to the delimited extract.
        path: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct CommonArgs {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("sluice starting");

    match args.command {
        Command::Serve { common } => {
            let config = load_config(&common)?;
            if common.dry_run {
                describe(&config);
                return Ok(());
            }
            serve(config).await
        }
        Command::Import { common, feed, path } => {
            let config = load_config(&common)?;
            config.feed(&feed).context(ConfigSnafu)?;
            if common.dry_run {
                describe(&config);
                return Ok(());
            }

            if config.metrics.enabled {
                let addr = config
                    .metrics
                    .address
                    .parse::<SocketAddr>()
                    .context(AddressParseSnafu)?;
                let handle = sluice::metrics::install().context(MetricsSnafu)?;
                sluice::metrics::spawn_exporter(addr, handle)
                    .await
                    .context(MetricsSnafu)?;
                debug!(
                    "Metrics endpoint listening on http://{}/metrics",
                    config.metrics.address
                );
            }

            let summary = run_import(&config, &feed, &path).await?;

            info!("Import completed");
            info!("  Job: {}", summary.job_id);
            info!("  Total rows: {}", summary.total_rows);
            info!("  Imported rows: {}", summary.imported_rows);
            info!("  Failed rows: {}", summary.failed_rows);
            info!("  Skipped rows: {}", summary.skipped_rows);
            info!("  Duration: {} ms", summary.duration_ms);
            info!("  Rows/sec: {:.1}", summary.rows_per_second);

            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => debug!("Failed to render summary as JSON: {}", e),
            }
            Ok(())
        }
    }
}

fn load_config(common: &CommonArgs) -> Result<Config, PipelineError> {
    Config::from_file(&common.config).context(ConfigSnafu)
}

fn describe(config: &Config) {
    info!("Dry run mode - validating configuration");
    info!("Sink: {}", config.sink.path);
    info!("API address: {}", config.server.address);
    info!(
        "Workers: {}, queue capacity: {}, batch size: {}",
        config.ingest.workers, config.ingest.queue_capacity, config.ingest.batch_size
    );
    for (name, feed) in &config.feeds {
        info!(
            "  Feed {}: delimiter {:?}, {} columns, batch size {}",
            name,
            feed.delimiter,
            feed.header.len(),
            config.batch_size_for(feed)
        );
    }
    if let Some(dlq) = &config.error_handling.dlq_path {
        info!("DLQ: {}", dlq);
    }
    info!("Configuration is valid");
}
