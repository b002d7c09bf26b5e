//! Prometheus exporter for the `sluice_*` metrics.
//!
//! `serve` mounts [`router`] on the API listener. The `import` command has no
//! API listener, so it binds its own with [`spawn_exporter`].

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

use crate::error::{BindSnafu, MetricsError, PrometheusInitSnafu};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Install the global Prometheus recorder and register metric descriptions.
pub fn install() -> Result<PrometheusHandle, MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;
    describe();
    Ok(handle)
}

/// Routes exposing `GET /metrics` for the given handle.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

/// Serve [`router`] plus `/health` on `addr` in the background.
///
/// Binding happens before returning so an occupied port fails the caller.
pub async fn spawn_exporter(addr: SocketAddr, handle: PrometheusHandle) -> Result<(), MetricsError> {
    let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;
    let app = router(handle).route("/health", get(|| async { "ok\n" }));

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(%addr, "Metrics exporter stopped: {}", e);
        }
    });
    Ok(())
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], handle.render())
}

fn describe() {
    describe_counter!("sluice_rows_processed_total", "Data rows handled, by outcome");
    describe_counter!("sluice_bytes_read_total", Unit::Bytes, "Extract bytes read");
    describe_counter!("sluice_uploads_total", "Extracts accepted by the API");
    describe_histogram!("sluice_upload_size_bytes", Unit::Bytes, "Size of accepted extracts");
    describe_counter!("sluice_batches_written_total", "Batches persisted by the sink");
    describe_counter!("sluice_records_imported_total", "Records persisted by the sink");
    describe_histogram!(
        "sluice_batch_write_duration_seconds",
        Unit::Seconds,
        "Time to persist one batch, retries included"
    );
    describe_counter!("sluice_batch_retries_total", "Batch write attempts after the first");
    describe_counter!("sluice_batches_failed_total", "Batches abandoned after the last retry");
    describe_counter!("sluice_records_failed_total", "Rows that failed, by stage");
    describe_counter!("sluice_job_transitions_total", "Job state transitions, by target state");
    describe_gauge!("sluice_pending_records", "Qualified records not yet written");
    describe_counter!("sluice_dlq_records_total", "Failed rows sent to the DLQ, by stage");
}
