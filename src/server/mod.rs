//! HTTP API for uploading extracts and polling import progress.
//!
//! | Method | Path                                  | Purpose                     |
//! |--------|---------------------------------------|-----------------------------|
//! | POST   | `/api/feeds/{feed}/import`            | upload a file (multipart)   |
//! | GET    | `/api/feeds/{feed}/import/progress`   | live job status             |
//! | GET    | `/api/feeds/{feed}/import/summary`    | last completed job          |
//! | DELETE | `/api/feeds/{feed}/records`           | remove persisted records    |
//! | GET    | `/health`                             | liveness                    |
//! | GET    | `/metrics`                            | Prometheus, when enabled    |

mod error;
mod signal;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;
use serde::Serialize;
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::emit;
use crate::error::{AddressParseSnafu, JobError, MetricsSnafu, PipelineError, ServeSnafu};
use crate::job::{ImportSummary, JobController, JobControllerRef, JobStatus};
use crate::metrics::events::UploadReceived;
use crate::pipeline::{Pipeline, open_pipelines};

pub use error::ApiError;
pub use signal::shutdown_signal;

use error::{
    BadMultipartSnafu, BusySnafu, MissingFileSnafu, NoSummarySnafu, PayloadTooLargeSnafu,
    StoreSnafu, UnknownFeedSnafu, UnsupportedMediaTypeSnafu,
};

const ACCEPTED_CONTENT_TYPES: [&str; 4] = [
    "text/csv",
    "application/vnd.ms-excel",
    "application/octet-stream",
    "text/plain",
];

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: JobControllerRef,
    pub pipelines: Arc<IndexMap<String, Arc<Pipeline>>>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        controller: JobControllerRef,
        pipelines: IndexMap<String, Arc<Pipeline>>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            controller,
            pipelines: Arc::new(pipelines),
            max_upload_bytes,
        }
    }

    fn pipeline(&self, feed: &str) -> Result<Arc<Pipeline>, ApiError> {
        self.pipelines
            .get(feed)
            .cloned()
            .context(UnknownFeedSnafu { feed })
    }
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/feeds/{feed}/import",
            post(import).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/feeds/{feed}/import/progress", get(progress))
        .route("/api/feeds/{feed}/import/summary", get(summary))
        .route("/api/feeds/{feed}/records", delete(delete_records))
        .route("/health", get(|| async { "ok\n" }))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ImportAccepted {
    job_id: Uuid,
    message: String,
}

#[derive(Debug, Serialize)]
struct RecordsRemoved {
    removed: u64,
}

async fn import(
    State(state): State<AppState>,
    Path(feed): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImportAccepted>), ApiError> {
    let pipeline = state.pipeline(&feed)?;
    if state.controller.is_busy() {
        return Err(ApiError::Busy {
            source: JobError::AlreadyRunning {
                state: state.controller.state().to_string(),
            },
        });
    }

    let mut field = loop {
        let field = multipart
            .next_field()
            .await
            .context(BadMultipartSnafu)?
            .context(MissingFileSnafu)?;
        if field.name() == Some("file") {
            break field;
        }
    };

    let file_name = field.file_name().unwrap_or_default().to_string();
    check_upload_type(&file_name, field.content_type())?;

    let handle = state
        .controller
        .begin(&feed, &file_name)
        .context(BusySnafu)?;

    let mut body = BytesMut::new();
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(source) => {
                handle.fail(format!("upload interrupted: {source}"));
                return Err(ApiError::BadMultipart { source });
            }
        };
        if body.len() + chunk.len() > state.max_upload_bytes {
            handle.fail(format!(
                "upload exceeds the {} byte limit",
                state.max_upload_bytes
            ));
            return PayloadTooLargeSnafu {
                limit: state.max_upload_bytes,
            }
            .fail();
        }
        body.extend_from_slice(&chunk);
    }

    let body: Bytes = body.freeze();
    emit!(UploadReceived {
        bytes: body.len() as u64
    });

    let job_id = handle.id();
    info!(job_id = %job_id, feed = %feed, file = %file_name, bytes = body.len(), "Upload received");
    tokio::spawn(async move {
        if let Err(e) = pipeline.run(handle, body).await {
            warn!(job_id = %job_id, error = %e, "Import failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ImportAccepted {
            job_id,
            message: format!("Import of {file_name} started"),
        }),
    ))
}

fn check_upload_type(file_name: &str, content_type: Option<&str>) -> Result<(), ApiError> {
    let is_csv = std::path::Path::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    ensure!(
        is_csv,
        UnsupportedMediaTypeSnafu {
            reason: format!("file {file_name:?} is not a .csv file"),
        }
    );

    if let Some(content_type) = content_type {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        ensure!(
            ACCEPTED_CONTENT_TYPES.contains(&essence.as_str()),
            UnsupportedMediaTypeSnafu {
                reason: format!("content type {content_type:?} is not accepted"),
            }
        );
    }
    Ok(())
}

async fn progress(
    State(state): State<AppState>,
    Path(feed): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    state.pipeline(&feed)?;
    let status = state.controller.status();
    let for_feed = status.job.as_ref().is_some_and(|job| job.feed == feed);
    Ok(Json(if for_feed { status } else { JobStatus::idle() }))
}

async fn summary(
    State(state): State<AppState>,
    Path(feed): Path<String>,
) -> Result<Json<ImportSummary>, ApiError> {
    state.pipeline(&feed)?;
    state
        .controller
        .summary()
        .filter(|summary| summary.feed == feed)
        .map(Json)
        .context(NoSummarySnafu { feed })
}

async fn delete_records(
    State(state): State<AppState>,
    Path(feed): Path<String>,
) -> Result<Json<RecordsRemoved>, ApiError> {
    let pipeline = state.pipeline(&feed)?;
    let _guard = state.controller.exclusive().context(BusySnafu)?;
    let removed = pipeline.sink().clear().await.context(StoreSnafu)?;
    info!(feed = %feed, removed, "Records deleted");
    Ok(Json(RecordsRemoved { removed }))
}

/// Run the API server until a shutdown signal arrives.
///
/// A job still running at shutdown is allowed to finish first.
pub async fn serve(config: Config) -> Result<(), PipelineError> {
    let metrics = if config.metrics.enabled {
        Some(crate::metrics::install().context(MetricsSnafu)?)
    } else {
        None
    };

    let controller = JobController::new();
    let pipelines = open_pipelines(&config).await?;
    let state = AppState::new(
        Arc::clone(&controller),
        pipelines,
        config.ingest.max_upload_bytes,
    );

    let addr = config
        .server
        .address
        .parse::<SocketAddr>()
        .context(AddressParseSnafu)?;
    let listener = TcpListener::bind(addr).await.context(ServeSnafu)?;
    info!("API listening on {}", addr);

    let mut app = build_router(state);
    if let Some(handle) = metrics {
        app = app.merge(crate::metrics::router(handle));
        info!("Metrics available on http://{}/metrics", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(ServeSnafu)?;

    while controller.state().is_active() {
        info!("Waiting for the running import to finish");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    info!("Server stopped");
    Ok(())
}
