//! API error responses.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use snafu::prelude::*;

use crate::error::{JobError, SinkError};

/// Errors returned by API handlers, each mapped to one status code.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("Unknown feed `{feed}`"))]
    UnknownFeed { feed: String },

    #[snafu(display("{source}"))]
    Busy { source: JobError },

    #[snafu(display("Upload exceeds the {limit} byte limit"))]
    PayloadTooLarge { limit: usize },

    #[snafu(display("Unsupported upload: {reason}"))]
    UnsupportedMediaType { reason: String },

    #[snafu(display("Missing multipart field `file`"))]
    MissingFile,

    #[snafu(display("Malformed multipart body: {source}"))]
    BadMultipart { source: MultipartError },

    #[snafu(display("No completed import for feed `{feed}`"))]
    NoSummary { feed: String },

    #[snafu(display("Record store error: {source}"))]
    Store { source: SinkError },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownFeed { .. } | ApiError::NoSummary { .. } => StatusCode::NOT_FOUND,
            ApiError::Busy { .. } => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::MissingFile | ApiError::BadMultipart { .. } => StatusCode::BAD_REQUEST,
            ApiError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
