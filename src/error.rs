//! HTTP-facing error type.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::docai::RemoteServiceError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Rejected before any remote call is made.
    #[error("{0}")]
    InvalidInput(String),

    /// The multipart body could not be read (malformed, or over the size limit).
    #[error("Failed to read upload: {0}")]
    Upload(#[from] MultipartError),

    #[error("{context}: {source}")]
    Remote {
        context: &'static str,
        #[source]
        source: RemoteServiceError,
        /// Source chain for operators; `None` when traces are not exposed.
        trace: Option<String>,
    },
}

impl AppError {
    pub fn unsupported_type(mime: &str) -> Self {
        Self::InvalidInput(format!(
            "Unsupported file type: {}. Please upload JPEG, PNG, or PDF.",
            mime
        ))
    }

    pub fn remote(context: &'static str, source: RemoteServiceError, expose_trace: bool) -> Self {
        let trace = expose_trace.then(|| error_chain(&source));
        Self::Remote {
            context,
            source,
            trace,
        }
    }
}

/// Error response body. `detail` mirrors what the web client already reads.
#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let detail = self.to_string();
        let (status, body) = match self {
            AppError::InvalidInput(_) => {
                tracing::debug!("Rejected request: {}", detail);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse {
                        detail,
                        error_id: None,
                        trace: None,
                    },
                )
            }
            AppError::Upload(e) => {
                tracing::debug!("Rejected upload: {}", detail);
                (
                    e.status(),
                    ErrorResponse {
                        detail,
                        error_id: None,
                        trace: None,
                    },
                )
            }
            AppError::Remote { source, trace, .. } => {
                let error_id = Uuid::new_v4().to_string();
                tracing::error!(
                    error_id = %error_id,
                    "{}\n{}",
                    detail,
                    error_chain(&source)
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        detail,
                        error_id: Some(error_id),
                        trace,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// `err` followed by one `Caused by:` line per source.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\nCaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
