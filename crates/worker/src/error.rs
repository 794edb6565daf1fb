use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use connector_core::error::CoreError;
use connector_core::outcome::RunOutcome;
use connector_core::staging::StagingError;
use connector_core::store::StoreError;
use connector_docker::RuntimeError;
use serde_json::json;

// ---------------------------------------------------------------------------
// Workflow errors
// ---------------------------------------------------------------------------

/// Why a run ended in the `Failed` state.
///
/// Every variant is terminal: activities run at most once and nothing is
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Malformed identifier or request; raised before any side effect.
    #[error("Unable to parse run request: {0}")]
    Parsing(#[from] CoreError),

    /// Configuration read failed.
    #[error("Resource store error: {0}")]
    Store(#[from] StoreError),

    /// The container finished and was cleaned up, but its state could not
    /// be written back. The stored state may be stale.
    #[error("Run {container_name} finished {outcome} but the connector state may be stale: {source}")]
    StaleState {
        container_name: String,
        outcome: RunOutcome,
        #[source]
        source: StoreError,
    },

    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("Container run failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Activity for {container_name} timed out after {}s", .timeout.as_secs())]
    Timeout {
        container_name: String,
        timeout: Duration,
    },

    #[error("Run {container_name} was cancelled")]
    Cancelled { container_name: String },
}

impl WorkflowError {
    /// Stable error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parsing(_) => "ParsingError",
            Self::Store(_) | Self::StaleState { .. } => "StoreError",
            Self::Staging(_) => "StagingError",
            Self::Runtime(_) => "RuntimeError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Cancelled { .. } => "CancelledError",
        }
    }

    /// Runs are never retried by the worker.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// HTTP errors
// ---------------------------------------------------------------------------

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent `{ "error", "code" }`
/// JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The worker is shutting down and accepts no new runs.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::InvalidIdentifier(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_IDENTIFIER", msg.clone())
                }
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
            AppError::Workflow(WorkflowError::Parsing(e)) => {
                (StatusCode::BAD_REQUEST, "PARSING_ERROR", e.to_string())
            }
            AppError::Workflow(e) => {
                tracing::error!(error = %e, kind = e.kind(), "Workflow failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "WORKFLOW_ERROR",
                    e.to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg.clone())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
