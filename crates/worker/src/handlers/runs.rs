//! Handlers for the run trigger.
//!
//! Requests are validated before anything is spawned, so malformed
//! identifiers and container names are rejected with `400` and never reach
//! the workflow.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use connector_core::run::{parse_connector_id, OperationKind, RunTrigger};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Acknowledgement of an accepted run.
#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub container_name: String,
    pub operation: OperationKind,
}

/// Result of the cleanup-only workflow.
#[derive(Debug, Serialize)]
pub struct CleanupResult {
    pub removed: usize,
}

/// POST /api/v1/runs
///
/// Parse the trigger, spawn the run workflow and return `202` with the
/// container name the run will use.
pub async fn create_run(
    State(state): State<AppState>,
    Json(trigger): Json<RunTrigger>,
) -> AppResult<impl IntoResponse> {
    let request = trigger.into_request()?;
    let accepted = RunAccepted {
        container_name: request.container_name.clone(),
        operation: request.kind,
    };

    state.worker.submit(request)?;
    tracing::info!(
        container_name = %accepted.container_name,
        operation = %accepted.operation,
        "Run accepted",
    );

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: accepted })))
}

/// GET /api/v1/runs/{container_name}
///
/// Latest recorded status of the run using that container name. Finished
/// runs are forgotten once they are older than the dispatch TTL.
pub async fn get_run(
    State(state): State<AppState>,
    Path(container_name): Path<String>,
) -> AppResult<impl IntoResponse> {
    let status = state.worker.status(&container_name).ok_or_else(|| {
        AppError::NotFound(format!("No run recorded for container {container_name}"))
    })?;

    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/runs/{connector_id}/cleanup
///
/// Remove every staged file of the connector. Already-absent files are
/// not an error.
pub async fn cleanup_run(
    State(state): State<AppState>,
    Path(connector_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let connector_id = parse_connector_id(&connector_id)?;
    let removed = state.worker.cleanup(connector_id).await?;

    Ok(Json(DataResponse {
        data: CleanupResult { removed },
    }))
}
