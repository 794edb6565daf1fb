pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /runs                              trigger a check, health check or write run (POST)
/// /runs/{id}                         latest status of a run, by container name (GET)
/// /runs/{id}/cleanup                 remove a connector's staged files (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/runs", post(handlers::runs::create_run))
        .route("/runs/{id}", get(handlers::runs::get_run))
        .route("/runs/{id}/cleanup", post(handlers::runs::cleanup_run))
}
