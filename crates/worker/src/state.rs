use std::sync::Arc;

use crate::worker::ConnectorWorker;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; the worker is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<ConnectorWorker>,
}
