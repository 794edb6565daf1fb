//! Connector resource models.

use connector_core::types::{ConnectorId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

use crate::models::status::StatusId;

/// A persisted connector resource.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Connector {
    pub id: ConnectorId,
    pub owner: String,
    /// Opaque connector configuration, staged for the container as-is.
    pub configuration: serde_json::Value,
    pub state_id: StatusId,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A connectivity state lookup entry.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConnectorStateRow {
    pub id: StatusId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
