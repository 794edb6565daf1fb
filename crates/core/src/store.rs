//! Resource store seam.
//!
//! Workflows read a connector's persisted configuration and write back
//! its connectivity state through [`ResourceStore`]. The PostgreSQL
//! implementation lives in `connector-db`; tests use in-memory fakes.

use async_trait::async_trait;

use crate::outcome::ConnectorState;
use crate::types::ConnectorId;

/// Errors surfaced by a resource store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No connector with this id is visible to the owner.
    #[error("Connector {connector_id} not found for owner {owner_id}")]
    NotFound {
        owner_id: String,
        connector_id: ConnectorId,
    },

    /// The backing store failed (connection, query, decode).
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Read/write access to persisted connector resources.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Opaque configuration blob, passed to staging unmodified.
    async fn get_configuration(
        &self,
        owner_id: &str,
        connector_id: ConnectorId,
    ) -> Result<Vec<u8>, StoreError>;

    /// Persist the connector's connectivity state.
    async fn set_connectivity_state(
        &self,
        owner_id: &str,
        connector_id: ConnectorId,
        state: ConnectorState,
    ) -> Result<(), StoreError>;
}
