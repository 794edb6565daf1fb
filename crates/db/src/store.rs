//! PostgreSQL-backed [`ResourceStore`].

use async_trait::async_trait;
use connector_core::outcome::ConnectorState;
use connector_core::store::{ResourceStore, StoreError};
use connector_core::types::ConnectorId;

use crate::models::status::ConnectorStateId;
use crate::repositories::ConnectorRepo;
use crate::DbPool;

/// Reads configuration from and writes connectivity state to `connectors`.
#[derive(Debug, Clone)]
pub struct PgResourceStore {
    pool: DbPool,
}

impl PgResourceStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl ResourceStore for PgResourceStore {
    async fn get_configuration(
        &self,
        owner_id: &str,
        connector_id: ConnectorId,
    ) -> Result<Vec<u8>, StoreError> {
        let connector = ConnectorRepo::find_by_id(&self.pool, owner_id, connector_id)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound {
                owner_id: owner_id.to_string(),
                connector_id,
            })?;

        serde_json::to_vec(&connector.configuration)
            .map_err(|e| StoreError::Backend(format!("Unable to encode configuration: {e}")))
    }

    async fn set_connectivity_state(
        &self,
        owner_id: &str,
        connector_id: ConnectorId,
        state: ConnectorState,
    ) -> Result<(), StoreError> {
        let updated = ConnectorRepo::update_state(
            &self.pool,
            owner_id,
            connector_id,
            ConnectorStateId::from(state),
        )
        .await
        .map_err(backend)?;

        if !updated {
            return Err(StoreError::NotFound {
                owner_id: owner_id.to_string(),
                connector_id,
            });
        }
        tracing::debug!(
            %connector_id,
            state = %state,
            "Connectivity state persisted",
        );
        Ok(())
    }
}
