//! Repository for the `connectors` and `connector_states` tables.

use connector_core::types::ConnectorId;
use sqlx::PgPool;

use crate::models::connector::{Connector, ConnectorStateRow};
use crate::models::status::ConnectorStateId;

/// Column list for `connectors` queries.
const COLUMNS: &str = "\
    id, owner, configuration, state_id, deleted_at, created_at, updated_at";

/// Column list for `connector_states` queries.
const STATE_COLUMNS: &str = "id, name, description, created_at, updated_at";

/// Provides query operations for connectors and their connectivity states.
pub struct ConnectorRepo;

impl ConnectorRepo {
    // ── State lookups ────────────────────────────────────────────────

    /// List all connectivity states.
    pub async fn list_states(pool: &PgPool) -> Result<Vec<ConnectorStateRow>, sqlx::Error> {
        let query = format!("SELECT {STATE_COLUMNS} FROM connector_states ORDER BY id ASC");
        sqlx::query_as::<_, ConnectorStateRow>(&query)
            .fetch_all(pool)
            .await
    }

    // ── Connector queries ────────────────────────────────────────────

    /// Find a live (not soft-deleted) connector owned by `owner`.
    pub async fn find_by_id(
        pool: &PgPool,
        owner: &str,
        id: ConnectorId,
    ) -> Result<Option<Connector>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM connectors \
             WHERE id = $1 AND owner = $2 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, Connector>(&query)
            .bind(id)
            .bind(owner)
            .fetch_optional(pool)
            .await
    }

    // ── Connector mutations ──────────────────────────────────────────

    /// Set the connectivity state. Returns `true` if a row was updated.
    pub async fn update_state(
        pool: &PgPool,
        owner: &str,
        id: ConnectorId,
        state: ConnectorStateId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE connectors SET state_id = $3, updated_at = NOW() \
             WHERE id = $1 AND owner = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(owner)
        .bind(state.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
