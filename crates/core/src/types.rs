/// Connector identifiers are UUIDs (the `uid` half of a connector permalink).
pub type ConnectorId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
