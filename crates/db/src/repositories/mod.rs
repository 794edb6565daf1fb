//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod connector_repo;

pub use connector_repo::ConnectorRepo;
