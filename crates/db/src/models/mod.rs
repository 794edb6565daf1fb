//! Row models.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct
//! matching the database row.

pub mod connector;
pub mod status;
