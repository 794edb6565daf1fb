//! Domain logic for the connector execution worker.
//!
//! Everything here is free of container-runtime and database access so it
//! can be unit tested in isolation:
//!
//! - [`run`] -- operation kinds, run requests, identifier parsing.
//! - [`outcome`] -- exit status classification and connectivity states.
//! - [`dispatch_cache`] -- process-local idempotency markers with a TTL.
//! - [`staging`] -- config/catalog files made visible to the container.
//! - [`store`] -- the resource store seam the workflows read and write.

pub mod dispatch_cache;
pub mod error;
pub mod outcome;
pub mod run;
pub mod staging;
pub mod store;
pub mod types;
