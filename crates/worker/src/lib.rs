//! Connector worker library.
//!
//! Runs connector containers on behalf of connector resources: each run
//! stages the connector's configuration, launches the container at most
//! once per logical operation, maps its exit status to a connectivity state
//! and writes that state back to the resource store.
//!
//! - [`activity`] -- the container-launching activity and mount layout.
//! - [`workflow`] -- run and cleanup workflows, timeouts, compensation.
//! - [`worker`] -- task tracking, cancellation and graceful shutdown.
//! - [`registry`] -- latest status of each submitted run.
//! - [`router`] / [`routes`] / [`handlers`] -- the HTTP run trigger.

pub mod activity;
pub mod config;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod worker;
pub mod workflow;
