//! Container Run Adapter.
//!
//! - [`runtime`] -- the [`ContainerRuntime`] seam and the value types that
//!   cross it.
//! - [`client`] -- [`DockerRuntime`], the Docker Engine implementation.
//! - [`runner`] -- [`ContainerRunner`], which sequences one container run
//!   and owns the cleanup policy.

pub mod client;
pub mod error;
pub mod runner;
pub mod runtime;

pub use client::DockerRuntime;
pub use error::RuntimeError;
pub use runner::{ContainerRunner, RunOutput};
pub use runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, LogLine, LogStream, MountKind, MountSpec,
    StartedContainer,
};
