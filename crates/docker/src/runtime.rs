//! The container runtime seam.
//!
//! [`ContainerRuntime`] exposes the individual lifecycle steps of one
//! container so that [`crate::runner::ContainerRunner`] can sequence them
//! and apply a single cleanup policy. The Docker implementation lives in
//! [`crate::client`]; tests substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use connector_core::run::ImageRef;
use tokio::task::JoinHandle;

use crate::error::RuntimeError;

/// Tracing target under which container output is re-emitted.
pub const CONTAINER_LOG_TARGET: &str = "connector_container";

// ---------------------------------------------------------------------------
// Container specification
// ---------------------------------------------------------------------------

/// How a host location is exposed inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Host directory bind mount.
    Bind,
    /// Named volume managed by the runtime.
    Volume,
}

impl MountKind {
    /// Parse `bind` / `volume` (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bind" => Some(Self::Bind),
            "volume" => Some(Self::Volume),
            _ => None,
        }
    }
}

/// One mount of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Host path for [`MountKind::Bind`], volume name for [`MountKind::Volume`].
    pub source: String,
    /// Path inside the container.
    pub target: String,
    pub kind: MountKind,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Caller-chosen name; also the idempotency key.
    pub name: String,
    pub image: ImageRef,
    pub cmd: Vec<String>,
    pub mounts: Vec<MountSpec>,
    /// Attach standard streams before start and feed standard input.
    pub attach_stdin: bool,
}

// ---------------------------------------------------------------------------
// Handles and output
// ---------------------------------------------------------------------------

/// A created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Runtime-assigned container id.
    pub id: String,
    pub name: String,
}

/// A started container.
#[derive(Debug, Default)]
pub struct StartedContainer {
    /// Task forwarding attached output; finishes when the container's
    /// output stream closes.
    pub output_pump: Option<JoinHandle<()>>,
}

impl StartedContainer {
    pub fn detached() -> Self {
        Self { output_pump: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
    Console,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Console => "console",
        }
    }
}

/// One chunk of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: LogStream,
    pub message: String,
}

impl LogLine {
    pub fn new(stream: LogStream, message: impl Into<String>) -> Self {
        Self {
            stream,
            message: message.into(),
        }
    }
}

/// Re-emit container output on [`CONTAINER_LOG_TARGET`], one event per line.
pub fn emit_container_output(container_name: &str, line: &LogLine) {
    for text in line.message.lines().filter(|l| !l.trim().is_empty()) {
        tracing::info!(
            target: CONTAINER_LOG_TARGET,
            container_name,
            stream = line.stream.as_str(),
            "{text}",
        );
    }
}

// ---------------------------------------------------------------------------
// Runtime trait
// ---------------------------------------------------------------------------

/// Lifecycle operations of a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Use the local image if present, otherwise pull it.
    async fn ensure_image(&self, image: &ImageRef) -> Result<(), RuntimeError>;

    /// Create (but do not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Start a created container.
    ///
    /// With `stdin`, standard streams are attached before start and the
    /// payload is fully written and the input closed before this returns.
    async fn start(
        &self,
        container: &ContainerHandle,
        stdin: Option<Vec<u8>>,
    ) -> Result<StartedContainer, RuntimeError>;

    /// Block until the container is no longer running; return its exit status.
    async fn wait(&self, container: &ContainerHandle) -> Result<i64, RuntimeError>;

    /// Combined stdout/stderr of a finished container.
    async fn logs(&self, container: &ContainerHandle) -> Result<Vec<LogLine>, RuntimeError>;

    /// Stop (with a grace period) then force-remove the container named
    /// `name`, including anonymous volumes. A container that does not
    /// exist is not an error.
    async fn stop_and_remove(&self, name: &str, grace: Duration) -> Result<(), RuntimeError>;
}

/// Standard input payload terminated for the connector's reader: a
/// trailing newline (if missing) then the end-of-transmission byte.
pub fn terminate_stdin(mut payload: Vec<u8>) -> Vec<u8> {
    if !payload.is_empty() && payload.last() != Some(&b'\n') {
        payload.push(b'\n');
    }
    payload.push(connector_core::run::END_OF_TRANSMISSION);
    payload
}
