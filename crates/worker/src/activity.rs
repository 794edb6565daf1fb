//! The container-launching activity.
//!
//! One activity claims the dispatch marker, stages the run's inputs, and
//! executes the connector container. It runs at most once per run; the
//! workflow owns timeouts, compensation and clearing the dispatch marker.
//!
//! The activity writes its progress into an [`ActivityProgress`] owned by
//! the caller, so the workflow still knows how far a timed-out or
//! cancelled activity got.

use std::path::Path;
use std::sync::Arc;

use connector_core::dispatch_cache::DispatchCache;
use connector_core::outcome::RunOutcome;
use connector_core::run::{OperationKind, RunRequest};
use connector_core::staging::{relative_path, PayloadKind, Stager};
use connector_docker::{ContainerRunner, ContainerRuntime, ContainerSpec, MountKind, MountSpec};

use crate::config::WorkerConfig;
use crate::error::WorkflowError;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Pending,
    /// Dispatch marker set and inputs written to the staging root.
    Staged,
    /// The container may exist.
    Running,
    Completed(RunOutcome),
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Staged => f.write_str("staged"),
            Self::Running => f.write_str("running"),
            Self::Completed(outcome) => write!(f, "completed({outcome})"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// How far an activity got.
#[derive(Debug, Default)]
pub struct ActivityProgress {
    pub phase: RunPhase,
    /// This activity set the dispatch marker, so the owning workflow must
    /// clear it.
    pub claimed: bool,
}

impl ActivityProgress {
    fn advance(&mut self, container_name: &str, phase: RunPhase) {
        tracing::debug!(
            container_name,
            from = %self.phase,
            to = %phase,
            "Run phase transition",
        );
        self.phase = phase;
    }
}

/// Result of an activity that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The container ran to completion with this exit status.
    /// `cleanup_failed` is set when it could not be removed afterwards.
    Launched { exit_status: i64, cleanup_failed: bool },
    /// A live dispatch marker already existed; nothing was launched.
    AlreadyDispatched,
}

// ---------------------------------------------------------------------------
// Mount layout
// ---------------------------------------------------------------------------

/// Where staged files live on the host and inside containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountLayout {
    /// Mount exposing the staging root.
    pub staging: MountSpec,
    /// Shared data volume for write runs.
    pub shared: Option<MountSpec>,
}

impl MountLayout {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            staging: MountSpec {
                source: config.mount_source.clone(),
                target: config.mount_target.clone(),
                kind: config.mount_kind,
            },
            shared: config.shared_mount_source.as_ref().map(|source| MountSpec {
                source: source.clone(),
                target: config.shared_mount_target.clone(),
                kind: config.mount_kind,
            }),
        }
    }

    /// Bind-mount `root` at the same path inside containers.
    pub fn bind(root: &Path) -> Self {
        let path = root.to_string_lossy().into_owned();
        Self {
            staging: MountSpec {
                source: path.clone(),
                target: path,
                kind: MountKind::Bind,
            },
            shared: None,
        }
    }

    pub fn mounts_for(&self, kind: OperationKind) -> Vec<MountSpec> {
        let mut mounts = vec![self.staging.clone()];
        if kind.is_write() {
            mounts.extend(self.shared.clone());
        }
        mounts
    }

    /// Path of a staged payload as seen from inside the container.
    pub fn container_path(&self, payload: PayloadKind, name: &str) -> String {
        Path::new(&self.staging.target)
            .join(relative_path(payload, name))
            .to_string_lossy()
            .into_owned()
    }
}

/// Connector command line: `check --config <path>` or
/// `write --config <path> --catalog <path>`.
pub fn build_command(request: &RunRequest, layout: &MountLayout) -> Vec<String> {
    let name = request.staging_name();
    let mut cmd = vec![
        request.kind.verb().to_string(),
        "--config".to_string(),
        layout.container_path(PayloadKind::Config, name),
    ];
    if request.kind.is_write() {
        cmd.push("--catalog".to_string());
        cmd.push(layout.container_path(PayloadKind::Catalog, name));
    }
    cmd
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Collaborators of the container-launching activity.
pub struct ConnectorActivity {
    stager: Stager,
    cache: Arc<DispatchCache>,
    runner: ContainerRunner<dyn ContainerRuntime>,
    layout: MountLayout,
}

impl ConnectorActivity {
    pub fn new(
        stager: Stager,
        cache: Arc<DispatchCache>,
        runner: ContainerRunner<dyn ContainerRuntime>,
        layout: MountLayout,
    ) -> Self {
        Self {
            stager,
            cache,
            runner,
            layout,
        }
    }

    pub fn stager(&self) -> &Stager {
        &self.stager
    }

    pub fn cache(&self) -> &Arc<DispatchCache> {
        &self.cache
    }

    pub fn runner(&self) -> &ContainerRunner<dyn ContainerRuntime> {
        &self.runner
    }

    /// Claim the dispatch, stage, and run the container.
    ///
    /// A deduplicated run writes nothing. Staged files are removed when
    /// this returns or is dropped.
    pub async fn execute(
        &self,
        request: &RunRequest,
        configuration: &[u8],
        progress: &mut ActivityProgress,
    ) -> Result<Dispatch, WorkflowError> {
        let name = request.container_name.as_str();

        if !self.cache.claim(name) {
            tracing::info!(
                container_name = %name,
                "Container already dispatched by a previous attempt, skipping launch",
            );
            return Ok(Dispatch::AlreadyDispatched);
        }
        progress.claimed = true;

        let mut payloads: Vec<(PayloadKind, &[u8])> = vec![(PayloadKind::Config, configuration)];
        if let Some(catalog) = request.catalog.as_deref() {
            payloads.push((PayloadKind::Catalog, catalog));
        }
        let staged = match self
            .stager
            .stage(request.staging_name(), &payloads, request.kind.staging_mode())
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                // Nothing was launched, so a retry must be able to claim.
                self.cache.delete(name);
                progress.claimed = false;
                return Err(e.into());
            }
        };
        progress.advance(name, RunPhase::Staged);
        progress.advance(name, RunPhase::Running);

        let spec = ContainerSpec {
            name: name.to_string(),
            image: request.image.clone(),
            cmd: build_command(request, &self.layout),
            mounts: self.layout.mounts_for(request.kind),
            attach_stdin: request.kind.is_write(),
        };
        tracing::info!(
            container_name = %name,
            image = %spec.image,
            operation = %request.kind,
            "Launching connector container",
        );

        let output = self.runner.run(&spec, request.messages.clone()).await?;

        let removed = staged.release().await;
        tracing::debug!(container_name = %name, removed, "Staged files removed");

        Ok(Dispatch::Launched {
            exit_status: output.exit_status,
            cleanup_failed: output.cleanup_error.is_some(),
        })
    }
}
