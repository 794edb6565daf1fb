//! Orchestration workflows.
//!
//! A run moves `Pending -> Staged -> Running -> Completed | Failed`:
//!
//! 1. read the connector configuration from the resource store;
//! 2. wait for an activity slot (bounded per process);
//! 3. execute the activity under a start-to-close timeout, racing the
//!    run's cancellation token;
//! 4. on success, persist the connectivity state and only then clear the
//!    dispatch marker. A container that exited but could not be removed
//!    keeps its outcome; removal is retried once;
//! 5. on failure, stop and remove the named container (if it may exist)
//!    before the error is reported.
//!
//! The cleanup-only workflow removes a connector's staged files and
//! touches neither the dispatch cache nor the container runtime.

use std::sync::Arc;
use std::time::Duration;

use connector_core::outcome::{ConnectorState, RunOutcome};
use connector_core::run::{container_name_for, OperationKind, RunRequest};
use connector_core::store::ResourceStore;
use connector_core::types::ConnectorId;
use connector_docker::RuntimeError;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::activity::{ActivityProgress, ConnectorActivity, Dispatch, RunPhase};
use crate::error::WorkflowError;

/// Default start-to-close timeout of one activity.
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Default number of container-launching activities per process.
pub const DEFAULT_MAX_CONCURRENT_ACTIVITIES: usize = 2;

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub container_name: String,
    pub kind: OperationKind,
    pub outcome: RunOutcome,
    /// Connectivity state written back to the resource store.
    pub state: ConnectorState,
    /// `false` when the dispatch cache deduplicated the launch.
    pub dispatched: bool,
    /// The container exited but could not be removed, even on retry.
    pub cleanup_failed: bool,
}

/// Check, write and cleanup workflows over shared collaborators.
pub struct ConnectorWorkflows {
    store: Arc<dyn ResourceStore>,
    activity: ConnectorActivity,
    permits: Arc<Semaphore>,
    activity_timeout: Duration,
}

impl ConnectorWorkflows {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        activity: ConnectorActivity,
        max_concurrent_activities: usize,
        activity_timeout: Duration,
    ) -> Self {
        Self {
            store,
            activity,
            permits: Arc::new(Semaphore::new(max_concurrent_activities)),
            activity_timeout,
        }
    }

    pub fn activity(&self) -> &ConnectorActivity {
        &self.activity
    }

    pub fn activity_timeout(&self) -> Duration {
        self.activity_timeout
    }

    /// Activity slots currently free.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    // ---- run workflow ----

    /// Execute one check, health check or write run to a terminal state.
    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunReport, WorkflowError> {
        let name = request.container_name.as_str();
        tracing::info!(
            container_name = %name,
            connector_id = %request.connector_id,
            operation = %request.kind,
            "Workflow started",
        );

        let configuration = self
            .store
            .get_configuration(&request.owner_id, request.connector_id)
            .await
            .inspect_err(|e| {
                tracing::error!(container_name = %name, error = %e, "Unable to read connector configuration");
            })?;

        let cancelled = || WorkflowError::Cancelled {
            container_name: name.to_string(),
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            permit = self.permits.acquire() => permit.map_err(|_| cancelled())?,
        };

        let mut progress = ActivityProgress::default();
        let result = {
            let activity = tokio::time::timeout(
                self.activity_timeout,
                self.activity.execute(request, &configuration, &mut progress),
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(cancelled()),
                finished = activity => match finished {
                    Ok(result) => result,
                    Err(_elapsed) => Err(WorkflowError::Timeout {
                        container_name: name.to_string(),
                        timeout: self.activity_timeout,
                    }),
                },
            }
        };
        drop(permit);

        match result {
            Ok(dispatch) => self.complete(request, dispatch, progress.claimed).await,
            Err(e) => {
                self.fail(request, &e, &mut progress).await;
                Err(e)
            }
        }
    }

    /// `Running -> Completed`: classify, persist, then clear the marker.
    async fn complete(
        &self,
        request: &RunRequest,
        dispatch: Dispatch,
        claimed: bool,
    ) -> Result<RunReport, WorkflowError> {
        let name = request.container_name.as_str();
        let (outcome, dispatched, cleanup_failed) = match dispatch {
            Dispatch::Launched {
                exit_status,
                cleanup_failed,
            } => {
                let cleanup_failed = cleanup_failed && !self.retry_remove(name).await;
                (RunOutcome::from_exit_status(exit_status), true, cleanup_failed)
            }
            Dispatch::AlreadyDispatched => (RunOutcome::Ok, false, false),
        };
        if outcome == RunOutcome::Unknown {
            tracing::warn!(container_name = %name, "Unrecognised exit status, treating run as ERROR");
        }
        let state = outcome.connectivity_state();

        let persisted = self
            .store
            .set_connectivity_state(&request.owner_id, request.connector_id, state)
            .await;
        if claimed {
            self.activity.cache().delete(name);
        }

        if let Err(source) = persisted {
            tracing::error!(
                container_name = %name,
                outcome = %outcome,
                error = %source,
                "Run finished but connectivity state could not be persisted",
            );
            return Err(WorkflowError::StaleState {
                container_name: name.to_string(),
                outcome,
                source,
            });
        }

        tracing::info!(
            container_name = %name,
            phase = %RunPhase::Completed(outcome),
            state = %state,
            dispatched,
            "Workflow completed",
        );
        Ok(RunReport {
            container_name: name.to_string(),
            kind: request.kind,
            outcome,
            state,
            dispatched,
            cleanup_failed,
        })
    }

    /// Second stop-and-remove for a container whose run already finished.
    /// The outcome stands either way.
    async fn retry_remove(&self, name: &str) -> bool {
        match self.activity.runner().remove(name).await {
            Ok(()) => {
                tracing::info!(container_name = %name, "Container removed on retry");
                true
            }
            Err(e) => {
                tracing::error!(
                    container_name = %name,
                    error = %e,
                    "Container could not be removed after a finished run",
                );
                false
            }
        }
    }

    /// `* -> Failed`: compensate, then clear the marker this run set.
    async fn fail(&self, request: &RunRequest, error: &WorkflowError, progress: &mut ActivityProgress) {
        let name = request.container_name.as_str();
        tracing::error!(
            container_name = %name,
            phase = %progress.phase,
            kind = error.kind(),
            error = %error,
            "Workflow failed",
        );
        progress.phase = RunPhase::Failed;

        // A pull failure returns before anything is created.
        let may_exist = progress.claimed
            && !matches!(error, WorkflowError::Runtime(RuntimeError::ImagePull { .. }));
        if may_exist {
            match self.activity.runner().remove(name).await {
                Ok(()) => {
                    tracing::info!(container_name = %name, "Compensating stop-and-remove completed");
                }
                Err(e) => {
                    tracing::error!(
                        container_name = %name,
                        error = %e,
                        "Compensating stop-and-remove failed",
                    );
                }
            }
        }

        if progress.claimed {
            self.activity.cache().delete(name);
        }
    }

    // ---- cleanup workflow ----

    /// Remove every staged file of `connector_id`. Already-absent files are
    /// not an error. Returns how many files were removed.
    pub async fn cleanup(&self, connector_id: ConnectorId) -> Result<usize, WorkflowError> {
        let remove_all = async {
            let mut removed = 0;
            for kind in OperationKind::ALL {
                let name = container_name_for(connector_id, kind);
                removed += self.activity.stager().remove(&name).await?;
            }
            Ok::<_, WorkflowError>(removed)
        };

        let removed = tokio::time::timeout(self.activity_timeout, remove_all)
            .await
            .map_err(|_| WorkflowError::Timeout {
                container_name: connector_id.to_string(),
                timeout: self.activity_timeout,
            })??;

        tracing::info!(%connector_id, removed, "Cleanup workflow completed");
        Ok(removed)
    }
}
