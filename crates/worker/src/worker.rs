//! The connector worker.
//!
//! [`ConnectorWorker`] owns the workflows and tracks every in-flight run so
//! shutdown can cancel them and wait for their compensating cleanup. The
//! status of each run is recorded in a [`RunRegistry`].

use std::sync::Arc;
use std::time::Duration;

use connector_core::dispatch_cache::DispatchCache;
use connector_core::run::RunRequest;
use connector_core::staging::Stager;
use connector_core::store::ResourceStore;
use connector_core::types::ConnectorId;
use connector_docker::{ContainerRunner, ContainerRuntime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::activity::{ConnectorActivity, MountLayout};
use crate::config::WorkerConfig;
use crate::error::{AppError, WorkflowError};
use crate::registry::{RunRegistry, RunStatus};
use crate::workflow::{ConnectorWorkflows, RunReport};

/// Default period of the eviction tick for dispatch markers and finished
/// run statuses.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

pub struct ConnectorWorker {
    workflows: Arc<ConnectorWorkflows>,
    runs: Arc<RunRegistry>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectorWorker {
    pub fn new(workflows: ConnectorWorkflows) -> Self {
        Self {
            workflows: Arc::new(workflows),
            runs: Arc::new(RunRegistry::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Wire the workflows from configuration and the two external seams.
    pub fn from_config(
        config: &WorkerConfig,
        store: Arc<dyn ResourceStore>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let activity = ConnectorActivity::new(
            Stager::new(config.staging_root.clone()),
            Arc::new(DispatchCache::new(config.dispatch_ttl)),
            ContainerRunner::new(runtime, config.stop_grace),
            MountLayout::from_config(config),
        );
        Self::new(ConnectorWorkflows::new(
            store,
            activity,
            config.max_concurrent_activities,
            config.activity_timeout,
        ))
    }

    pub fn workflows(&self) -> &Arc<ConnectorWorkflows> {
        &self.workflows
    }

    pub fn cache(&self) -> &Arc<DispatchCache> {
        self.workflows.activity().cache()
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    /// Latest recorded status of the run using `container_name`.
    pub fn status(&self, container_name: &str) -> Option<RunStatus> {
        self.runs.get(container_name)
    }

    /// Runs spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled() || self.tracker.is_closed()
    }

    /// Spawn the run workflow for `request`.
    ///
    /// The run is recorded as running, then as completed or failed when it
    /// ends. Fails with [`AppError::Unavailable`] once shutdown has begun.
    pub fn submit(
        &self,
        request: RunRequest,
    ) -> Result<JoinHandle<Result<RunReport, WorkflowError>>, AppError> {
        if self.is_shutting_down() {
            return Err(AppError::Unavailable(
                "Worker is shutting down".to_string(),
            ));
        }

        let name = request.container_name.clone();
        let operation = request.kind;
        self.runs.started(&name, operation);

        let workflows = Arc::clone(&self.workflows);
        let runs = Arc::clone(&self.runs);
        let cancel = self.cancel.child_token();
        Ok(self.tracker.spawn(async move {
            let run = tokio::spawn(async move { workflows.run(&request, &cancel).await });
            let result = match run.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    tracing::error!(container_name = %name, "Run task panicked");
                    runs.panicked(&name, operation);
                    std::panic::resume_unwind(e.into_panic());
                }
                Err(_) => Err(WorkflowError::Cancelled {
                    container_name: name.clone(),
                }),
            };
            runs.finish(&name, operation, &result);
            result
        }))
    }

    /// Run the cleanup-only workflow inline.
    pub async fn cleanup(&self, connector_id: ConnectorId) -> Result<usize, WorkflowError> {
        self.workflows.cleanup(connector_id).await
    }

    /// Periodically drop expired dispatch markers, and finished run
    /// statuses older than the dispatch TTL, until shutdown.
    pub fn spawn_cache_eviction(&self, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self.cache());
        let runs = Arc::clone(&self.runs);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Dispatch cache eviction stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = cache.len(), "Evicted expired dispatch markers");
                        }
                        let trimmed = runs.evict_older_than(cache.ttl());
                        if trimmed > 0 {
                            tracing::debug!(trimmed, remaining = runs.len(), "Dropped finished run statuses");
                        }
                    }
                }
            }
        })
    }

    /// Cancel in-flight runs and wait up to `grace` for them to finish
    /// their compensating cleanup. Returns `false` if the wait timed out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let in_flight = self.tracker.len();
        tracing::info!(in_flight, "Shutting down connector worker");

        self.cancel.cancel();
        self.tracker.close();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("All runs finished");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    grace_secs = grace.as_secs(),
                    "Timed out waiting for in-flight runs",
                );
                false
            }
        }
    }
}
