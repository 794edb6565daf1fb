#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use connector_core::dispatch_cache::DispatchCache;
use connector_core::outcome::ConnectorState;
use connector_core::run::{ImageRef, OperationKind, RunRequest};
use connector_core::staging::Stager;
use connector_core::store::{ResourceStore, StoreError};
use connector_core::types::ConnectorId;
use connector_docker::{
    ContainerHandle, ContainerRunner, ContainerRuntime, ContainerSpec, LogLine, LogStream,
    RuntimeError, StartedContainer,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use connector_worker::activity::{ConnectorActivity, MountLayout};
use connector_worker::router::build_app_router;
use connector_worker::state::AppState;
use connector_worker::worker::ConnectorWorker;
use connector_worker::workflow::ConnectorWorkflows;

pub const OWNER: &str = "users/alice";
pub const CONNECTOR: &str = "6f1c2a8e-3b4d-4e5f-9a0b-1c2d3e4f5a6b";
pub const IMAGE: &str = "airbyte/destination-postgres:0.3.26";

pub fn connector_id() -> ConnectorId {
    CONNECTOR.parse().unwrap()
}

pub fn check_request() -> RunRequest {
    RunRequest::new(
        OWNER,
        connector_id(),
        ImageRef::parse(IMAGE).unwrap(),
        OperationKind::Check,
    )
    .unwrap()
}

pub fn write_request() -> RunRequest {
    RunRequest::new(
        OWNER,
        connector_id(),
        ImageRef::parse(IMAGE).unwrap(),
        OperationKind::Write,
    )
    .unwrap()
    .with_catalog(br#"{"streams":[]}"#.to_vec())
    .with_messages(b"{\"id\":1}\n".to_vec())
}

// ---------------------------------------------------------------------------
// In-memory resource store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    configs: Mutex<HashMap<ConnectorId, Vec<u8>>>,
    states: Mutex<Vec<(ConnectorId, ConnectorState)>>,
    fail_reads: bool,
    fail_writes: bool,
    /// How long `set_connectivity_state` blocks before writing.
    write_delay: Option<Duration>,
}

impl MemoryStore {
    /// Store holding a configuration for [`connector_id`].
    pub fn seeded() -> Self {
        let store = Self::default();
        store.configs.lock().unwrap().insert(
            connector_id(),
            br#"{"host":"db","port":5432}"#.to_vec(),
        );
        store
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn slow_writes(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn states(&self) -> Vec<(ConnectorId, ConnectorState)> {
        self.states.lock().unwrap().clone()
    }

    pub fn last_state(&self) -> Option<ConnectorState> {
        self.states().last().map(|(_, state)| *state)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_configuration(
        &self,
        owner_id: &str,
        connector_id: ConnectorId,
    ) -> Result<Vec<u8>, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        self.configs
            .lock()
            .unwrap()
            .get(&connector_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                owner_id: owner_id.to_string(),
                connector_id,
            })
    }

    async fn set_connectivity_state(
        &self,
        _owner_id: &str,
        connector_id: ConnectorId,
        state: ConnectorState,
    ) -> Result<(), StoreError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.states.lock().unwrap().push((connector_id, state));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake container runtime
// ---------------------------------------------------------------------------

/// Records every call as `"<step> <container name or image>"`.
#[derive(Default)]
pub struct FakeRuntime {
    exit_status: i64,
    pull_fails: bool,
    /// How long `wait` blocks before the container "exits".
    run_for: Option<Duration>,
    /// `create`, `start`, `wait` or `logs`.
    fail_at: Option<&'static str>,
    /// Remaining `stop_and_remove` calls that fail.
    cleanup_failures: Mutex<usize>,
    calls: Mutex<Vec<String>>,
    specs: Mutex<Vec<ContainerSpec>>,
    stdin: Mutex<Vec<Vec<u8>>>,
}

impl FakeRuntime {
    pub fn exiting(exit_status: i64) -> Self {
        Self {
            exit_status,
            ..Self::default()
        }
    }

    pub fn failing_pull(mut self) -> Self {
        self.pull_fails = true;
        self
    }

    pub fn running_for(mut self, delay: Duration) -> Self {
        self.run_for = Some(delay);
        self
    }

    /// Fail the named step with a daemon error.
    pub fn failing_at(mut self, step: &'static str) -> Self {
        self.fail_at = Some(step);
        self
    }

    /// Fail the next `times` stop-and-remove calls.
    pub fn failing_cleanup(self, times: usize) -> Self {
        *self.cleanup_failures.lock().unwrap() = times;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls of `step` (`pull`, `create`, `start`, ...).
    pub fn count(&self, step: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(step))
            .count()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn stdin(&self) -> Vec<Vec<u8>> {
        self.stdin.lock().unwrap().clone()
    }

    fn record(&self, step: &str, subject: &str) {
        self.calls.lock().unwrap().push(format!("{step} {subject}"));
    }

    fn fail(&self, step: &str, name: &str) -> Result<(), RuntimeError> {
        if self.fail_at == Some(step) {
            return Err(RuntimeError::Wait {
                name: name.to_string(),
                message: format!("{step} rejected by daemon"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        self.record("pull", &image.to_string());
        if self.pull_fails {
            return Err(RuntimeError::ImagePull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.record("create", &spec.name);
        self.fail("create", &spec.name)?;
        self.specs.lock().unwrap().push(spec.clone());
        Ok(ContainerHandle {
            id: format!("id-{}", spec.name),
            name: spec.name.clone(),
        })
    }

    async fn start(
        &self,
        container: &ContainerHandle,
        stdin: Option<Vec<u8>>,
    ) -> Result<StartedContainer, RuntimeError> {
        self.record("start", &container.name);
        self.fail("start", &container.name)?;
        if let Some(bytes) = stdin {
            self.stdin.lock().unwrap().push(bytes);
        }
        Ok(StartedContainer::detached())
    }

    async fn wait(&self, container: &ContainerHandle) -> Result<i64, RuntimeError> {
        self.record("wait", &container.name);
        self.fail("wait", &container.name)?;
        if let Some(delay) = self.run_for {
            tokio::time::sleep(delay).await;
        }
        Ok(self.exit_status)
    }

    async fn logs(&self, container: &ContainerHandle) -> Result<Vec<LogLine>, RuntimeError> {
        self.record("logs", &container.name);
        self.fail("logs", &container.name)?;
        Ok(vec![LogLine::new(LogStream::Stdout, "CONNECTION_STATUS ok")])
    }

    async fn stop_and_remove(&self, name: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.record("remove", name);
        let mut remaining = self.cleanup_failures.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(RuntimeError::Cleanup {
                name: name.to_string(),
                message: "daemon busy".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<MemoryStore>,
    pub runtime: Arc<FakeRuntime>,
    pub workflows: ConnectorWorkflows,
}

impl Harness {
    pub fn cache(&self) -> &Arc<DispatchCache> {
        self.workflows.activity().cache()
    }

    pub fn stager(&self) -> &Stager {
        self.workflows.activity().stager()
    }
}

pub fn workflows_with(
    store: Arc<MemoryStore>,
    runtime: Arc<FakeRuntime>,
    activity_timeout: Duration,
) -> (tempfile::TempDir, ConnectorWorkflows) {
    workflows_with_cache(store, runtime, activity_timeout, DispatchCache::default())
}

pub fn workflows_with_cache(
    store: Arc<MemoryStore>,
    runtime: Arc<FakeRuntime>,
    activity_timeout: Duration,
    cache: DispatchCache,
) -> (tempfile::TempDir, ConnectorWorkflows) {
    let dir = tempfile::tempdir().unwrap();
    let activity = ConnectorActivity::new(
        Stager::new(dir.path()),
        Arc::new(cache),
        ContainerRunner::new(runtime as Arc<dyn ContainerRuntime>, Duration::from_secs(1)),
        MountLayout::bind(dir.path()),
    );
    let workflows = ConnectorWorkflows::new(store, activity, 2, activity_timeout);
    (dir, workflows)
}

pub fn harness(store: MemoryStore, runtime: FakeRuntime) -> Harness {
    harness_with_timeout(store, runtime, Duration::from_secs(5))
}

pub fn harness_with_timeout(
    store: MemoryStore,
    runtime: FakeRuntime,
    activity_timeout: Duration,
) -> Harness {
    let store = Arc::new(store);
    let runtime = Arc::new(runtime);
    let (dir, workflows) = workflows_with(Arc::clone(&store), Arc::clone(&runtime), activity_timeout);
    Harness {
        dir,
        store,
        runtime,
        workflows,
    }
}

/// Build the trigger router over a worker backed by the given fakes.
pub fn build_test_app(
    store: MemoryStore,
    runtime: FakeRuntime,
) -> (tempfile::TempDir, Arc<ConnectorWorker>, Router) {
    let (dir, workflows) = workflows_with(
        Arc::new(store),
        Arc::new(runtime),
        Duration::from_secs(5),
    );
    let worker = Arc::new(ConnectorWorker::new(workflows));
    let state = AppState {
        worker: Arc::clone(&worker),
    };
    let app = build_app_router(state, Duration::from_secs(30));
    (dir, worker, app)
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
