//! Sequencing of one container run.
//!
//! [`ContainerRunner::run`] resolves the image, creates, starts and waits
//! for the container, forwards its output, and then always stops and
//! removes it. Cleanup errors never mask an earlier failure. When the run
//! itself succeeded, a cleanup error is carried in [`RunOutput`] next to
//! the exit status instead of replacing it.

use std::sync::Arc;
use std::time::Duration;

use crate::error::RuntimeError;
use crate::runtime::{emit_container_output, ContainerRuntime, ContainerSpec};

/// Default graceful stop period before force removal.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Result of a container run that reached a terminal state.
#[derive(Debug)]
pub struct RunOutput {
    pub container_id: String,
    pub exit_status: i64,
    /// Stop-and-remove failed after the container exited; it may linger.
    pub cleanup_error: Option<RuntimeError>,
}

/// Runs containers through a [`ContainerRuntime`].
pub struct ContainerRunner<R: ?Sized> {
    runtime: Arc<R>,
    stop_grace: Duration,
}

impl<R: ?Sized> Clone for ContainerRunner<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            stop_grace: self.stop_grace,
        }
    }
}

impl<R: ContainerRuntime + ?Sized> ContainerRunner<R> {
    pub fn new(runtime: Arc<R>, stop_grace: Duration) -> Self {
        Self {
            runtime,
            stop_grace,
        }
    }

    /// Execute `spec` to completion and return its exit status.
    ///
    /// `stdin` is streamed only when `spec.attach_stdin` is set. An image
    /// resolution failure returns before anything is created, so no
    /// cleanup is attempted for it.
    pub async fn run(
        &self,
        spec: &ContainerSpec,
        stdin: Option<Vec<u8>>,
    ) -> Result<RunOutput, RuntimeError> {
        self.runtime.ensure_image(&spec.image).await?;

        let result = self.execute(spec, stdin).await;
        let cleanup = self.remove(&spec.name).await;

        match (result, cleanup) {
            (Ok(output), Ok(())) => {
                tracing::info!(
                    container_name = %spec.name,
                    exit_status = output.exit_status,
                    "Container run finished",
                );
                Ok(output)
            }
            (Ok(mut output), Err(cleanup_err)) => {
                tracing::warn!(
                    container_name = %spec.name,
                    exit_status = output.exit_status,
                    error = %cleanup_err,
                    "Container run finished but cleanup failed",
                );
                output.cleanup_error = Some(cleanup_err);
                Ok(output)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                tracing::warn!(
                    container_name = %spec.name,
                    error = %cleanup_err,
                    "Container cleanup failed after run failure",
                );
                Err(e)
            }
        }
    }

    /// Stop and remove the container named `name`, if any.
    pub async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.runtime.stop_and_remove(name, self.stop_grace).await
    }

    async fn execute(
        &self,
        spec: &ContainerSpec,
        stdin: Option<Vec<u8>>,
    ) -> Result<RunOutput, RuntimeError> {
        let container = self.runtime.create(spec).await?;
        tracing::debug!(
            container_name = %container.name,
            container_id = %container.id,
            "Container created",
        );

        let stdin = if spec.attach_stdin {
            Some(stdin.unwrap_or_default())
        } else {
            None
        };
        let started = self.runtime.start(&container, stdin).await?;
        let exit_status = self.runtime.wait(&container).await?;

        match started.output_pump {
            Some(pump) => {
                if let Err(e) = pump.await {
                    tracing::warn!(
                        container_name = %container.name,
                        error = %e,
                        "Output forwarding task failed",
                    );
                }
            }
            None => {
                for line in self.runtime.logs(&container).await? {
                    emit_container_output(&container.name, &line);
                }
            }
        }

        Ok(RunOutput {
            container_id: container.id,
            exit_status,
            cleanup_error: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use connector_core::run::ImageRef;

    use super::*;
    use crate::runtime::{ContainerHandle, LogLine, LogStream, StartedContainer};

    /// Step at which the scripted runtime fails.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FailAt {
        Nothing,
        Pull,
        Create,
        Start,
        Wait,
        Logs,
        Cleanup,
    }

    struct ScriptedRuntime {
        fail_at: FailAt,
        cleanup_fails: bool,
        exit_status: i64,
        calls: Mutex<Vec<String>>,
        stdin: Mutex<Option<Vec<u8>>>,
    }

    impl ScriptedRuntime {
        fn new(fail_at: FailAt) -> Self {
            Self {
                fail_at,
                cleanup_fails: fail_at == FailAt::Cleanup,
                exit_status: 0,
                calls: Mutex::new(Vec::new()),
                stdin: Mutex::new(None),
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn fail(&self, step: FailAt, name: &str) -> Result<(), RuntimeError> {
            if self.fail_at == step {
                return Err(RuntimeError::Wait {
                    name: name.to_string(),
                    message: format!("{step:?} failed"),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ContainerRuntime for ScriptedRuntime {
        async fn ensure_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
            self.record("pull");
            if self.fail_at == FailAt::Pull {
                return Err(RuntimeError::ImagePull {
                    image: image.to_string(),
                    message: "manifest unknown".to_string(),
                });
            }
            Ok(())
        }

        async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
            self.record("create");
            self.fail(FailAt::Create, &spec.name)?;
            Ok(ContainerHandle {
                id: "abc123".to_string(),
                name: spec.name.clone(),
            })
        }

        async fn start(
            &self,
            container: &ContainerHandle,
            stdin: Option<Vec<u8>>,
        ) -> Result<StartedContainer, RuntimeError> {
            self.record("start");
            self.fail(FailAt::Start, &container.name)?;
            *self.stdin.lock().unwrap() = stdin;
            Ok(StartedContainer::detached())
        }

        async fn wait(&self, container: &ContainerHandle) -> Result<i64, RuntimeError> {
            self.record("wait");
            self.fail(FailAt::Wait, &container.name)?;
            Ok(self.exit_status)
        }

        async fn logs(&self, container: &ContainerHandle) -> Result<Vec<LogLine>, RuntimeError> {
            self.record("logs");
            self.fail(FailAt::Logs, &container.name)?;
            Ok(vec![LogLine::new(LogStream::Stdout, "CONNECTION_STATUS ok")])
        }

        async fn stop_and_remove(&self, name: &str, _grace: Duration) -> Result<(), RuntimeError> {
            self.record("remove");
            if self.cleanup_fails {
                return Err(RuntimeError::Cleanup {
                    name: name.to_string(),
                    message: "daemon busy".to_string(),
                });
            }
            Ok(())
        }
    }

    fn spec(attach_stdin: bool) -> ContainerSpec {
        ContainerSpec {
            name: "c1.check".to_string(),
            image: ImageRef::new("img", "tag"),
            cmd: vec!["check".to_string()],
            mounts: Vec::new(),
            attach_stdin,
        }
    }

    fn scripted(runtime: ScriptedRuntime) -> (Arc<ScriptedRuntime>, ContainerRunner<ScriptedRuntime>) {
        let runtime = Arc::new(runtime);
        let runner = ContainerRunner::new(Arc::clone(&runtime), DEFAULT_STOP_GRACE);
        (runtime, runner)
    }

    // -- happy path -----------------------------------------------------------

    #[tokio::test]
    async fn runs_every_step_then_removes() {
        let (runtime, runner) = scripted(ScriptedRuntime {
            exit_status: 1,
            ..ScriptedRuntime::new(FailAt::Nothing)
        });

        let output = runner.run(&spec(false), None).await.unwrap();
        assert_eq!(output.exit_status, 1);
        assert!(output.cleanup_error.is_none());
        assert_eq!(runtime.calls(), ["pull", "create", "start", "wait", "logs", "remove"]);
    }

    #[tokio::test]
    async fn stdin_only_passed_when_attached() {
        let (runtime, runner) = scripted(ScriptedRuntime::new(FailAt::Nothing));
        runner
            .run(&spec(false), Some(b"ignored".to_vec()))
            .await
            .unwrap();
        assert!(runtime.stdin.lock().unwrap().is_none());

        let (runtime, runner) = scripted(ScriptedRuntime::new(FailAt::Nothing));
        runner.run(&spec(true), None).await.unwrap();
        assert_eq!(runtime.stdin.lock().unwrap().as_deref(), Some(&b""[..]));
    }

    // -- failures -------------------------------------------------------------

    #[tokio::test]
    async fn pull_failure_creates_nothing() {
        let (runtime, runner) = scripted(ScriptedRuntime::new(FailAt::Pull));
        let result = runner.run(&spec(false), None).await;
        assert_matches!(result, Err(RuntimeError::ImagePull { .. }));
        assert_eq!(runtime.calls(), ["pull"]);
    }

    #[tokio::test]
    async fn failures_after_create_still_remove() {
        for step in [FailAt::Create, FailAt::Start, FailAt::Wait, FailAt::Logs] {
            let (runtime, runner) = scripted(ScriptedRuntime::new(step));
            let result = runner.run(&spec(false), None).await;
            assert!(result.is_err(), "{step:?} should fail the run");
            assert_eq!(
                runtime.calls().last().map(String::as_str),
                Some("remove"),
                "{step:?} should be followed by cleanup"
            );
        }
    }

    #[tokio::test]
    async fn cleanup_error_keeps_exit_status() {
        let (runtime, runner) = scripted(ScriptedRuntime {
            exit_status: 1,
            ..ScriptedRuntime::new(FailAt::Cleanup)
        });
        let output = runner.run(&spec(false), None).await.unwrap();
        assert_eq!(output.exit_status, 1);
        assert_matches!(output.cleanup_error, Some(RuntimeError::Cleanup { .. }));
        assert_eq!(runtime.calls().last().map(String::as_str), Some("remove"));
    }

    #[tokio::test]
    async fn cleanup_error_never_masks_run_failure() {
        let (_, runner) = scripted(ScriptedRuntime {
            cleanup_fails: true,
            ..ScriptedRuntime::new(FailAt::Wait)
        });
        let result = runner.run(&spec(false), None).await;
        assert_matches!(result, Err(RuntimeError::Wait { .. }));
    }
}
