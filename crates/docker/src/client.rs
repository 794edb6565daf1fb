//! Docker Engine implementation of [`ContainerRuntime`].
//!
//! [`DockerRuntime`] wraps a [`bollard::Docker`] handle connected to the
//! local daemon (socket or `DOCKER_HOST`). Containers are created with no
//! restart policy and a `json-file` log driver; write runs attach their
//! standard streams before start and receive their records on stdin.

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    HostConfig, HostConfigLogConfig, Mount, MountTypeEnum, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use connector_core::run::ImageRef;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::RuntimeError;
use crate::runtime::{
    emit_container_output, terminate_stdin, ContainerHandle, ContainerRuntime, ContainerSpec,
    LogLine, LogStream, MountKind, MountSpec, StartedContainer,
};

/// Log driver attached to every connector container.
const LOG_DRIVER: &str = "json-file";

/// Container runtime backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (unix socket, or `DOCKER_HOST`).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Ping the daemon.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn pull(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.repository.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            let info = item.map_err(|e| RuntimeError::ImagePull {
                image: image.to_string(),
                message: e.to_string(),
            })?;
            if let Some(message) = info.error {
                return Err(RuntimeError::ImagePull {
                    image: image.to_string(),
                    message,
                });
            }
            if let Some(status) = info.status {
                tracing::debug!(image = %image, status = %status, "Image pull progress");
            }
        }
        Ok(())
    }

    async fn attach(
        &self,
        container: &ContainerHandle,
    ) -> Result<AttachContainerResults, RuntimeError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };
        self.docker
            .attach_container(&container.id, Some(options))
            .await
            .map_err(|e| RuntimeError::Attach {
                name: container.name.clone(),
                message: e.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// HTTP status of a daemon error response, if it is one.
fn status_code(e: &DockerError) -> Option<u16> {
    match e {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn to_docker_mount(mount: &MountSpec) -> Mount {
    Mount {
        source: Some(mount.source.clone()),
        target: Some(mount.target.clone()),
        typ: Some(match mount.kind {
            MountKind::Bind => MountTypeEnum::BIND,
            MountKind::Volume => MountTypeEnum::VOLUME,
        }),
        ..Default::default()
    }
}

fn to_log_line(output: LogOutput) -> Option<LogLine> {
    let (stream, message) = match output {
        LogOutput::StdOut { message } => (LogStream::Stdout, message),
        LogOutput::StdErr { message } => (LogStream::Stderr, message),
        LogOutput::Console { message } => (LogStream::Console, message),
        LogOutput::StdIn { .. } => return None,
    };
    Some(LogLine::new(
        stream,
        String::from_utf8_lossy(&message).into_owned(),
    ))
}

/// Container configuration for `spec`.
///
/// Attached runs use a TTY so the end-of-transmission byte terminates the
/// connector's read of standard input.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let host_config = HostConfig {
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        }),
        log_config: Some(HostConfigLogConfig {
            typ: Some(LOG_DRIVER.to_string()),
            config: None,
        }),
        mounts: Some(spec.mounts.iter().map(to_docker_mount).collect()),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.to_string()),
        cmd: Some(spec.cmd.clone()),
        attach_stdin: Some(spec.attach_stdin),
        attach_stdout: Some(spec.attach_stdin),
        attach_stderr: Some(spec.attach_stdin),
        open_stdin: Some(spec.attach_stdin),
        stdin_once: Some(spec.attach_stdin),
        tty: Some(spec.attach_stdin),
        host_config: Some(host_config),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// ContainerRuntime
// ---------------------------------------------------------------------------

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let reference = image.to_string();
        match self.docker.inspect_image(&reference).await {
            Ok(_) => {
                tracing::debug!(image = %reference, "Using local image");
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => {
                tracing::info!(image = %reference, "Image not present locally, pulling");
                self.pull(image).await
            }
            Err(e) => Err(RuntimeError::ImagePull {
                image: reference,
                message: e.to_string(),
            }),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| RuntimeError::Create {
                name: spec.name.clone(),
                message: e.to_string(),
            })?;

        for warning in &response.warnings {
            tracing::warn!(container_name = %spec.name, warning = %warning, "Container create warning");
        }
        Ok(ContainerHandle {
            id: response.id,
            name: spec.name.clone(),
        })
    }

    async fn start(
        &self,
        container: &ContainerHandle,
        stdin: Option<Vec<u8>>,
    ) -> Result<StartedContainer, RuntimeError> {
        let attached = match stdin {
            Some(payload) => Some((self.attach(container).await?, payload)),
            None => None,
        };

        self.docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::Start {
                name: container.name.clone(),
                message: e.to_string(),
            })?;

        let Some((AttachContainerResults { mut output, mut input }, payload)) = attached else {
            return Ok(StartedContainer::detached());
        };

        let name = container.name.clone();
        let output_pump = tokio::spawn(async move {
            while let Some(item) = output.next().await {
                match item {
                    Ok(chunk) => {
                        if let Some(line) = to_log_line(chunk) {
                            emit_container_output(&name, &line);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(container_name = %name, error = %e, "Attached output stream failed");
                        break;
                    }
                }
            }
        });

        let payload = terminate_stdin(payload);
        let written = async {
            input.write_all(&payload).await?;
            input.flush().await?;
            input.shutdown().await
        }
        .await;
        if let Err(e) = written {
            output_pump.abort();
            return Err(RuntimeError::Attach {
                name: container.name.clone(),
                message: format!("Unable to stream standard input: {e}"),
            });
        }
        tracing::debug!(
            container_name = %container.name,
            bytes = payload.len(),
            "Standard input streamed",
        );

        Ok(StartedContainer {
            output_pump: Some(output_pump),
        })
    }

    async fn wait(&self, container: &ContainerHandle) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&container.id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // The client reports a non-zero exit as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(RuntimeError::Wait {
                name: container.name.clone(),
                message: e.to_string(),
            }),
            None => Err(RuntimeError::Wait {
                name: container.name.clone(),
                message: "wait stream closed without a status".to_string(),
            }),
        }
    }

    async fn logs(&self, container: &ContainerHandle) -> Result<Vec<LogLine>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(&container.id, Some(options));
        let mut lines = Vec::new();
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| RuntimeError::Logs {
                name: container.name.clone(),
                message: e.to_string(),
            })?;
            lines.extend(to_log_line(chunk));
        }
        Ok(lines)
    }

    async fn stop_and_remove(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let stop = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(name, Some(stop)).await {
            Ok(()) => {}
            // 304: already stopped.
            Err(e) if status_code(&e) == Some(304) => {}
            Err(e) if status_code(&e) == Some(404) => return Ok(()),
            Err(e) => {
                tracing::warn!(container_name = %name, error = %e, "Stop failed, forcing removal");
            }
        }

        let remove = RemoveContainerOptions {
            v: true,
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(remove)).await {
            Ok(()) => {
                tracing::debug!(container_name = %name, "Container removed");
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(RuntimeError::Cleanup {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
