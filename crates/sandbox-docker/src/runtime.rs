use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::ContainerWaitResponse;
use bollard::query_parameters::{
    AttachContainerOptionsBuilder, CreateContainerOptionsBuilder, CreateImageOptionsBuilder,
    KillContainerOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    WaitContainerOptionsBuilder,
};
use futures_util::StreamExt;
use sandbox::{
    BaseImage, ContainerRuntime, ContainerSpec, ExitStatus, ExitWatch, OutputBuffer, SandboxError,
    Signal,
};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DockerConfig;
use crate::spec::container_body;

/// Sandboxes on the Docker Engine API, isolated by a VM-based runtime.
pub struct DockerRuntime {
    docker: Docker,
    config: DockerConfig,
    /// Output pumps per sandbox id; each also fires the exit watch.
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl DockerRuntime {
    /// Connect to the engine and verify prerequisites.
    ///
    /// Fails fast when the socket is unreachable or the configured runtime
    /// is not registered; there is no point serving requests without them.
    pub async fn connect(config: DockerConfig) -> Result<Self, SandboxError> {
        let socket = config.socket_path.display().to_string();
        let docker = Docker::connect_with_unix(
            &socket,
            config.request_timeout_secs,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| SandboxError::BackendNotAvailable(format!("connect {socket}: {e}")))?;

        crate::prerequisites::check_prerequisites(&docker, &config.socket_path, &config.runtime)
            .await?;

        info!(socket = %socket, runtime = %config.runtime, "docker runtime connected");
        Ok(Self {
            docker,
            config,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DockerConfig {
        &self.config
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn pull_image(&self, reference: &str) -> sandbox::Result<BaseImage> {
        let options = CreateImageOptionsBuilder::default()
            .from_image(reference)
            .build();
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            let info = item.map_err(|e| SandboxError::ImagePull(format!("{reference}: {e}")))?;
            if let Some(status) = info.status {
                debug!(image = %reference, status = %status, "pull progress");
            }
        }

        let inspect = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| SandboxError::ImagePull(format!("inspect {reference}: {e}")))?;
        let id = inspect
            .id
            .ok_or_else(|| SandboxError::ImagePull(format!("{reference}: engine returned no id")))?;

        Ok(BaseImage {
            reference: reference.to_string(),
            id,
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> sandbox::Result<()> {
        let options = CreateContainerOptionsBuilder::default()
            .name(&spec.id)
            .build();
        self.docker
            .create_container(Some(options), container_body(spec))
            .await
            .map_err(|e| SandboxError::CreationFailed(format!("{}: {e}", spec.id)))?;
        debug!(id = %spec.id, snapshot = %spec.snapshot, "container created");
        Ok(())
    }

    async fn create_task(
        &self,
        id: &str,
        stdout: OutputBuffer,
        stderr: OutputBuffer,
    ) -> sandbox::Result<ExitWatch> {
        let options = AttachContainerOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .stream(true)
            .logs(true)
            .build();
        let attached = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| SandboxError::StartFailed(format!("attach {id}: {e}")))?;

        let (tx, rx) = oneshot::channel();
        let docker = self.docker.clone();
        let task_id = id.to_owned();
        let mut output = attached.output;
        let pump = tokio::spawn(async move {
            // Keep draining past the capture ceiling so the workload never
            // blocks on a full pipe; the buffers drop the excess.
            while let Some(item) = output.next().await {
                match item {
                    Ok(LogOutput::StdOut { message }) => stdout.write(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.write(&message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(id = %task_id, error = %e, "output stream failed");
                        break;
                    }
                }
            }
            // The attach stream closes when the container stops.
            let status = exit_status(&docker, &task_id).await;
            let _ = tx.send(status);
        });

        let previous = self.tasks.lock().await.insert(id.to_owned(), pump);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(rx)
    }

    async fn start_task(&self, id: &str) -> sandbox::Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| SandboxError::StartFailed(format!("{id}: {e}")))
    }

    async fn kill_task(&self, id: &str, signal: Signal) -> sandbox::Result<()> {
        let options = KillContainerOptionsBuilder::default()
            .signal(signal.as_str())
            .build();
        let result = self.docker.kill_container(id, Some(options)).await;
        kill_outcome(id, signal, result)
    }

    async fn delete_task(&self, id: &str) -> sandbox::Result<()> {
        if let Some(pump) = self.tasks.lock().await.remove(id) {
            pump.abort();
        }
        Ok(())
    }

    async fn delete_container(&self, id: &str) -> sandbox::Result<()> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();
        let result = self.docker.remove_container(id, Some(options)).await;
        remove_outcome(id, result)
    }
}

async fn exit_status(docker: &Docker, id: &str) -> ExitStatus {
    let options = WaitContainerOptionsBuilder::default()
        .condition("not-running")
        .build();
    let mut wait = docker.wait_container(id, Some(options));
    wait_outcome(wait.next().await).unwrap_or_else(|e| {
        warn!(id = %id, error = %e, "wait failed");
        ExitStatus::Unknown
    })
}

fn is_status(e: &DockerError, status: u16) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError { status_code, .. } if *status_code == status
    )
}

fn kill_outcome(
    id: &str,
    signal: Signal,
    result: Result<(), DockerError>,
) -> sandbox::Result<()> {
    match result {
        Ok(()) => Ok(()),
        // Already stopped: the signal has nothing left to reach.
        Err(e) if is_status(&e, 409) => Ok(()),
        Err(e) => Err(SandboxError::SignalFailed(format!("{signal} {id}: {e}"))),
    }
}

fn remove_outcome(id: &str, result: Result<(), DockerError>) -> sandbox::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if is_status(&e, 404) => Ok(()),
        Err(e) => Err(SandboxError::TeardownFailed(format!("{id}: {e}"))),
    }
}

/// First item of a `not-running` wait stream.
fn wait_outcome(
    item: Option<Result<ContainerWaitResponse, DockerError>>,
) -> Result<ExitStatus, DockerError> {
    match item {
        Some(Ok(response)) => Ok(ExitStatus::Exited(response.status_code)),
        // Non-zero exits surface as this error variant.
        Some(Err(DockerError::DockerContainerWaitError { code, .. })) => {
            Ok(ExitStatus::Exited(code))
        }
        Some(Err(e)) => Err(e),
        None => Ok(ExitStatus::Unknown),
    }
}
