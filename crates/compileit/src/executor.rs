use std::sync::Arc;
use std::time::{Duration, Instant};

use sandbox::{
    BaseImage, ContainerRuntime, ContainerSpec, ExitStatus, ExitWatch, IsolationPolicy,
    OutputBuffer, Signal,
};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CompileError, TimeoutStage};
use crate::script::Script;

/// Time between `SIGTERM` and `SIGKILL`.
pub(crate) const GRACE_PERIOD: Duration = Duration::from_secs(2);
/// Per-stream capture ceiling.
pub(crate) const OUTPUT_LIMIT: usize = 64 * 1024;

const SANDBOX_HOSTNAME: &str = "sandbox";
const SANDBOX_ENV: &[&str] = &[
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
    "HOME=/home/sandbox",
    "LANG=C",
    "LC_ALL=C",
];
const STDERR_HEADER: &str = "\n[stderr]\n";

/// Configuration for sandbox execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Runtime the sandbox is created under.
    pub runtime: String,
    pub soft_timeout: Duration,
    pub grace_period: Duration,
    pub output_limit: usize,
}

/// Result of running one script.
///
/// `output` is whatever was captured, also when `result` is an error.
#[derive(Debug)]
pub struct Execution {
    pub sandbox_id: String,
    pub output: String,
    pub result: Result<(), CompileError>,
}

/// How the task ended relative to the timeout escalation.
#[derive(Debug)]
enum Termination {
    Completed(ExitStatus),
    /// Exited within the grace period after `SIGTERM`.
    Terminated(ExitStatus),
    /// `SIGKILL` was sent. `None` if the signal could not be delivered.
    ForceKilled(Option<ExitStatus>),
}

/// Bounded stdout/stderr capture for one sandbox.
struct Capture {
    stdout: OutputBuffer,
    stderr: OutputBuffer,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            stdout: OutputBuffer::new(limit),
            stderr: OutputBuffer::new(limit),
        }
    }

    /// Stdout, followed by stderr under a header when there is any.
    fn combined(&self) -> String {
        let mut output = self.stdout.contents();
        if !self.stderr.is_empty() || self.stderr.is_truncated() {
            output.push_str(STDERR_HEADER);
            output.push_str(&self.stderr.contents());
        }
        output
    }
}

/// Removes the sandbox when released, or in the background if dropped
/// while still armed.
struct SandboxGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    armed: bool,
}

impl SandboxGuard {
    fn arm(runtime: Arc<dyn ContainerRuntime>, id: &str) -> Self {
        Self {
            runtime,
            id: id.to_string(),
            armed: true,
        }
    }

    /// Tear the sandbox down. The guard stays armed until teardown returns,
    /// so dropping this future mid-way still schedules a background teardown.
    async fn release(mut self) {
        teardown(self.runtime.as_ref(), &self.id).await;
        self.armed = false;
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let runtime = Arc::clone(&self.runtime);
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(id = %id, "sandbox abandoned, tearing down in background");
                handle.spawn(async move { teardown(runtime.as_ref(), &id).await });
            }
            Err(_) => error!(id = %id, "sandbox leaked: no runtime to tear it down"),
        }
    }
}

async fn teardown(runtime: &dyn ContainerRuntime, id: &str) {
    if let Err(e) = runtime.delete_task(id).await {
        warn!(id = %id, error = %e, "task cleanup failed");
    }
    if let Err(e) = runtime.delete_container(id).await {
        error!(id = %id, error = %e, "sandbox removal failed");
    }
}

fn log_phase(id: &str, phase: &str, started: Instant) {
    debug!(
        id = %id,
        phase,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "phase complete"
    );
}

pub(crate) fn new_sandbox_id() -> String {
    format!("sandbox-{}", Uuid::now_v7())
}

fn compose_spec(
    id: &str,
    config: &ExecutorConfig,
    script: &Script,
    policy: IsolationPolicy,
    image: BaseImage,
) -> ContainerSpec {
    ContainerSpec {
        id: id.to_string(),
        snapshot: ContainerSpec::snapshot_name(id),
        image,
        runtime: config.runtime.clone(),
        args: vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            script.as_str().to_string(),
        ],
        env: SANDBOX_ENV.iter().map(|s| (*s).to_string()).collect(),
        hostname: SANDBOX_HOSTNAME.to_string(),
        policy,
    }
}

/// Run `script` in a fresh sandbox and remove the sandbox afterwards.
///
/// A non-zero exit of the workload is not an error; compiler diagnostics
/// and program failures are part of the output.
pub async fn execute(
    runtime: &Arc<dyn ContainerRuntime>,
    config: &ExecutorConfig,
    script: &Script,
    policy: IsolationPolicy,
    image: BaseImage,
) -> Execution {
    let started = Instant::now();
    let id = new_sandbox_id();
    let spec = compose_spec(&id, config, script, policy, image);
    let capture = Capture::new(config.output_limit);
    debug!(id = %id, terminator = script.terminator(), "script composed");

    // Armed before create: the engine may finish creating the container
    // even if this future is dropped mid-request, or fail after
    // allocating the snapshot.
    let guard = SandboxGuard::arm(Arc::clone(runtime), &id);
    let phase = Instant::now();
    if let Err(e) = runtime.create_container(&spec).await {
        error!(id = %id, error = %e, "sandbox creation failed");
        guard.release().await;
        return Execution {
            sandbox_id: id,
            output: String::new(),
            result: Err(CompileError::runtime("create container", e)),
        };
    }
    log_phase(&id, "create", phase);

    let result = run(runtime.as_ref(), config, &id, &capture).await;

    let phase = Instant::now();
    guard.release().await;
    log_phase(&id, "teardown", phase);
    log_phase(&id, "total", started);

    Execution {
        sandbox_id: id,
        output: capture.combined(),
        result,
    }
}

async fn run(
    runtime: &dyn ContainerRuntime,
    config: &ExecutorConfig,
    id: &str,
    capture: &Capture,
) -> Result<(), CompileError> {
    let phase = Instant::now();
    let watch = runtime
        .create_task(id, capture.stdout.clone(), capture.stderr.clone())
        .await
        .map_err(|e| CompileError::runtime("create task", e))?;
    runtime
        .start_task(id)
        .await
        .map_err(|e| CompileError::runtime("start task", e))?;
    log_phase(id, "start", phase);

    let phase = Instant::now();
    let termination = escalate(runtime, config, id, watch).await;
    log_phase(id, "run", phase);

    match termination {
        Termination::Completed(status) => {
            debug!(id = %id, exit_code = ?status.code(), "task completed");
            Ok(())
        }
        Termination::Terminated(status) => {
            info!(id = %id, exit_code = ?status.code(), "task exited after SIGTERM");
            Err(CompileError::TimedOut {
                stage: TimeoutStage::Terminated,
                timeout: config.soft_timeout,
            })
        }
        Termination::ForceKilled(status) => {
            warn!(id = %id, exit_code = ?status.and_then(ExitStatus::code), "task force-killed");
            Err(CompileError::TimedOut {
                stage: TimeoutStage::ForceKilled,
                timeout: config.soft_timeout,
            })
        }
    }
}

/// Wait for the task; on timeout escalate `SIGTERM` then `SIGKILL`.
async fn escalate(
    runtime: &dyn ContainerRuntime,
    config: &ExecutorConfig,
    id: &str,
    mut watch: ExitWatch,
) -> Termination {
    // A dropped sender means the backend stopped watching; the task is gone.
    if let Ok(status) = timeout(config.soft_timeout, &mut watch).await {
        return Termination::Completed(status.unwrap_or(ExitStatus::Unknown));
    }

    warn!(
        id = %id,
        timeout_secs = config.soft_timeout.as_secs(),
        "soft timeout reached, sending SIGTERM"
    );
    if let Err(e) = runtime.kill_task(id, Signal::Terminate).await {
        warn!(id = %id, error = %e, "SIGTERM delivery failed");
    }
    if let Ok(status) = timeout(config.grace_period, &mut watch).await {
        return Termination::Terminated(status.unwrap_or(ExitStatus::Unknown));
    }

    warn!(
        id = %id,
        grace_secs = config.grace_period.as_secs(),
        "grace period expired, sending SIGKILL"
    );
    match runtime.kill_task(id, Signal::Kill).await {
        // SIGKILL cannot be ignored, so the exit always arrives.
        Ok(()) => Termination::ForceKilled(Some(watch.await.unwrap_or(ExitStatus::Unknown))),
        Err(e) => {
            // Teardown force-removes the container; don't wait on a task
            // that may never report.
            error!(id = %id, error = %e, "SIGKILL delivery failed");
            Termination::ForceKilled(None)
        }
    }
}
