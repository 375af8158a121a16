//! In-process [`ContainerRuntime`] that scripts workload behavior and counts
//! every control-plane call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sandbox::{
    BaseImage, ContainerRuntime, ContainerSpec, ExitStatus, ExitWatch, OutputBuffer, SandboxError,
    Signal,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::admission::RateLimiter;
use crate::error::AppResult;
use crate::executor::{ExecutorConfig, GRACE_PERIOD, OUTPUT_LIMIT};
use crate::history::{ExecutionRecord, HistorySink};
use crate::service::{CompileService, ServiceSettings};

/// What the workload does once started.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    /// Write output and exit immediately.
    Exit {
        code: i64,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// Write `stdout`, then run for `duration`.
    Sleep {
        duration: Duration,
        honors_sigterm: bool,
        stdout: Vec<u8>,
    },
    /// `create_container` allocates the snapshot and then fails.
    FailCreate,
}

impl Default for Behavior {
    fn default() -> Self {
        Self::Exit {
            code: 0,
            stdout: b"ok\n".to_vec(),
            stderr: Vec::new(),
        }
    }
}

#[derive(Default)]
struct State {
    pulls: usize,
    creates: usize,
    created_ids: Vec<String>,
    snapshots: HashSet<String>,
    signals: Vec<(String, Signal)>,
    task_deletes: HashMap<String, usize>,
    container_deletes: HashMap<String, usize>,
    buffers: HashMap<String, (OutputBuffer, OutputBuffer)>,
    exits: HashMap<String, oneshot::Sender<ExitStatus>>,
    sleepers: HashMap<String, JoinHandle<()>>,
}

fn fire(state: &Mutex<State>, id: &str, status: ExitStatus) {
    let sender = state.lock().unwrap().exits.remove(id);
    if let Some(sender) = sender {
        let _ = sender.send(status);
    }
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    behavior: Behavior,
    pull_delay: Duration,
    create_delay: Duration,
    teardown_delay: Duration,
    failing_pulls: AtomicUsize,
    state: Arc<Mutex<State>>,
}

impl FakeRuntime {
    pub(crate) fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub(crate) fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    /// Hold `create_container` open after the engine has allocated the
    /// container.
    pub(crate) fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Hold `delete_task` open before anything is released.
    pub(crate) fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = delay;
        self
    }

    /// Fail the next `n` pulls.
    pub(crate) fn with_failing_pulls(self, n: usize) -> Self {
        self.failing_pulls.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) fn pulls(&self) -> usize {
        self.state.lock().unwrap().pulls
    }

    pub(crate) fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub(crate) fn created_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().created_ids.clone()
    }

    pub(crate) fn live_snapshots(&self) -> usize {
        self.state.lock().unwrap().snapshots.len()
    }

    pub(crate) fn signals(&self, id: &str) -> Vec<Signal> {
        self.state
            .lock()
            .unwrap()
            .signals
            .iter()
            .filter(|(target, _)| target == id)
            .map(|(_, signal)| *signal)
            .collect()
    }

    pub(crate) fn task_deletes(&self, id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.task_deletes.get(id).copied().unwrap_or(0)
    }

    pub(crate) fn container_deletes(&self, id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.container_deletes.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn pull_image(&self, reference: &str) -> sandbox::Result<BaseImage> {
        self.state.lock().unwrap().pulls += 1;
        if !self.pull_delay.is_zero() {
            tokio::time::sleep(self.pull_delay).await;
        }
        let failing = self
            .failing_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SandboxError::ImagePull(format!("{reference}: registry down")));
        }
        Ok(BaseImage {
            reference: reference.to_string(),
            id: "sha256:fake".to_string(),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> sandbox::Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.creates += 1;
            state.created_ids.push(spec.id.clone());
            state.snapshots.insert(spec.snapshot.clone());
        }
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if matches!(self.behavior, Behavior::FailCreate) {
            return Err(SandboxError::CreationFailed(format!(
                "{}: runtime rejected spec",
                spec.id
            )));
        }
        Ok(())
    }

    async fn create_task(
        &self,
        id: &str,
        stdout: OutputBuffer,
        stderr: OutputBuffer,
    ) -> sandbox::Result<ExitWatch> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap();
        state.buffers.insert(id.to_string(), (stdout, stderr));
        state.exits.insert(id.to_string(), tx);
        Ok(rx)
    }

    async fn start_task(&self, id: &str) -> sandbox::Result<()> {
        let buffers = self.state.lock().unwrap().buffers.get(id).cloned();
        let Some((out, err)) = buffers else {
            return Err(SandboxError::NotFound(id.to_string()));
        };
        match &self.behavior {
            Behavior::Exit {
                code,
                stdout,
                stderr,
            } => {
                out.write(stdout);
                err.write(stderr);
                fire(&self.state, id, ExitStatus::Exited(*code));
            }
            Behavior::Sleep {
                duration, stdout, ..
            } => {
                out.write(stdout);
                let state = Arc::clone(&self.state);
                let task_id = id.to_string();
                let duration = *duration;
                let sleeper = tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    fire(&state, &task_id, ExitStatus::Exited(0));
                });
                self.state
                    .lock()
                    .unwrap()
                    .sleepers
                    .insert(id.to_string(), sleeper);
            }
            Behavior::FailCreate => {}
        }
        Ok(())
    }

    async fn kill_task(&self, id: &str, signal: Signal) -> sandbox::Result<()> {
        self.state
            .lock()
            .unwrap()
            .signals
            .push((id.to_string(), signal));
        let dies = match (&self.behavior, signal) {
            (_, Signal::Kill) => true,
            (Behavior::Sleep { honors_sigterm, .. }, Signal::Terminate) => *honors_sigterm,
            _ => false,
        };
        if dies {
            if let Some(sleeper) = self.state.lock().unwrap().sleepers.remove(id) {
                sleeper.abort();
            }
            let code = match signal {
                Signal::Terminate => 143,
                Signal::Kill => 137,
            };
            fire(&self.state, id, ExitStatus::Exited(code));
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> sandbox::Result<()> {
        if !self.teardown_delay.is_zero() {
            tokio::time::sleep(self.teardown_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        *state.task_deletes.entry(id.to_string()).or_default() += 1;
        if let Some(sleeper) = state.sleepers.remove(id) {
            sleeper.abort();
        }
        state.buffers.remove(id);
        Ok(())
    }

    async fn delete_container(&self, id: &str) -> sandbox::Result<()> {
        let mut state = self.state.lock().unwrap();
        *state.container_deletes.entry(id.to_string()).or_default() += 1;
        state.snapshots.remove(&ContainerSpec::snapshot_name(id));
        Ok(())
    }
}

/// History sink that keeps records in memory.
#[derive(Default)]
pub(crate) struct MemoryHistory {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryHistory {
    pub(crate) fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, record: ExecutionRecord) -> AppResult<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// A [`CompileService`] wired to a [`FakeRuntime`] and [`MemoryHistory`].
pub(crate) struct Fixture {
    pub(crate) service: Arc<CompileService>,
    pub(crate) runtime: Arc<FakeRuntime>,
    pub(crate) history: Arc<MemoryHistory>,
    _dir: tempfile::TempDir,
}

/// What the configured toolchain path points at.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Toolchain {
    Dir,
    Missing,
    File,
}

pub(crate) fn fixture_with(runtime: FakeRuntime, burst: u32, toolchain: Toolchain) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let toolchain_dir = match toolchain {
        Toolchain::Dir => dir.path().to_path_buf(),
        Toolchain::Missing => dir.path().join("missing"),
        Toolchain::File => {
            let path = dir.path().join("toolchain.tar");
            std::fs::write(&path, b"not a directory").unwrap();
            path
        }
    };
    let runtime = Arc::new(runtime);
    let history = Arc::new(MemoryHistory::default());
    let settings = ServiceSettings {
        base_image: "docker.io/library/ubuntu:24.04".into(),
        toolchain_dir,
        max_code_chars: 5000,
        executor: ExecutorConfig {
            runtime: "io.containerd.kata.v2".into(),
            soft_timeout: Duration::from_secs(10),
            grace_period: GRACE_PERIOD,
            output_limit: OUTPUT_LIMIT,
        },
    };
    let service = CompileService::new(
        runtime.clone(),
        Arc::new(RateLimiter::new(60, burst)),
        history.clone(),
        settings,
    );
    Fixture {
        service: Arc::new(service),
        runtime,
        history,
        _dir: dir,
    }
}

pub(crate) fn fixture() -> Fixture {
    fixture_with(FakeRuntime::default(), 80, Toolchain::Dir)
}
