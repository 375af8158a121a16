use std::fmt;

/// A base image that has been fetched into the runtime's local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    /// Reference the image was pulled by (e.g. `docker.io/library/ubuntu:24.04`).
    pub reference: String,
    /// Content-addressed identifier reported by the runtime.
    pub id: String,
}

/// Signals the lifecycle manager sends to a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `SIGTERM`: ask the workload to exit.
    Terminate,
    /// `SIGKILL`: cannot be caught; the task is guaranteed reapable afterwards.
    Kill,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a sandboxed task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i64),
    /// The runtime lost track of the task (e.g. the watch was torn down).
    Unknown,
}

impl ExitStatus {
    pub fn code(self) -> Option<i64> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Unknown => None,
        }
    }
}

/// One-shot completion notification for a task.
///
/// Fires exactly once when the task exits for any reason. A dropped sender
/// (backend gave up watching) resolves to `RecvError`, which callers treat
/// as completion with [`ExitStatus::Unknown`].
pub type ExitWatch = tokio::sync::oneshot::Receiver<ExitStatus>;
