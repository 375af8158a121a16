use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("history error: {0}")]
    History(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Which stage of the timeout escalation ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// Exited within the grace window after `SIGTERM`.
    Terminated,
    /// Ignored `SIGTERM` and was killed with `SIGKILL`.
    ForceKilled,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => f.write_str("terminated with SIGTERM"),
            Self::ForceKilled => f.write_str("forced SIGKILL"),
        }
    }
}

/// Caller-facing outcome of a failed submission.
///
/// A program that fails to compile or exits non-zero is not an error here;
/// its diagnostics are ordinary output.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("code exceeds {limit} character limit")]
    TooLong { limit: usize },

    #[error("missing toolchain directory at {}", path.display())]
    MissingToolchain { path: PathBuf },

    #[error("{phase}: {source}")]
    RuntimeUnavailable {
        phase: &'static str,
        #[source]
        source: SandboxError,
    },

    #[error("execution exceeded {}s ({stage})", timeout.as_secs())]
    TimedOut {
        stage: TimeoutStage,
        timeout: Duration,
    },
}

impl CompileError {
    pub(crate) fn runtime(phase: &'static str, source: SandboxError) -> Self {
        Self::RuntimeUnavailable { phase, source }
    }

    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::MissingToolchain { .. } | Self::RuntimeUnavailable { .. }
        )
    }
}
