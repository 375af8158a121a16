#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("image pull failed: {0}")]
    ImagePull(String),

    #[error("sandbox creation failed: {0}")]
    CreationFailed(String),

    #[error("sandbox start failed: {0}")]
    StartFailed(String),

    #[error("signal delivery failed: {0}")]
    SignalFailed(String),

    #[error("sandbox teardown failed: {0}")]
    TeardownFailed(String),

    #[error("unknown sandbox: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
