use std::path::PathBuf;

/// Default Docker Engine API socket.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Seconds before a control-plane request to the engine is abandoned.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Unix socket of the Docker Engine API.
    pub socket_path: PathBuf,
    /// Per-request timeout for engine API calls.
    pub request_timeout_secs: u64,
    /// Runtime every sandbox is created under. Must be registered with the
    /// engine (e.g. `io.containerd.kata.v2` for Kata Containers).
    pub runtime: String,
}

impl DockerConfig {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            runtime: runtime.into(),
        }
    }
}
