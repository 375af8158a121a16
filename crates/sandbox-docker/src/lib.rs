mod config;
mod prerequisites;
mod runtime;
mod spec;

pub use config::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_SOCKET, DockerConfig};
pub use runtime::DockerRuntime;
