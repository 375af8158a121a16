use crate::policy::IsolationPolicy;
use crate::types::BaseImage;

/// Everything a runtime needs to create one sandbox.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique sandbox identifier; also the container name.
    pub id: String,
    /// Name of the writable snapshot layered on the base image.
    pub snapshot: String,
    pub image: BaseImage,
    /// Runtime the sandbox runs under (e.g. `io.containerd.kata.v2`).
    pub runtime: String,
    pub args: Vec<String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub hostname: String,
    pub policy: IsolationPolicy,
}

impl ContainerSpec {
    /// Conventional snapshot name for a sandbox id.
    pub fn snapshot_name(id: &str) -> String {
        format!("{id}-snap")
    }
}
