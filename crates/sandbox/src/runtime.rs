use async_trait::async_trait;

use crate::error::Result;
use crate::output::OutputBuffer;
use crate::spec::ContainerSpec;
use crate::types::{BaseImage, ExitWatch, Signal};

/// Control plane of an isolated container runtime.
///
/// A sandbox is addressed by the id in its [`ContainerSpec`]. The lifecycle
/// is `create_container` → `create_task` → `start_task` → (`kill_task`)* →
/// `delete_task` → `delete_container`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable name for this backend (e.g. "docker").
    fn name(&self) -> &str;

    /// Fetch an image into the local store and resolve its identifier.
    async fn pull_image(&self, reference: &str) -> Result<BaseImage>;

    /// Create the container and its writable snapshot over `spec.image`.
    ///
    /// On error the backend may have allocated part of the sandbox; callers
    /// follow up with [`delete_container`](Self::delete_container).
    async fn create_container(&self, spec: &ContainerSpec) -> Result<()>;

    /// Attach output capture and arm the completion watch.
    ///
    /// Must be called before `start_task` so no output or exit is missed.
    async fn create_task(
        &self,
        id: &str,
        stdout: OutputBuffer,
        stderr: OutputBuffer,
    ) -> Result<ExitWatch>;

    async fn start_task(&self, id: &str) -> Result<()>;

    /// Deliver `signal` to every process in the sandbox.
    async fn kill_task(&self, id: &str, signal: Signal) -> Result<()>;

    /// Release task-level resources (capture pumps, watches). Idempotent.
    async fn delete_task(&self, id: &str) -> Result<()>;

    /// Remove the container together with its snapshot. Idempotent: an
    /// unknown id is not an error.
    async fn delete_container(&self, id: &str) -> Result<()>;
}
