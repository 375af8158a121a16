use std::sync::Arc;
use std::time::Instant;

use sandbox::{BaseImage, ContainerRuntime, SandboxError};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Process-wide cache of the single base image every sandbox layers on.
///
/// The first caller pulls while holding the lock; concurrent callers wait and
/// then see the cached value. A failed pull leaves the slot empty.
pub struct ImageCache {
    runtime: Arc<dyn ContainerRuntime>,
    slot: Mutex<Option<BaseImage>>,
}

impl ImageCache {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            slot: Mutex::new(None),
        }
    }

    /// Return the base image, pulling it on first use.
    ///
    /// The flag is `true` when the image was already cached.
    pub async fn ensure(&self, reference: &str) -> Result<(BaseImage, bool), SandboxError> {
        let mut slot = self.slot.lock().await;
        if let Some(image) = slot.as_ref() {
            debug!(image = %image.reference, "base image cached");
            return Ok((image.clone(), true));
        }

        let started = Instant::now();
        match self.runtime.pull_image(reference).await {
            Ok(image) => {
                info!(
                    image = %image.reference,
                    id = %image.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "base image pulled"
                );
                *slot = Some(image.clone());
                Ok((image, false))
            }
            Err(e) => {
                error!(image = %reference, error = %e, "base image pull failed");
                Err(e)
            }
        }
    }
}
