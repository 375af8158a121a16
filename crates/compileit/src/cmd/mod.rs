mod check;
mod exec;
mod serve;

use std::sync::Arc;

use chrono::Utc;
use sandbox_docker::DockerRuntime;
use tracing::warn;

use crate::admission::RateLimiter;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::history::{HistorySink, JsonlHistory, RETENTION_DAYS};
use crate::service::CompileService;

pub use check::run_check;
pub use exec::{ExecArgs, run_exec};
pub use serve::{ServeArgs, run_serve};

/// The application context plus the pieces background tasks run against.
struct Services {
    service: Arc<CompileService>,
    limiter: Arc<RateLimiter>,
    history: Arc<JsonlHistory>,
}

/// Connect to the engine and wire up the application context.
///
/// Fails when the engine or its runtime is unavailable.
async fn build_service(config: &AppConfig) -> AppResult<Services> {
    let runtime = DockerRuntime::connect(config.docker_config()).await?;

    let history = Arc::new(JsonlHistory::open(&config.history_path).await?);
    if let Err(e) = history.prune(RETENTION_DAYS, Utc::now()).await {
        warn!(path = %history.path().display(), error = %e, "history prune failed");
    }

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.per_minute,
        config.rate_limit.burst,
    ));
    let service = CompileService::new(
        Arc::new(runtime),
        Arc::clone(&limiter),
        Arc::clone(&history) as Arc<dyn HistorySink>,
        config.service_settings(),
    );
    Ok(Services {
        service: Arc::new(service),
        limiter,
        history,
    })
}
