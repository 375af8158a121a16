use std::net::SocketAddr;

use clap::Args;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::history::RETENTION_DAYS;
use crate::server;

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on (overrides `listen` in the config file)
    #[arg(long, env = "COMPILEIT_LISTEN")]
    listen: Option<SocketAddr>,
}

pub async fn run_serve(args: ServeArgs, config: AppConfig) -> AppResult<()> {
    let super::Services {
        service,
        limiter,
        history,
    } = super::build_service(&config).await?;
    let settings = service.settings();
    info!(
        image = %settings.base_image,
        runtime = %settings.executor.runtime,
        timeout_secs = settings.executor.soft_timeout.as_secs(),
        toolchain = %settings.toolchain_dir.display(),
        "compile service ready"
    );

    let sweeper = limiter.spawn_sweeper();
    let pruner = history.spawn_pruner(RETENTION_DAYS);
    let listen = args.listen.unwrap_or(config.listen);
    let result = server::serve(listen, service).await;
    sweeper.abort();
    pruner.abort();
    result
}
