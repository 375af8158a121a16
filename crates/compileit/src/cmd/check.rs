use std::path::Path;
use std::process::ExitCode;

use sandbox_docker::DockerRuntime;

use crate::config::AppConfig;
use crate::error::AppResult;

/// Verify the engine, its runtime and the toolchain, reporting every
/// failure rather than stopping at the first.
pub async fn run_check(config: &AppConfig) -> AppResult<ExitCode> {
    let mut failures = Vec::new();

    match DockerRuntime::connect(config.docker_config()).await {
        Ok(runtime) => println!(
            "ok: engine at {} with runtime {}",
            runtime.config().socket_path.display(),
            runtime.config().runtime
        ),
        Err(e) => failures.push(e.to_string()),
    }

    match check_toolchain(&config.toolchain_dir).await {
        Ok(()) => println!("ok: toolchain at {}", config.toolchain_dir.display()),
        Err(e) => failures.push(e),
    }

    if failures.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    for failure in &failures {
        eprintln!("failed: {failure}");
    }
    Ok(ExitCode::FAILURE)
}

async fn check_toolchain(dir: &Path) -> Result<(), String> {
    let metadata = tokio::fs::metadata(dir)
        .await
        .map_err(|e| format!("toolchain directory {}: {e}", dir.display()))?;
    if !metadata.is_dir() {
        return Err(format!("{} is not a directory", dir.display()));
    }
    let compiler = dir.join("compiler");
    if !tokio::fs::try_exists(&compiler).await.unwrap_or(false) {
        return Err(format!("compiler not found at {}", compiler.display()));
    }
    Ok(())
}
