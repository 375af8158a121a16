use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

/// Identity one-shot runs are accounted under.
const CLI_IDENTITY: &str = "cli";

#[derive(Args)]
pub struct ExecArgs {
    /// Source file to compile and run
    file: PathBuf,
}

pub async fn run_exec(args: ExecArgs, config: AppConfig) -> AppResult<ExitCode> {
    let code = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| AppError::Config(format!("read {}: {e}", args.file.display())))?;
    let service = super::build_service(&config).await?.service;

    let submission = service.submit(&code, CLI_IDENTITY).await;
    print!("{}", submission.output);
    match submission.result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
