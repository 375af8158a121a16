mod admission;
mod cmd;
mod config;
mod error;
mod executor;
mod history;
mod image;
mod policy;
mod script;
mod server;
mod service;
#[cfg(test)]
mod testing;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "compileit", version)]
struct Cli {
    /// YAML config file (defaults apply when omitted)
    #[arg(long, global = true, env = "COMPILEIT_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP compile endpoint
    Serve(cmd::ServeArgs),
    /// Compile and run a single source file, printing its output
    Exec(cmd::ExecArgs),
    /// Verify engine access, runtime registration and the toolchain
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load_or_default(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let level = match config.max_log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_max_level(level)
        .init();

    let result = match cli.command {
        Command::Serve(args) => cmd::run_serve(args, config)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Exec(args) => cmd::run_exec(args, config).await,
        Command::Check => cmd::run_check(&config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
