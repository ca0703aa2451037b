mod cli;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, GlobalFlags};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(&cli.global) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, &cli.global).await,
        Commands::Ping => commands::ping::execute(&cli.global).await,
        Commands::Port(args) => commands::port::execute(args, &cli.global),
        Commands::Call(args) => commands::call::execute(args, &cli.global).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr unless `--log-dir` is given. `RUST_LOG` wins over `-v`.
fn init_logging(
    global: &GlobalFlags,
) -> anyhow::Result<Option<pyserve::util::FileLogGuard>> {
    if let Some(dir) = &global.log_dir {
        return Ok(Some(pyserve::util::init_file_logging(dir)?));
    }

    let default_level = if global.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(global.verbose)
        .init();

    Ok(None)
}
