// ABOUTME: Entry point for the slipway CLI application.
// ABOUTME: Parses arguments, sets up logging and dispatches to command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use slipway::config::{self, Config};
use slipway::error::Result;
use slipway::output::{Output, OutputMode};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    if let Err(e) = run(cli, mode).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, mode: OutputMode) -> Result<()> {
    let output = Output::new(mode);
    let cwd = env::current_dir()?;

    match cli.command {
        Commands::Init { force } => {
            let path = config::init_config(&cwd, force)?;
            output.success(&format!("Created {}", path.display()));
            Ok(())
        }
        Commands::Deploy {
            service,
            commit,
            message,
            by,
        } => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            let args = commands::DeployArgs {
                service,
                commit,
                message,
                by,
            };
            commands::deploy(config, args, output).await
        }
        Commands::Rollback { deployment, by } => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            commands::rollback(config, &deployment, by, output).await
        }
        Commands::Status { service } => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            commands::status(config, service.as_deref(), output).await
        }
        Commands::Reconcile => {
            let config = load_config(cli.config.as_deref(), &cwd)?;
            commands::reconcile(config, output).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>, cwd: &std::path::Path) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Config::discover(cwd),
    }
}
