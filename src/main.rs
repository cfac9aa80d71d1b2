//! mimosa-matrix - differential cache tests for mimosa
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use mimosa_matrix::cli::commands::run::WorkerOptions;
use mimosa_matrix::cli::{Cli, Commands};
use mimosa_matrix::config::ConfigManager;
use mimosa_matrix::error::MatrixResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> MatrixResult<()> {
    let cli = Cli::parse();

    // Completions need neither config nor logging
    if let Commands::Completions { shell } = cli.command {
        mimosa_matrix::cli::commands::completions(shell);
        return Ok(());
    }

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    // 0 = warn (progress only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("mimosa_matrix=warn"),
        1 => EnvFilter::new("mimosa_matrix=info"),
        _ => EnvFilter::new("mimosa_matrix=debug"),
    };

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .init();
    }
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Completions { .. } => unreachable!("Completions handled above"),
        Commands::Run(args) => {
            let forward = WorkerOptions {
                verbose: cli.verbose,
                config_path: cli.config.clone(),
            };
            mimosa_matrix::cli::commands::run(args, &config, forward).await
        }
        Commands::List(args) => mimosa_matrix::cli::commands::list(args, &config).await,
        Commands::Setup => mimosa_matrix::cli::commands::setup(&config).await,
        Commands::Worker(args) => mimosa_matrix::cli::commands::worker(args, &config).await,
    }
}
