//! Evochamber CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use evochamber::cli::commands::{plan, run, status};
use evochamber::cli::{Cli, Commands};
use evochamber::domain::models::Config;
use evochamber::infrastructure::config::ConfigLoader;
use evochamber::infrastructure::logging::LoggerImpl;

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => ConfigLoader::load().context("Failed to load configuration"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => evochamber::cli::handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => evochamber::cli::handle_error(err, cli.json),
    };

    let result = match &cli.command {
        Commands::Run(args) => run::execute(args, &config, cli.json).await,
        Commands::Plan(args) => plan::execute(args, cli.json),
        Commands::Status => status::execute(&config, cli.json),
    };

    if let Err(err) = result {
        evochamber::cli::handle_error(err, cli.json);
    }
}
