// Pipeline CLI
// Entry point: logging, configuration and command dispatch

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use pipeline_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = EngineConfig::load(cli.config.as_deref()).wrap_err("failed to load engine configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let code = match &cli.command {
        Command::Run(args) => commands::run::execute(args, config).await?,
        Command::Validate(args) => commands::validate::execute(args, config)?,
        Command::Plan(args) => commands::plan::execute(args, config)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// `RUST_LOG` wins unless `--verbose` asks for debug output
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| color_eyre::eyre::eyre!("failed to initialize logging: {}", err))
}
