//! flowforge CLI entry point.
//!
//! Binary name: `flowforge`
//!
//! Parses CLI arguments, sets up tracing, loads the engine configuration and
//! dispatches to the workflow command handlers.

mod cli;

use std::path::PathBuf;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands, Output};
use flowforge_infra::config::{CONFIG_FILE_NAME, load_engine_config};
use flowforge_observe::tracing_setup::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,flowforge_core=debug,flowforge_infra=debug",
        _ => "trace",
    };
    init_tracing(cli.otel, filter).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need the engine
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowforge", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = load_engine_config(&config_path).await;

    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };
    let result = cli::workflow::handle_command(cli.command, &config, out).await;

    shutdown_tracing();
    result
}
