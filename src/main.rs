//! veil: security sandbox for AI agents
//!
//! This is the main entry point for the veil binary. It handles CLI argument
//! parsing, logging setup and configuration loading, then hands the session
//! to the orchestrator.
//!
//! # I/O Architecture
//!
//! veil wraps interactive tools without interfering with their terminal:
//!
//! - **Audit logging**: Goes to syslog (not stdout/stderr)
//! - **Diagnostic logging**: stderr plus a JSON copy in
//!   `~/.veilwarden/veil.log`
//! - **The wrapped command**: owns stdin/stdout/stderr, directly or through a
//!   pseudo-terminal
//!
//! The exit code is the wrapped command's own (128 + N if it was killed by
//! signal N), or 1 if veil itself failed.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use veil::{
    cli::Cli,
    cli_handler,
    config::{ConfigLoader, default_log_path},
    orchestrator, telemetry,
};
use tracing::debug;

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("veil: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    telemetry::init_tracing(
        cli.log_level.as_deref(),
        cli.verbose,
        default_log_path().as_deref(),
    )
    .context("Failed to initialize logging")?;

    debug!("Parsed CLI arguments: {:?}", cli);

    if let Some(command) = &cli.subcommand {
        return cli_handler::handle_command(command, cli.config.as_deref());
    }

    if cli.command.is_empty() && !cli.dry_run {
        Cli::command()
            .print_help()
            .context("Failed to print help")?;
        return Ok(0);
    }

    let loader = match cli.config.as_deref() {
        Some(path) => ConfigLoader::with_path(path.to_path_buf()),
        None => ConfigLoader::new().context("Failed to locate config directory")?,
    };
    let config = loader
        .load(cli.config.as_deref())
        .context("Failed to load configuration")?;

    debug!("Loaded configuration: {:?}", config);

    orchestrator::run(&cli, &config)
}
