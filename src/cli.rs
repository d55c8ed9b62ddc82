//! Command-line interface definitions for veil.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Security sandbox for AI agents.
///
/// veil runs a command under a macOS seatbelt profile that confines its
/// filesystem access and forces all network traffic through an allowlist
/// proxy.
///
/// Examples:
///   veil claude
///   veil npm install
///   veil --dry-run -- make build
#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run (or omit to run a command in the sandbox).
    #[command(subcommand)]
    pub subcommand: Option<Commands>,

    /// Path to the config file (default: ~/.veilwarden/config.toml).
    ///
    /// A missing file named here is an error.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    ///
    /// Overrides -v. `RUST_LOG` overrides both.
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: Option<String>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = debug level
    /// -vv   = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print the seatbelt profile without executing.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Command to run and its arguments.
    ///
    /// Everything from the first non-flag argument on is passed through to
    /// the command without modification.
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

/// Subcommands for veil.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Create a default config file.
    ///
    /// Writes ~/.veilwarden/config.toml (or the --config path). Reads are
    /// denied outside system paths and allowed_read_paths; writes are allowed
    /// only in allowed_write_paths and the current directory. TMPDIR,
    /// XDG_CACHE_HOME and XDG_CONFIG_HOME are allowed when explicitly set.
    Init,
}
