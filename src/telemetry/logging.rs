//! Diagnostic logging via `tracing`.
//!
//! Diagnostics go to two sinks sharing one filter: human-readable lines on
//! stderr and JSON lines appended to a log file (normally
//! `~/.veilwarden/veil.log`). This is separate from the syslog audit trail.
//!
//! # Verbosity
//!
//! `RUST_LOG` wins when set. Otherwise `--log-level` is used verbatim, and
//! failing that the `-v` count picks the level:
//!
//! - 0 (default): info
//! - 1 (-v): debug
//! - 2+ (-vv): trace

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use super::error::TelemetryError;

/// Pick the filter directive from the CLI flags, ignoring `RUST_LOG`.
pub fn level_directive(log_level: Option<&str>, verbose: u8) -> String {
    if let Some(level) = log_level {
        return level.to_string();
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
    .to_string()
}

/// Parse a filter directive such as `debug` or `veil::proxy=trace`.
pub fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directive).map_err(|_| TelemetryError::InvalidLevel(directive.to_string()))
}

/// Install the global tracing subscriber.
///
/// When `log_file` cannot be opened, logging continues on stderr only and a
/// warning is emitted once the subscriber is live.
pub fn init_tracing(
    log_level: Option<&str>,
    verbose: u8,
    log_file: Option<&Path>,
) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&level_directive(log_level, verbose))?,
    };

    let (file_layer, file_error) = match log_file.map(open_log_file).transpose() {
        Ok(file) => (
            file.map(|file| fmt::layer().json().with_writer(Mutex::new(file))),
            None,
        ),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    if let Some(e) = file_error {
        warn!("File logging disabled: {}", e);
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<fs::File, TelemetryError> {
    let to_error = |source| TelemetryError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_error)?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_verbosity() {
        assert_eq!(level_directive(None, 0), "info");
        assert_eq!(level_directive(None, 1), "debug");
        assert_eq!(level_directive(None, 2), "trace");
        assert_eq!(level_directive(None, 7), "trace");
    }

    #[test]
    fn test_explicit_level_beats_verbosity() {
        assert_eq!(level_directive(Some("error"), 3), "error");
    }

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("debug").is_ok());
        assert!(parse_filter("veil::proxy=trace,warn").is_ok());
        assert!(parse_filter("veil=loud").is_err());
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("veil.log");

        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
