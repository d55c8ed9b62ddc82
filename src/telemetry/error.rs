//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to connect to syslog.
    #[error("Failed to connect to syslog: {0}")]
    SyslogConnection(String),

    /// Failed to open the diagnostic log file.
    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        /// Path of the log file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The log level directive could not be parsed.
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    /// A global tracing subscriber was already installed.
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,
}
