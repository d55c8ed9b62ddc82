//! Error types for sandbox operations.
//!
//! This module defines structured error types for the two halves of the
//! sandbox:
//! - Profile synthesis errors (home or working directory resolution, rendering)
//! - Runner errors (profile artifact I/O, wrapper spawn, terminal control)

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while synthesizing a seatbelt profile.
///
/// Any of these aborts the invocation before a child process exists; a child
/// is never launched under a partial profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Neither `HOME` nor the platform lookup yielded a home directory.
    #[error("Could not determine home directory")]
    HomeDir,

    /// The current working directory could not be read.
    #[error("Could not determine current working directory: {0}")]
    WorkingDir(#[source] std::io::Error),

    /// Writing the rule list to text failed.
    #[error("Failed to render seatbelt profile: {0}")]
    Render(#[from] std::fmt::Error),
}

/// Unified error type for sandbox runner operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Profile synthesis failed.
    #[error(transparent)]
    Profile(#[from] ProfileError),

    /// The temporary profile file could not be written.
    #[error("Failed to write profile artifact: {0}")]
    Artifact(#[source] std::io::Error),

    /// The sandbox wrapper could not be started.
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the child failed.
    #[error("Failed to wait for sandboxed process: {0}")]
    Wait(#[source] std::io::Error),

    /// The command to run was empty.
    #[error("No command given")]
    EmptyCommand,

    /// Pseudo-terminal allocation or sizing failed.
    #[error("Pseudo-terminal error: {0}")]
    Pty(#[source] nix::Error),

    /// Reading, writing or duplicating a terminal descriptor failed.
    #[error("Pseudo-terminal I/O error: {0}")]
    PtyIo(#[source] std::io::Error),

    /// A signal handler could not be registered.
    #[error("Failed to register signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// Terminal mode could not be changed.
    #[error("Terminal error: {0}")]
    Terminal(#[source] nix::Error),

    /// A supervisor task panicked or was cancelled.
    #[error("Supervisor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_display() {
        let err = SandboxError::Spawn {
            program: PathBuf::from("/usr/bin/sandbox-exec"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let msg = err.to_string();
        assert!(msg.contains("/usr/bin/sandbox-exec"));
    }

    #[test]
    fn test_sandbox_error_from_profile() {
        let sandbox_err: SandboxError = ProfileError::HomeDir.into();
        assert!(matches!(sandbox_err, SandboxError::Profile(_)));
        assert_eq!(sandbox_err.to_string(), "Could not determine home directory");
    }
}
