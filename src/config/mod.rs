//! Configuration system for veil.
//!
//! This module provides TOML configuration loading and validation. A single
//! file drives both halves of the sandbox:
//!
//! ```toml
//! [sandbox]
//! allowed_read_paths = ["~/.claude"]
//! allowed_write_paths = ["./", "/tmp"]
//!
//! [policy]
//! allowlist = ["pypi.org", "*.github.com"]
//! ```
//!
//! `veil init` writes a commented starting point to
//! `~/.veilwarden/config.toml`.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{
    CONFIG_FILE, ConfigLoader, DEFAULT_CONFIG, LOG_FILE, VEIL_DIR, default_log_path, veil_dir,
};
pub use schema::{Config, PolicyConfig, SandboxConfig};
