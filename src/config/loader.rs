//! Configuration loading and the `veil init` template.
//!
//! Configuration comes from exactly one file:
//!
//! 1. The file named by `--config`, if given (missing is an error)
//! 2. Otherwise `~/.veilwarden/config.toml` (missing is an error that points
//!    at `veil init`)
//!
//! The loaded document is validated before it is returned, so no component
//! ever starts with an empty or uncompilable allowlist.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;

/// Directory under the home directory holding veil's files.
pub const VEIL_DIR: &str = ".veilwarden";

/// Configuration filename.
pub const CONFIG_FILE: &str = "config.toml";

/// Log filename.
pub const LOG_FILE: &str = "veil.log";

/// Template written by `veil init`.
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// `~/.veilwarden`, or `None` if the home directory is unknown.
pub fn veil_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(VEIL_DIR))
}

/// Default log file location, `~/.veilwarden/veil.log`.
pub fn default_log_path() -> Option<PathBuf> {
    veil_dir().map(|dir| dir.join(LOG_FILE))
}

/// Locates, reads and validates the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Path used when no explicit file is given.
    default_path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for `~/.veilwarden/config.toml`.
    pub fn new() -> Result<Self, ConfigError> {
        let dir = veil_dir().ok_or(ConfigError::NoHomeDirectory)?;
        Ok(Self::with_path(dir.join(CONFIG_FILE)))
    }

    /// Create a loader with a custom default path (for testing).
    #[must_use]
    pub fn with_path(default_path: PathBuf) -> Self {
        Self { default_path }
    }

    /// The path used when no explicit file is given.
    pub fn default_path(&self) -> &Path {
        &self.default_path
    }

    /// Load and validate the configuration.
    ///
    /// Invalid TOML and invalid values are errors, as is a missing file.
    pub fn load(&self, explicit: Option<&Path>) -> Result<Config, ConfigError> {
        let config = match explicit {
            Some(path) => self.load_file(path)?.ok_or_else(|| ConfigError::ReadError {
                path: path.to_path_buf(),
                source: std::io::Error::new(ErrorKind::NotFound, "Specified config file not found"),
            })?,
            None => self
                .load_file(&self.default_path)?
                .ok_or_else(|| ConfigError::NotFound(self.default_path.clone()))?,
        };

        config.validate()?;
        debug!(
            "Configuration loaded: {} allowlist patterns, {} read paths, {} write paths",
            config.policy.allowlist.len(),
            config.sandbox.allowed_read_paths.len(),
            config.sandbox.allowed_write_paths.len()
        );
        Ok(config)
    }

    /// Write the default template to the default path.
    ///
    /// Refuses to overwrite an existing file.
    pub fn write_default(&self) -> Result<&Path, ConfigError> {
        let path = &self.default_path;
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.clone()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .and_then(|mut file| std::io::Write::write_all(&mut file, DEFAULT_CONFIG.as_bytes()))
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => ConfigError::AlreadyExists(path.clone()),
                _ => ConfigError::WriteError {
                    path: path.clone(),
                    source: e,
                },
            })?;

        debug!("Wrote default config to {:?}", path);
        Ok(path)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                debug!("Loaded config from {:?}", path);
                Ok(Some(config))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}
