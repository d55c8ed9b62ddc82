//! Subcommand handling for veil.
//!
//! This module handles lightweight subcommands that never start the proxy or
//! the sandbox.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::cli::Commands;
use crate::config::ConfigLoader;

/// Handle a subcommand. Returns the process exit code.
pub fn handle_command(command: &Commands, config_path: Option<&Path>) -> Result<i32> {
    match command {
        Commands::Init => run_init(config_path),
    }
}

/// Write the default config, refusing to overwrite an existing one.
fn run_init(config_path: Option<&Path>) -> Result<i32> {
    let loader = match config_path {
        Some(path) => ConfigLoader::with_path(path.to_path_buf()),
        None => ConfigLoader::new().context("Failed to locate config directory")?,
    };

    let path = loader
        .write_default()
        .context("Failed to create config file")?;
    info!("Wrote default config to {}", path.display());
    println!("Created config at {}", path.display());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONFIG;

    #[test]
    fn test_init_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let code = handle_command(&Commands::Init, Some(path.as_path())).unwrap();
        assert_eq!(code, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# mine\n").unwrap();

        let err = handle_command(&Commands::Init, Some(path.as_path())).unwrap_err();
        assert!(format!("{:#}", err).contains("already exists"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");
    }
}
