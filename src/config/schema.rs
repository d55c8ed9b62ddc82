//! Configuration schema definitions.
//!
//! A veil configuration is a single TOML document, by default
//! `~/.veilwarden/config.toml`:
//!
//! ```toml
//! [sandbox]
//! allowed_read_paths = ["~/.claude"]
//! allowed_write_paths = ["./", "/tmp"]
//! profile_transport = "file"
//!
//! [policy]
//! allowlist = ["pypi.org", "*.github.com"]
//! ```

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::proxy::PolicyEngine;
use crate::sandbox::ProfileTransport;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Filesystem sandbox settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Network policy settings.
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Config {
    /// Check every section, failing on the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sandbox.validate()?;
        self.policy.validate()
    }
}

/// Filesystem sandbox settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    /// Paths readable by the sandboxed command, beyond the system baseline.
    ///
    /// May be `~`-prefixed or relative to the working directory.
    #[serde(default)]
    pub allowed_read_paths: Vec<String>,

    /// Paths readable and writable by the sandboxed command.
    ///
    /// The working directory is always writable, whether listed or not.
    #[serde(default)]
    pub allowed_write_paths: Vec<String>,

    /// How the profile reaches `sandbox-exec`.
    #[serde(default)]
    pub profile_transport: ProfileTransport,
}

impl SandboxConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, paths) in [
            ("sandbox.allowed_read_paths", &self.allowed_read_paths),
            ("sandbox.allowed_write_paths", &self.allowed_write_paths),
        ] {
            if paths.iter().any(|p| p.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "paths must not be blank".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Network policy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Host glob patterns the proxy lets through. Everything else is denied.
    #[serde(default)]
    pub allowlist: Vec<String>,
}

impl PolicyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.allowlist.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "policy.allowlist".to_string(),
                message: "at least one host pattern is required".to_string(),
            });
        }
        if self.allowlist.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "policy.allowlist".to_string(),
                message: "host patterns must not be blank".to_string(),
            });
        }
        if let Err(e) = PolicyEngine::new(&self.allowlist) {
            return Err(ConfigError::InvalidValue {
                field: "policy.allowlist".to_string(),
                message: e.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let toml_content = r#"
            [sandbox]
            allowed_read_paths = ["~/.claude"]
            allowed_write_paths = ["./", "/tmp"]
            profile_transport = "inline"

            [policy]
            allowlist = ["pypi.org", "*.github.com"]
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.sandbox.allowed_read_paths, vec!["~/.claude"]);
        assert_eq!(config.sandbox.allowed_write_paths, vec!["./", "/tmp"]);
        assert_eq!(config.sandbox.profile_transport, ProfileTransport::Inline);
        assert_eq!(config.policy.allowlist, vec!["pypi.org", "*.github.com"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_optional_fields_default() {
        let config: Config = toml::from_str("[policy]\nallowlist = [\"pypi.org\"]\n").unwrap();
        assert!(config.sandbox.allowed_read_paths.is_empty());
        assert!(config.sandbox.allowed_write_paths.is_empty());
        assert_eq!(config.sandbox.profile_transport, ProfileTransport::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_allowlist_rejected() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "policy.allowlist"));
    }

    #[test]
    fn test_blank_pattern_rejected() {
        let config = Config {
            policy: PolicyConfig {
                allowlist: vec!["pypi.org".into(), "  ".into()],
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let config = Config {
            policy: PolicyConfig {
                allowlist: vec!["[unclosed".into()],
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("[unclosed"));
    }

    #[test]
    fn test_blank_write_path_rejected() {
        let config = Config {
            sandbox: SandboxConfig {
                allowed_write_paths: vec!["".into()],
                ..Default::default()
            },
            policy: PolicyConfig {
                allowlist: vec!["pypi.org".into()],
            },
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sandbox.allowed_write_paths"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<Config, _> = toml::from_str("[policy]\nallowlist = []\nblocklist = []\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result: Result<Config, _> = toml::from_str("[sandbox]\nprofile_transport = \"pipe\"\n");
        assert!(result.is_err());
    }
}
