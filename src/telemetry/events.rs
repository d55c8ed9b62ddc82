//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `VEIL` tag so that every
//! sandboxed session leaves an audit trail outside the sandbox.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for security logging.
///
/// Each variant represents a security-relevant event in the lifetime of a
/// sandboxed session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Session started.
    SessionStart {
        /// Username of the person running the sandbox.
        user: String,
        /// Command being sandboxed (argv[0]).
        command: String,
        /// Process ID of the veil process.
        pid: u32,
    },

    /// Session ended.
    SessionEnd {
        /// Username of the person who ran the sandbox.
        user: String,
        /// Command that was sandboxed.
        command: String,
        /// Exit code reported to the caller.
        exit_code: i32,
        /// Duration of the session in seconds.
        duration_sec: u64,
    },

    /// Network access allowed by the proxy.
    NetworkAllow {
        /// Host that was allowed.
        domain: String,
        /// Reason for allowing.
        reason: AllowReason,
    },

    /// Network access blocked by the proxy.
    NetworkBlock {
        /// Host that was blocked.
        domain: String,
        /// Reason for blocking.
        reason: BlockReason,
    },

    /// Seatbelt profile synthesized for a session.
    ProfileGenerated {
        /// Number of readable directories and files.
        read_paths: usize,
        /// Number of writable directories and files.
        write_paths: usize,
        /// Whether PTY rules were included.
        interactive: bool,
    },

    /// Child process launched under the sandbox wrapper.
    SandboxLaunch {
        /// Command being launched.
        command: String,
        /// Loopback port of the allowlist proxy.
        proxy_port: u16,
        /// Whether the child runs on a pseudo-terminal.
        interactive: bool,
    },
}

/// Reasons for allowing network access.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    /// Host matched a configured allowlist pattern.
    Allowlist,
}

/// Reasons for blocking network access.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Host matched no allowlist pattern.
    NotAllowlisted,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_start_serialization() {
        let event = AuditEvent::SessionStart {
            user: "developer".to_string(),
            command: "claude".to_string(),
            pid: 12345,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"session_start\""));
        assert!(json.contains("\"user\":\"developer\""));
        assert!(json.contains("\"command\":\"claude\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_session_end_serialization() {
        let event = AuditEvent::SessionEnd {
            user: "developer".to_string(),
            command: "npm".to_string(),
            exit_code: 130,
            duration_sec: 179,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"session_end\""));
        assert!(json.contains("\"exit_code\":130"));
        assert!(json.contains("\"duration_sec\":179"));
    }

    #[test]
    fn test_network_allow_serialization() {
        let event = AuditEvent::NetworkAllow {
            domain: "pypi.org".to_string(),
            reason: AllowReason::Allowlist,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"network_allow\""));
        assert!(json.contains("\"domain\":\"pypi.org\""));
        assert!(json.contains("\"reason\":\"allowlist\""));
    }

    #[test]
    fn test_network_block_serialization() {
        let event = AuditEvent::NetworkBlock {
            domain: "evil.io".to_string(),
            reason: BlockReason::NotAllowlisted,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"network_block\""));
        assert!(json.contains("\"reason\":\"not_allowlisted\""));
    }

    #[test]
    fn test_profile_generated_serialization() {
        let event = AuditEvent::ProfileGenerated {
            read_paths: 12,
            write_paths: 4,
            interactive: true,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"profile_generated\""));
        assert!(json.contains("\"read_paths\":12"));
        assert!(json.contains("\"interactive\":true"));
    }

    #[test]
    fn test_sandbox_launch_serialization() {
        let event = AuditEvent::SandboxLaunch {
            command: "cargo".to_string(),
            proxy_port: 52113,
            interactive: false,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"sandbox_launch\""));
        assert!(json.contains("\"proxy_port\":52113"));
    }
}
