//! Telemetry: diagnostic logging and the audit trail.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): security events such as blocked hosts and
//!   session boundaries, tagged `VEIL`
//! - **Diagnostic logging** (tracing): stderr plus a JSON log file
//! - These are completely separate concerns
//!
//! # Usage
//!
//! ```ignore
//! use veil::telemetry::{self, AuditEvent, AuditLogger};
//!
//! telemetry::init_tracing(None, 1, Some(&log_path))?;
//!
//! let audit = AuditLogger::new().unwrap_or_else(|_| AuditLogger::new_null());
//! audit.log(AuditEvent::SessionStart {
//!     user: "developer".to_string(),
//!     command: "claude".to_string(),
//!     pid: std::process::id(),
//! });
//! ```
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"network_block","domain":"evil.io","reason":"not_allowlisted"}
//! ```

mod error;
mod events;
mod logging;
mod syslog;

pub use error::TelemetryError;
pub use events::{AllowReason, AuditEvent, BlockReason};
pub use logging::{init_tracing, level_directive, parse_filter};
pub use syslog::{AuditLogger, SYSLOG_TAG};
