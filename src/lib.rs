//! veil: security sandbox for AI agents
//!
//! This crate confines a command (an AI coding agent, a package manager, a
//! build) on macOS:
//!
//! # Security Model
//!
//! The security model is **fail-closed**: anything not explicitly allowed is
//! denied, and every network decision is logged.
//!
//! # Architecture
//!
//! - **Proxy**: Loopback HTTP/CONNECT proxy enforcing a host glob allowlist
//! - **Sandbox**: Per-invocation seatbelt profile, `sandbox-exec` launch and
//!   pseudo-terminal supervision
//! - **Config**: TOML configuration with validation and a default template
//! - **Telemetry**: Structured syslog audit events and `tracing` diagnostics

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod orchestrator;
pub mod proxy;
pub mod sandbox;
pub mod telemetry;
