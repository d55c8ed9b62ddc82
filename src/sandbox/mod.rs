//! Seatbelt sandboxing for veil.
//!
//! This module confines a command with macOS `sandbox-exec`:
//! - A default-deny SBPL profile synthesized per invocation
//! - Read and write allowances from configuration, `PATH` and the environment
//! - Write denial for credential and hook files, overriding any allowance
//! - Network egress limited to the loopback allowlist proxy
//! - A pseudo-terminal for interactive sessions
//!
//! # Security Model
//!
//! The sandbox interior is **untrusted**. Code inside can:
//! - Write anywhere it is allowed to, including files it later executes
//! - Try to reach the network directly instead of through the proxy
//! - Try to plant credentials or VCS hooks inside an allowed project
//!
//! The profile answers these with:
//! - Path canonicalization before rules are emitted
//! - Deny-write rules for dangerous patterns placed after every allowance
//!   (SBPL gives the last matching rule precedence)
//! - A single `network-outbound` allowance to `localhost:<proxy port>`
//! - Escaping of every path literal
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 sandbox-exec (seatbelt)                   │
//! │                                                           │
//! │   ┌──────────────┐  HTTP(S)_PROXY                         │
//! │   │  Tool        │───────────────────┐                    │
//! │   │  (npm, pip,  │                   │                    │
//! │   │   claude)    │◄──── pty ─────┐   │                    │
//! │   └──────────────┘               │   │                    │
//! └──────────────────────────────────┼───┼────────────────────┘
//!                                    │   │ localhost:<port>
//! ┌──────────────────────────────────┼───┼────────────────────┐
//! │                 veil             │   ▼                    │
//! │   ┌───────────────────────┐   ┌──────────────────────┐    │
//! │   │  SandboxRunner        │   │  AllowlistProxy      │    │
//! │   │  raw mode, pumps,     │   │  PolicyEngine        │────┼──► internet
//! │   │  SIGWINCH forwarding  │   └──────────────────────┘    │
//! │   └───────────────────────┘                               │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod cleanup;
pub mod error;
pub mod paths;
pub mod patterns;
pub mod profile;
pub mod pty;
pub mod runner;
pub mod seatbelt;

// Re-export main types for convenience
pub use cleanup::cleanup_stale_profiles;
pub use error::{ProfileError, SandboxError};
pub use paths::{HostEnv, ResolvedPath, resolve_path_spec};
pub use patterns::{DANGEROUS_PATTERNS, DangerousPattern};
pub use profile::{SandboxProfile, generate_profile};
pub use runner::{PROXY_ENV_VARS, ProfileTransport, SandboxRunner, exit_code};
pub use seatbelt::SANDBOX_EXEC_PATH;
