//! Allowlist-enforcing forward proxy.
//!
//! This module provides the sandboxed child's only egress path:
//! - Host glob allowlist evaluation (default deny)
//! - HTTP CONNECT tunneling for HTTPS, with no TLS interception
//! - Plain HTTP forwarding for absolute-form requests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          Seatbelt sandbox (sandbox-exec)      │
//! │  ┌─────────────┐                              │
//! │  │   Command   │── HTTPS_PROXY ──┐            │
//! │  └─────────────┘                 │            │
//! └──────────────────────────────────┼────────────┘
//!                                    ▼
//!                           ┌──────────────────┐
//!                           │  AllowlistProxy  │
//!                           │ (127.0.0.1:port) │
//!                           └────────┬─────────┘
//!                                    │ allowed hosts only
//!                                    ▼
//!                               Internet
//! ```

pub mod connect;
pub mod error;
pub mod policy;
pub mod server;

pub use connect::{CONNECT_TIMEOUT, KEEPALIVE};
pub use error::ProxyError;
pub use policy::{PolicyEngine, PolicyError};
pub use server::AllowlistProxy;
