//! Host allowlist evaluation engine.
//!
//! The engine compiles the configured host patterns once and answers a single
//! question for every proxied request: may the sandboxed process reach this
//! host? The answer defaults to no.
//!
//! # Pattern Matching
//!
//! Patterns are glob expressions over the host name (never the port):
//!
//! - Exact match: `github.com`
//! - Wildcard: `*.github.com` matches `api.github.com` but NOT `github.com`
//! - Single character: `registry?.example.com`
//! - Character class: `mirror[0-9].example.com`
//!
//! Host names have no path separator, so `**` means the same as `*` and is
//! folded to it before compiling.
//!
//! There is no implicit subdomain matching. `github.com` does not match
//! `sub.github.com` unless a pattern with a leading wildcard is configured.
//!
//! Hosts and patterns are lowercased before comparison, per DNS.
//!
//! # Example
//!
//! ```
//! use veil::proxy::PolicyEngine;
//!
//! let engine = PolicyEngine::new(&["*.github.com".to_string()]).unwrap();
//! assert!(engine.evaluate("api.github.com:443"));
//! assert!(!engine.evaluate("github.com"));
//! ```

use glob::{MatchOptions, Pattern};
use thiserror::Error;

/// Error raised when the allowlist cannot be compiled.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A pattern is not a valid glob expression.
    #[error("Invalid host pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The pattern as written in the configuration.
        pattern: String,
        /// Why the glob compiler rejected it.
        message: String,
    },
}

/// Immutable host allowlist.
///
/// Holds no interior mutability, so a shared `Arc<PolicyEngine>` can be
/// evaluated from any number of connection tasks without locking.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

impl PolicyEngine {
    /// Compile an allowlist from host glob patterns.
    ///
    /// Construction is all-or-nothing: the first pattern that fails to compile
    /// aborts the whole policy.
    pub fn new(hosts: &[String]) -> Result<Self, PolicyError> {
        let patterns = hosts
            .iter()
            .map(|host| {
                let folded = fold_double_star(&host.to_lowercase());
                Pattern::new(&folded).map_err(|e| PolicyError::InvalidPattern {
                    pattern: host.clone(),
                    message: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Returns true if the host is allowed.
    ///
    /// A trailing `:port` is ignored and the host is lowercased. The first
    /// matching pattern short-circuits; pattern order has no other meaning.
    pub fn evaluate(&self, host: &str) -> bool {
        let host = strip_port(host).to_lowercase();
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(&host, MATCH_OPTIONS))
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no pattern is configured (every host is denied).
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Collapse runs of `*` outside character classes into a single `*`.
fn fold_double_star(pattern: &str) -> String {
    let mut folded = String::with_capacity(pattern.len());
    let mut in_class = false;
    for c in pattern.chars() {
        match c {
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '*' if !in_class && folded.ends_with('*') => continue,
            _ => {}
        }
        folded.push(c);
    }
    folded
}

/// Strip an optional trailing port from a host.
///
/// - `api.example.com:443` -> `api.example.com`
/// - `[::1]:8080` -> `::1`
/// - `::1` -> `::1` (bare IPv6 literals are left alone)
pub(crate) fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((inner, _)) => inner,
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port))
            if !name.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    }
}
