//! Credential and hook paths that are never writable.
//!
//! These patterns are rendered as `(deny file-write* (regex ...))` rules after
//! every write allowance. SBPL gives the last matching rule precedence, so a
//! `.env` inside an allowed project directory is still read-only.
//!
//! The same expressions are compiled with the `regex` crate so that the
//! synthesizer can warn when a configured write path is itself covered.

use std::path::Path;
use std::sync::LazyLock;

use regex::RegexSet;

/// A path pattern denied for writes regardless of enclosing allowances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DangerousPattern {
    /// Short description for logs.
    pub name: &'static str,
    /// Extended regular expression over the absolute path.
    pub regex: &'static str,
}

const fn pattern(name: &'static str, regex: &'static str) -> DangerousPattern {
    DangerousPattern { name, regex }
}

/// Fixed denylist, in render order.
pub const DANGEROUS_PATTERNS: &[DangerousPattern] = &[
    // Dotenv files
    pattern(".env", r"(^|/)\.env$"),
    pattern(".env.*", r"(^|/)\.env\.[^/]+$"),
    // Package manager credentials
    pattern(".npmrc", r"(^|/)\.npmrc$"),
    pattern(".yarnrc", r"(^|/)\.yarnrc(\.yml)?$"),
    pattern(".pypirc", r"(^|/)\.pypirc$"),
    pattern(".gem/credentials", r"(^|/)\.gem/credentials$"),
    pattern(".cargo/credentials", r"(^|/)\.cargo/credentials(\.toml)?$"),
    pattern(".netrc", r"(^|/)\.netrc$"),
    pattern(".docker/config.json", r"(^|/)\.docker/config\.json$"),
    // VCS hooks
    pattern(".git/hooks", r"(^|/)\.git/hooks(/|$)"),
    pattern(".husky", r"(^|/)\.husky(/|$)"),
    // Cloud provider credentials
    pattern(".aws", r"(^|/)\.aws/(credentials|config)$"),
    pattern(".config/gcloud", r"(^|/)\.config/gcloud(/|$)"),
    pattern(".azure", r"(^|/)\.azure(/|$)"),
    pattern(".kube/config", r"(^|/)\.kube/config$"),
    // Keys
    pattern(".ssh", r"(^|/)\.ssh(/|$)"),
    pattern(".gnupg", r"(^|/)\.gnupg(/|$)"),
];

static COMPILED: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(DANGEROUS_PATTERNS.iter().map(|p| p.regex))
        .unwrap_or_else(|_| RegexSet::empty())
});

/// Return the first dangerous pattern covering `path`, if any.
pub fn matching(path: &Path) -> Option<&'static DangerousPattern> {
    let text = path.to_string_lossy();
    COMPILED
        .matches(&text)
        .iter()
        .next()
        .map(|index| &DANGEROUS_PATTERNS[index])
}

/// True if writes to `path` are always denied.
pub fn is_dangerous(path: &Path) -> bool {
    matching(path).is_some()
}
