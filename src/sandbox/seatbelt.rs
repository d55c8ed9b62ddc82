//! Structured SBPL (seatbelt profile language) rule lists.
//!
//! Profiles are assembled as typed rules and rendered in one place, so every
//! path literal goes through the same escaping. SBPL evaluates rules in order
//! and the last matching rule wins; the order rules are pushed is the order
//! they are rendered.
//!
//! # Example
//!
//! ```
//! use veil::sandbox::seatbelt::{Filter, Rule, SbplProfile};
//!
//! let mut profile = SbplProfile::new();
//! profile.push(Rule::deny(&["default"]));
//! profile.push(Rule::allow(&["file-read*"]).filter(Filter::subpath("/usr")));
//!
//! let text = profile.render().unwrap();
//! assert!(text.contains("(allow file-read* (subpath \"/usr\"))"));
//! ```

use std::fmt::{self, Write};
use std::path::{Path, PathBuf};

/// Fixed location of the seatbelt wrapper. Never resolved through `PATH`.
pub const SANDBOX_EXEC_PATH: &str = "/usr/bin/sandbox-exec";

/// Rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `(allow ...)`
    Allow,
    /// `(deny ...)`
    Deny,
}

/// Rule filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Exactly this path.
    Literal(PathBuf),
    /// This path and everything beneath it.
    Subpath(PathBuf),
    /// Paths matching an extended regular expression.
    Regex(String),
    /// Outbound TCP to `host:port`.
    RemoteTcp(String),
}

impl Filter {
    /// `(literal "...")`
    pub fn literal(path: impl Into<PathBuf>) -> Self {
        Filter::Literal(path.into())
    }

    /// `(subpath "...")`
    pub fn subpath(path: impl Into<PathBuf>) -> Self {
        Filter::Subpath(path.into())
    }

    /// `(regex #"...")`
    pub fn regex(pattern: impl Into<String>) -> Self {
        Filter::Regex(pattern.into())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Literal(path) => write!(f, "(literal \"{}\")", escape_path(path)),
            Filter::Subpath(path) => write!(f, "(subpath \"{}\")", escape_path(path)),
            Filter::Regex(pattern) => write!(f, "(regex #\"{}\")", pattern.replace('"', "\\\"")),
            Filter::RemoteTcp(endpoint) => {
                write!(f, "(remote tcp \"{}\")", escape_sbpl_string(endpoint))
            }
        }
    }
}

/// One `(allow|deny op... filter...)` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    action: Action,
    operations: Vec<&'static str>,
    filters: Vec<Filter>,
}

impl Rule {
    /// Allow the given operations.
    pub fn allow(operations: &[&'static str]) -> Self {
        Self::new(Action::Allow, operations)
    }

    /// Deny the given operations.
    pub fn deny(operations: &[&'static str]) -> Self {
        Self::new(Action::Deny, operations)
    }

    fn new(action: Action, operations: &[&'static str]) -> Self {
        Self {
            action,
            operations: operations.to_vec(),
            filters: Vec::new(),
        }
    }

    /// Add one filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add several filters.
    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// The rule's action.
    pub fn action(&self) -> Action {
        self.action
    }

    /// The rule's filters.
    pub fn filter_list(&self) -> &[Filter] {
        &self.filters
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            Action::Allow => "allow",
            Action::Deny => "deny",
        };
        write!(f, "({} {}", action, self.operations.join(" "))?;

        match self.filters.as_slice() {
            [] => {}
            [single] => write!(f, " {}", single)?,
            many => {
                for filter in many {
                    write!(f, "\n    {}", filter)?;
                }
            }
        }

        f.write_char(')')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Comment(String),
    Rule(Rule),
}

/// Ordered SBPL document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SbplProfile {
    entries: Vec<Entry>,
}

impl SbplProfile {
    /// Create an empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `;;` comment line before the next rule.
    pub fn comment(&mut self, text: &str) {
        self.entries
            .push(Entry::Comment(text.replace(['\n', '\r'], " ")));
    }

    /// Append a rule.
    pub fn push(&mut self, rule: Rule) {
        self.entries.push(Entry::Rule(rule));
    }

    /// Append a rule only when it has at least one filter.
    ///
    /// An SBPL rule without filters applies to every path, so a scoped
    /// allowance over an empty set must be dropped rather than rendered.
    pub fn push_scoped(&mut self, rule: Rule) {
        if !rule.filters.is_empty() {
            self.push(rule);
        }
    }

    /// Rules in render order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Rule(rule) => Some(rule),
            Entry::Comment(_) => None,
        })
    }

    /// Render the profile text.
    pub fn render(&self) -> Result<String, fmt::Error> {
        let mut out = String::new();
        writeln!(out, "(version 1)")?;
        for entry in &self.entries {
            match entry {
                Entry::Comment(text) => writeln!(out, "\n;; {}", text)?,
                Entry::Rule(rule) => writeln!(out, "{}", rule)?,
            }
        }
        Ok(out)
    }
}

/// Escape a string for an SBPL double-quoted literal.
pub fn escape_sbpl_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_path(path: &Path) -> String {
    escape_sbpl_string(&path.to_string_lossy())
}
