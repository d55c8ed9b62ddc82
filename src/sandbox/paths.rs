//! Path resolution for profile synthesis.
//!
//! Everything here reads from a [`HostEnv`] snapshot rather than the live
//! process environment, so the synthesizer and the launch step see the same
//! values and the invoking process's environment is never touched.
//!
//! # Resolution rules
//!
//! A configured path spec is expanded (`~` and `~/...`), made absolute
//! against the working directory, lexically cleaned, then symlink-resolved.
//! Resolution falls back to the cleaned absolute path when the target does not
//! exist yet. The result is a file only if it exists and is not a directory;
//! anything else is treated as a directory so that files created later under
//! it are covered.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::error::ProfileError;

/// Variables whose explicit values are granted read and write access.
pub const AUTO_ALLOW_ENV_VARS: &[&str] = &["TMPDIR", "XDG_CACHE_HOME", "XDG_CONFIG_HOME"];

/// Immutable snapshot of the invoking environment.
#[derive(Debug, Clone)]
pub struct HostEnv {
    vars: BTreeMap<OsString, OsString>,
    home: PathBuf,
    cwd: PathBuf,
}

impl HostEnv {
    /// Capture the current process environment, home and working directory.
    pub fn capture() -> Result<Self, ProfileError> {
        let vars: BTreeMap<OsString, OsString> = std::env::vars_os().collect();

        let home = vars
            .get(OsStr::new("HOME"))
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .ok_or(ProfileError::HomeDir)?;

        let cwd = std::env::current_dir().map_err(ProfileError::WorkingDir)?;

        Ok(Self { vars, home, cwd })
    }

    /// Build a snapshot from explicit values.
    pub fn new<I, K, V>(vars: I, home: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            home: home.into(),
            cwd: cwd.into(),
        }
    }

    /// Look up a variable. Empty values count as unset.
    pub fn var(&self, name: &str) -> Option<&OsStr> {
        self.vars
            .get(OsStr::new(name))
            .map(OsString::as_os_str)
            .filter(|value| !value.is_empty())
    }

    /// All captured variables.
    pub fn vars(&self) -> &BTreeMap<OsString, OsString> {
        &self.vars
    }

    /// Home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Working directory at capture time.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }
}

/// A path spec after resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolvedPath {
    /// A directory, or a path that does not exist yet.
    Directory(PathBuf),
    /// An existing non-directory.
    File(PathBuf),
}

impl ResolvedPath {
    /// The resolved path regardless of kind.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedPath::Directory(path) | ResolvedPath::File(path) => path,
        }
    }
}

/// Resolve a configured path spec against the snapshot.
pub fn resolve_path_spec(spec: &str, env: &HostEnv) -> ResolvedPath {
    let expanded = expand_tilde(spec, env.home());
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env.cwd().join(expanded)
    };
    let resolved = canonicalize_or_original(&clean_path(&absolute));

    match fs::metadata(&resolved) {
        Ok(meta) if !meta.is_dir() => ResolvedPath::File(resolved),
        _ => ResolvedPath::Directory(resolved),
    }
}

/// Expand a leading `~` or `~/`. `~user` forms are left untouched.
pub fn expand_tilde(spec: &str, home: &Path) -> PathBuf {
    if spec == "~" {
        home.to_path_buf()
    } else if let Some(rest) = spec.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(spec)
    }
}

/// Resolve symlinks, falling back to the input when resolution fails.
pub fn canonicalize_or_original(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Lexically normalize a path: drop `.` components and fold `..`.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                if !cleaned.pop() && !path.is_absolute() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Collect explicitly set auto-allow directories (`TMPDIR`, XDG homes).
///
/// Unset, relative and control-character values contribute nothing.
pub fn collect_env_paths(env: &HostEnv) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();

    for name in AUTO_ALLOW_ENV_VARS {
        let Some(value) = env.var(name) else {
            continue;
        };
        let Some(resolved) = sanitize_absolute(value) else {
            continue;
        };
        if !paths.contains(&resolved) {
            paths.push(resolved);
        }
    }

    paths
}

/// Collect the directories listed in `PATH`, resolved and deduplicated.
pub fn collect_path_dirs(env: &HostEnv) -> Vec<PathBuf> {
    let Some(path_var) = env.var("PATH") else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = Vec::new();
    for entry in std::env::split_paths(path_var) {
        if let Some(resolved) = sanitize_absolute(entry.as_os_str())
            && !dirs.contains(&resolved)
        {
            dirs.push(resolved);
        }
    }
    dirs
}

/// Accept an absolute, control-character-free path and resolve it.
fn sanitize_absolute(value: &OsStr) -> Option<PathBuf> {
    let text = value.to_str()?;
    if text.is_empty() || contains_control_chars(text) {
        return None;
    }
    let path = Path::new(text);
    if !path.is_absolute() {
        return None;
    }
    Some(canonicalize_or_original(&clean_path(path)))
}

/// True for C0 control characters other than tab.
pub fn contains_control_chars(s: &str) -> bool {
    s.chars().any(|c| c < '\u{20}' && c != '\t')
}
