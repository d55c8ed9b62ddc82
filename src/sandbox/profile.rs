//! Seatbelt profile synthesis.
//!
//! A [`SandboxProfile`] is the resolved, deduplicated set of paths a single
//! invocation may touch, plus the proxy port it may connect to. It is built
//! fresh for every invocation from a [`HostEnv`] snapshot and the configured
//! path specs, then rendered to SBPL.
//!
//! # Rule layout
//!
//! ```text
//! (deny default)                      everything not listed below
//! process / sysctl / mach basics
//! file-read-metadata                  stat anywhere, so path traversal works
//! file-read*   system baseline, read paths, PATH dirs, write paths
//! file-write*  /dev/null, write paths, cwd, TMPDIR / XDG homes
//! deny file-write*  dangerous patterns      (last match wins)
//! network-outbound  localhost:<proxy port> only
//! pty rules                           interactive sessions only
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::ProfileError;
use super::paths::{
    HostEnv, ResolvedPath, canonicalize_or_original, collect_env_paths, collect_path_dirs,
    resolve_path_spec,
};
use super::patterns::{self, DANGEROUS_PATTERNS};
use super::seatbelt::{Filter, Rule, SbplProfile};

/// System locations every process needs to read (dyld, frameworks, locale).
pub const SYSTEM_READ_PATHS: &[&str] = &[
    "/usr",
    "/bin",
    "/sbin",
    "/System",
    "/Library",
    "/private/etc",
    "/private/var/db",
    "/dev",
    "/opt/homebrew",
];

/// Device nodes that are always writable.
pub const SYSTEM_WRITE_LITERALS: &[&str] = &["/dev/null", "/dev/zero", "/dev/dtracehelper"];

/// Resolved path allowances for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxProfile {
    /// Home directory of the invoking user.
    pub home: PathBuf,
    /// Loopback port of the allowlist proxy.
    pub proxy_port: u16,
    /// Directories readable recursively.
    pub read_dirs: BTreeSet<PathBuf>,
    /// Individual readable files.
    pub read_files: BTreeSet<PathBuf>,
    /// Directories writable recursively.
    pub write_dirs: BTreeSet<PathBuf>,
    /// Individual writable files.
    pub write_files: BTreeSet<PathBuf>,
    /// Whether terminal device access is granted.
    pub interactive: bool,
}

impl SandboxProfile {
    /// Resolve the configured path specs against the snapshot.
    pub fn synthesize(
        env: &HostEnv,
        proxy_port: u16,
        read_specs: &[String],
        write_specs: &[String],
        interactive: bool,
    ) -> Self {
        let mut profile = Self {
            home: env.home().to_path_buf(),
            proxy_port,
            read_dirs: BTreeSet::new(),
            read_files: BTreeSet::new(),
            write_dirs: BTreeSet::new(),
            write_files: BTreeSet::new(),
            interactive,
        };

        for spec in read_specs {
            match resolve_path_spec(spec, env) {
                ResolvedPath::Directory(dir) => profile.read_dirs.insert(dir),
                ResolvedPath::File(file) => profile.read_files.insert(file),
            };
        }

        for spec in write_specs {
            let resolved = resolve_path_spec(spec, env);
            if let Some(hit) = patterns::matching(resolved.path()) {
                warn!(
                    "Write path {} matches protected pattern '{}'; writes there stay denied",
                    resolved.path().display(),
                    hit.name
                );
            }
            match resolved {
                ResolvedPath::Directory(dir) => profile.write_dirs.insert(dir),
                ResolvedPath::File(file) => profile.write_files.insert(file),
            };
        }

        profile.read_dirs.extend(collect_path_dirs(env));
        profile
            .write_dirs
            .insert(canonicalize_or_original(env.cwd()));
        profile.write_dirs.extend(collect_env_paths(env));

        debug!(
            "Synthesized profile: {} read dirs, {} read files, {} write dirs, {} write files",
            profile.read_dirs.len(),
            profile.read_files.len(),
            profile.write_dirs.len(),
            profile.write_files.len()
        );

        profile
    }

    /// Number of readable directory and file entries, write entries included.
    pub fn read_count(&self) -> usize {
        self.read_dirs.len() + self.read_files.len() + self.write_count()
    }

    /// Number of writable directory and file entries.
    pub fn write_count(&self) -> usize {
        self.write_dirs.len() + self.write_files.len()
    }

    /// Build the ordered rule list.
    pub fn to_sbpl(&self) -> SbplProfile {
        let mut sbpl = SbplProfile::new();

        sbpl.push(Rule::deny(&["default"]));

        sbpl.comment("Process basics");
        sbpl.push(Rule::allow(&["process-exec", "process-fork"]));
        sbpl.push(Rule::allow(&["process-info*"]));
        sbpl.push(Rule::allow(&["signal"]));
        sbpl.push(Rule::allow(&["sysctl-read"]));
        sbpl.push(Rule::allow(&["mach-lookup"]));
        sbpl.push(Rule::allow(&["ipc-posix-shm"]));

        sbpl.comment("Filesystem reads");
        sbpl.push(Rule::allow(&["file-read-metadata"]));
        sbpl.push(Rule::allow(&["file-read*"]).filters(
            SYSTEM_READ_PATHS
                .iter()
                .map(|p| Filter::subpath(*p))
                .chain([Filter::literal("/"), Filter::literal(&self.home)]),
        ));
        sbpl.push_scoped(
            Rule::allow(&["file-read*"]).filters(
                self.readable_dirs()
                    .into_iter()
                    .map(Filter::subpath)
                    .chain(self.readable_files().into_iter().map(Filter::literal)),
            ),
        );

        sbpl.comment("Filesystem writes");
        sbpl.push(
            Rule::allow(&["file-write*"])
                .filters(SYSTEM_WRITE_LITERALS.iter().map(|p| Filter::literal(*p))),
        );
        sbpl.push_scoped(
            Rule::allow(&["file-write*"]).filters(
                self.write_dirs
                    .iter()
                    .map(Filter::subpath)
                    .chain(self.write_files.iter().map(Filter::literal)),
            ),
        );

        sbpl.comment("Protected credential and hook paths");
        sbpl.push(
            Rule::deny(&["file-write*"])
                .filters(DANGEROUS_PATTERNS.iter().map(|p| Filter::regex(p.regex))),
        );

        sbpl.comment("Network: allowlist proxy only");
        sbpl.push(
            Rule::allow(&["network-outbound"])
                .filter(Filter::RemoteTcp(format!("localhost:{}", self.proxy_port))),
        );

        if self.interactive {
            sbpl.comment("Terminal");
            sbpl.push(Rule::allow(&["pseudo-tty"]));
            sbpl.push(
                Rule::allow(&["file-read*", "file-write*", "file-ioctl"]).filters([
                    Filter::literal("/dev/ptmx"),
                    Filter::literal("/dev/tty"),
                    Filter::regex(r"^/dev/ttys[0-9]+$"),
                ]),
            );
        }

        sbpl
    }

    /// Render the profile to SBPL text.
    pub fn render(&self) -> Result<String, ProfileError> {
        Ok(self.to_sbpl().render()?)
    }

    fn readable_dirs(&self) -> BTreeSet<&Path> {
        self.read_dirs
            .iter()
            .chain(&self.write_dirs)
            .map(PathBuf::as_path)
            .collect()
    }

    fn readable_files(&self) -> BTreeSet<&Path> {
        self.read_files
            .iter()
            .chain(&self.write_files)
            .map(PathBuf::as_path)
            .collect()
    }
}

/// Capture the live environment and produce profile text.
pub fn generate_profile(
    proxy_port: u16,
    read_specs: &[String],
    write_specs: &[String],
    interactive: bool,
) -> Result<String, ProfileError> {
    let env = HostEnv::capture()?;
    SandboxProfile::synthesize(&env, proxy_port, read_specs, write_specs, interactive).render()
}
