//! Startup garbage collection for crashed sessions.
//!
//! Profile artifacts are removed by a drop guard when a session ends. If veil
//! is killed with `SIGKILL` or the host loses power, the guard never runs and
//! a `veil-seatbelt-*.sb` file stays in the temp directory.
//!
//! Run this at startup, before launching anything. Only files older than a
//! day are removed, so a concurrent session's live profile is left alone.
//!
//! # Example
//!
//! ```no_run
//! use veil::sandbox::cleanup::cleanup_stale_profiles;
//!
//! cleanup_stale_profiles();
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::runner::is_profile_artifact;

/// Artifacts older than this are considered abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(86400);

/// Remove stale profile artifacts from the system temp directory.
///
/// Returns the number of files removed.
pub fn cleanup_stale_profiles() -> usize {
    debug!("Checking for stale profiles from crashed sessions");
    cleanup_stale_profiles_in(&std::env::temp_dir(), SystemTime::now())
}

/// Remove profile artifacts in `dir` last modified more than a day before `now`.
pub fn cleanup_stale_profiles_in(dir: &Path, now: SystemTime) -> usize {
    let mut removed = 0;
    for path in list_stale_profiles(dir, now) {
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed stale profile: {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to remove stale profile {}: {}", path.display(), e),
        }
    }
    removed
}

/// List profile artifacts in `dir` that are old enough to remove.
pub fn list_stale_profiles(dir: &Path, now: SystemTime) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!("Cannot read temp directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut stale = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_profile_artifact(&path) {
            continue;
        }

        if let Ok(metadata) = entry.metadata()
            && metadata.is_file()
            && let Ok(modified) = metadata.modified()
            && let Ok(age) = now.duration_since(modified)
            && age > STALE_AFTER
        {
            stale.push(path);
        } else {
            debug!("Profile {} is recent, skipping", path.display());
        }
    }
    stale.sort();
    stale
}
