//! One sandboxed invocation, from profile to teardown.
//!
//! [`SandboxRunner::run`] walks four phases:
//!
//! 1. **Prepare**: decide whether the session is interactive, synthesize the
//!    profile against the proxy port, and materialize it (temp file or inline)
//! 2. **Launch**: start `sandbox-exec` with the profile and the target command;
//!    the child's environment is the captured [`HostEnv`] plus proxy variables
//! 3. **Supervise**: inherit stdio, or drive a pseudo-terminal when stdin is a
//!    terminal; a cancelled shutdown signal kills the child
//! 4. **Teardown**: stop the pumps and resize forwarding, restore the terminal
//!    mode, remove the profile artifact
//!
//! Every resource acquired in Prepare and Supervise is held by a guard, so the
//! error paths release them too.
//!
//! # Example
//!
//! ```ignore
//! let runner = SandboxRunner::new(proxy.addr())
//!     .write_paths(config.sandbox.allowed_write_paths.clone())
//!     .audit(audit.clone());
//!
//! let status = runner.run(&["npm".into(), "install".into()], shutdown_rx).await?;
//! std::process::exit(exit_code(status));
//! ```

use std::ffi::OsString;
use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::process::{Child, Command};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::SandboxError;
use super::paths::HostEnv;
use super::profile::SandboxProfile;
use super::pty::{Pty, Pumps, RawModeGuard, forward_resizes};
use super::seatbelt::SANDBOX_EXEC_PATH;
use crate::telemetry::{AuditEvent, AuditLogger};

/// Variables pointing the child at the allowlist proxy.
pub const PROXY_ENV_VARS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"];

/// File name prefix of materialized profiles.
pub const PROFILE_FILE_PREFIX: &str = "veil-seatbelt-";

/// File name suffix of materialized profiles.
pub const PROFILE_FILE_SUFFIX: &str = ".sb";

/// How the profile text reaches `sandbox-exec`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileTransport {
    /// Temporary file passed with `-f`.
    #[default]
    File,
    /// Profile text passed with `-p`.
    Inline,
}

/// Materialized profile. A file artifact is deleted when this is dropped.
#[derive(Debug)]
enum ProfileArtifact {
    File(TempPath),
    Inline(String),
}

impl ProfileArtifact {
    fn materialize(
        text: String,
        transport: ProfileTransport,
        dir: Option<&Path>,
    ) -> Result<Self, SandboxError> {
        match transport {
            ProfileTransport::Inline => Ok(Self::Inline(text)),
            ProfileTransport::File => {
                let mut builder = tempfile::Builder::new();
                builder.prefix(PROFILE_FILE_PREFIX).suffix(PROFILE_FILE_SUFFIX);
                let mut file = match dir {
                    Some(dir) => builder.tempfile_in(dir),
                    None => builder.tempfile(),
                }
                .map_err(SandboxError::Artifact)?;
                file.write_all(text.as_bytes())
                    .map_err(SandboxError::Artifact)?;
                file.as_file().sync_all().map_err(SandboxError::Artifact)?;

                // Closes the descriptor; the path lives until the guard drops.
                let path = file.into_temp_path();
                debug!("Profile written to {}", path.display());
                Ok(Self::File(path))
            }
        }
    }

    fn wrapper_args(&self) -> [OsString; 2] {
        match self {
            Self::File(path) => ["-f".into(), path.as_os_str().to_owned()],
            Self::Inline(text) => ["-p".into(), text.into()],
        }
    }

    fn release(self) {
        if let Self::File(path) = self {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                warn!("Failed to remove profile {}: {}", shown, e);
            } else {
                debug!("Removed profile {}", shown);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillScope {
    Child,
    ProcessGroup,
}

/// Runs commands under a seatbelt profile with egress forced through the
/// allowlist proxy.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    proxy_addr: SocketAddr,
    read_paths: Vec<String>,
    write_paths: Vec<String>,
    transport: ProfileTransport,
    profile_dir: Option<PathBuf>,
    wrapper: PathBuf,
    env: Option<HostEnv>,
    interactive: Option<bool>,
    audit: Arc<AuditLogger>,
}

impl SandboxRunner {
    /// Create a runner for a proxy listening on `proxy_addr`.
    pub fn new(proxy_addr: SocketAddr) -> Self {
        Self {
            proxy_addr,
            read_paths: Vec::new(),
            write_paths: Vec::new(),
            transport: ProfileTransport::default(),
            profile_dir: None,
            wrapper: PathBuf::from(SANDBOX_EXEC_PATH),
            env: None,
            interactive: None,
            audit: Arc::new(AuditLogger::new_null()),
        }
    }

    /// Extra readable path specs.
    pub fn read_paths(mut self, paths: Vec<String>) -> Self {
        self.read_paths = paths;
        self
    }

    /// Writable path specs.
    pub fn write_paths(mut self, paths: Vec<String>) -> Self {
        self.write_paths = paths;
        self
    }

    /// Profile transport.
    pub fn transport(mut self, transport: ProfileTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Directory for profile files. Defaults to the system temp directory,
    /// which is where stale artifacts are swept from.
    pub fn profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = Some(dir.into());
        self
    }

    /// Replace the sandbox wrapper. The wrapper receives `-f <path>` or
    /// `-p <text>` followed by the command.
    pub fn wrapper(mut self, wrapper: impl Into<PathBuf>) -> Self {
        self.wrapper = wrapper.into();
        self
    }

    /// Use a fixed environment snapshot instead of capturing one per run.
    pub fn host_env(mut self, env: HostEnv) -> Self {
        self.env = Some(env);
        self
    }

    /// Force interactive or piped supervision instead of probing stdin.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = Some(interactive);
        self
    }

    /// Audit sink for profile and launch events.
    pub fn audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// `http://<proxy addr>`, the value of every proxy variable.
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.proxy_addr)
    }

    /// Generate the profile a run would use, without launching anything.
    pub fn profile(&self) -> Result<String, SandboxError> {
        let env = self.snapshot()?;
        Ok(self.synthesize(&env, self.is_interactive()).render()?)
    }

    /// Run `command` in the sandbox and return its exit status.
    ///
    /// Flipping `shutdown` to true kills the child and returns once it has
    /// been reaped. A dropped sender never cancels.
    pub async fn run(
        &self,
        command: &[String],
        shutdown: watch::Receiver<bool>,
    ) -> Result<ExitStatus, SandboxError> {
        if command.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }

        // Prepare
        let interactive = self.is_interactive();
        let env = self.snapshot()?;
        let profile = self.synthesize(&env, interactive);
        let text = profile.render()?;
        self.audit.log(AuditEvent::ProfileGenerated {
            read_paths: profile.read_count(),
            write_paths: profile.write_count(),
            interactive,
        });
        let artifact =
            ProfileArtifact::materialize(text, self.transport, self.profile_dir.as_deref())?;

        // Launch
        let cmd = self.command(&env, &artifact, command);
        let command_line = command.join(" ");
        self.audit.log(AuditEvent::SandboxLaunch {
            command: command_line.clone(),
            proxy_port: self.proxy_addr.port(),
            interactive,
        });
        info!(
            "Launching sandboxed command: {} (interactive: {})",
            command_line, interactive
        );

        // Supervise
        let result = if interactive {
            self.supervise_interactive(cmd, shutdown).await
        } else {
            self.supervise_piped(cmd, shutdown).await
        };

        // Teardown
        artifact.release();
        if let Ok(status) = &result {
            debug!("Sandboxed command exited: {}", status);
        }
        result
    }

    fn is_interactive(&self) -> bool {
        self.interactive
            .unwrap_or_else(|| std::io::stdin().is_terminal())
    }

    fn snapshot(&self) -> Result<HostEnv, SandboxError> {
        match &self.env {
            Some(env) => Ok(env.clone()),
            None => Ok(HostEnv::capture()?),
        }
    }

    fn synthesize(&self, env: &HostEnv, interactive: bool) -> SandboxProfile {
        SandboxProfile::synthesize(
            env,
            self.proxy_addr.port(),
            &self.read_paths,
            &self.write_paths,
            interactive,
        )
    }

    fn command(&self, env: &HostEnv, artifact: &ProfileArtifact, command: &[String]) -> Command {
        let proxy_url = self.proxy_url();
        let mut cmd = Command::new(&self.wrapper);
        cmd.args(artifact.wrapper_args())
            .args(command)
            .env_clear()
            .envs(env.vars())
            .envs(PROXY_ENV_VARS.iter().map(|name| (*name, proxy_url.as_str())))
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, cmd: &mut Command) -> Result<Child, SandboxError> {
        cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: self.wrapper.clone(),
            source,
        })
    }

    async fn supervise_piped(
        &self,
        mut cmd: Command,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ExitStatus, SandboxError> {
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let mut child = self.spawn(&mut cmd)?;
        wait_or_kill(&mut child, shutdown, KillScope::Child).await
    }

    async fn supervise_interactive(
        &self,
        mut cmd: Command,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ExitStatus, SandboxError> {
        // Registered before spawn so an early resize is not lost.
        let winch = signal(SignalKind::window_change()).map_err(SandboxError::Signal)?;

        let mut pty = Pty::open()?;
        pty.attach(&mut cmd)?;
        let _raw_mode = RawModeGuard::enter()?;

        let mut child = self.spawn(&mut cmd)?;
        drop(cmd);
        pty.close_slave();

        let master = pty.master();
        let (stop_tx, stop_rx) = watch::channel(false);
        let resizer = forward_resizes(master.clone(), winch, stop_rx);

        let result = match Pumps::start(&master) {
            Ok(pumps) => {
                let status = wait_or_kill(&mut child, shutdown, KillScope::ProcessGroup).await;
                match pumps.stop().await {
                    Ok(()) => status,
                    Err(e) => status.and(Err(e)),
                }
            }
            Err(e) => {
                terminate(&mut child, KillScope::ProcessGroup);
                let _ = child.wait().await;
                Err(e)
            }
        };

        let _ = stop_tx.send(true);
        if let Err(e) = resizer.await {
            debug!("Resize forwarder ended abnormally: {}", e);
        }
        result
    }
}

/// Map an exit status to a process exit code: the child's own code, or
/// `128 + signal` when it was killed.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

async fn wait_or_kill(
    child: &mut Child,
    mut shutdown: watch::Receiver<bool>,
    scope: KillScope,
) -> Result<ExitStatus, SandboxError> {
    tokio::select! {
        status = child.wait() => return status.map_err(SandboxError::Wait),
        _ = cancelled(&mut shutdown) => {}
    }

    info!("Cancellation requested, terminating sandboxed process");
    terminate(child, scope);
    child.wait().await.map_err(SandboxError::Wait)
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn terminate(child: &mut Child, scope: KillScope) {
    if scope == KillScope::ProcessGroup
        && let Some(pid) = child.id()
        && let Ok(pid) = i32::try_from(pid)
        && let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL)
    {
        debug!("Failed to kill process group {}: {}", pid, e);
    }
    if let Err(e) = child.start_kill() {
        debug!("Failed to kill sandboxed process: {}", e);
    }
}

/// True if `name` looks like a profile artifact written by this module.
pub fn is_profile_artifact(name: &Path) -> bool {
    name.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with(PROFILE_FILE_PREFIX) && n.ends_with(PROFILE_FILE_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    fn env(root: &Path) -> HostEnv {
        HostEnv::new(
            [("PATH", "/usr/bin:/bin"), ("LANG", "C")],
            root.join("home"),
            root.to_path_buf(),
        )
    }

    #[test]
    fn test_transport_deserialize() {
        let file: ProfileTransport = serde_json::from_str("\"file\"").unwrap();
        let inline: ProfileTransport = serde_json::from_str("\"inline\"").unwrap();
        assert_eq!(file, ProfileTransport::File);
        assert_eq!(inline, ProfileTransport::Inline);
        assert_eq!(ProfileTransport::default(), ProfileTransport::File);
        assert!(serde_json::from_str::<ProfileTransport>("\"stdin\"").is_err());
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn test_file_artifact_lifecycle() {
        let artifact =
            ProfileArtifact::materialize("(version 1)\n".into(), ProfileTransport::File, None)
                .unwrap();
        let ProfileArtifact::File(path) = &artifact else {
            panic!("expected file artifact");
        };
        let path = path.to_path_buf();
        assert!(is_profile_artifact(&path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "(version 1)\n");

        let args = artifact.wrapper_args();
        assert_eq!(args[0], "-f");
        assert_eq!(args[1], path.as_os_str());

        artifact.release();
        assert!(!path.exists());
    }

    #[test]
    fn test_inline_artifact_args() {
        let artifact =
            ProfileArtifact::materialize("(version 1)".into(), ProfileTransport::Inline, None)
                .unwrap();
        let args = artifact.wrapper_args();
        assert_eq!(args[0], "-p");
        assert_eq!(args[1], "(version 1)");
    }

    #[test]
    fn test_command_environment() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(addr(8123))
            .wrapper("/bin/true")
            .host_env(env(dir.path()));
        let artifact = ProfileArtifact::Inline("(version 1)".into());
        let host = env(dir.path());
        let cmd = runner.command(&host, &artifact, &["echo".into(), "hi".into()]);
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "/bin/true");
        let args: Vec<&OsStr> = std_cmd.get_args().collect();
        assert_eq!(args, ["-p", "(version 1)", "echo", "hi"]);

        let envs: Vec<(&OsStr, Option<&OsStr>)> = std_cmd.get_envs().collect();
        for name in PROXY_ENV_VARS {
            assert!(envs.contains(&(OsStr::new(name), Some(OsStr::new("http://127.0.0.1:8123")))));
        }
        assert!(envs.contains(&(OsStr::new("LANG"), Some(OsStr::new("C")))));
    }

    #[test]
    fn test_profile_is_scoped_to_proxy_port() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(addr(4567))
            .host_env(env(dir.path()))
            .interactive(false);
        let text = runner.profile().unwrap();
        assert!(text.contains("(remote tcp \"localhost:4567\")"));
        assert!(!text.contains("/dev/ptmx"));
    }

    #[test]
    fn test_is_profile_artifact() {
        assert!(is_profile_artifact(Path::new("/tmp/veil-seatbelt-abc123.sb")));
        assert!(!is_profile_artifact(Path::new("/tmp/veil-seatbelt-abc123.txt")));
        assert!(!is_profile_artifact(Path::new("/tmp/other-abc123.sb")));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let runner = SandboxRunner::new(addr(1));
        let (_tx, rx) = watch::channel(false);
        let err = runner.run(&[], rx).await.unwrap_err();
        assert!(matches!(err, SandboxError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_missing_wrapper_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(addr(1))
            .wrapper(dir.path().join("no-such-wrapper"))
            .host_env(env(dir.path()))
            .profile_dir(profiles.path())
            .transport(ProfileTransport::File)
            .interactive(false);
        let (_tx, rx) = watch::channel(false);
        let err = runner.run(&["true".into()], rx).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));

        let left: Vec<_> = std::fs::read_dir(profiles.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| is_profile_artifact(path))
            .collect();
        assert!(left.is_empty(), "profile left behind: {:?}", left);
    }

    #[test]
    fn test_file_artifact_honors_profile_dir() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ProfileArtifact::materialize(
            "(version 1)".into(),
            ProfileTransport::File,
            Some(dir.path()),
        )
        .unwrap();
        let ProfileArtifact::File(path) = &artifact else {
            panic!("expected file artifact");
        };
        assert_eq!(path.parent(), Some(dir.path()));
        artifact.release();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
