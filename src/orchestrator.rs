//! Session orchestration and lifecycle management.
//!
//! This module wires the components together for one invocation:
//! configuration → [`PolicyEngine`] → [`AllowlistProxy`] (bound before the
//! profile is generated, since the profile embeds its port) →
//! [`SandboxRunner`].
//!
//! `SIGINT` and `SIGTERM` flip a shutdown signal that closes the proxy
//! listener and kills the sandboxed command. The proxy failing mid-session
//! flips it too, so the command never outlives its only egress path.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cli::Cli;
use crate::config::Config;
use crate::proxy::{AllowlistProxy, PolicyEngine, ProxyError};
use crate::sandbox::{SandboxRunner, cleanup_stale_profiles, exit_code};
use crate::telemetry::{AuditEvent, AuditLogger};

/// Run one sandboxed session and return the process exit code.
pub fn run(cli: &Cli, config: &Config) -> Result<i32> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    rt.block_on(run_session(cli, config))
}

async fn run_session(cli: &Cli, config: &Config) -> Result<i32> {
    let removed = cleanup_stale_profiles();
    if removed > 0 {
        info!("Removed {} stale profile(s) from earlier sessions", removed);
    }

    let audit = Arc::new(open_audit_logger());

    let policy = PolicyEngine::new(&config.policy.allowlist)
        .context("Failed to compile network allowlist")?;
    debug!("Compiled {} allowlist patterns", policy.len());

    let proxy = AllowlistProxy::bind(Arc::new(policy), audit.clone())
        .await
        .context("Failed to start allowlist proxy")?;
    info!("Allowlist proxy listening on {}", proxy.addr());

    let runner = SandboxRunner::new(proxy.addr())
        .read_paths(config.sandbox.allowed_read_paths.clone())
        .write_paths(config.sandbox.allowed_write_paths.clone())
        .transport(config.sandbox.profile_transport)
        .audit(audit.clone());

    if cli.dry_run {
        let profile = runner.profile().context("Failed to generate profile")?;
        println!("{}", profile);
        return Ok(0);
    }

    if cli.command.is_empty() {
        anyhow::bail!("No command given. Usage: veil [OPTIONS] <COMMAND> [ARGS]...");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let proxy_task = spawn_proxy(proxy, shutdown_tx.clone(), shutdown_rx.clone());
    let signal_task = tokio::spawn(forward_signals(shutdown_tx.clone()));

    let command_line = cli.command.join(" ");
    let started = Instant::now();
    audit.log(AuditEvent::SessionStart {
        user: whoami(),
        command: command_line.clone(),
        pid: std::process::id(),
    });

    let result = runner.run(&cli.command, shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    signal_task.abort();
    match proxy_task.await {
        Ok(Ok(())) => debug!("Proxy stopped"),
        Ok(Err(e)) => warn!("Proxy stopped with error: {}", e),
        Err(e) => warn!("Proxy task failed: {}", e),
    }

    let code = match &result {
        Ok(status) => exit_code(*status),
        Err(_) => 1,
    };
    audit.log(AuditEvent::SessionEnd {
        user: whoami(),
        command: command_line,
        exit_code: code,
        duration_sec: started.elapsed().as_secs(),
    });

    result.context("Sandbox execution failed")?;
    info!("Session finished with exit code {}", code);
    Ok(code)
}

/// Connect to syslog, falling back to a logger that records nothing.
fn open_audit_logger() -> AuditLogger {
    match AuditLogger::new() {
        Ok(logger) => logger,
        Err(e) => {
            warn!("Audit events will not be recorded: {}", e);
            AuditLogger::new_null()
        }
    }
}

/// Run the proxy, flipping shutdown if it fails.
fn spawn_proxy(
    proxy: AllowlistProxy,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<Result<(), ProxyError>> {
    tokio::spawn(async move {
        let result = proxy.run(shutdown_rx).await;
        if let Err(e) = &result {
            error!("Allowlist proxy failed, stopping session: {}", e);
            let _ = shutdown_tx.send(true);
        }
        result
    })
}

/// Flip shutdown on the first `SIGINT` or `SIGTERM`.
async fn forward_signals(shutdown_tx: Arc<watch::Sender<bool>>) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }
    let _ = shutdown_tx.send(true);
}

/// Get the current username for audit logging.
fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
