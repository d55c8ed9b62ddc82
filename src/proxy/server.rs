//! Allowlist proxy server.
//!
//! The proxy binds an ephemeral port on the loopback interface and serves
//! HTTP/1.1 with upgrade support so CONNECT tunnels work. It is the sandboxed
//! child's only route to the network: the seatbelt profile permits outbound
//! TCP to this port and nothing else.
//!
//! Each accepted connection is handled in its own Tokio task. Shutdown stops
//! the accept loop and drops the listener; tunnels that are already relaying
//! keep running until one side closes.
//!
//! # Example
//!
//! ```ignore
//! use veil::proxy::{AllowlistProxy, PolicyEngine};
//! use std::sync::Arc;
//!
//! let policy = Arc::new(PolicyEngine::new(&config.policy.allowlist)?);
//! let proxy = AllowlistProxy::bind(policy, audit).await?;
//! let port = proxy.port();
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! tokio::spawn(proxy.run(shutdown_rx));
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::connect::{ForwardClient, ProxyResponse, forward_client, handle_connect, handle_http};
use super::error::{ProxyError, ProxyResult};
use super::policy::PolicyEngine;
use crate::telemetry::AuditLogger;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Loopback forward proxy that enforces a host allowlist at dial time.
pub struct AllowlistProxy {
    listener: TcpListener,
    addr: SocketAddr,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLogger>,
    client: ForwardClient,
}

impl AllowlistProxy {
    /// Bind an ephemeral port on `127.0.0.1`.
    pub async fn bind(policy: Arc<PolicyEngine>, audit: Arc<AuditLogger>) -> ProxyResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(ProxyError::Bind)?;
        let addr = listener.local_addr().map_err(ProxyError::Bind)?;

        info!("Proxy listening on {}", addr);

        Ok(Self {
            listener,
            addr,
            policy,
            audit,
            client: forward_client(),
        })
    }

    /// The bound loopback address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The bound ephemeral port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Value for the `HTTP_PROXY` family of variables.
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Run the accept loop until shutdown is signalled.
    ///
    /// Returns an error only when the listener fails in a way that cannot be
    /// retried. The listener is closed when this returns.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> ProxyResult<()> {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Accepted proxy connection from {}", peer);
                            self.spawn_connection_handler(stream);
                        }
                        Err(e) if is_transient(&e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                        Err(e) => {
                            return Err(ProxyError::Accept(e));
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Proxy shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawn a task to handle a single connection.
    fn spawn_connection_handler(&self, stream: TcpStream) {
        let policy = self.policy.clone();
        let audit = self.audit.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, policy, audit, client).await {
                // Resets are routine for proxied clients
                let err_str = e.to_string();
                if err_str.contains("connection reset")
                    || err_str.contains("broken pipe")
                    || err_str.contains("Connection reset")
                {
                    debug!("Connection ended: {}", e);
                } else {
                    warn!("Connection error: {}", e);
                }
            }
        });
    }
}

/// Accept errors that concern a single connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || matches!(e.raw_os_error(), Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM))
}

/// Handle a single client connection.
async fn handle_connection(
    stream: TcpStream,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLogger>,
    client: ForwardClient,
) -> ProxyResult<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let policy = policy.clone();
        let audit = audit.clone();
        let client = client.clone();

        async move { proxy_request(req, policy, audit, client).await }
    });

    // Upgrades are needed for CONNECT
    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service)
        .with_upgrades()
        .await
        .map_err(ProxyError::from)
}

/// Process a single proxy request.
async fn proxy_request(
    req: Request<Incoming>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLogger>,
    client: ForwardClient,
) -> ProxyResult<ProxyResponse> {
    if req.method() == Method::CONNECT {
        handle_connect(req, policy, audit).await
    } else {
        handle_http(req, policy, audit, client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_proxy() -> AllowlistProxy {
        let policy = Arc::new(PolicyEngine::new(&["allowed.test".to_string()]).unwrap());
        let audit = Arc::new(AuditLogger::new_null());
        AllowlistProxy::bind(policy, audit).await.unwrap()
    }

    #[tokio::test]
    async fn test_binds_loopback_ephemeral_port() {
        let proxy = test_proxy().await;

        assert!(proxy.addr().ip().is_loopback());
        assert_ne!(proxy.port(), 0);
        assert_eq!(proxy.proxy_url(), format!("http://127.0.0.1:{}", proxy.port()));
    }

    #[tokio::test]
    async fn test_run_returns_on_shutdown() {
        let proxy = test_proxy().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(proxy.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_returns_when_sender_dropped() {
        let proxy = test_proxy().await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), proxy.run(shutdown_rx))
            .await
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::EBADF)));
    }
}
