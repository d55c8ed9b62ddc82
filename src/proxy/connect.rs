//! CONNECT tunneling and plain HTTP forwarding.
//!
//! The flow for `CONNECT api.example.com:443 HTTP/1.1` is:
//!
//! 1. Evaluate the target host against the allowlist
//! 2. If denied: log at warn, emit an audit event, return `403 Forbidden`
//!    without touching the network
//! 3. If allowed: dial the upstream with bounded connect and keepalive
//!    timeouts; return `502 Bad Gateway` when the dial fails
//! 4. Return `200 Connection Established` and relay bytes in both directions
//!    until either side closes
//!
//! The proxy never looks inside the tunnel. Plain `http://` requests in
//! absolute form are checked against the URI host and forwarded.

use super::error::{ProxyError, ProxyResult};
use super::policy::PolicyEngine;
use crate::telemetry::{AllowReason, AuditEvent, AuditLogger, BlockReason};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::http::uri::Authority;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::io;
use nix::sys::socket::{setsockopt, sockopt};
use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, warn};

/// Upper bound for establishing an upstream TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP keepalive interval for upstream connections.
pub const KEEPALIVE: Duration = Duration::from_secs(30);

/// Response type shared by every handler.
pub type ProxyResponse = Response<BoxBody<Bytes, hyper::Error>>;

/// Client used to forward plain HTTP requests.
pub type ForwardClient = Client<HttpConnector, Incoming>;

/// Build the plain HTTP forwarding client with the upstream dial bounds.
pub fn forward_client() -> ForwardClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
    connector.set_keepalive(Some(KEEPALIVE));
    Client::builder(TokioExecutor::new()).build(connector)
}

/// Handle an HTTP CONNECT request.
pub async fn handle_connect(
    req: Request<Incoming>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLogger>,
) -> ProxyResult<ProxyResponse> {
    let target = match req.uri().authority() {
        Some(authority) => connect_target(authority),
        None => Err(ProxyError::InvalidConnect(
            "CONNECT request is missing a target authority".into(),
        )),
    };

    let (host, port) = match target {
        Ok(target) => target,
        Err(e) => {
            debug!("Rejecting malformed CONNECT target {}: {}", req.uri(), e);
            return Ok(status_response(StatusCode::BAD_REQUEST, &e.to_string()));
        }
    };

    if !check_policy(&policy, &audit, &host) {
        return Ok(status_response(
            StatusCode::FORBIDDEN,
            &format!("Connection to {} blocked by policy", host),
        ));
    }

    let upstream = match dial_upstream(&host, port).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("{}", e);
            return Ok(status_response(StatusCode::BAD_GATEWAY, &e.to_string()));
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = relay(upgraded, upstream).await {
                    // Resets are routine for tunnels
                    debug!("Tunnel to {}:{} ended: {}", host, port, e);
                }
            }
            Err(e) => {
                warn!("HTTP upgrade failed for {}:{}: {}", host, port, e);
            }
        }
    });

    Ok(Response::new(empty_body()))
}

/// Handle a plain HTTP proxy request (absolute-form URI).
pub async fn handle_http(
    mut req: Request<Incoming>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLogger>,
    client: ForwardClient,
) -> ProxyResult<ProxyResponse> {
    let Some(host) = req.uri().host().map(str::to_string) else {
        return Ok(status_response(
            StatusCode::BAD_REQUEST,
            "Proxy request must use an absolute URI",
        ));
    };

    if !check_policy(&policy, &audit, &host) {
        return Ok(status_response(
            StatusCode::FORBIDDEN,
            &format!("HTTP request to {} blocked by policy", host),
        ));
    }

    req.headers_mut().remove("proxy-connection");

    match client.request(req).await {
        Ok(response) => Ok(response.map(|body| body.boxed())),
        Err(e) => {
            warn!("Failed to forward request to {}: {}", host, e);
            Ok(status_response(
                StatusCode::BAD_GATEWAY,
                &format!("Failed to reach {}", host),
            ))
        }
    }
}

/// Evaluate the host, logging and auditing the decision.
fn check_policy(policy: &PolicyEngine, audit: &AuditLogger, host: &str) -> bool {
    if policy.evaluate(host) {
        debug!("Allowed by policy: {}", host);
        audit.log(AuditEvent::NetworkAllow {
            domain: host.to_string(),
            reason: AllowReason::Allowlist,
        });
        true
    } else {
        warn!("Blocked by policy: {}", host);
        audit.log(AuditEvent::NetworkBlock {
            domain: host.to_string(),
            reason: BlockReason::NotAllowlisted,
        });
        false
    }
}

/// Open a TCP connection to the upstream within `CONNECT_TIMEOUT`.
pub(crate) async fn dial_upstream(host: &str, port: u16) -> ProxyResult<TcpStream> {
    let addr = format_authority(host, port);

    match tokio::time::timeout(CONNECT_TIMEOUT, connect_any(host, port)).await {
        Ok(Ok(stream)) => {
            debug!("Connected to upstream {}", addr);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            addr,
            message: e.to_string(),
        }),
        Err(_) => Err(ProxyError::Timeout(addr)),
    }
}

/// Try each resolved address in turn.
async fn connect_any(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in tokio::net::lookup_host((host, port)).await? {
        match connect_keepalive(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

async fn connect_keepalive(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    set_keepalive(&socket)?;
    socket.connect(addr).await
}

/// Enable keepalive probes after `KEEPALIVE` of idleness.
fn set_keepalive<F: AsFd>(socket: &F) -> io::Result<()> {
    let idle = KEEPALIVE.as_secs() as u32;
    setsockopt(socket, sockopt::KeepAlive, &true)?;
    #[cfg(target_vendor = "apple")]
    setsockopt(socket, sockopt::TcpKeepAlive, &idle)?;
    #[cfg(not(target_vendor = "apple"))]
    setsockopt(socket, sockopt::TcpKeepIdle, &idle)?;
    Ok(())
}

/// Relay bytes between the upgraded client and the upstream until either
/// side closes.
async fn relay(upgraded: hyper::upgrade::Upgraded, mut upstream: TcpStream) -> ProxyResult<()> {
    let mut client = TokioIo::new(upgraded);
    let (to_upstream, to_client) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    debug!(
        "Tunnel closed ({} bytes up, {} bytes down)",
        to_upstream, to_client
    );
    Ok(())
}

/// Extract the host and port from a CONNECT authority.
///
/// Examples:
/// - `api.example.com:443` -> ("api.example.com", 443)
/// - `api.example.com` -> ("api.example.com", 443) (default port)
/// - `[::1]:8443` -> ("::1", 8443)
///
/// Userinfo is rejected so the policy always sees the host that is dialed.
fn connect_target(authority: &Authority) -> ProxyResult<(String, u16)> {
    let raw = authority.as_str();
    if raw.contains('@') {
        return Err(ProxyError::InvalidConnect(format!(
            "Credentials are not allowed in the target: {}",
            raw
        )));
    }

    let bracketed = authority.host();
    let host = bracketed
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(bracketed);
    if host.is_empty() {
        return Err(ProxyError::InvalidConnect("Empty host".into()));
    }

    let port = match authority.port_u16() {
        Some(port) => port,
        None if raw.len() == bracketed.len() => 443,
        None => {
            return Err(ProxyError::InvalidConnect(format!(
                "Invalid port: {}",
                &raw[bracketed.len()..]
            )));
        }
    };

    Ok((host.to_string(), port))
}

fn format_authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Create an empty response body.
fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

/// Create a response body with content.
fn full_body(content: String) -> BoxBody<Bytes, hyper::Error> {
    Full::new(Bytes::from(content))
        .map_err(|never| match never {})
        .boxed()
}

/// Create a plain-text response with the given status.
pub(crate) fn status_response(status: StatusCode, message: &str) -> ProxyResponse {
    let mut response = Response::new(full_body(format!("{}\n", message)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
