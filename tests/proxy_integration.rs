use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use veil::proxy::{AllowlistProxy, PolicyEngine, ProxyError};
use veil::telemetry::AuditLogger;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream that echoes every byte back.
async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Upstream that answers one HTTP request with a fixed body.
async fn http_server(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_until(&mut stream, b"\r\n\r\n").await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

async fn start_proxy(
    allowlist: &[&str],
) -> (SocketAddr, watch::Sender<bool>, JoinHandle<Result<(), ProxyError>>) {
    let patterns: Vec<String> = allowlist.iter().map(|p| p.to_string()).collect();
    let policy = Arc::new(PolicyEngine::new(&patterns).unwrap());
    let proxy = AllowlistProxy::bind(policy, Arc::new(AuditLogger::new_null()))
        .await
        .unwrap();
    let addr = proxy.addr();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(proxy.run(shutdown_rx));
    (addr, shutdown_tx, handle)
}

async fn read_until(stream: &mut TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(needle.len()).any(|w| w == needle) {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

/// Issue a CONNECT and return the stream plus the response head.
async fn connect_via(proxy: SocketAddr, target: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let head = read_until(&mut stream, b"\r\n\r\n").await;
    (stream, String::from_utf8_lossy(&head).into_owned())
}

#[tokio::test]
async fn test_allowed_connect_relays_bytes() {
    let upstream = echo_server().await;
    let (proxy, _shutdown, _handle) = start_proxy(&["127.0.0.1"]).await;

    let (mut stream, head) = connect_via(proxy, &upstream.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");

    stream.write_all(b"ping through the tunnel").await.unwrap();
    let echoed = tokio::time::timeout(TIMEOUT, read_until(&mut stream, b"tunnel"))
        .await
        .unwrap();
    assert_eq!(echoed, b"ping through the tunnel");
}

#[tokio::test]
async fn test_denied_connect_is_refused() {
    let (proxy, _shutdown, _handle) = start_proxy(&["*.github.com"]).await;

    let (_stream, head) = connect_via(proxy, "blocked.invalid:443").await;
    assert!(head.starts_with("HTTP/1.1 403"), "unexpected response: {head}");
}

#[tokio::test]
async fn test_allowed_but_unreachable_is_bad_gateway() {
    // Bind then drop to get a port with nothing listening.
    let closed = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let (proxy, _shutdown, _handle) = start_proxy(&["127.0.0.1"]).await;

    let (_stream, head) = connect_via(proxy, &closed.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 502"), "unexpected response: {head}");
}

#[tokio::test]
async fn test_malformed_connect_is_bad_request() {
    let (proxy, _shutdown, _handle) = start_proxy(&["*"]).await;

    let (_stream, head) = connect_via(proxy, ":443").await;
    assert!(head.starts_with("HTTP/1.1 400"), "unexpected response: {head}");
}

#[tokio::test]
async fn test_connect_with_credentials_is_bad_request() {
    let upstream = echo_server().await;
    let (proxy, _shutdown, _handle) = start_proxy(&["*"]).await;

    let (_stream, head) = connect_via(proxy, &format!("x:1@{upstream}")).await;
    assert!(head.starts_with("HTTP/1.1 400"), "unexpected response: {head}");
}

#[tokio::test]
async fn test_plain_http_is_forwarded_when_allowed() {
    let upstream = http_server("hello from upstream").await;
    let (proxy, _shutdown, _handle) = start_proxy(&["127.0.0.1"]).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!(
        "GET http://{upstream}/greeting HTTP/1.1\r\nHost: {upstream}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let response = tokio::time::timeout(TIMEOUT, read_until(&mut stream, b"hello from upstream"))
        .await
        .unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
    assert!(response.ends_with("hello from upstream"));
}

#[tokio::test]
async fn test_plain_http_is_blocked_when_denied() {
    let (proxy, _shutdown, _handle) = start_proxy(&["pypi.org"]).await;

    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream
        .write_all(b"GET http://notpypi.org/simple HTTP/1.1\r\nHost: notpypi.org\r\n\r\n")
        .await
        .unwrap();

    let head = read_until(&mut stream, b"\r\n\r\n").await;
    assert!(String::from_utf8_lossy(&head).starts_with("HTTP/1.1 403"));
}

#[tokio::test]
async fn test_concurrent_connects_are_independent() {
    const N: usize = 8;
    let mut upstreams = Vec::new();
    for _ in 0..N {
        upstreams.push(echo_server().await);
    }
    let (proxy, _shutdown, _handle) = start_proxy(&["127.0.0.1"]).await;

    let mut tasks = Vec::new();
    for (i, upstream) in upstreams.into_iter().enumerate() {
        tasks.push(tokio::spawn(async move {
            let (mut stream, head) = connect_via(proxy, &upstream.to_string()).await;
            assert!(head.starts_with("HTTP/1.1 200"));
            let message = format!("message-{i}-end");
            stream.write_all(message.as_bytes()).await.unwrap();
            let echoed = read_until(&mut stream, b"-end").await;
            assert_eq!(echoed, message.as_bytes());
        }));
    }
    let denied = tokio::spawn(async move {
        let (_stream, head) = connect_via(proxy, "evil.example:443").await;
        assert!(head.starts_with("HTTP/1.1 403"));
    });

    for task in tasks {
        tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    }
    tokio::time::timeout(TIMEOUT, denied).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_listener_but_not_tunnels() {
    let upstream = echo_server().await;
    let (proxy, shutdown, handle) = start_proxy(&["127.0.0.1"]).await;

    let (mut tunnel, head) = connect_via(proxy, &upstream.to_string()).await;
    assert!(head.starts_with("HTTP/1.1 200"));

    shutdown.send(true).unwrap();
    let result = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());

    assert!(TcpStream::connect(proxy).await.is_err());

    tunnel.write_all(b"still alive-end").await.unwrap();
    let echoed = tokio::time::timeout(TIMEOUT, read_until(&mut tunnel, b"-end"))
        .await
        .unwrap();
    assert_eq!(echoed, b"still alive-end");
}
