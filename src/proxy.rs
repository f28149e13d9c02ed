//! HTTP forward-proxy support: CONNECT tunnel establishment.
//!
//! When a proxy is configured, the client first dials the proxy and asks it
//! to open an opaque relay to the real target with an HTTP CONNECT request.
//! Only after the proxy answers `200` does any TLS or WebSocket traffic
//! flow; the tunnel machinery then steps out of the byte path entirely.

use crate::error::{Result, TransportError};
use crate::target::ConnectionTarget;
use base64::{engine::general_purpose, Engine as _};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the CONNECT response head. A compliant proxy answers in a
/// few hundred bytes; anything near this limit is hostile or broken.
const MAX_CONNECT_RESPONSE_BYTES: usize = 16 * 1024;

const MAX_CONNECT_RESPONSE_HEADERS: usize = 64;

/// Forward-proxy configuration, resolved once by the caller at client
/// construction. The transport itself never reads ambient process state.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Whether connections are tunneled through the proxy at all.
    pub enabled: bool,
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port. Conventionally 80 for plain HTTP proxies.
    pub port: u16,
    /// Username for `Proxy-Authorization: Basic`. Credentials are attached
    /// only when both username and password are present.
    pub username: Option<String>,
    /// Password for `Proxy-Authorization: Basic`.
    pub password: Option<String>,
    /// Extra headers appended verbatim to the CONNECT request.
    pub headers: Vec<(String, String)>,
    /// When set, the CONNECT `Host` header omits the port for the default
    /// HTTP(S) ports 80 and 443.
    pub ignore_default_ports_in_host_header: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 80,
            username: None,
            password: None,
            headers: Vec::new(),
            ignore_default_ports_in_host_header: false,
        }
    }
}

impl ProxyConfig {
    /// An enabled proxy at `host:port` with no credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            enabled: true,
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// A disabled configuration; connections dial the target directly.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Attach Basic-Auth credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Append an extra outbound header to the CONNECT request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Omit default ports (80/443) from the CONNECT `Host` header.
    pub fn with_default_ports_omitted(mut self) -> Self {
        self.ignore_default_ports_in_host_header = true;
        self
    }

    /// `Basic <base64(user:pass)>`, when credentials are configured (RFC 7617).
    fn basic_authorization(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                let credentials = format!("{}:{}", user, pass);
                let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
                Some(format!("Basic {}", encoded))
            },
            _ => None,
        }
    }
}

/// The first (and only) HTTP response received during a CONNECT exchange.
/// Lives only for the duration of one tunnel attempt: on success it is
/// discarded, on failure its contents travel inside the error.
#[derive(Debug)]
pub(crate) struct TunnelExchange {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

/// Format the CONNECT request for `target` through `config`.
fn connect_request(config: &ProxyConfig, target: &ConnectionTarget) -> String {
    let authority = target.authority();
    let host_header = if config.ignore_default_ports_in_host_header
        && (target.port() == 80 || target.port() == 443)
    {
        target.http_host()
    } else {
        authority.clone()
    };

    let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, host_header);
    if let Some(authorization) = config.basic_authorization() {
        request.push_str("Proxy-Authorization: ");
        request.push_str(&authorization);
        request.push_str("\r\n");
    }
    for (name, value) in &config.headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}

/// Read exactly one HTTP response head from `stream`.
///
/// Reads byte-at-a-time up to the `\r\n\r\n` terminator so that no bytes
/// belonging to the tunneled protocol are consumed. The exchange is a
/// one-shot handshake, so the per-byte reads are irrelevant to throughput.
async fn read_response_head<S>(stream: &mut S) -> Result<BytesMut>
where
    S: AsyncRead + Unpin,
{
    let mut head = BytesMut::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.map_err(|e| {
            TransportError::Tunnel(format!("I/O error reading CONNECT response: {}", e))
        })?;
        if n == 0 {
            return Err(TransportError::Tunnel(
                "connection closed before CONNECT response was received".to_string(),
            ));
        }
        head.extend_from_slice(&byte);
        if head.ends_with(b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_CONNECT_RESPONSE_BYTES {
            return Err(TransportError::Tunnel(format!(
                "CONNECT response head exceeds {} bytes",
                MAX_CONNECT_RESPONSE_BYTES
            )));
        }
    }
}

/// Parse a complete response head into a [`TunnelExchange`].
///
/// A second status line smuggled in before the terminator shows up as an
/// invalid header and fails the parse, which aborts the tunnel.
fn parse_response_head(head: &[u8]) -> Result<TunnelExchange> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_CONNECT_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(head) {
        Ok(httparse::Status::Complete(_)) => {},
        Ok(httparse::Status::Partial) => {
            return Err(TransportError::Tunnel(
                "incomplete CONNECT response head".to_string(),
            ));
        },
        Err(e) => {
            return Err(TransportError::Tunnel(format!(
                "malformed CONNECT response: {}",
                e
            )));
        },
    }

    let status = response.code.ok_or_else(|| {
        TransportError::Tunnel("CONNECT response is missing a status code".to_string())
    })?;
    let reason = response.reason.unwrap_or_default().to_string();
    let header_pairs = response
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).into_owned(),
            )
        })
        .collect();

    Ok(TunnelExchange {
        status,
        reason,
        headers: header_pairs,
    })
}

/// Perform the CONNECT exchange over a freshly dialed proxy stream.
///
/// On success the stream is positioned exactly at the first tunneled byte
/// and all tunnel state is dropped. Any status other than 200 aborts the
/// attempt immediately, without waiting for a response body, and the error
/// carries the status and the full received header set.
pub(crate) async fn establish_tunnel<S>(
    stream: &mut S,
    config: &ProxyConfig,
    target: &ConnectionTarget,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = connect_request(config, target);
    log::debug!(
        "[ws-transport] CONNECT {} via {}:{}",
        target.authority(),
        config.host,
        config.port
    );

    stream.write_all(request.as_bytes()).await.map_err(|e| {
        TransportError::Tunnel(format!("failed to send CONNECT request: {}", e))
    })?;
    stream.flush().await.map_err(|e| {
        TransportError::Tunnel(format!("failed to flush CONNECT request: {}", e))
    })?;

    let head = read_response_head(stream).await?;
    let exchange = parse_response_head(&head)?;

    if exchange.status != 200 {
        log::warn!(
            "[ws-transport] proxy refused CONNECT: {} {}",
            exchange.status,
            exchange.reason
        );
        return Err(TransportError::ProxyRejected {
            status: exchange.status,
            reason: exchange.reason,
            headers: exchange.headers,
        });
    }

    log::debug!("[ws-transport] CONNECT tunnel established");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(uri: &str) -> ConnectionTarget {
        ConnectionTarget::parse(uri).unwrap()
    }

    // ── request formatting ──────────────────────────────────────────────────

    #[test]
    fn test_connect_request_basic_shape() {
        let config = ProxyConfig::new("proxy.internal", 3128);
        let request = connect_request(&config, &target("wss://db.example.com/.ws"));
        assert!(request.starts_with("CONNECT db.example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Host: db.example.com:443\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
        assert!(!request.contains("Proxy-Authorization"));
    }

    #[test]
    fn test_connect_request_omits_default_port_when_configured() {
        let config = ProxyConfig::new("proxy.internal", 3128).with_default_ports_omitted();
        let request = connect_request(&config, &target("wss://db.example.com/.ws"));
        // Request line keeps the port; only the Host header drops it.
        assert!(request.starts_with("CONNECT db.example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Host: db.example.com\r\n"));
    }

    #[test]
    fn test_connect_request_keeps_non_default_port_in_host_header() {
        let config = ProxyConfig::new("proxy.internal", 3128).with_default_ports_omitted();
        let request = connect_request(&config, &target("wss://db.example.com:8443/.ws"));
        assert!(request.contains("Host: db.example.com:8443\r\n"));
    }

    #[test]
    fn test_connect_request_carries_basic_credentials() {
        let config = ProxyConfig::new("proxy.internal", 3128).with_credentials("alice", "secret");
        let request = connect_request(&config, &target("wss://db.example.com/"));
        let expected = general_purpose::STANDARD.encode("alice:secret");
        assert!(request.contains(&format!("Proxy-Authorization: Basic {}\r\n", expected)));
    }

    #[test]
    fn test_connect_request_appends_extra_headers() {
        let config = ProxyConfig::new("proxy.internal", 3128)
            .with_header("X-Trace-Id", "abc123")
            .with_header("X-Env", "staging");
        let request = connect_request(&config, &target("wss://db.example.com/"));
        assert!(request.contains("X-Trace-Id: abc123\r\n"));
        assert!(request.contains("X-Env: staging\r\n"));
    }

    #[test]
    fn test_connect_request_brackets_ipv6_target() {
        let config = ProxyConfig::new("proxy.internal", 3128);
        let request = connect_request(&config, &target("wss://[2001:db8::1]/"));
        assert!(request.starts_with("CONNECT [2001:db8::1]:443 HTTP/1.1\r\n"));
    }

    // ── response handling ───────────────────────────────────────────────────

    async fn run_exchange(response: &[u8]) -> Result<()> {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let config = ProxyConfig::new("proxy.internal", 3128);
        let target = target("wss://db.example.com/");

        let response = response.to_vec();
        let server_side = tokio::spawn(async move {
            // Swallow the request head, then play back the canned response.
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await;
            let _ = server.write_all(&response).await;
        });

        let result = establish_tunnel(&mut client, &config, &target).await;
        server_side.await.unwrap();
        result
    }

    #[tokio::test]
    async fn test_tunnel_accepts_200() {
        let result = run_exchange(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
        assert!(result.is_ok(), "200 must establish the tunnel: {:?}", result);
    }

    #[tokio::test]
    async fn test_tunnel_rejects_407_with_status_and_headers() {
        let result = run_exchange(
            b"HTTP/1.1 407 Proxy Authentication Required\r\n\
              Proxy-Authenticate: Basic realm=\"corp\"\r\n\r\n",
        )
        .await;
        match result {
            Err(TransportError::ProxyRejected { status, reason, headers }) => {
                assert_eq!(status, 407);
                assert_eq!(reason, "Proxy Authentication Required");
                assert!(headers
                    .iter()
                    .any(|(name, value)| name == "Proxy-Authenticate" && value.contains("corp")));
            },
            other => panic!("expected ProxyRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tunnel_rejects_503() {
        let result = run_exchange(b"HTTP/1.1 503 Service Unavailable\r\n\r\n").await;
        match result {
            Err(TransportError::ProxyRejected { status, .. }) => assert_eq!(status, 503),
            other => panic!("expected ProxyRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tunnel_rejects_second_status_line() {
        let result = run_exchange(
            b"HTTP/1.1 200 Connection established\r\n\
              HTTP/1.1 403 Forbidden\r\n\r\n",
        )
        .await;
        assert!(
            matches!(result, Err(TransportError::Tunnel(_))),
            "a second status line must fail the tunnel: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_tunnel_rejects_garbage_response() {
        let result = run_exchange(b"SOCKS5 nope\r\n\r\n").await;
        assert!(matches!(result, Err(TransportError::Tunnel(_))));
    }

    #[tokio::test]
    async fn test_tunnel_rejects_premature_close() {
        let result = run_exchange(b"HTTP/1.1 2").await;
        match result {
            Err(TransportError::Tunnel(message)) => {
                assert!(message.contains("closed"), "unexpected message: {}", message);
            },
            other => panic!("expected Tunnel error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tunnel_leaves_following_bytes_untouched() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let config = ProxyConfig::new("proxy.internal", 3128);
        let target = target("ws://db.example.com/");

        let server_side = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = server.read(&mut buf).await;
            let _ = server
                .write_all(b"HTTP/1.1 200 OK\r\n\r\nfirst-tunneled-bytes")
                .await;
        });

        establish_tunnel(&mut client, &config, &target).await.unwrap();

        let mut after = vec![0u8; 20];
        client.read_exact(&mut after).await.unwrap();
        assert_eq!(&after, b"first-tunneled-bytes");
        server_side.await.unwrap();
    }
}
