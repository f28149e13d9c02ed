//! Target endpoint resolution.
//!
//! A [`ConnectionTarget`] is derived once from the caller-supplied URI at
//! client construction and never changes for the lifetime of the client.

use crate::error::{Result, TransportError};
use url::Url;

/// The wire scheme of a target endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain WebSocket (`ws://`), default port 80. No TLS stage.
    Ws,
    /// WebSocket over TLS (`wss://`), default port 443.
    Wss,
}

/// The resolved destination of a client: scheme, host, port and request
/// path. Immutable once parsed.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    scheme: Scheme,
    host: String,
    port: u16,
    /// Path plus query string, always starting with `/`.
    path: String,
}

impl ConnectionTarget {
    /// Parse a target URI.
    ///
    /// Accepts `wss://` and `ws://` URIs with a host. The port defaults to
    /// 443 for `wss` and 80 for `ws`. Path and query are preserved as the
    /// upgrade request target.
    pub fn parse(uri: &str) -> Result<Self> {
        let parsed = Url::parse(uri.trim()).map_err(|e| {
            TransportError::Configuration(format!("invalid target URI '{}': {}", uri, e))
        })?;

        let scheme = match parsed.scheme() {
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => {
                return Err(TransportError::Configuration(format!(
                    "unsupported target scheme '{}'; expected ws or wss",
                    other
                )));
            },
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| {
                TransportError::Configuration(format!("target URI '{}' has no host", uri))
            })?
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();

        let port = parsed.port().unwrap_or(match scheme {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        });

        let mut path = parsed.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self { scheme, host, port, path })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Whether the TLS stage applies to this target.
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Wss
    }

    /// Host name as parsed, without IPv6 brackets. This is also the name
    /// used for SNI and certificate verification, even when proxied.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Host formatted for use inside an HTTP request line or header,
    /// bracketing IPv6 literals.
    pub fn http_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `host:port` authority string as it appears in a CONNECT request.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.http_host(), self.port)
    }

    /// Full URI for the WebSocket upgrade request.
    pub fn request_uri(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        };
        format!("{}://{}:{}{}", scheme, self.http_host(), self.port, self.path)
    }
}
