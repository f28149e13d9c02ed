//! Error types for the transport crate.

use thiserror::Error;

/// Errors produced by the transport, either returned synchronously from
/// client calls or delivered asynchronously through
/// [`WsEventHandler::on_error`](crate::WsEventHandler::on_error).
///
/// Construction-time problems ([`Configuration`](TransportError::Configuration))
/// and misuse of the client API ([`StateViolation`](TransportError::StateViolation))
/// are returned directly to the caller. Everything that happens on the wire
/// is reported through the event handler instead.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Invalid construction parameters (bad URI, empty user agent, missing
    /// event handler, unusable proxy settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The client was used out of order, e.g. `connect()` twice or
    /// `send()`/`close()` before `connect()`.
    #[error("invalid client state: {0}")]
    StateViolation(String),

    /// DNS resolution or TCP dial failure, or connect-timeout expiry.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The proxy answered the CONNECT request with a non-200 status.
    ///
    /// Carries the received status and the full response header set for
    /// diagnosis (e.g. `Proxy-Authenticate` on a 407).
    #[error("proxy CONNECT rejected with status {status} {reason}")]
    ProxyRejected {
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
    },

    /// The CONNECT exchange failed before a valid response was received
    /// (malformed response, premature close, oversized response head).
    #[error("proxy tunnel error: {0}")]
    Tunnel(String),

    /// TLS context initialization or handshake failure.
    #[error("TLS negotiation failed: {0}")]
    Tls(String),

    /// The WebSocket upgrade was rejected or malformed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// A frame was submitted while no active WebSocket channel exists
    /// (peer reset, in-flight close, or a failed connection attempt).
    #[error("channel inactive: {0}")]
    ChannelInactive(String),

    /// A runtime error on an established connection: failed write, decode
    /// failure, or an unexpected inbound frame type.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Result type used throughout the transport crate.
pub type Result<T> = std::result::Result<T, TransportError>;
