//! Single-connection WebSocket transport for realtime sync clients.
//!
//! This crate is the lowest layer beneath a realtime synchronization
//! client: it owns exactly one long-lived, secure, full-duplex WebSocket
//! connection and reports everything that happens on it through a
//! caller-supplied event handler. It makes no policy decisions — no retry,
//! no reconnect, no backoff, no automatic teardown on error. Those belong
//! to the layer above.
//!
//! A connection attempt composes four wire protocols in strict sequence on
//! a dedicated worker task:
//!
//! 1. TCP dial (directly, or to a forward proxy)
//! 2. HTTP CONNECT tunnel with optional Basic authentication (proxy only)
//! 3. TLS against the platform trust store (`wss` targets)
//! 4. WebSocket upgrade (version 13)
//!
//! Any stage failure short-circuits the rest and surfaces as a single
//! `on_error` callback. After establishment, inbound text frames become
//! `on_message` calls and outbound [`WsClient::send`] calls become text
//! frames; the connection ends with exactly one `on_close`.
//!
//! See [`WsClient`] for the lifecycle contract and a usage example.

pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod proxy;
pub mod target;

mod tls;

pub use client::{WsClient, WsClientBuilder};
pub use connection::ConnectionState;
pub use error::{Result, TransportError};
pub use events::WsEventHandler;
pub use proxy::ProxyConfig;
pub use target::{ConnectionTarget, Scheme};
