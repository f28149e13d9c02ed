//! TLS client context construction.
//!
//! The transport validates peers against the platform's default trust
//! store only. There is no certificate pinning, no custom CA support, and
//! no client-certificate (mutual TLS) support.

use crate::error::{Result, TransportError};

/// Build a TLS connector backed by the system trust store with default
/// protocol and cipher settings.
///
/// Called per connection attempt; an initialization failure here surfaces
/// as a connection-establishment error before any bytes are sent.
pub(crate) fn system_tls_connector() -> Result<tokio_native_tls::TlsConnector> {
    let connector = native_tls::TlsConnector::new().map_err(|e| {
        TransportError::Tls(format!("failed to initialize TLS context: {}", e))
    })?;
    Ok(tokio_native_tls::TlsConnector::from(connector))
}
