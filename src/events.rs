//! Connection lifecycle and data events delivered to the owning layer.
//!
//! The transport never makes policy decisions on its own: every outcome of
//! a connection attempt and every observable event on an established
//! connection becomes exactly one call on the [`WsEventHandler`] supplied at
//! construction. The handler is invoked from the client's dedicated worker
//! task, so no two callbacks for the same client ever run concurrently.
//!
//! Because `close()` is asynchronous, a callback that was already in flight
//! when the owner requested close may still be delivered afterwards.
//! Implementations must treat events arriving after they initiated close as
//! ignorable.

use crate::error::TransportError;
use std::sync::Arc;

/// Event sink for a [`WsClient`](crate::WsClient).
///
/// All methods are invoked sequentially on the client's worker task and
/// should return promptly; long-running work belongs on the owner's side of
/// the boundary.
pub trait WsEventHandler: Send + Sync {
    /// The WebSocket upgrade completed and the connection is open.
    /// Fired exactly once per client, and never after a connection error.
    fn on_open(&self);

    /// A text frame arrived. Frames are delivered once each, in receipt
    /// order, and never before `on_open`.
    fn on_message(&self, text: String);

    /// The connection ended: close frame, orderly end-of-stream, peer
    /// reset, or a locally requested close. Fired at most once.
    fn on_close(&self);

    /// A failure occurred — anywhere in the establishment chain or while
    /// relaying frames. The transport does not tear the connection down in
    /// response; that decision belongs to the handler's owner.
    fn on_error(&self, cause: TransportError);
}

/// Crate-internal dispatch wrapper around the caller's handler.
///
/// Keeps logging of callback traffic in one place.
#[derive(Clone)]
pub(crate) struct EventSink {
    handler: Arc<dyn WsEventHandler>,
}

impl EventSink {
    pub(crate) fn new(handler: Arc<dyn WsEventHandler>) -> Self {
        Self { handler }
    }

    pub(crate) fn emit_open(&self) {
        log::debug!("[ws-transport] dispatching on_open");
        self.handler.on_open();
    }

    pub(crate) fn emit_message(&self, text: String) {
        log::trace!("[ws-transport] dispatching on_message ({} bytes)", text.len());
        self.handler.on_message(text);
    }

    pub(crate) fn emit_close(&self) {
        log::debug!("[ws-transport] dispatching on_close");
        self.handler.on_close();
    }

    pub(crate) fn emit_error(&self, cause: TransportError) {
        log::warn!("[ws-transport] dispatching on_error: {}", cause);
        self.handler.on_error(cause);
    }
}
