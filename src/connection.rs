//! Connection worker: establishment chain and frame relay.
//!
//! Every [`WsClient`](crate::WsClient) owns exactly one worker task, spawned
//! at construction. The worker serializes everything: it drives the
//! establishment chain (TCP dial → optional CONNECT tunnel → TLS →
//! WebSocket upgrade), relays frames in both directions, and dispatches
//! every event-handler callback. Caller threads only ever enqueue commands,
//! so they never block on network I/O and no two callbacks run
//! concurrently.

use crate::error::{Result, TransportError};
use crate::events::EventSink;
use crate::proxy::{self, ProxyConfig};
use crate::target::ConnectionTarget;
use crate::tls;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{client_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of a client instance. States only ever move forward; no state
/// is revisited, and `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Constructed, `connect()` not yet called.
    Idle = 0,
    /// TCP dial in progress.
    Connecting = 1,
    /// CONNECT exchange with the proxy in progress.
    TunnelPending = 2,
    /// TLS handshake in progress.
    TlsPending = 3,
    /// WebSocket upgrade in progress.
    HandshakePending = 4,
    /// Established; frames relay in both directions.
    Open = 5,
    /// Terminal. The instance cannot be reused; a new client is required
    /// for a new connection attempt.
    Closed = 6,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::TunnelPending,
            3 => Self::TlsPending,
            4 => Self::HandshakePending,
            5 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Single-writer state cell shared between the client handle and its
/// worker. The caller thread performs exactly one transition
/// (`Idle → Connecting`, claimed by CAS so a second `connect()` loses the
/// race deterministically); every other transition happens on the worker.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Claim the `Idle → Connecting` transition. Returns `false` when the
    /// client has already left `Idle`.
    pub(crate) fn try_claim_connect(&self) -> bool {
        self.0
            .compare_exchange(
                ConnectionState::Idle as u8,
                ConnectionState::Connecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Move forward to `next`. Worker-only; never moves backwards.
    fn advance(&self, next: ConnectionState) {
        debug_assert!(next as u8 >= self.0.load(Ordering::SeqCst));
        self.0.store(next as u8, Ordering::SeqCst);
    }
}

/// Work items enqueued by the client handle and executed on the worker.
pub(crate) enum Command {
    Connect,
    Send(String),
    Close,
}

/// Everything the worker needs, bundled at construction.
pub(crate) struct WorkerContext {
    pub target: ConnectionTarget,
    pub proxy: ProxyConfig,
    pub user_agent: String,
    pub connect_timeout: Option<Duration>,
    pub state: std::sync::Arc<StateCell>,
    pub events: EventSink,
}

/// Build the HTTP Upgrade request for the target, attaching the caller's
/// `User-Agent`. WebSocket version 13 and the handshake key are supplied by
/// the protocol library; no subprotocol is negotiated.
fn build_upgrade_request(
    target: &ConnectionTarget,
    user_agent: &str,
) -> Result<tokio_tungstenite::tungstenite::http::Request<()>> {
    let mut request = target.request_uri().into_client_request().map_err(|e| {
        TransportError::Handshake(format!("failed to build upgrade request: {}", e))
    })?;
    let value = HeaderValue::from_str(user_agent).map_err(|e| {
        TransportError::Handshake(format!("user agent is not a valid header value: {}", e))
    })?;
    request.headers_mut().insert(USER_AGENT, value);
    Ok(request)
}

/// Run the establishment chain: TCP dial, optional CONNECT tunnel, TLS for
/// secure targets, then the WebSocket upgrade. Each stage failure aborts
/// the remaining stages.
async fn establish(ctx: &WorkerContext) -> Result<WsStream> {
    let target = &ctx.target;

    let (dial_host, dial_port) = if ctx.proxy.enabled {
        (ctx.proxy.host.as_str(), ctx.proxy.port)
    } else {
        (target.host(), target.port())
    };

    log::debug!("[ws-transport] dialing {}:{}", dial_host, dial_port);
    let mut tcp = TcpStream::connect((dial_host, dial_port)).await.map_err(|e| {
        TransportError::Connect(format!("failed to reach {}:{}: {}", dial_host, dial_port, e))
    })?;
    if let Err(e) = tcp.set_nodelay(true) {
        log::debug!("[ws-transport] failed to set TCP_NODELAY: {}", e);
    }

    if ctx.proxy.enabled {
        ctx.state.advance(ConnectionState::TunnelPending);
        proxy::establish_tunnel(&mut tcp, &ctx.proxy, target).await?;
    }

    let stream = if target.is_secure() {
        ctx.state.advance(ConnectionState::TlsPending);
        let connector = tls::system_tls_connector()?;
        // SNI and certificate verification use the original destination
        // host even when the bytes travel through a proxy.
        let tls_stream = connector.connect(target.host(), tcp).await.map_err(|e| {
            TransportError::Tls(format!("handshake with {} failed: {}", target.host(), e))
        })?;
        MaybeTlsStream::NativeTls(tls_stream)
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    ctx.state.advance(ConnectionState::HandshakePending);
    let request = build_upgrade_request(target, &ctx.user_agent)?;
    let (ws, response) = client_async(request, stream).await.map_err(map_handshake_error)?;
    log::debug!(
        "[ws-transport] WebSocket upgrade complete (status {})",
        response.status()
    );
    Ok(ws)
}

fn map_handshake_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            let body = response
                .into_body()
                .filter(|b| !b.is_empty())
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default();
            if body.is_empty() {
                TransportError::Handshake(format!("upgrade rejected with status {}", status))
            } else {
                TransportError::Handshake(format!(
                    "upgrade rejected with status {}: {}",
                    status, body
                ))
            }
        },
        other => TransportError::Handshake(format!("upgrade failed: {}", other)),
    }
}

async fn establish_with_timeout(ctx: &WorkerContext) -> Result<WsStream> {
    match ctx.connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, establish(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Connect(format!(
                "connection attempt timed out after {:?}",
                limit
            ))),
        },
        None => establish(ctx).await,
    }
}

/// Errors on an established stream that mean the transport is gone, as
/// opposed to a decode problem on an otherwise live connection.
fn is_transport_loss(error: &WsError) -> bool {
    matches!(
        error,
        WsError::Io(_) | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

fn is_clean_end(error: &WsError) -> bool {
    matches!(error, WsError::ConnectionClosed | WsError::AlreadyClosed)
}

/// The worker task. Runs until every client handle is dropped; processes
/// commands sequentially, and while a connection is open multiplexes
/// command processing with inbound frame relay.
pub(crate) async fn worker_loop(mut cmd_rx: mpsc::UnboundedReceiver<Command>, ctx: WorkerContext) {
    let mut ws: Option<WsStream> = None;
    // `on_close` fires at most once per client, whichever side ends the
    // connection first.
    let mut close_notified = false;

    loop {
        if let Some(stream) = ws.as_mut() {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = stream.send(Message::Text(text.into())).await {
                            let fatal = is_transport_loss(&e) || is_clean_end(&e);
                            ctx.events.emit_error(TransportError::WebSocket(format!(
                                "failed to send text frame: {}",
                                e
                            )));
                            if fatal {
                                // The channel is gone but teardown stays the
                                // owner's decision; later sends report
                                // channel-inactive.
                                ws = None;
                            }
                        }
                    },
                    Some(Command::Close) => {
                        log::debug!("[ws-transport] closing connection");
                        let _ = stream.close(None).await;
                        ctx.state.advance(ConnectionState::Closed);
                        ws = None;
                        if !close_notified {
                            close_notified = true;
                            ctx.events.emit_close();
                        }
                    },
                    Some(Command::Connect) => {
                        // Unreachable: the state cell only releases one
                        // Connect per client.
                        log::warn!("[ws-transport] ignoring duplicate connect command");
                    },
                    None => {
                        // Every handle dropped; tear down silently.
                        let _ = stream.close(None).await;
                        ctx.state.advance(ConnectionState::Closed);
                        return;
                    },
                },

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        ctx.events.emit_message(text.to_string());
                    },
                    Some(Ok(Message::Binary(data))) => {
                        // This transport speaks text only; anything else on
                        // the wire is a protocol violation, but it does not
                        // tear the connection down.
                        ctx.events.emit_error(TransportError::WebSocket(format!(
                            "unexpected binary frame ({} bytes)",
                            data.len()
                        )));
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = stream.send(Message::Pong(payload)).await;
                    },
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {},
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(f) => log::debug!(
                                "[ws-transport] peer sent close frame (code {}, reason '{}')",
                                f.code,
                                f.reason
                            ),
                            None => log::debug!("[ws-transport] peer sent close frame"),
                        }
                        // Complete the closing handshake so the peer sees
                        // our acknowledgement before the socket drops.
                        let _ = stream.close(None).await;
                        ctx.state.advance(ConnectionState::Closed);
                        ws = None;
                        if !close_notified {
                            close_notified = true;
                            ctx.events.emit_close();
                        }
                    },
                    Some(Err(e)) if is_clean_end(&e) => {
                        ctx.state.advance(ConnectionState::Closed);
                        ws = None;
                        if !close_notified {
                            close_notified = true;
                            ctx.events.emit_close();
                        }
                    },
                    Some(Err(e)) if is_transport_loss(&e) => {
                        // Peer reset: report the error, then the end of the
                        // connection.
                        ctx.events.emit_error(TransportError::WebSocket(format!(
                            "connection lost: {}",
                            e
                        )));
                        ctx.state.advance(ConnectionState::Closed);
                        ws = None;
                        if !close_notified {
                            close_notified = true;
                            ctx.events.emit_close();
                        }
                    },
                    Some(Err(e)) => {
                        // Decode or protocol failure. The stream is no
                        // longer usable, but the connection stays open from
                        // the owner's perspective until it calls close().
                        ctx.events.emit_error(TransportError::WebSocket(format!(
                            "failed to decode inbound frame: {}",
                            e
                        )));
                        ws = None;
                    },
                    None => {
                        ctx.state.advance(ConnectionState::Closed);
                        ws = None;
                        if !close_notified {
                            close_notified = true;
                            ctx.events.emit_close();
                        }
                    },
                },
            }
        } else {
            match cmd_rx.recv().await {
                Some(Command::Connect) => {
                    match establish_with_timeout(&ctx).await {
                        Ok(stream) => {
                            ctx.state.advance(ConnectionState::Open);
                            ws = Some(stream);
                            log::debug!("[ws-transport] connection open");
                            ctx.events.emit_open();
                        },
                        Err(e) => {
                            // The chain short-circuits; the state stays at
                            // the failed stage and on_open never fires.
                            ctx.events.emit_error(e);
                        },
                    }
                },
                Some(Command::Send(_)) => {
                    ctx.events.emit_error(TransportError::ChannelInactive(
                        "WebSocket channel became inactive".to_string(),
                    ));
                },
                Some(Command::Close) => {
                    let already_closed = ctx.state.load() == ConnectionState::Closed;
                    ctx.state.advance(ConnectionState::Closed);
                    if !already_closed && !close_notified {
                        close_notified = true;
                        ctx.events.emit_close();
                    }
                },
                None => {
                    return;
                },
            }
        }
    }
}
