//! The public client handle and its builder.
//!
//! A [`WsClient`] owns one connection for its whole life: construct,
//! `connect()` once, exchange text frames, `close()`. A closed client is
//! terminal — establishing a new connection means constructing a new
//! client. All networking and all event-handler callbacks happen on the
//! client's dedicated worker task; the methods here only validate state and
//! enqueue work, so they are cheap and safe to call from any thread.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ws_transport::{TransportError, WsClient, WsEventHandler};
//!
//! struct Printer;
//!
//! impl WsEventHandler for Printer {
//!     fn on_open(&self) { println!("open"); }
//!     fn on_message(&self, text: String) { println!("<- {}", text); }
//!     fn on_close(&self) { println!("closed"); }
//!     fn on_error(&self, cause: TransportError) { eprintln!("error: {}", cause); }
//! }
//!
//! # async fn example() -> ws_transport::Result<()> {
//! let client = WsClient::builder()
//!     .uri("wss://db.example.com/.ws?v=5")
//!     .user_agent("sync-client/7.1.0")
//!     .event_handler(Arc::new(Printer))
//!     .build()?;
//!
//! client.connect()?;
//! // ... on_open fires on the worker; then:
//! client.send("hello")?;
//! client.close()?;
//! # Ok(())
//! # }
//! ```

use crate::connection::{worker_loop, Command, ConnectionState, StateCell, WorkerContext};
use crate::error::{Result, TransportError};
use crate::events::{EventSink, WsEventHandler};
use crate::proxy::ProxyConfig;
use crate::target::ConnectionTarget;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

/// Client for a single outbound WebSocket connection, optionally tunneled
/// through an HTTP forward proxy.
///
/// Use [`WsClient::builder`] to construct instances. See the
/// [module docs](self) for the lifecycle contract.
pub struct WsClient {
    cmd_tx: UnboundedSender<Command>,
    state: Arc<StateCell>,
    /// Worker task handle. Held so the task is traceable from the client;
    /// the worker exits on its own once every command sender is gone.
    _worker: JoinHandle<()>,
}

impl WsClient {
    /// Create a new builder.
    pub fn builder() -> WsClientBuilder {
        WsClientBuilder::new()
    }

    /// Start the connection attempt. Non-blocking; the outcome arrives as
    /// either `on_open` or `on_error` on the event handler.
    ///
    /// Must be called exactly once. A second call returns a
    /// [`TransportError::StateViolation`] and does not start another
    /// attempt.
    pub fn connect(&self) -> Result<()> {
        if !self.state.try_claim_connect() {
            return Err(TransportError::StateViolation(format!(
                "connect() already called (state: {:?})",
                self.state.load()
            )));
        }
        self.dispatch(Command::Connect)
    }

    /// Queue one outbound text frame. Non-blocking.
    ///
    /// Requires a prior `connect()`; calling before then is a
    /// [`TransportError::StateViolation`]. If the channel is not active
    /// when the worker picks the frame up (connection failed, peer went
    /// away, close in flight), nothing is written and the handler receives
    /// one `on_error` with a channel-inactive cause instead.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        if self.state.load() == ConnectionState::Idle {
            return Err(TransportError::StateViolation(
                "send() called before connect()".to_string(),
            ));
        }
        self.dispatch(Command::Send(text.into()))
    }

    /// Begin tearing the connection down. Non-blocking and best-effort:
    /// the socket shutdown and worker wind-down complete asynchronously,
    /// and a callback already in flight may still be delivered afterwards.
    ///
    /// Requires a prior `connect()`; calling before then is a
    /// [`TransportError::StateViolation`]. Calling after the connection
    /// already ended is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.state.load() == ConnectionState::Idle {
            return Err(TransportError::StateViolation(
                "close() called before connect()".to_string(),
            ));
        }
        self.dispatch(Command::Close)
    }

    /// Current lifecycle state. States move strictly forward from `Idle`
    /// to `Closed`.
    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn dispatch(&self, command: Command) -> Result<()> {
        self.cmd_tx.send(command).map_err(|_| {
            TransportError::StateViolation("connection worker has shut down".to_string())
        })
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        // Reclaim the socket if the owner never called close(). The worker
        // itself exits once this sender is dropped.
        let state = self.state.load();
        if state != ConnectionState::Idle && state != ConnectionState::Closed {
            let _ = self.cmd_tx.send(Command::Close);
        }
    }
}

/// Builder for [`WsClient`] instances.
///
/// `uri`, `user_agent` and `event_handler` are required; everything else
/// has a default. All validation happens in [`build`](WsClientBuilder::build)
/// so that configuration mistakes fail at construction, not at connect
/// time.
pub struct WsClientBuilder {
    uri: Option<String>,
    user_agent: Option<String>,
    proxy: ProxyConfig,
    connect_timeout: Option<Duration>,
    handler: Option<Arc<dyn WsEventHandler>>,
}

impl WsClientBuilder {
    fn new() -> Self {
        Self {
            uri: None,
            user_agent: None,
            proxy: ProxyConfig::disabled(),
            connect_timeout: None,
            handler: None,
        }
    }

    /// Target URI (`wss://host[:port]/path?query`, or `ws://` for
    /// unencrypted endpoints). Required.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// `User-Agent` header value for the upgrade request. Required and
    /// must be non-empty.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Forward-proxy configuration. Defaults to
    /// [`ProxyConfig::disabled`].
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Bound the whole establishment chain with a timeout. Disabled by
    /// default — the transport imposes no timing policy of its own.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The event sink receiving all connection callbacks. Required.
    pub fn event_handler(mut self, handler: Arc<dyn WsEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate the configuration and spawn the connection worker.
    ///
    /// Fails with [`TransportError::Configuration`] on a missing or
    /// invalid URI, an empty user agent, a missing event handler, an
    /// enabled proxy without a host, or when no tokio runtime is available
    /// to host the worker.
    pub fn build(self) -> Result<WsClient> {
        let uri = self
            .uri
            .ok_or_else(|| TransportError::Configuration("target URI is required".to_string()))?;
        let target = ConnectionTarget::parse(&uri)?;

        let user_agent = self
            .user_agent
            .map(|ua| ua.trim().to_string())
            .filter(|ua| !ua.is_empty())
            .ok_or_else(|| {
                TransportError::Configuration("user agent must not be empty".to_string())
            })?;
        tokio_tungstenite::tungstenite::http::HeaderValue::from_str(&user_agent).map_err(
            |e| {
                TransportError::Configuration(format!(
                    "user agent is not a valid header value: {}",
                    e
                ))
            },
        )?;

        let handler = self.handler.ok_or_else(|| {
            TransportError::Configuration("event handler is required".to_string())
        })?;

        if self.proxy.enabled && self.proxy.host.trim().is_empty() {
            return Err(TransportError::Configuration(
                "proxy host must not be empty when the proxy is enabled".to_string(),
            ));
        }

        let runtime = Handle::try_current().map_err(|_| {
            TransportError::Configuration(
                "a tokio runtime is required to host the connection worker".to_string(),
            )
        })?;

        let state = Arc::new(StateCell::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            target,
            proxy: self.proxy,
            user_agent,
            connect_timeout: self.connect_timeout,
            state: state.clone(),
            events: EventSink::new(handler),
        };
        let worker = runtime.spawn(worker_loop(cmd_rx, ctx));

        Ok(WsClient {
            cmd_tx,
            state,
            _worker: worker,
        })
    }
}
