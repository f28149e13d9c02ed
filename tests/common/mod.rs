//! Shared helpers for transport integration tests: an event-recording
//! handler and small mock servers driven over real sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use ws_transport::{TransportError, WsEventHandler};

/// One observed callback, in dispatch order.
#[derive(Debug, Clone)]
pub enum Event {
    Open,
    Message(String),
    Close,
    Error(TransportError),
}

/// A [`WsEventHandler`] that records every callback and forwards it to a
/// channel so tests can await events without polling.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
    tx: mpsc::UnboundedSender<Event>,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                tx,
            }),
            rx,
        )
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event.clone());
        let _ = self.tx.send(event);
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Open))
            .count()
    }

    pub fn close_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Close))
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Error(_)))
            .count()
    }
}

impl WsEventHandler for RecordingHandler {
    fn on_open(&self) {
        self.record(Event::Open);
    }

    fn on_message(&self, text: String) {
        self.record(Event::Message(text));
    }

    fn on_close(&self) {
        self.record(Event::Close);
    }

    fn on_error(&self, cause: TransportError) {
        self.record(Event::Error(cause));
    }
}

/// Await the next recorded event, bounded so a hung test fails fast.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a transport event")
        .expect("event channel closed unexpectedly")
}

/// Read from `stream` until the end of an HTTP request/response head and
/// return everything read so far as a string.
pub async fn read_http_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .expect("mock server failed to read");
        if n == 0 {
            break;
        }
        head.extend_from_slice(&byte);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        assert!(head.len() < 64 * 1024, "runaway request head");
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Answer a CONNECT request on `stream` with the given raw response.
/// Returns the request head for assertions.
pub async fn answer_connect(stream: &mut TcpStream, response: &[u8]) -> String {
    let head = read_http_head(stream).await;
    assert!(
        head.starts_with("CONNECT "),
        "expected a CONNECT request, got: {}",
        head
    );
    stream
        .write_all(response)
        .await
        .expect("mock proxy failed to respond");
    head
}
