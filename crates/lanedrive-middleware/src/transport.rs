//! The transport capability the session is built on.
//!
//! The session never touches a socket.  It asks a [`Connector`] for a
//! [`TransportLink`] and receives that link's callbacks (open, message,
//! failure, close) as [`TransportEvent`] values through an [`EventSink`].
//! Every sink is stamped with the connection epoch it was issued for, so
//! the session can discard callbacks from a link it has already abandoned.
//!
//! [`WsConnector`] is the production implementation on top of
//! `tokio-tungstenite`.

use futures_util::{SinkExt, StreamExt};
use lanedrive_types::{BridgeError, GatewayEndpoint};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

/// WebSocket close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported for a close frame that carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the peer vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// A callback from the transport, reified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Failed(String),
    Closed { code: u16, reason: String },
}

/// A [`TransportEvent`] together with the epoch of the link that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub epoch: u64,
    pub event: TransportEvent,
}

/// Where a link delivers its callbacks.
#[derive(Debug, Clone)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Deliver `event`. Returns `false` once the session has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent { epoch: self.epoch, event })
            .is_ok()
    }
}

/// Opens connections to the gateway.
///
/// `connect` must not block: it starts the attempt and returns a link
/// immediately.  The outcome arrives later on `events` as either
/// [`TransportEvent::Opened`] or [`TransportEvent::Failed`].
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &GatewayEndpoint, events: EventSink) -> Box<dyn TransportLink>;
}

/// One live (or pending) connection. Dropping it tears the connection down.
pub trait TransportLink: Send {
    /// Queue a text frame. Frames are written in call order.
    fn send(&self, text: String) -> Result<(), BridgeError>;

    /// Start a close handshake. Completion is reported as
    /// [`TransportEvent::Closed`].
    fn close(&self, code: u16, reason: &str);
}

// ────────────────────────────────────────────────────────────────────────────
// tokio-tungstenite implementation
// ────────────────────────────────────────────────────────────────────────────

/// [`Connector`] backed by `tokio-tungstenite`. Must be used from within a
/// Tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, endpoint: &GatewayEndpoint, events: EventSink) -> Box<dyn TransportLink> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(endpoint.to_string(), outbound_rx, events));
        Box::new(WsLink {
            outbound: outbound_tx,
            task,
        })
    }
}

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

struct WsLink {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl TransportLink for WsLink {
    fn send(&self, text: String) -> Result<(), BridgeError> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| BridgeError::Transport("websocket writer has shut down".to_string()))
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drive one WebSocket connection until it fails or closes.
///
/// Emits exactly one of `Failed`/`Closed` as its final event.
async fn run_link(
    uri: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
) {
    let ws_stream = match connect_async(uri.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            events.emit(TransportEvent::Failed(format!("connect to {uri}: {e}")));
            return;
        }
    };
    debug!(uri = %uri, epoch = events.epoch(), "websocket opened");
    events.emit(TransportEvent::Opened);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    loop {
        tokio::select! {
            // Session → gateway.
            out = outbound.recv() => {
                let message = match out {
                    Some(Outbound::Text(text)) => Message::Text(text.into()),
                    Some(Outbound::Close { code, reason }) => Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    })),
                    // Link handle dropped without a close handshake.
                    None => {
                        let _ = ws_tx.close().await;
                        return;
                    }
                };
                if let Err(e) = ws_tx.send(message).await {
                    warn!(uri = %uri, error = %e, "websocket write failed");
                    events.emit(TransportEvent::Failed(format!("write: {e}")));
                    return;
                }
            }
            // Gateway → session.
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        events.emit(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                            .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                        // Tungstenite only queues the reply to a peer close;
                        // flush it before the session drops the link.
                        if let Err(e) = ws_tx.flush().await {
                            debug!(uri = %uri, error = %e, "close reply not flushed");
                        }
                        events.emit(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => {} // ping/pong handled by tungstenite; binary unused
                    Some(Err(e)) => {
                        events.emit(TransportEvent::Failed(format!("read: {e}")));
                        return;
                    }
                    None => {
                        events.emit(TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}
