//! `lanedrive-middleware` – the gateway bridge
//!
//! Speaks the gateway's JSON-over-WebSocket protocol on behalf of the
//! operator console: keeps a session alive, re-opens subscriptions after
//! every reconnect, decodes sensor frames and publishes drive commands.
//!
//! # Modules
//!
//! - [`codec`] – JSON frame encoders and the inbound frame decoder.
//! - [`registry`] – insertion-ordered set of active subscriptions.
//! - [`transport`] – the connector/link capability and its
//!   `tokio-tungstenite` implementation.
//! - [`observer`] – callbacks through which decoded data leaves a session.
//! - [`session`] – the connection state machine and its handle.
//! - [`bus`] – broadcast fan-out of observer callbacks as [`Event`]s.
//!
//! [`Event`]: lanedrive_types::Event

pub mod bus;
pub mod codec;
pub mod observer;
pub mod registry;
pub mod session;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use codec::{Decoded, IgnoreReason};
pub use observer::{NullObserver, Observer};
pub use registry::SubscriptionRegistry;
pub use session::{CLOSE_TIMEOUT, DEFAULT_RETRY_DELAY, Session, SessionConfig, SessionHandle};
pub use transport::{Connector, EventSink, TransportEvent, TransportLink, WsConnector};
