//! Gateway session: connection lifecycle, resubscription and command egress.
//!
//! [`Session::spawn`] starts a single Tokio task that owns every piece of
//! mutable session state: the [`SessionState`], the
//! [`SubscriptionRegistry`], the current [`TransportLink`] and the pending
//! timer (a reconnect retry or a close deadline).  Callers talk to it
//! through a cloneable [`SessionHandle`]; the
//! transport talks to it through an [`EventSink`].  Both feed the same
//! `select!` loop, so state transitions and subscribe/unsubscribe frames
//! are never interleaved.
//!
//! # State machine
//!
//! ```text
//!  Disconnected ──start──▶ Connecting ──opened──▶ Connected
//!       ▲                    │   ▲                   │
//!       │                 failed └──retry (5 s)──┐   failed
//!       │                    ▼                   │   ▼
//!       └──closed / stop── Reconnecting ◀────────┴───┘
//! ```
//!
//! * Every connect attempt gets a fresh *epoch*; callbacks tagged with any
//!   other epoch are stale and dropped.
//! * Every armed timer gets a fresh *generation*; `stop()` bumps the
//!   generation, so a retry that still fires afterwards is a no-op.
//! * A refused write is a transport failure: the link is retired and the
//!   session goes to `Reconnecting`.
//! * A close handshake the gateway never answers is abandoned after
//!   [`CLOSE_TIMEOUT`].
//! * Subscribe frames for every registered subscription are written on
//!   `Opened` before any later callback of the same link is processed, so
//!   resubscription always precedes the first dispatched frame.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use lanedrive_types::{
    BridgeError, CommandIntent, Connectivity, GatewayEndpoint, SessionState, SubscriptionSpec,
    default_subscriptions,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::codec::{self, Decoded};
use crate::observer::{Observer, dispatch};
use crate::registry::SubscriptionRegistry;
use crate::transport::{
    Connector, EventSink, NORMAL_CLOSURE, TaggedEvent, TransportEvent, TransportLink,
};

/// Fixed delay between a failure and the next connect attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// How long `stop()` waits for the gateway to confirm the close.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Static session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: GatewayEndpoint,
    /// Delay before reconnecting after a failure. Retries are unbounded.
    pub retry_delay: Duration,
    /// Subscriptions opened on every fresh `start()`.
    pub subscriptions: Vec<SubscriptionSpec>,
}

impl SessionConfig {
    /// Config for `endpoint` with the default delay and sensor subscriptions.
    pub fn new(endpoint: GatewayEndpoint) -> Self {
        Self {
            endpoint,
            retry_delay: DEFAULT_RETRY_DELAY,
            subscriptions: default_subscriptions(),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Vec<SubscriptionSpec>) -> Self {
        self.subscriptions = subscriptions;
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handle
// ────────────────────────────────────────────────────────────────────────────

enum Request {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Send {
        intent: CommandIntent,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Subscribe(SubscriptionSpec, oneshot::Sender<()>),
    Unsubscribe(String, oneshot::Sender<()>),
}

/// Cloneable front door to a running session task.
///
/// Dropping the last handle shuts the task down and tears the connection
/// down without a close handshake; call [`stop`][Self::stop] first for an
/// orderly teardown.
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Begin connecting. No-op unless the session is `Disconnected`.
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.call(Request::Start).await
    }

    /// Unsubscribe everything, close the link with a normal closure code and
    /// cancel any pending retry.
    ///
    /// Returns once the close has been requested; the session reaches
    /// `Disconnected` when the transport confirms or [`CLOSE_TIMEOUT`]
    /// passes (see [`watch_state`][Self::watch_state]), or immediately if no
    /// link was open.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        self.call(Request::Stop).await
    }

    /// Encode and write `intent`.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::NotConnected`] unless the session is `Connected`; the
    ///   intent is dropped, not queued.
    /// * [`BridgeError::Transport`] if the link refused the frame. The session
    ///   then treats the link as failed and schedules a reconnect.
    pub async fn send_command(&self, intent: CommandIntent) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Send { intent, reply })
            .map_err(|_| BridgeError::SessionClosed)?;
        rx.await.map_err(|_| BridgeError::SessionClosed)?
    }

    /// Track `spec`, subscribing right away when connected.
    pub async fn subscribe(&self, spec: SubscriptionSpec) -> Result<(), BridgeError> {
        self.call(|reply| Request::Subscribe(spec, reply)).await
    }

    /// Stop tracking `id`, unsubscribing right away when connected.
    pub async fn unsubscribe(&self, id: impl Into<String>) -> Result<(), BridgeError> {
        let id = id.into();
        self.call(|reply| Request::Unsubscribe(id, reply)).await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn call(&self, request: impl FnOnce(oneshot::Sender<()>) -> Request) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(request(reply))
            .map_err(|_| BridgeError::SessionClosed)?;
        rx.await.map_err(|_| BridgeError::SessionClosed)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session task
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Reconnect after a failure.
    Retry,
    /// Give up on an unanswered close handshake.
    CloseDeadline,
}

struct Timer {
    generation: u64,
    kind: TimerKind,
    sleep: Pin<Box<Sleep>>,
}

/// Owner of all session state. Only ever touched from its own task.
pub struct Session {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    observer: Arc<dyn Observer>,
    registry: SubscriptionRegistry,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    link: Option<Box<dyn TransportLink>>,
    /// Identifies the current link; bumped on every connect and retirement.
    epoch: u64,
    /// Identifies the armed timer; bumped on every arm and cancel.
    generation: u64,
    timer: Option<Timer>,
    /// A close handshake was requested and has not completed yet.
    closing: bool,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl Session {
    /// Spawn the session task onto the current Tokio runtime.
    ///
    /// The session starts `Disconnected`; call
    /// [`SessionHandle::start`] to connect.
    pub fn spawn(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        observer: Arc<dyn Observer>,
    ) -> SessionHandle {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

        let session = Session {
            config,
            connector,
            observer,
            registry: SubscriptionRegistry::new(),
            state: SessionState::Disconnected,
            state_tx,
            link: None,
            epoch: 0,
            generation: 0,
            timer: None,
            closing: false,
            events_tx,
        };
        tokio::spawn(session.run(requests_rx, events_rx));

        SessionHandle {
            requests: requests_tx,
            state: state_rx,
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: mpsc::UnboundedReceiver<TaggedEvent>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(tagged) = events.recv() => self.handle_transport(tagged),
                (generation, kind) = timer_elapsed(&mut self.timer) => {
                    self.on_timer_elapsed(generation, kind)
                }
            }
        }

        debug!(endpoint = %self.config.endpoint, "all session handles dropped");
        self.stop();
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start(reply) => {
                self.start();
                let _ = reply.send(());
            }
            Request::Stop(reply) => {
                self.stop();
                let _ = reply.send(());
            }
            Request::Send { intent, reply } => {
                let _ = reply.send(self.send_command(intent));
            }
            Request::Subscribe(spec, reply) => {
                self.subscribe(spec);
                let _ = reply.send(());
            }
            Request::Unsubscribe(id, reply) => {
                self.unsubscribe(&id);
                let _ = reply.send(());
            }
        }
    }

    // ── caller operations ───────────────────────────────────────────────────

    fn start(&mut self) {
        if self.state != SessionState::Disconnected {
            debug!(state = %self.state, "start ignored: session already active");
            return;
        }
        if self.registry.is_empty() {
            for spec in &self.config.subscriptions {
                self.registry.add(spec.clone());
            }
        }
        self.connect();
    }

    fn stop(&mut self) {
        if self.closing {
            return;
        }
        self.cancel_timer();

        match self.state {
            SessionState::Connected => {
                // A refused unsubscribe ends the session right here.
                self.closing = true;
                for id in self.registry.ids() {
                    self.write(codec::encode_unsubscribe(&id).to_string());
                }
                self.registry.clear();
                match &self.link {
                    Some(link) => {
                        info!(endpoint = %self.config.endpoint, "closing gateway session");
                        link.close(NORMAL_CLOSURE, "session stopped");
                        self.arm_timer(TimerKind::CloseDeadline, CLOSE_TIMEOUT);
                    }
                    None => self.finish_disconnect(),
                }
            }
            SessionState::Connecting | SessionState::Reconnecting => {
                self.registry.clear();
                self.retire_link();
                self.finish_disconnect();
            }
            SessionState::Disconnected => {
                self.registry.clear();
            }
        }
    }

    fn send_command(&mut self, intent: CommandIntent) -> Result<(), BridgeError> {
        if self.state != SessionState::Connected || self.closing {
            debug!(topic = intent.topic(), state = %self.state, "command dropped: not connected");
            return Err(BridgeError::NotConnected);
        }
        let Some(link) = &self.link else {
            return Err(BridgeError::NotConnected);
        };

        let topic = intent.topic();
        match link.send(codec::encode_intent(&intent).to_string()) {
            Ok(()) => {
                debug!(topic, "command sent");
                Ok(())
            }
            Err(e) => {
                warn!(topic, error = %e, "command send failed");
                let reason = e.to_string();
                self.observer.on_command_send_failed(&reason);
                self.on_failed(&reason);
                Err(e)
            }
        }
    }

    fn subscribe(&mut self, spec: SubscriptionSpec) {
        if self.is_live() {
            self.write(codec::encode_subscribe(&spec.topic, &spec.msg_type, &spec.id).to_string());
        }
        self.registry.add(spec);
    }

    fn unsubscribe(&mut self, id: &str) {
        if self.registry.remove(id).is_some() && self.is_live() {
            self.write(codec::encode_unsubscribe(id).to_string());
        }
    }

    // ── transport callbacks ─────────────────────────────────────────────────

    fn handle_transport(&mut self, tagged: TaggedEvent) {
        if tagged.epoch != self.epoch || self.link.is_none() {
            debug!(epoch = tagged.epoch, current = self.epoch, "stale transport event dropped");
            return;
        }

        match tagged.event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Failed(reason) => self.on_failed(&reason),
            TransportEvent::Closed { code, reason } => self.on_closed(code, &reason),
        }
    }

    fn on_opened(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(state = %self.state, "unexpected open ignored");
            return;
        }
        info!(endpoint = %self.config.endpoint, epoch = self.epoch, "gateway connected");
        self.set_state(SessionState::Connected);

        let subscribe_frames: Vec<String> = self
            .registry
            .all_active()
            .iter()
            .map(|spec| codec::encode_subscribe(&spec.topic, &spec.msg_type, &spec.id).to_string())
            .collect();
        for frame in subscribe_frames {
            self.write(frame);
        }
        if !self.is_live() {
            return;
        }

        self.observer.on_connectivity_changed(Connectivity::Connected);
    }

    fn on_message(&mut self, text: &str) {
        if !self.is_live() {
            return;
        }
        match codec::decode(text) {
            Ok(Decoded::Event(event)) => dispatch(self.observer.as_ref(), &event),
            Ok(Decoded::Ignored(reason)) => debug!(%reason, "frame ignored"),
            Err(e) => warn!(error = %e, "frame dropped"),
        }
    }

    fn on_failed(&mut self, reason: &str) {
        self.retire_link();
        if self.closing {
            self.finish_disconnect();
            return;
        }
        if !matches!(self.state, SessionState::Connecting | SessionState::Connected) {
            return;
        }

        warn!(
            endpoint = %self.config.endpoint,
            error = reason,
            retry_in_ms = self.config.retry_delay.as_millis() as u64,
            "gateway connection failed"
        );
        self.set_state(SessionState::Reconnecting);
        self.observer.on_connectivity_changed(Connectivity::Failed);
        self.arm_timer(TimerKind::Retry, self.config.retry_delay);
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        info!(endpoint = %self.config.endpoint, code, reason, "gateway connection closed");
        self.retire_link();
        self.finish_disconnect();
    }

    // ── timers ──────────────────────────────────────────────────────────────

    fn arm_timer(&mut self, kind: TimerKind, delay: Duration) {
        self.generation += 1;
        self.timer = Some(Timer {
            generation: self.generation,
            kind,
            sleep: Box::pin(tokio::time::sleep(delay)),
        });
    }

    fn cancel_timer(&mut self) {
        self.generation += 1;
        self.timer = None;
    }

    fn on_timer_elapsed(&mut self, generation: u64, kind: TimerKind) {
        self.timer = None;
        if generation != self.generation {
            debug!(generation, current = self.generation, ?kind, "stale timer ignored");
            return;
        }
        match kind {
            TimerKind::Retry if self.state == SessionState::Reconnecting => {
                info!(endpoint = %self.config.endpoint, "retrying gateway connection");
                self.connect();
            }
            TimerKind::CloseDeadline if self.closing => {
                warn!(
                    endpoint = %self.config.endpoint,
                    timeout_ms = CLOSE_TIMEOUT.as_millis() as u64,
                    "gateway did not confirm the close; dropping the link"
                );
                self.retire_link();
                self.finish_disconnect();
            }
            _ => debug!(?kind, state = %self.state, "timer no longer applies"),
        }
    }

    // ── helpers ─────────────────────────────────────────────────────────────

    fn connect(&mut self) {
        self.epoch += 1;
        self.set_state(SessionState::Connecting);
        let sink = EventSink::new(self.epoch, self.events_tx.clone());
        self.link = Some(self.connector.connect(&self.config.endpoint, sink));
    }

    /// Drop the current link and invalidate any callbacks it may still raise.
    fn retire_link(&mut self) {
        self.link = None;
        self.epoch += 1;
    }

    fn finish_disconnect(&mut self) {
        self.cancel_timer();
        self.closing = false;
        if self.state != SessionState::Disconnected {
            self.set_state(SessionState::Disconnected);
            self.observer.on_connectivity_changed(Connectivity::Closed);
        }
    }

    fn is_live(&self) -> bool {
        self.state == SessionState::Connected && !self.closing
    }

    /// Write a control frame; a refused write fails the link.
    fn write(&mut self, frame: String) {
        let Some(link) = &self.link else {
            return;
        };
        if let Err(e) = link.send(frame) {
            warn!(error = %e, "control frame not written");
            self.on_failed(&e.to_string());
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "session state");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Resolves with the timer's generation and kind once it fires; pending
/// while unarmed.
fn timer_elapsed(timer: &mut Option<Timer>) -> impl Future<Output = (u64, TimerKind)> + '_ {
    async move {
        match timer {
            Some(timer) => {
                timer.sleep.as_mut().await;
                (timer.generation, timer.kind)
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanedrive_types::{DriveCommand, topics};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tokio::sync::mpsc::error::TryRecvError;

    // ── fakes ───────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct Wire {
        sinks: Vec<EventSink>,
        sent: Vec<(u64, String)>,
        closes: Vec<(u64, u16, String)>,
        refuse_sends: bool,
    }

    #[derive(Clone, Default)]
    struct FakeConnector(Arc<Mutex<Wire>>);

    impl FakeConnector {
        fn attempts(&self) -> usize {
            self.0.lock().unwrap().sinks.len()
        }

        fn sink(&self, attempt: usize) -> EventSink {
            self.0.lock().unwrap().sinks[attempt].clone()
        }

        fn emit(&self, attempt: usize, event: TransportEvent) {
            self.sink(attempt).emit(event);
        }

        /// Frames written on the link created by `attempt`, parsed.
        fn frames(&self, attempt: usize) -> Vec<Value> {
            let epoch = self.sink(attempt).epoch();
            self.0
                .lock()
                .unwrap()
                .sent
                .iter()
                .filter(|(e, _)| *e == epoch)
                .map(|(_, text)| serde_json::from_str(text).unwrap())
                .collect()
        }

        fn closes(&self) -> Vec<(u16, String)> {
            self.0
                .lock()
                .unwrap()
                .closes
                .iter()
                .map(|(_, code, reason)| (*code, reason.clone()))
                .collect()
        }

        fn refuse_sends(&self) {
            self.0.lock().unwrap().refuse_sends = true;
        }

        fn accept_sends(&self) {
            self.0.lock().unwrap().refuse_sends = false;
        }
    }

    impl Connector for FakeConnector {
        fn connect(&self, _endpoint: &GatewayEndpoint, events: EventSink) -> Box<dyn TransportLink> {
            let epoch = events.epoch();
            self.0.lock().unwrap().sinks.push(events);
            Box::new(FakeLink { epoch, wire: Arc::clone(&self.0) })
        }
    }

    struct FakeLink {
        epoch: u64,
        wire: Arc<Mutex<Wire>>,
    }

    impl TransportLink for FakeLink {
        fn send(&self, text: String) -> Result<(), BridgeError> {
            let mut wire = self.wire.lock().unwrap();
            if wire.refuse_sends {
                return Err(BridgeError::Transport("broken pipe".to_string()));
            }
            wire.sent.push((self.epoch, text));
            Ok(())
        }

        fn close(&self, code: u16, reason: &str) {
            self.wire.lock().unwrap().closes.push((self.epoch, code, reason.to_string()));
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Connectivity(Connectivity),
        Battery(u8),
        Odometry(f64, f64),
        SendFailed(String),
    }

    struct Recorder(mpsc::UnboundedSender<Seen>);

    impl Observer for Recorder {
        fn on_connectivity_changed(&self, state: Connectivity) {
            let _ = self.0.send(Seen::Connectivity(state));
        }
        fn on_battery(&self, percent: u8) {
            let _ = self.0.send(Seen::Battery(percent));
        }
        fn on_odometry(&self, velocity: f64, distance: f64) {
            let _ = self.0.send(Seen::Odometry(velocity, distance));
        }
        fn on_command_send_failed(&self, reason: &str) {
            let _ = self.0.send(Seen::SendFailed(reason.to_string()));
        }
    }

    struct Harness {
        handle: SessionHandle,
        wire: FakeConnector,
        seen: mpsc::UnboundedReceiver<Seen>,
    }

    impl Harness {
        fn new(subscriptions: Vec<SubscriptionSpec>) -> Self {
            let wire = FakeConnector::default();
            let (tx, seen) = mpsc::unbounded_channel();
            let config = SessionConfig::new(GatewayEndpoint::parse("ws://gateway.test:9090").unwrap())
                .with_subscriptions(subscriptions);
            let handle = Session::spawn(config, Arc::new(wire.clone()), Arc::new(Recorder(tx)));
            Self { handle, wire, seen }
        }

        async fn next_seen(&mut self) -> Seen {
            self.seen.recv().await.expect("observer channel open")
        }

        /// `start()` and open the first link.
        async fn connected(subscriptions: Vec<SubscriptionSpec>) -> Self {
            let mut h = Self::new(subscriptions);
            h.handle.start().await.unwrap();
            h.wire.emit(0, TransportEvent::Opened);
            assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Connected));
            h
        }

        async fn wait_for_state(&self, state: SessionState) {
            self.handle
                .watch_state()
                .wait_for(|s| *s == state)
                .await
                .expect("session task alive");
        }
    }

    fn spec(id: &str, topic: &str) -> SubscriptionSpec {
        SubscriptionSpec::new(id, topic, "std_msgs/msg/String")
    }

    fn battery_frame(percentage: f64) -> TransportEvent {
        TransportEvent::Message(
            json!({ "op": "publish", "topic": "/battery_state", "msg": { "percentage": percentage } })
                .to_string(),
        )
    }

    // ── lifecycle ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_connects_once() {
        let h = Harness::new(default_subscriptions());
        assert_eq!(h.handle.state(), SessionState::Disconnected);

        h.handle.start().await.unwrap();
        assert_eq!(h.handle.state(), SessionState::Connecting);
        assert_eq!(h.wire.attempts(), 1);

        h.handle.start().await.unwrap();
        assert_eq!(h.wire.attempts(), 1, "second start must be a no-op");
    }

    #[tokio::test]
    async fn open_subscribes_to_every_registered_topic_in_order() {
        let h = Harness::connected(default_subscriptions()).await;
        assert_eq!(h.handle.state(), SessionState::Connected);

        let frames = h.wire.frames(0);
        let ids: Vec<&str> = frames.iter().map(|f| f["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["sub_battery", "sub_odom", "sub_imu", "sub_camera"]);
        assert!(frames.iter().all(|f| f["op"] == "subscribe"));
        assert_eq!(frames[0]["topic"], "/battery_state");
        assert_eq!(frames[0]["type"], "sensor_msgs/msg/BatteryState");
    }

    #[tokio::test]
    async fn inbound_frames_reach_the_observer() {
        let mut h = Harness::connected(default_subscriptions()).await;

        h.wire.emit(0, battery_frame(0.87));
        assert_eq!(h.next_seen().await, Seen::Battery(87));

        h.wire.emit(
            0,
            TransportEvent::Message(
                json!({
                    "op": "publish",
                    "topic": "/odom",
                    "msg": { "twist": { "twist": { "linear": { "x": 0.25 } } },
                             "pose": { "pose": { "position": { "x": 3.5 } } } }
                })
                .to_string(),
            ),
        );
        assert_eq!(h.next_seen().await, Seen::Odometry(0.25, 3.5));
    }

    #[tokio::test]
    async fn malformed_frames_do_not_end_the_session() {
        let mut h = Harness::connected(default_subscriptions()).await;

        h.wire.emit(0, TransportEvent::Message("not json".to_string()));
        h.wire.emit(0, TransportEvent::Message(r#"{"op":"publish","topic":"/unknown","msg":{}}"#.to_string()));
        h.wire.emit(0, battery_frame(50.0));

        assert_eq!(h.next_seen().await, Seen::Battery(50));
        assert_eq!(h.handle.state(), SessionState::Connected);
    }

    // ── retry ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn failure_retries_once_after_the_fixed_delay() {
        let mut h = Harness::connected(default_subscriptions()).await;
        let failed_at = tokio::time::Instant::now();

        h.wire.emit(0, TransportEvent::Failed("connection reset".to_string()));
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Failed));
        assert_eq!(h.handle.state(), SessionState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(h.wire.attempts(), 1, "no attempt before the delay elapses");

        h.wait_for_state(SessionState::Connecting).await;
        assert!(failed_at.elapsed() >= DEFAULT_RETRY_DELAY);
        assert_eq!(h.wire.attempts(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.wire.attempts(), 2, "only one timer per failure");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_keeps_retrying() {
        let mut h = Harness::new(default_subscriptions());
        h.handle.start().await.unwrap();

        for attempt in 0..3 {
            h.wire.emit(attempt, TransportEvent::Failed("refused".to_string()));
            assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Failed));
            h.wait_for_state(SessionState::Connecting).await;
        }
        assert_eq!(h.wire.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_a_pending_retry() {
        let mut h = Harness::connected(default_subscriptions()).await;
        h.wire.emit(0, TransportEvent::Failed("gone".to_string()));
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Failed));

        h.handle.stop().await.unwrap();
        assert_eq!(h.handle.state(), SessionState::Disconnected);
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Closed));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.wire.attempts(), 1);
        assert_eq!(h.handle.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resubscribes_exactly_the_registered_set() {
        let mut h = Harness::connected(vec![spec("a", "/a"), spec("b", "/b")]).await;

        h.handle.subscribe(spec("c", "/c")).await.unwrap();
        h.handle.unsubscribe("a").await.unwrap();

        h.wire.emit(0, TransportEvent::Failed("reset".to_string()));
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Failed));
        h.wait_for_state(SessionState::Connecting).await;

        h.wire.emit(1, TransportEvent::Opened);
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Connected));

        let resent: Vec<(String, String)> = h
            .wire
            .frames(1)
            .iter()
            .map(|f| (f["op"].as_str().unwrap().to_string(), f["id"].as_str().unwrap().to_string()))
            .collect();
        assert_eq!(
            resent,
            vec![
                ("subscribe".to_string(), "b".to_string()),
                ("subscribe".to_string(), "c".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn events_from_an_abandoned_link_are_ignored() {
        let mut h = Harness::new(default_subscriptions());
        h.handle.start().await.unwrap();
        h.wire.emit(0, TransportEvent::Failed("refused".to_string()));
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Failed));

        // Late callbacks from the first link.
        h.wire.emit(0, TransportEvent::Opened);
        h.wire.emit(0, battery_frame(0.5));
        h.wire.emit(0, TransportEvent::Closed { code: 1000, reason: String::new() });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.handle.state(), SessionState::Reconnecting);
        assert_eq!(h.seen.try_recv(), Err(TryRecvError::Empty));
        assert!(h.wire.frames(0).is_empty());
    }

    // ── commands ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn commands_require_a_connection() {
        let h = Harness::new(default_subscriptions());
        let result = h.handle.send_command(CommandIntent::Drive(DriveCommand::Start)).await;
        assert_eq!(result, Err(BridgeError::NotConnected));

        h.handle.start().await.unwrap();
        let result = h.handle.send_command(CommandIntent::EmergencyStop).await;
        assert_eq!(result, Err(BridgeError::NotConnected));
        assert!(h.wire.frames(0).is_empty(), "nothing may be written while connecting");
    }

    #[tokio::test]
    async fn commands_are_published_when_connected() {
        let h = Harness::connected(Vec::new()).await;

        h.handle
            .send_command(CommandIntent::Drive(DriveCommand::Start))
            .await
            .unwrap();
        h.handle
            .send_command(CommandIntent::Velocity { linear: 0.2, angular: -0.1 })
            .await
            .unwrap();

        let frames = h.wire.frames(0);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["op"], "publish");
        assert_eq!(frames[0]["topic"], topics::CMD_DRIVE);
        assert_eq!(frames[0]["msg"]["data"], "start");
        assert_eq!(frames[1]["topic"], topics::CMD_VEL);
        assert_eq!(frames[1]["msg"]["angular"]["z"], -0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_command_write_fails_the_link_and_reconnects() {
        let mut h = Harness::connected(Vec::new()).await;
        h.wire.refuse_sends();

        let result = h.handle.send_command(CommandIntent::EmergencyStop).await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert!(matches!(h.next_seen().await, Seen::SendFailed(reason) if reason.contains("broken pipe")));
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Failed));
        assert_eq!(h.handle.state(), SessionState::Reconnecting);

        let result = h.handle.send_command(CommandIntent::EmergencyStop).await;
        assert_eq!(result, Err(BridgeError::NotConnected));

        h.wait_for_state(SessionState::Connecting).await;
        assert_eq!(h.wire.attempts(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.wire.attempts(), 2, "one retry per failure");
    }

    #[tokio::test(start_paused = true)]
    async fn refused_subscribe_frame_fails_the_link_and_keeps_the_registration() {
        let mut h = Harness::connected(Vec::new()).await;
        h.wire.refuse_sends();

        h.handle.subscribe(spec("a", "/a")).await.unwrap();
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Failed));
        assert_eq!(h.handle.state(), SessionState::Reconnecting);

        h.wire.accept_sends();
        h.wait_for_state(SessionState::Connecting).await;
        h.wire.emit(1, TransportEvent::Opened);
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Connected));
        assert_eq!(h.wire.frames(1)[0]["id"], "a");
    }

    // ── stop ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stop_unsubscribes_then_closes_normally() {
        let mut h = Harness::connected(default_subscriptions()).await;

        h.handle.stop().await.unwrap();

        let frames = h.wire.frames(0);
        let unsubscribed: Vec<&str> = frames[4..]
            .iter()
            .inspect(|f| assert_eq!(f["op"], "unsubscribe"))
            .map(|f| f["id"].as_str().unwrap())
            .collect();
        assert_eq!(unsubscribed, vec!["sub_battery", "sub_odom", "sub_imu", "sub_camera"]);
        assert_eq!(h.wire.closes(), vec![(NORMAL_CLOSURE, "session stopped".to_string())]);

        // Commands are refused while the close handshake is in flight.
        let result = h.handle.send_command(CommandIntent::EmergencyStop).await;
        assert_eq!(result, Err(BridgeError::NotConnected));

        h.wire.emit(0, TransportEvent::Closed { code: NORMAL_CLOSURE, reason: String::new() });
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Closed));
        assert_eq!(h.handle.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn failure_during_close_still_ends_disconnected() {
        let mut h = Harness::connected(default_subscriptions()).await;
        h.handle.stop().await.unwrap();

        h.wire.emit(0, TransportEvent::Failed("reset during close".to_string()));
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Closed));
        assert_eq!(h.handle.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_close_is_abandoned_after_the_timeout() {
        let mut h = Harness::connected(default_subscriptions()).await;
        h.handle.stop().await.unwrap();
        assert_eq!(h.handle.state(), SessionState::Connected, "close still in flight");

        tokio::time::sleep(CLOSE_TIMEOUT - Duration::from_millis(1)).await;
        assert_eq!(h.seen.try_recv(), Err(TryRecvError::Empty));

        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Closed));
        assert_eq!(h.handle.state(), SessionState::Disconnected);

        // The session is usable again.
        h.handle.start().await.unwrap();
        assert_eq!(h.wire.attempts(), 2);
        assert_eq!(h.handle.state(), SessionState::Connecting);

        // A confirmation that arrives too late belongs to a retired link.
        h.wire.emit(0, TransportEvent::Closed { code: NORMAL_CLOSURE, reason: String::new() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.handle.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn refused_unsubscribe_during_stop_ends_disconnected() {
        let mut h = Harness::connected(default_subscriptions()).await;
        h.wire.refuse_sends();

        h.handle.stop().await.unwrap();
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Closed));
        assert_eq!(h.handle.state(), SessionState::Disconnected);
        assert!(h.wire.closes().is_empty(), "no close on a failed link");
    }

    #[tokio::test]
    async fn peer_close_keeps_registrations_for_the_next_start() {
        let mut h = Harness::connected(vec![spec("a", "/a")]).await;
        h.handle.subscribe(spec("b", "/b")).await.unwrap();

        h.wire.emit(0, TransportEvent::Closed { code: 1001, reason: "going away".to_string() });
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Closed));

        h.handle.start().await.unwrap();
        h.wire.emit(1, TransportEvent::Opened);
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Connected));

        let ids: Vec<String> = h.wire.frames(1).iter().map(|f| f["id"].as_str().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn start_after_stop_reseeds_configured_subscriptions() {
        let mut h = Harness::connected(vec![spec("a", "/a")]).await;
        h.handle.stop().await.unwrap();
        h.wire.emit(0, TransportEvent::Closed { code: NORMAL_CLOSURE, reason: String::new() });
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Closed));

        h.handle.start().await.unwrap();
        h.wire.emit(1, TransportEvent::Opened);
        assert_eq!(h.next_seen().await, Seen::Connectivity(Connectivity::Connected));
        assert_eq!(h.wire.frames(1)[0]["id"], "a");
    }

    #[tokio::test]
    async fn dropped_handles_end_the_task() {
        let h = Harness::new(Vec::new());
        let mut state = h.handle.watch_state();
        drop(h.handle);
        // The watch sender lives in the task; its drop closes the channel.
        assert!(state.changed().await.is_err());
    }
}
