//! Headless, topic-based fan-out of session callbacks.
//!
//! [`EventBus`] implements [`Observer`], so it can be handed straight to
//! [`Session::spawn`][crate::session::Session::spawn].  Every callback is
//! wrapped in an [`Event`] and pushed onto [`tokio::sync::broadcast`]
//! channels; the session task never waits on a slow consumer, and a
//! consumer that falls behind sees `Lagged` instead of stalling everyone
//! else.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Status`] | Connectivity transitions, failed command writes |
//! | [`Topic::Telemetry`] | Battery, odometry and orientation samples |
//! | [`Topic::Camera`] | Decoded image frames |
//!
//! Camera frames get their own lane because they are large; a status
//! consumer should not have to clone them just to skip them.

use lanedrive_types::{Connectivity, EulerAngles, Event, EventPayload, ImageFrame, OdometrySample};
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::observer::Observer;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Prefix for the `source` field of every event the bus publishes.
pub const SESSION_SOURCE: &str = "lanedrive-middleware::session";

/// Routing lanes on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Connectivity transitions and command-write failures.
    Status,
    /// Battery, odometry and orientation samples.
    Telemetry,
    /// Decoded camera frames.
    Camera,
}

impl Topic {
    fn of(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::Connectivity(_) | EventPayload::CommandSendFailed(_) => Topic::Status,
            EventPayload::Battery { .. }
            | EventPayload::Odometry(_)
            | EventPayload::Orientation(_) => Topic::Telemetry,
            EventPayload::ImageFrame(_) => Topic::Camera,
        }
    }
}

/// Shared event bus. Clone it cheaply; all clones share the same channels.
///
/// Every event goes to its [`Topic`] lane and to the global channel returned
/// by [`subscribe`][Self::subscribe].
#[derive(Clone, Debug)]
pub struct EventBus {
    all: broadcast::Sender<Event>,
    status: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
    camera: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (camera, _) = broadcast::channel(capacity);
        Self {
            all,
            status,
            telemetry,
            camera,
        }
    }

    /// Publish `event` on its lane and on the global channel.
    ///
    /// Returns the number of receivers handed the event.  Zero listeners is
    /// a normal condition, not an error.
    pub fn publish(&self, event: Event) -> usize {
        let topic = Topic::of(&event.payload);
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let on_all = self.all.send(event).unwrap_or(0);
        if on_topic + on_all == 0 {
            trace!(?topic, "event published with no subscribers");
        }
        on_topic + on_all
    }

    /// Every event, regardless of topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Only events routed to `topic`.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Status => &self.status,
            Topic::Telemetry => &self.telemetry,
            Topic::Camera => &self.camera,
        }
    }

    fn emit(&self, lane: &str, payload: EventPayload) {
        self.publish(Event::new(format!("{SESSION_SOURCE}/{lane}"), payload));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Observer for EventBus {
    fn on_connectivity_changed(&self, state: Connectivity) {
        self.emit("connectivity", EventPayload::Connectivity(state));
    }

    fn on_battery(&self, percent: u8) {
        self.emit("battery", EventPayload::Battery { percent });
    }

    fn on_odometry(&self, velocity: f64, distance: f64) {
        self.emit(
            "odom",
            EventPayload::Odometry(OdometrySample {
                linear_velocity: velocity,
                position_x: distance,
            }),
        );
    }

    fn on_orientation(&self, roll: f64, pitch: f64, yaw: f64) {
        self.emit("imu", EventPayload::Orientation(EulerAngles { roll, pitch, yaw }));
    }

    fn on_image_frame(&self, frame: &ImageFrame) {
        self.emit("camera", EventPayload::ImageFrame(frame.clone()));
    }

    fn on_command_send_failed(&self, reason: &str) {
        self.emit("command", EventPayload::CommandSendFailed(reason.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Topic-bound receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] lane.
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this lane.
    ///
    /// Lag is logged and skipped.  Returns `None` once every bus clone has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "topic receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn observer_callbacks_become_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.on_battery(42);
        bus.on_connectivity_changed(Connectivity::Connected);

        let battery = rx.recv().await?;
        assert_eq!(battery.source, "lanedrive-middleware::session/battery");
        assert!(matches!(battery.payload, EventPayload::Battery { percent: 42 }));

        let status = rx.recv().await?;
        assert!(matches!(
            status.payload,
            EventPayload::Connectivity(Connectivity::Connected)
        ));
        assert_ne!(battery.id, status.id);
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.on_odometry(0.5, 12.0);

        let a = rx1.recv().await?;
        let b = rx2.recv().await?;
        assert_eq!(a.id, b.id);
        Ok(())
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(Event::new("test", EventPayload::Battery { percent: 1 })), 0);
        // Observer path must not panic either.
        bus.on_image_frame(&ImageFrame { width: 1, height: 1, pixels: vec![0] });
    }

    /// Telemetry subscribers never see camera frames.
    #[tokio::test]
    async fn topics_are_routed_independently() {
        let bus = EventBus::default();
        let mut telemetry = bus.subscribe_to(Topic::Telemetry);
        let mut camera = bus.subscribe_to(Topic::Camera);

        bus.on_image_frame(&ImageFrame { width: 2, height: 1, pixels: vec![0, 0] });

        let frame = camera.recv().await.expect("camera lane must receive");
        assert!(matches!(frame.payload, EventPayload::ImageFrame(ref f) if f.width == 2));

        let result = tokio::time::timeout(Duration::from_millis(50), telemetry.recv()).await;
        assert!(result.is_err(), "telemetry lane must not receive a camera frame");
    }

    /// A subscriber that falls behind skips ahead instead of blocking the
    /// publisher.
    #[tokio::test]
    async fn slow_topic_subscriber_skips_lagged_events() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Telemetry);

        for percent in 0..100u8 {
            bus.on_battery(percent);
        }

        let first = slow.recv().await.expect("bus still open");
        match first.payload {
            EventPayload::Battery { percent } => assert_eq!(percent, 96),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn receiver_ends_when_bus_is_dropped() {
        let bus = EventBus::default();
        let mut status = bus.subscribe_to(Topic::Status);
        drop(bus);
        assert!(status.recv().await.is_none());
    }
}
