//! The presentation-facing side of the session.
//!
//! A [`SessionHandle`][crate::session::SessionHandle] never talks to a UI
//! directly.  It calls an [`Observer`] on its own task, in order, for every
//! decoded sample and every connectivity transition.  Implementations must
//! return quickly; anything slow belongs behind a channel such as
//! [`EventBus`][crate::bus::EventBus].

use lanedrive_types::{Connectivity, DecodedEvent, ImageFrame};

/// Receives decoded sensor updates and connectivity transitions.
///
/// Every method has an empty default so implementors only override what
/// they consume.
pub trait Observer: Send + Sync {
    fn on_connectivity_changed(&self, _state: Connectivity) {}

    /// Battery charge, whole percent in `0..=100`.
    fn on_battery(&self, _percent: u8) {}

    /// Forward velocity (m/s) and travelled distance along x (m).
    fn on_odometry(&self, _velocity: f64, _distance: f64) {}

    /// Euler angles in degrees.
    fn on_orientation(&self, _roll: f64, _pitch: f64, _yaw: f64) {}

    fn on_image_frame(&self, _frame: &ImageFrame) {}

    /// An outbound command could not be written to the transport.
    fn on_command_send_failed(&self, _reason: &str) {}
}

/// Route a decoded event to the matching observer callback.
pub fn dispatch(observer: &dyn Observer, event: &DecodedEvent) {
    match event {
        DecodedEvent::Battery(reading) => observer.on_battery(reading.percent()),
        DecodedEvent::Odometry(sample) => {
            observer.on_odometry(sample.linear_velocity, sample.position_x)
        }
        DecodedEvent::Orientation { euler, .. } => {
            observer.on_orientation(euler.roll, euler.pitch, euler.yaw)
        }
        DecodedEvent::Image(frame) => observer.on_image_frame(frame),
    }
}

/// An observer that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}
