//! `lanedrive-types` – shared vocabulary for the gateway bridge.
//!
//! Plain value types only: command intents produced by the operator,
//! decoded sensor samples produced by the codec, the session/connectivity
//! states, the bus [`Event`] wrapper and the [`BridgeError`] taxonomy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Topic names used on the wire.
pub mod topics {
    pub const BATTERY_STATE: &str = "/battery_state";
    pub const ODOM: &str = "/odom";
    pub const IMU: &str = "/imu";
    pub const LANE_IMAGE_RAW: &str = "/lane_image_raw";

    pub const CMD_DRIVE: &str = "/cmd_drive";
    pub const LANE_CHANGE_CMD: &str = "/lane_change_cmd";
    pub const CMD_VEL: &str = "/cmd_vel";
    pub const EMERGENCY_STOP: &str = "/emergency_stop";
    pub const GOAL_POSE: &str = "/goal_pose";
}

// ────────────────────────────────────────────────────────────────────────────
// Gateway endpoint
// ────────────────────────────────────────────────────────────────────────────

/// WebSocket URI of the bridge server. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatewayEndpoint(String);

impl GatewayEndpoint {
    /// Validate and wrap a `ws://` or `wss://` URI.
    pub fn parse(uri: impl Into<String>) -> Result<Self, BridgeError> {
        let uri = uri.into();
        let trimmed = uri.trim();
        let rest = trimmed
            .strip_prefix("ws://")
            .or_else(|| trimmed.strip_prefix("wss://"));
        match rest {
            Some(host) if !host.is_empty() => Ok(Self(trimmed.to_string())),
            _ => Err(BridgeError::InvalidEndpoint(uri)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session / connectivity
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last attempt failed; a retry timer is pending.
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

/// Connectivity transition reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connectivity {
    Connected,
    Failed,
    Closed,
}

/// One subscription the session keeps open on the gateway.
///
/// `id` is the key used for the later unsubscribe and must be unique across
/// the active set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub id: String,
    pub topic: String,
    #[serde(rename = "type")]
    pub msg_type: String,
}

impl SubscriptionSpec {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        msg_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            msg_type: msg_type.into(),
        }
    }
}

/// The battery, odometry, IMU and camera subscriptions, in that order.
pub fn default_subscriptions() -> Vec<SubscriptionSpec> {
    vec![
        SubscriptionSpec::new("sub_battery", topics::BATTERY_STATE, "sensor_msgs/msg/BatteryState"),
        SubscriptionSpec::new("sub_odom", topics::ODOM, "nav_msgs/msg/Odometry"),
        SubscriptionSpec::new("sub_imu", topics::IMU, "sensor_msgs/msg/Imu"),
        SubscriptionSpec::new("sub_camera", topics::LANE_IMAGE_RAW, "sensor_msgs/msg/Image"),
    ]
}

// ────────────────────────────────────────────────────────────────────────────
// Command intents
// ────────────────────────────────────────────────────────────────────────────

/// Words understood by the robot-side command executor on `/cmd_drive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveCommand {
    Start,
    Stop,
    #[serde(rename = "up")]
    SpeedUp,
    #[serde(rename = "down")]
    SpeedDown,
    Emergency,
}

impl DriveCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveCommand::Start => "start",
            DriveCommand::Stop => "stop",
            DriveCommand::SpeedUp => "up",
            DriveCommand::SpeedDown => "down",
            DriveCommand::Emergency => "emergency",
        }
    }
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriveCommand {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(DriveCommand::Start),
            "stop" => Ok(DriveCommand::Stop),
            "up" => Ok(DriveCommand::SpeedUp),
            "down" => Ok(DriveCommand::SpeedDown),
            "emergency" => Ok(DriveCommand::Emergency),
            other => Err(BridgeError::InvalidCommand(format!("unknown drive command '{other}'"))),
        }
    }
}

/// Lane-change direction published on `/lane_change_cmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneDirection {
    Left,
    Right,
}

impl LaneDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneDirection::Left => "left",
            LaneDirection::Right => "right",
        }
    }
}

impl fmt::Display for LaneDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaneDirection {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(LaneDirection::Left),
            "right" => Ok(LaneDirection::Right),
            other => Err(BridgeError::InvalidCommand(format!("unknown lane direction '{other}'"))),
        }
    }
}

/// An outbound command, consumed exactly once by the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum CommandIntent {
    Drive(DriveCommand),
    LaneChange(LaneDirection),
    /// `geometry_msgs/Twist` on `/cmd_vel`.
    Velocity { linear: f64, angular: f64 },
    EmergencyStop,
    /// Navigation goal in the `map` frame; `yaw` in radians.
    GoalPose { x: f64, y: f64, yaw: f64 },
}

impl CommandIntent {
    /// Topic the intent is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            CommandIntent::Drive(_) => topics::CMD_DRIVE,
            CommandIntent::LaneChange(_) => topics::LANE_CHANGE_CMD,
            CommandIntent::Velocity { .. } => topics::CMD_VEL,
            CommandIntent::EmergencyStop => topics::EMERGENCY_STOP,
            CommandIntent::GoalPose { .. } => topics::GOAL_POSE,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decoded sensor samples
// ────────────────────────────────────────────────────────────────────────────

/// Voltage of a fully charged 3S pack.
pub const NOMINAL_FULL_VOLTAGE: f64 = 12.6;

/// Battery charge as a fraction clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading(f64);

impl BatteryReading {
    /// From a `percentage` field, accepting either a `0..=1` fraction or a
    /// `0..=100` percentage.
    pub fn from_percentage(percentage: f64) -> Self {
        let fraction = if percentage > 1.0 { percentage / 100.0 } else { percentage };
        Self::from_fraction(fraction)
    }

    /// From a pack voltage, relative to [`NOMINAL_FULL_VOLTAGE`].
    pub fn from_voltage(voltage: f64) -> Self {
        Self::from_fraction(voltage / NOMINAL_FULL_VOLTAGE)
    }

    pub fn from_fraction(fraction: f64) -> Self {
        if fraction.is_nan() {
            return Self(0.0);
        }
        Self(fraction.clamp(0.0, 1.0))
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }

    /// Whole percent, rounded to nearest.
    pub fn percent(&self) -> u8 {
        (self.0 * 100.0).round() as u8
    }
}

/// Forward velocity and travelled distance along x, both in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OdometrySample {
    pub linear_velocity: f64,
    pub position_x: f64,
}

/// Orientation quaternion as published on `/imu`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for OrientationSample {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

/// Roll, pitch and yaw in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Pixel layouts the image decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelEncoding {
    Rgb8,
    Bgr8,
}

impl PixelEncoding {
    /// Map a ROS encoding tag; `None` for anything unsupported.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "rgb8" => Some(PixelEncoding::Rgb8),
            "bgr8" => Some(PixelEncoding::Bgr8),
            _ => None,
        }
    }
}

/// Decoded camera frame, row-major, one `0xAARRGGBB` word per pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

/// A successfully decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Battery(BatteryReading),
    Odometry(OdometrySample),
    Orientation {
        quaternion: OrientationSample,
        euler: EulerAngles,
    },
    Image(ImageFrame),
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Envelope for everything fanned out on the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "lanedrive-middleware::session/imu"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Observer callbacks, reified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Connectivity(Connectivity),
    Battery { percent: u8 },
    Odometry(OdometrySample),
    Orientation(EulerAngles),
    ImageFrame(ImageFrame),
    CommandSendFailed(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Every failure the bridge can report. None of them is fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Unsupported Image Encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Not Connected: command dropped")]
    NotConnected,

    #[error("Session task has shut down")]
    SessionClosed,

    #[error("Invalid Gateway Endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid Command: {0}")]
    InvalidCommand(String),
}
