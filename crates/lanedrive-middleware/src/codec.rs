//! rosbridge JSON envelope codec.
//!
//! Every frame on the wire is a JSON object of the shape
//! `{op, topic?, type?, id?, msg?}` with `op` one of `subscribe`,
//! `unsubscribe` or `publish`.
//!
//! * **Encoders** build outbound envelopes from already-validated values and
//!   cannot fail.
//! * [`decode`] parses an inbound frame and dispatches on its `topic`.  A
//!   frame the bridge has no use for is [`Decoded::Ignored`]; only malformed
//!   JSON or a malformed payload on a known topic is an error.
//!
//! Nothing here performs I/O.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use lanedrive_types::{
    BatteryReading, BridgeError, CommandIntent, DecodedEvent, EulerAngles, ImageFrame,
    OdometrySample, OrientationSample, PixelEncoding, topics,
};
use serde_json::{Map, Value, json};

/// Frame id stamped on outbound goal poses.
pub const GOAL_FRAME_ID: &str = "map";

// ────────────────────────────────────────────────────────────────────────────
// Encoders
// ────────────────────────────────────────────────────────────────────────────

pub fn encode_subscribe(topic: &str, type_name: &str, id: &str) -> Value {
    json!({
        "op": "subscribe",
        "topic": topic,
        "type": type_name,
        "id": id
    })
}

pub fn encode_unsubscribe(id: &str) -> Value {
    json!({
        "op": "unsubscribe",
        "id": id
    })
}

fn publish(topic: &str, msg: Value) -> Value {
    json!({
        "op": "publish",
        "topic": topic,
        "msg": msg
    })
}

/// `std_msgs/String` on `/cmd_drive`.
pub fn encode_drive(command: &str) -> Value {
    publish(topics::CMD_DRIVE, json!({ "data": command }))
}

/// `std_msgs/String` on `/lane_change_cmd`.
pub fn encode_lane_change(direction: &str) -> Value {
    publish(topics::LANE_CHANGE_CMD, json!({ "data": direction }))
}

/// `geometry_msgs/Twist` on `/cmd_vel`: forward speed plus yaw rate. The
/// Twist itself is the `msg`.
pub fn encode_velocity(linear: f64, angular: f64) -> Value {
    publish(
        topics::CMD_VEL,
        json!({
            "linear":  { "x": linear, "y": 0.0, "z": 0.0 },
            "angular": { "x": 0.0, "y": 0.0, "z": angular }
        }),
    )
}

/// `std_msgs/Bool` `true` on `/emergency_stop`.
pub fn encode_emergency_stop() -> Value {
    publish(topics::EMERGENCY_STOP, json!({ "data": true }))
}

/// `geometry_msgs/PoseStamped` on `/goal_pose`.
///
/// `yaw` is in radians; the orientation is the half-angle quaternion about z.
pub fn encode_goal_pose(x: f64, y: f64, yaw: f64) -> Value {
    let half_yaw = yaw / 2.0;
    publish(
        topics::GOAL_POSE,
        json!({
            "header": { "frame_id": GOAL_FRAME_ID },
            "pose": {
                "position":    { "x": x, "y": y, "z": 0.0 },
                "orientation": { "x": 0.0, "y": 0.0, "z": half_yaw.sin(), "w": half_yaw.cos() }
            }
        }),
    )
}

/// Encode any [`CommandIntent`] with the matching encoder.
pub fn encode_intent(intent: &CommandIntent) -> Value {
    match intent {
        CommandIntent::Drive(command) => encode_drive(command.as_str()),
        CommandIntent::LaneChange(direction) => encode_lane_change(direction.as_str()),
        CommandIntent::Velocity { linear, angular } => encode_velocity(*linear, *angular),
        CommandIntent::EmergencyStop => encode_emergency_stop(),
        CommandIntent::GoalPose { x, y, yaw } => encode_goal_pose(*x, *y, *yaw),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decoder
// ────────────────────────────────────────────────────────────────────────────

/// Result of a successful parse.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(DecodedEvent),
    Ignored(IgnoreReason),
}

/// Why a well-formed frame produced no event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingTopic,
    UnknownTopic(String),
    /// An image message without all of `data`, `encoding`, `height`, `width`.
    IncompleteImage,
    UnsupportedEncoding(String),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::MissingTopic => f.write_str("envelope has no topic"),
            IgnoreReason::UnknownTopic(topic) => write!(f, "no decoder for topic {topic}"),
            IgnoreReason::IncompleteImage => f.write_str("image message is missing fields"),
            IgnoreReason::UnsupportedEncoding(tag) => {
                write!(f, "{}", BridgeError::UnsupportedEncoding(tag.clone()))
            }
        }
    }
}

/// Parse one inbound text frame.
///
/// # Errors
///
/// [`BridgeError::Decode`] when the frame is not a JSON object, or when a
/// known topic carries a payload of the wrong shape (including an image
/// buffer shorter than `width × height × 3`).
pub fn decode(text: &str) -> Result<Decoded, BridgeError> {
    let envelope: Value = serde_json::from_str(text)
        .map_err(|e| BridgeError::Decode(format!("malformed envelope: {e}")))?;
    let Some(envelope) = envelope.as_object() else {
        return Err(BridgeError::Decode("envelope is not a JSON object".to_string()));
    };
    let Some(topic) = envelope.get("topic").and_then(Value::as_str) else {
        return Ok(Decoded::Ignored(IgnoreReason::MissingTopic));
    };

    let empty = Map::new();
    let msg = match envelope.get("msg") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(msg)) => msg,
        Some(_) => {
            return Err(BridgeError::Decode(format!("{topic}: msg is not an object")));
        }
    };

    match topic {
        topics::BATTERY_STATE => decode_battery(msg).map(|b| Decoded::Event(DecodedEvent::Battery(b))),
        topics::ODOM => decode_odometry(msg).map(|o| Decoded::Event(DecodedEvent::Odometry(o))),
        topics::IMU => decode_imu(msg).map(|quaternion| {
            Decoded::Event(DecodedEvent::Orientation {
                quaternion,
                euler: quaternion_to_euler(&quaternion),
            })
        }),
        topics::LANE_IMAGE_RAW => decode_image(msg),
        other => Ok(Decoded::Ignored(IgnoreReason::UnknownTopic(other.to_string()))),
    }
}

/// `percentage` wins over `voltage`; neither present reads as empty.
fn decode_battery(msg: &Map<String, Value>) -> Result<BatteryReading, BridgeError> {
    if let Some(percentage) = number_at(msg, &["percentage"])? {
        return Ok(BatteryReading::from_percentage(percentage));
    }
    if let Some(voltage) = number_at(msg, &["voltage"])? {
        return Ok(BatteryReading::from_voltage(voltage));
    }
    Ok(BatteryReading::from_fraction(0.0))
}

fn decode_odometry(msg: &Map<String, Value>) -> Result<OdometrySample, BridgeError> {
    Ok(OdometrySample {
        linear_velocity: number_at(msg, &["twist", "twist", "linear", "x"])?.unwrap_or(0.0),
        position_x: number_at(msg, &["pose", "pose", "position", "x"])?.unwrap_or(0.0),
    })
}

fn decode_imu(msg: &Map<String, Value>) -> Result<OrientationSample, BridgeError> {
    let identity = OrientationSample::default();
    Ok(OrientationSample {
        x: number_at(msg, &["orientation", "x"])?.unwrap_or(identity.x),
        y: number_at(msg, &["orientation", "y"])?.unwrap_or(identity.y),
        z: number_at(msg, &["orientation", "z"])?.unwrap_or(identity.z),
        w: number_at(msg, &["orientation", "w"])?.unwrap_or(identity.w),
    })
}

/// Convert a unit quaternion to roll/pitch/yaw in degrees.
///
/// The pitch argument is clamped to `[-1, 1]` before `asin`, so at the
/// gimbal-lock boundary pitch saturates at ±90° instead of becoming NaN.
pub fn quaternion_to_euler(q: &OrientationSample) -> EulerAngles {
    let OrientationSample { x, y, z, w } = *q;

    let sinr_cosp = 2.0 * (w * x + y * z);
    let cosr_cosp = 1.0 - 2.0 * (x * x + y * y);
    let roll = sinr_cosp.atan2(cosr_cosp);

    let sinp = 2.0 * (w * y - z * x);
    let pitch = sinp.clamp(-1.0, 1.0).asin();

    let siny_cosp = 2.0 * (w * z + x * y);
    let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
    let yaw = siny_cosp.atan2(cosy_cosp);

    EulerAngles {
        roll: roll.to_degrees(),
        pitch: pitch.to_degrees(),
        yaw: yaw.to_degrees(),
    }
}

fn decode_image(msg: &Map<String, Value>) -> Result<Decoded, BridgeError> {
    let (Some(data), Some(encoding), Some(height), Some(width)) = (
        msg.get("data"),
        msg.get("encoding"),
        msg.get("height"),
        msg.get("width"),
    ) else {
        return Ok(Decoded::Ignored(IgnoreReason::IncompleteImage));
    };

    let encoding = encoding
        .as_str()
        .ok_or_else(|| BridgeError::Decode("image encoding is not a string".to_string()))?;
    let Some(pixel_encoding) = PixelEncoding::from_tag(encoding) else {
        return Ok(Decoded::Ignored(IgnoreReason::UnsupportedEncoding(encoding.to_string())));
    };

    let width = dimension(width, "width")?;
    let height = dimension(height, "height")?;
    let data = data
        .as_str()
        .ok_or_else(|| BridgeError::Decode("image data is not a base64 string".to_string()))?;
    let bytes = BASE64
        .decode(data)
        .map_err(|e| BridgeError::Decode(format!("image data is not valid base64: {e}")))?;

    unpack_pixels(&bytes, width, height, pixel_encoding)
        .map(|frame| Decoded::Event(DecodedEvent::Image(frame)))
}

/// Pack 3-byte pixels into opaque `0xAARRGGBB` words.
///
/// Trailing bytes past `width × height × 3` (row padding) are ignored.
pub fn unpack_pixels(
    bytes: &[u8],
    width: u32,
    height: u32,
    encoding: PixelEncoding,
) -> Result<ImageFrame, BridgeError> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| BridgeError::Decode(format!("image {width}x{height} is too large")))?;
    let needed = pixel_count
        .checked_mul(3)
        .ok_or_else(|| BridgeError::Decode(format!("image {width}x{height} is too large")))?;
    if bytes.len() < needed {
        return Err(BridgeError::Decode(format!(
            "image buffer holds {} bytes, {width}x{height} needs {needed}",
            bytes.len()
        )));
    }

    let pixels = bytes[..needed]
        .chunks_exact(3)
        .map(|px| {
            let (r, g, b) = match encoding {
                PixelEncoding::Rgb8 => (px[0], px[1], px[2]),
                PixelEncoding::Bgr8 => (px[2], px[1], px[0]),
            };
            0xFF00_0000 | (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
        })
        .collect();

    Ok(ImageFrame { width, height, pixels })
}

/// Walk `path` through nested objects. A missing or `null` leaf (or a missing
/// intermediate object) is `None`; a present non-numeric leaf is an error.
fn number_at(msg: &Map<String, Value>, path: &[&str]) -> Result<Option<f64>, BridgeError> {
    let Some((leaf, parents)) = path.split_last() else {
        return Ok(None);
    };
    let mut node = msg;
    for key in parents {
        match node.get(*key) {
            Some(Value::Object(child)) => node = child,
            None | Some(Value::Null) => return Ok(None),
            Some(_) => {
                return Err(BridgeError::Decode(format!("field '{key}' is not an object")));
            }
        }
    }
    match node.get(*leaf) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| BridgeError::Decode(format!("field '{}' is not a number", path.join(".")))),
    }
}

fn dimension(value: &Value, name: &str) -> Result<u32, BridgeError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| BridgeError::Decode(format!("image {name} is not a valid dimension")))
}
