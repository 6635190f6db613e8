//! [`Dashboard`] – latest-value view of the robot for the operator console.
//!
//! Folds bus [`EventPayload`]s into "most recent reading" slots and renders
//! them as the fixed-format lines the console prints on `/status`.

use std::fmt;

use lanedrive_types::{Connectivity, EulerAngles, EventPayload, OdometrySample};

/// What the operator last asked the robot to do, or why it refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveStatus {
    #[default]
    Idle,
    Driving,
    Stopped,
    LowBattery,
    EmergencyStop,
    GoalSent,
}

impl fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DriveStatus::Idle => "idle",
            DriveStatus::Driving => "driving",
            DriveStatus::Stopped => "stopped",
            DriveStatus::LowBattery => "low battery",
            DriveStatus::EmergencyStop => "EMERGENCY STOP",
            DriveStatus::GoalSent => "goal sent",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dashboard {
    connectivity: Option<Connectivity>,
    battery: Option<u8>,
    odometry: Option<OdometrySample>,
    orientation: Option<EulerAngles>,
    last_frame: Option<(u32, u32)>,
    frames_received: u64,
    last_send_failure: Option<String>,
    status: DriveStatus,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one bus payload into the view.
    pub fn record(&mut self, payload: &EventPayload) {
        match payload {
            EventPayload::Connectivity(state) => self.connectivity = Some(*state),
            EventPayload::Battery { percent } => self.battery = Some(*percent),
            EventPayload::Odometry(sample) => self.odometry = Some(*sample),
            EventPayload::Orientation(euler) => self.orientation = Some(*euler),
            EventPayload::ImageFrame(frame) => {
                self.last_frame = Some((frame.width, frame.height));
                self.frames_received += 1;
            }
            EventPayload::CommandSendFailed(reason) => {
                self.last_send_failure = Some(reason.clone());
            }
        }
    }

    pub fn set_status(&mut self, status: DriveStatus) {
        self.status = status;
    }

    pub fn status(&self) -> DriveStatus {
        self.status
    }

    pub fn connectivity(&self) -> Option<Connectivity> {
        self.connectivity
    }

    pub fn battery_percent(&self) -> Option<u8> {
        self.battery
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Width and height of the most recent camera frame.
    pub fn last_frame(&self) -> Option<(u32, u32)> {
        self.last_frame
    }

    pub fn network_line(&self) -> String {
        let state = match self.connectivity {
            None => "not started",
            Some(Connectivity::Connected) => "connected",
            Some(Connectivity::Failed) => "connection failed",
            Some(Connectivity::Closed) => "closed",
        };
        format!("network: {state}")
    }

    pub fn battery_line(&self) -> String {
        match self.battery {
            Some(percent) => format!("battery: {percent}%"),
            None => "battery: --".to_string(),
        }
    }

    pub fn odometry_line(&self) -> String {
        let sample = self.odometry.unwrap_or_default();
        format!(
            "speed: {:.2} m/s  distance: {:.2} m",
            sample.linear_velocity, sample.position_x
        )
    }

    pub fn imu_line(&self) -> String {
        let EulerAngles { roll, pitch, yaw } = self.orientation.unwrap_or_default();
        format!("IMU: R{roll:.1}° P{pitch:.1}° Y{yaw:.1}°")
    }

    pub fn camera_line(&self) -> String {
        match self.last_frame {
            Some((width, height)) => {
                format!("camera: {width}x{height} ({} frames)", self.frames_received)
            }
            None => "camera: no frames".to_string(),
        }
    }

    pub fn status_line(&self) -> String {
        match &self.last_send_failure {
            Some(reason) => format!("status: {} (last send failed: {reason})", self.status),
            None => format!("status: {}", self.status),
        }
    }

    /// Every line, in display order.
    pub fn render(&self) -> Vec<String> {
        vec![
            self.network_line(),
            self.status_line(),
            self.battery_line(),
            self.odometry_line(),
            self.imu_line(),
            self.camera_line(),
        ]
    }
}
