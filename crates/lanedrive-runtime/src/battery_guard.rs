//! [`BatteryGuard`] – low-battery drive inhibitor.
//!
//! Tracks the latest battery reading against a fixed threshold.  While the
//! latest reading is at or below the threshold the robot must not be driven:
//! [`BatteryGuard::drive_permitted`] returns `false` and the
//! [`Supervisor`][crate::supervisor::Supervisor] halts the base on every
//! such reading.
//!
//! # Example
//!
//! ```rust
//! use lanedrive_runtime::battery_guard::{BatteryGuard, BatteryVerdict};
//!
//! let mut guard = BatteryGuard::new(20);
//! assert!(guard.drive_permitted()); // nothing read yet
//!
//! assert_eq!(guard.evaluate(21), BatteryVerdict::Nominal);
//! assert_eq!(guard.evaluate(20), BatteryVerdict::Low);
//! assert!(!guard.drive_permitted());
//!
//! // Recovery clears the inhibit.
//! guard.evaluate(80);
//! assert!(guard.drive_permitted());
//! ```

/// Threshold used when nothing else is configured, in whole percent.
pub const DEFAULT_LOW_BATTERY_PERCENT: u8 = 20;

/// Outcome of a single battery reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryVerdict {
    Nominal,
    /// At or below the threshold; driving is inhibited.
    Low,
}

#[derive(Debug, Clone)]
pub struct BatteryGuard {
    threshold: u8,
    last: Option<u8>,
}

impl BatteryGuard {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.min(100),
            last: None,
        }
    }

    /// Record `percent` and classify it.
    pub fn evaluate(&mut self, percent: u8) -> BatteryVerdict {
        self.last = Some(percent);
        if percent <= self.threshold {
            BatteryVerdict::Low
        } else {
            BatteryVerdict::Nominal
        }
    }

    /// `false` while the most recent reading was low. No reading yet means
    /// no reason to inhibit.
    pub fn drive_permitted(&self) -> bool {
        self.last.is_none_or(|percent| percent > self.threshold)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn last_percent(&self) -> Option<u8> {
        self.last
    }
}

impl Default for BatteryGuard {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_BATTERY_PERCENT)
    }
}
