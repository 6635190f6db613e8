//! `lanedrive-runtime` – operator-side policy and process plumbing
//!
//! Sits between the gateway session and whatever presents it to a human.
//!
//! # Modules
//!
//! - [`battery_guard`] – [`BatteryGuard`][battery_guard::BatteryGuard]:
//!   classifies battery readings and inhibits driving while the charge is at
//!   or below the configured threshold.
//! - [`dashboard`] – [`Dashboard`][dashboard::Dashboard]: latest-value view
//!   of connectivity, battery, odometry, orientation and camera, rendered as
//!   fixed-format console lines.
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: consumes the
//!   event bus, feeds the dashboard and battery guard, halts the base on low
//!   battery and gates operator commands.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod battery_guard;
pub mod dashboard;
pub mod supervisor;
pub mod telemetry;

pub use battery_guard::{BatteryGuard, BatteryVerdict, DEFAULT_LOW_BATTERY_PERCENT};
pub use dashboard::{Dashboard, DriveStatus};
pub use supervisor::{Advisory, OperatorState, Supervisor};
pub use telemetry::{TracerProviderGuard, init_tracing};
