//! CloudVision Report Library
//!
//! This library provides components for pulling inventory, telemetry and
//! change-task history from a CloudVision controller, reducing them into a
//! daily spreadsheet report and mailing it.

pub mod config;
pub mod controller;
pub mod aggregator;
pub mod telemetry;
pub mod report;
pub mod mailer;
pub mod collector;
pub mod errors;

pub use config::{Config, Credentials};
pub use controller::{Controller, CvpClient};
pub use collector::{ReportCollector, ReportOutcome};
pub use telemetry::{Device, DeviceSummary, TelemetrySample, Task};
pub use aggregator::UserTaskCounts;
pub use errors::{ReportError, Result};
