//! Controller records and telemetry data structures

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A provisioned device as listed by the controller inventory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub hostname: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub ip_address: String,
    pub serial_number: String,
}

/// One polling interval's reading for a device.
///
/// Every metric is optional; a notification that lacks a key simply leaves
/// the field empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetrySample {
    pub timestamp: i64,
    pub uptime_secs: Option<u64>,
    pub load_avg_15m: Option<f64>,
    pub mem_available: Option<u64>,
    pub mem_total: Option<u64>,
    pub cpu_util: Option<f64>,
}

impl TelemetrySample {
    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_uptime(mut self, uptime_secs: u64) -> Self {
        self.uptime_secs = Some(uptime_secs);
        self
    }

    pub fn with_load_avg(mut self, load: f64) -> Self {
        self.load_avg_15m = Some(load);
        self
    }

    pub fn with_memory(mut self, available: u64, total: u64) -> Self {
        self.mem_available = Some(available);
        self.mem_total = Some(total);
        self
    }

    pub fn with_cpu(mut self, util: f64) -> Self {
        self.cpu_util = Some(util);
        self
    }

    /// Take fields this sample lacks from an older one.
    pub fn fill_missing(&mut self, older: &TelemetrySample) {
        self.uptime_secs = self.uptime_secs.or(older.uptime_secs);
        self.load_avg_15m = self.load_avg_15m.or(older.load_avg_15m);
        self.mem_available = self.mem_available.or(older.mem_available);
        self.mem_total = self.mem_total.or(older.mem_total);
        self.cpu_util = self.cpu_util.or(older.cpu_util);
    }

    /// Fold the updates of one notification into this sample.
    pub fn absorb(&mut self, notification: &Notification) {
        if let Some(v) = notification.number("util") {
            self.cpu_util = Some(v);
        }
        if let Some(v) = notification.number("memAvailable") {
            self.mem_available = Some(v as u64);
        }
        if let Some(v) = notification.number("memTotal") {
            self.mem_total = Some(v as u64);
        }
        if let Some(v) = notification.number("uptime") {
            self.uptime_secs = Some(v as u64);
        }
        if let Some(v) = notification.number("loadAvg15m") {
            self.load_avg_15m = Some(v);
        }
    }
}

/// A change-control task record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(rename = "workOrderId", default)]
    pub id: String,
    #[serde(rename = "workOrderUserDefinedStatus", default)]
    pub status: String,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "completedOnInLongFormat", default)]
    pub completed_on_ms: i64,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status.eq_ignore_ascii_case("COMPLETED")
    }
}

/// Per-device row of the report.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSummary {
    pub device: Device,
    pub uptime: Option<String>,
    pub availability_pct: Option<f64>,
    pub cpu_pct: Option<f64>,
    pub memory_pct: Option<f64>,
    pub load_avg_15m: Option<f64>,
}

/// A telemetry notification as returned by the controller REST endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub updates: HashMap<String, Value>,
}

impl Notification {
    /// Numeric value of an update key.
    ///
    /// Accepts both `{"key": k, "value": v}` wrapped updates and bare values.
    pub fn number(&self, key: &str) -> Option<f64> {
        let raw = self.updates.get(key)?;
        let value = match raw {
            Value::Object(map) => map.get("value")?,
            other => other,
        };
        match value {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
}

/// Response body of a telemetry query.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NotificationBatch {
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

/// How far back telemetry is read for each device.
#[derive(Clone, Debug, PartialEq)]
pub enum SamplingWindow {
    /// Everything the controller holds between `start` and `end`
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// `points` equally spaced readings ending at `end`, newest first
    Lookback {
        end: DateTime<Utc>,
        points: u32,
        spacing: Duration,
    },
}

impl SamplingWindow {
    pub fn trailing(end: DateTime<Utc>, lookback: Duration) -> Self {
        SamplingWindow::Range {
            start: end - lookback,
            end,
        }
    }

    /// Query slices for this window, newest first.
    pub fn slices(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            SamplingWindow::Range { start, end } => vec![(*start, *end)],
            SamplingWindow::Lookback { end, points, spacing } => (0..*points)
                .map(|i| {
                    let slice_end = *end - *spacing * i as i32;
                    (slice_end - *spacing, slice_end)
                })
                .collect(),
        }
    }
}

/// Merge notifications from several metric paths into per-timestamp samples,
/// newest first.
pub fn merge_samples<'a, I>(notifications: I) -> Vec<TelemetrySample>
where
    I: IntoIterator<Item = &'a Notification>,
{
    let mut by_timestamp: HashMap<i64, TelemetrySample> = HashMap::new();
    for notification in notifications {
        by_timestamp
            .entry(notification.timestamp)
            .or_insert_with(|| TelemetrySample::at(notification.timestamp))
            .absorb(notification);
    }

    let mut samples: Vec<TelemetrySample> = by_timestamp.into_values().collect();
    samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    samples
}

/// Format elapsed seconds as `HH:MM:SS`; hours are not wrapped at a day.
pub fn format_uptime(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
