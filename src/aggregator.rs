//! Reduction of raw telemetry and task history into report rows

use crate::telemetry::{Device, DeviceSummary, Task, TelemetrySample, format_uptime};
use chrono::{Duration, NaiveDate, TimeZone};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Number of calendar days surfaced in the task table
pub const REPORT_DAYS: usize = 7;

/// Running totals for one device, folded over its samples.
#[derive(Debug, Clone, Default)]
struct DeviceAccumulator {
    cpu_sum: f64,
    cpu_count: u32,
    mem_available_sum: f64,
    mem_count: u32,
    mem_total: Option<u64>,
    load_sum: f64,
    load_count: u32,
    uptime_count: u32,
    unavailable_secs: u64,
    latest_uptime: Option<u64>,
}

impl DeviceAccumulator {
    /// Samples arrive newest first, so the first total and uptime seen are
    /// the latest ones.
    fn push(mut self, sample: &TelemetrySample, interval_secs: u64) -> Self {
        if let Some(util) = sample.cpu_util {
            self.cpu_sum += util;
            self.cpu_count += 1;
        }

        if let Some(available) = sample.mem_available {
            self.mem_available_sum += available as f64;
            self.mem_count += 1;
        }
        if self.mem_total.is_none() {
            self.mem_total = sample.mem_total;
        }

        if let Some(load) = sample.load_avg_15m {
            self.load_sum += load;
            self.load_count += 1;
        }

        if let Some(uptime) = sample.uptime_secs {
            self.uptime_count += 1;
            // An uptime shorter than the interval means a reboot inside it.
            self.unavailable_secs += interval_secs.saturating_sub(uptime);
            if self.latest_uptime.is_none() {
                self.latest_uptime = Some(uptime);
            }
        }

        self
    }

    fn finish(self, device: Device) -> DeviceSummary {
        let memory_pct = match self.mem_total {
            Some(total) if total > 0 && self.mem_count > 0 => Some(
                100.0 * (1.0 - self.mem_available_sum / (total as f64 * self.mem_count as f64)),
            ),
            _ => None,
        };

        let availability_pct = if self.uptime_count > 0 {
            Some(availability_pct(self.unavailable_secs))
        } else {
            None
        };

        DeviceSummary {
            device,
            uptime: self.latest_uptime.map(format_uptime),
            availability_pct,
            cpu_pct: mean(self.cpu_sum, self.cpu_count),
            memory_pct,
            load_avg_15m: mean(self.load_sum, self.load_count),
        }
    }
}

fn mean(sum: f64, count: u32) -> Option<f64> {
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Estimated daily availability from accumulated downtime, clamped to 0..=100.
///
/// This underestimates real availability: any sample whose uptime is below
/// the interval length counts the remainder of the interval as down.
pub fn availability_pct(unavailable_secs: u64) -> f64 {
    let pct = 100.0 * (1.0 - unavailable_secs as f64 / SECONDS_PER_DAY as f64);
    pct.clamp(0.0, 100.0)
}

/// Collapse newest-first samples into one per `interval_secs` slot.
///
/// Slots are aligned on the epoch; within a slot the newest value of each
/// field wins. Timestamps are nanoseconds.
pub fn bucket_samples(samples: &[TelemetrySample], interval_secs: u64) -> Vec<TelemetrySample> {
    let slot_ns = (interval_secs as i64).saturating_mul(1_000_000_000).max(1);

    let mut buckets: Vec<(i64, TelemetrySample)> = Vec::new();
    for sample in samples {
        let slot = sample.timestamp.div_euclid(slot_ns);
        match buckets.last_mut() {
            Some((current, bucket)) if *current == slot => bucket.fill_missing(sample),
            _ => buckets.push((slot, sample.clone())),
        }
    }

    buckets.into_iter().map(|(_, sample)| sample).collect()
}

/// Reduce one device's samples (newest first) to its report row.
pub fn summarize_device(
    device: Device,
    samples: &[TelemetrySample],
    interval_secs: u64,
) -> DeviceSummary {
    debug!(
        "Summarizing {} samples for {} ({})",
        samples.len(),
        device.hostname,
        device.serial_number
    );

    samples
        .iter()
        .fold(DeviceAccumulator::default(), |acc, sample| {
            acc.push(sample, interval_secs)
        })
        .finish(device)
}

/// Completed-task counts per user per calendar day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserTaskCounts {
    counts: BTreeMap<String, BTreeMap<NaiveDate, u32>>,
}

impl UserTaskCounts {
    /// Bucket completed tasks by creator and completion day in `tz`.
    pub fn from_tasks<Tz: TimeZone>(tasks: &[Task], tz: &Tz) -> Self {
        let mut counts = Self::default();

        for task in tasks.iter().filter(|t| t.is_completed()) {
            match tz.timestamp_millis_opt(task.completed_on_ms).single() {
                Some(completed) => counts.record(&task.created_by, completed.date_naive()),
                None => warn!(
                    "Task {} has an unusable completion time {}, skipping",
                    task.id, task.completed_on_ms
                ),
            }
        }

        counts
    }

    pub fn record(&mut self, user: &str, day: NaiveDate) {
        *self
            .counts
            .entry(user.to_string())
            .or_default()
            .entry(day)
            .or_insert(0) += 1;
    }

    pub fn count(&self, user: &str, day: NaiveDate) -> u32 {
        self.counts
            .get(user)
            .and_then(|days| days.get(&day))
            .copied()
            .unwrap_or(0)
    }

    /// Users in name order, including those with no task inside the window.
    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn row(&self, user: &str, days: &[NaiveDate]) -> Vec<u32> {
        days.iter().map(|day| self.count(user, *day)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }
}

/// `today` and the days before it, newest first.
pub fn trailing_days(today: NaiveDate, days: usize) -> Vec<NaiveDate> {
    (0..days)
        .map(|i| today - Duration::days(i as i64))
        .collect()
}
