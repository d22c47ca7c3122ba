//! Report pipeline: controller queries, aggregation, rendering, mail

use crate::aggregator::{
    REPORT_DAYS, UserTaskCounts, bucket_samples, summarize_device, trailing_days,
};
use crate::config::Config;
use crate::controller::Controller;
use crate::errors::Result;
use crate::mailer::Mailer;
use crate::report::{ReportLayout, ReportRenderer, report_filename, report_stamp};
use crate::telemetry::{Device, DeviceSummary, SamplingWindow, merge_samples};

use chrono::{DateTime, Local, TimeZone, Utc};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A telemetry path and the update keys read from it.
struct MetricQuery {
    path: &'static [&'static str],
    fields: &'static [&'static str],
}

const METRIC_QUERIES: [MetricQuery; 3] = [
    MetricQuery {
        path: &["Kernel", "proc", "cpu", "utilization", "total"],
        fields: &["util"],
    },
    MetricQuery {
        path: &["Kernel", "proc", "meminfo"],
        fields: &["memAvailable", "memTotal"],
    },
    MetricQuery {
        path: &["Kernel", "sysinfo"],
        fields: &["uptime", "loadAvg15m"],
    },
];

/// Result of one report run
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub path: PathBuf,
    pub devices: usize,
    pub users: usize,
    pub mailed: bool,
}

/// Drives one report run against a controller
pub struct ReportCollector<C: Controller> {
    controller: C,
    config: Config,
    run_id: String,
}

impl<C: Controller> ReportCollector<C> {
    pub fn new(controller: C, config: Config) -> Self {
        Self {
            controller,
            config,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Query all metric paths for one device and reduce them.
    pub async fn summarize(&self, device: Device, window: &SamplingWindow) -> Result<DeviceSummary> {
        let mut notifications = Vec::new();
        for query in &METRIC_QUERIES {
            let batch = self
                .controller
                .query_telemetry(&device.serial_number, query.path, query.fields, window)
                .await?;
            notifications.extend(batch);
        }

        // one sample per interval slot
        let interval_secs = self.config.sample_interval.as_secs();
        let samples = bucket_samples(&merge_samples(&notifications), interval_secs);
        Ok(summarize_device(device, &samples, interval_secs))
    }

    /// One summary per inventory device; any query failure aborts the run.
    pub async fn summarize_devices(&self, window: &SamplingWindow) -> Result<Vec<DeviceSummary>> {
        let devices = self.controller.inventory().await?;
        let total = devices.len();

        let mut summaries = Vec::with_capacity(total);
        for (index, device) in devices.into_iter().enumerate() {
            debug!(
                "Collecting telemetry for {} ({}/{})",
                device.hostname,
                index + 1,
                total
            );
            summaries.push(self.summarize(device, window).await?);
        }

        Ok(summaries)
    }

    /// Completed-task counts bucketed by day in `tz`.
    pub async fn tally_tasks<Tz: TimeZone>(&self, tz: &Tz) -> Result<UserTaskCounts> {
        let tasks = self.controller.completed_tasks().await?;
        Ok(UserTaskCounts::from_tasks(&tasks, tz))
    }

    async fn collect<Tz: TimeZone>(
        &self,
        window: &SamplingWindow,
        tz: &Tz,
    ) -> Result<(Vec<DeviceSummary>, UserTaskCounts)> {
        let summaries = self.summarize_devices(window).await?;
        let tasks = self.tally_tasks(tz).await?;
        Ok((summaries, tasks))
    }

    /// Collect everything and write the workbook; returns its path.
    ///
    /// The controller session is closed whether or not collection succeeds.
    #[instrument(skip(self, tz), fields(run_id = %self.run_id))]
    pub async fn build_report<Tz: TimeZone>(
        &self,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> Result<ReportOutcome> {
        let window = self.config.sampling_window(now);
        let collected = self.collect(&window, tz).await;

        let logout = self.controller.logout().await;
        let (summaries, tasks) = match collected {
            Ok(collected) => {
                logout?;
                collected
            }
            Err(e) => {
                if let Err(logout_err) = logout {
                    warn!("Logout after failed collection also failed: {}", logout_err);
                }
                return Err(e);
            }
        };

        let days = trailing_days(now.with_timezone(tz).date_naive(), REPORT_DAYS);
        let path = self.config.output_dir.join(report_filename(now));
        let renderer = ReportRenderer::new(ReportLayout {
            include_uptime: self.config.include_uptime,
            decimals: self.config.decimals,
        });
        renderer.write(&path, &summaries, &tasks, &days)?;

        Ok(ReportOutcome {
            path,
            devices: summaries.len(),
            users: tasks.len(),
            mailed: false,
        })
    }

    /// Full run in local time: build the report, then mail it if enabled.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReportOutcome> {
        info!("Starting report run {}", self.run_id);

        let mut outcome = self.build_report(now, &Local).await?;

        if self.config.mail.enabled {
            let subject = format!("{} {}", self.config.mail.subject, report_stamp(now));
            Mailer::new(self.config.mail.clone())
                .send_report(&outcome.path, &subject)
                .await?;
            outcome.mailed = true;
        } else {
            info!("Mail disabled, leaving report at {}", outcome.path.display());
        }

        info!(
            "Report run {} complete: {} devices, {} users",
            self.run_id, outcome.devices, outcome.users
        );
        Ok(outcome)
    }
}
