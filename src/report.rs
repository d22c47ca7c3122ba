//! Spreadsheet rendering of device summaries and task counts

use crate::aggregator::UserTaskCounts;
use crate::errors::Result;
use crate::telemetry::DeviceSummary;
use chrono::{DateTime, NaiveDate, Utc};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::path::Path;
use tracing::{debug, info};

pub const SHEET_NAME: &str = "Report";
const NOT_AVAILABLE: &str = "N/A";
const HEADER_FONT_SIZE: f64 = 14.0;

/// `rapor_<UTC YYYY_MM_DD_HH_MM_SS>.xlsx`
pub fn report_filename(at: DateTime<Utc>) -> String {
    format!("rapor_{}.xlsx", report_stamp(at))
}

pub fn report_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y_%m_%d_%H_%M_%S").to_string()
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Column {
    Hostname,
    Model,
    Version,
    IpAddress,
    Serial,
    Uptime,
    Availability,
    Cpu,
    Memory,
    LoadAvg,
}

impl Column {
    fn header(self) -> &'static str {
        match self {
            Column::Hostname => "Hostname",
            Column::Model => "Model",
            Column::Version => "SW Version",
            Column::IpAddress => "IP Address",
            Column::Serial => "Serial Number",
            Column::Uptime => "Uptime",
            Column::Availability => "Daily Availability (%)",
            Column::Cpu => "CPU Utilization (%)",
            Column::Memory => "Memory Utilization (%)",
            Column::LoadAvg => "Load Avg (15m)",
        }
    }

    fn width(self) -> f64 {
        match self {
            Column::IpAddress | Column::Uptime | Column::LoadAvg => 15.0,
            Column::Availability | Column::Memory => 25.0,
            _ => 20.0,
        }
    }
}

/// Layout knobs for the device table.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportLayout {
    pub include_uptime: bool,
    /// Round percentages to this many places; `None` keeps full precision
    pub decimals: Option<u32>,
}

impl Default for ReportLayout {
    fn default() -> Self {
        Self {
            include_uptime: true,
            decimals: Some(2),
        }
    }
}

impl ReportLayout {
    fn columns(&self) -> Vec<Column> {
        let mut columns = vec![
            Column::Hostname,
            Column::Model,
            Column::Version,
            Column::IpAddress,
            Column::Serial,
        ];
        if self.include_uptime {
            columns.push(Column::Uptime);
        }
        columns.extend([Column::Availability, Column::Cpu, Column::Memory, Column::LoadAvg]);
        columns
    }

    fn round(&self, value: f64) -> f64 {
        match self.decimals {
            Some(places) => {
                let factor = 10f64.powi(places as i32);
                (value * factor).round() / factor
            }
            None => value,
        }
    }
}

/// Writes the two stacked report tables into a workbook.
#[derive(Clone, Debug, Default)]
pub struct ReportRenderer {
    layout: ReportLayout,
}

impl ReportRenderer {
    pub fn new(layout: ReportLayout) -> Self {
        Self { layout }
    }

    /// Render and save to `path`.
    pub fn write(
        &self,
        path: &Path,
        summaries: &[DeviceSummary],
        tasks: &UserTaskCounts,
        days: &[NaiveDate],
    ) -> Result<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;

        self.write_devices(worksheet, summaries)?;
        self.write_tasks(worksheet, summaries.len() as u32, tasks, days)?;

        workbook.save(path)?;
        info!(
            "Wrote report {} with {} devices and {} users",
            path.display(),
            summaries.len(),
            tasks.len()
        );
        Ok(())
    }

    fn write_devices(&self, sheet: &mut Worksheet, summaries: &[DeviceSummary]) -> Result<()> {
        let header = header_format();
        let columns = self.layout.columns();

        for (col, column) in columns.iter().enumerate() {
            let col = col as u16;
            sheet.write_string_with_format(0, col, column.header(), &header)?;
            sheet.set_column_width(col, column.width())?;
        }

        for (index, summary) in summaries.iter().enumerate() {
            let row = index as u32 + 1;
            for (col, column) in columns.iter().enumerate() {
                let col = col as u16;
                let device = &summary.device;
                let text = match column {
                    Column::Hostname => device.hostname.as_str(),
                    Column::Model => device.model_name.as_str(),
                    Column::Version => device.version.as_str(),
                    Column::IpAddress => device.ip_address.as_str(),
                    Column::Serial => device.serial_number.as_str(),
                    Column::Uptime => summary.uptime.as_deref().unwrap_or(NOT_AVAILABLE),
                    Column::Availability => {
                        self.write_metric(sheet, row, col, summary.availability_pct)?;
                        continue;
                    }
                    Column::Cpu => {
                        self.write_metric(sheet, row, col, summary.cpu_pct)?;
                        continue;
                    }
                    Column::Memory => {
                        self.write_metric(sheet, row, col, summary.memory_pct)?;
                        continue;
                    }
                    Column::LoadAvg => {
                        self.write_metric(sheet, row, col, summary.load_avg_15m)?;
                        continue;
                    }
                };
                sheet.write_string(row, col, text)?;
            }
            debug!("Rendered row {} for {}", row, summary.device.hostname);
        }

        Ok(())
    }

    fn write_metric(&self, sheet: &mut Worksheet, row: u32, col: u16, value: Option<f64>) -> Result<()> {
        match value {
            Some(v) if v.is_finite() => sheet.write_number(row, col, self.layout.round(v))?,
            _ => sheet.write_string(row, col, NOT_AVAILABLE)?,
        };
        Ok(())
    }

    /// Task table sits two blank rows below the device table.
    fn write_tasks(
        &self,
        sheet: &mut Worksheet,
        device_rows: u32,
        tasks: &UserTaskCounts,
        days: &[NaiveDate],
    ) -> Result<()> {
        let header = header_format();
        let banner_row = device_rows + 3;
        let header_row = banner_row + 1;

        sheet.write_string_with_format(banner_row, 1, "# of config changes", &header)?;
        sheet.write_string_with_format(header_row, 0, "Username", &header)?;
        for (i, day) in days.iter().enumerate() {
            let label = day.format("%d-%m-%Y").to_string();
            sheet.write_string_with_format(header_row, i as u16 + 1, &label, &header)?;
        }

        for (index, user) in tasks.users().enumerate() {
            let row = header_row + 1 + index as u32;
            sheet.write_string(row, 0, user)?;
            for (i, count) in tasks.row(user, days).into_iter().enumerate() {
                sheet.write_number(row, i as u16 + 1, count)?;
            }
        }

        Ok(())
    }
}

fn header_format() -> Format {
    Format::new().set_bold().set_font_size(HEADER_FONT_SIZE)
}
