//! Configuration management for the report job

use crate::errors::ReportError;
use crate::telemetry::SamplingWindow;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// How the job authenticates against the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Credentials {
    /// Service-account API token sent as a bearer header
    Token(String),
    /// Session login
    Password { username: String, password: String },
    /// Not yet supplied
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Send the report at all
    pub enabled: bool,
    pub from: String,
    pub to: Vec<String>,
    /// Subject prefix; the report timestamp is appended
    pub subject: String,
    pub body: String,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Controller address, with or without scheme
    pub server: String,

    pub credentials: Credentials,

    /// PEM bundle trusted in addition to the system roots
    pub ca_cert: Option<PathBuf>,

    /// Skip certificate verification
    pub insecure_tls: bool,

    /// HTTP timeout for controller requests
    pub http_timeout: Duration,

    /// Directory the workbook is written to
    pub output_dir: PathBuf,

    /// How far back telemetry is read
    pub lookback: Duration,

    /// Spacing between telemetry samples
    pub sample_interval: Duration,

    /// Query this many evenly spaced points instead of one range
    pub sample_points: Option<u32>,

    /// Decimal places for percentages; `None` writes raw values
    pub decimals: Option<u32>,

    /// Add the latest-uptime column to the device table
    pub include_uptime: bool,

    pub mail: MailConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: String::new(),
            credentials: Credentials::None,
            ca_cert: None,
            insecure_tls: false,
            http_timeout: Duration::from_secs(30),
            output_dir: PathBuf::from("."),
            lookback: Duration::from_secs(24 * 3600),
            sample_interval: Duration::from_secs(900),
            sample_points: None,
            decimals: Some(2),
            include_uptime: true,
            mail: MailConfig {
                enabled: true,
                from: String::new(),
                to: Vec::new(),
                subject: "Daily Report".to_string(),
                body: String::new(),
                smtp: SmtpConfig {
                    host: "localhost".to_string(),
                    port: 25,
                    starttls: false,
                    username: None,
                    password: None,
                },
            },
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> crate::errors::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> crate::errors::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(server) = lookup("CVP_SERVER") {
            config.server = server;
        }

        if let Some(token) = lookup("CVP_TOKEN") {
            config.credentials = Credentials::Token(token.trim().to_string());
        } else if let Some(path) = lookup("CVP_TOKEN_FILE") {
            let token = std::fs::read_to_string(&path).map_err(|e| {
                ReportError::Config(format!("cannot read token file {}: {}", path, e))
            })?;
            config.credentials = Credentials::Token(token.trim().to_string());
        } else if let Some(username) = lookup("CVP_USERNAME") {
            config.credentials = Credentials::Password {
                username,
                password: lookup("CVP_PASSWORD").unwrap_or_default(),
            };
        }

        if let Some(ca) = lookup("CVP_CA_CERT") {
            config.ca_cert = Some(PathBuf::from(ca));
        }

        if let Some(insecure) = lookup("CVP_INSECURE_TLS") {
            config.insecure_tls = flag(&insecure);
        }

        if let Some(seconds) = lookup("HTTP_TIMEOUT_SECONDS").and_then(|v| v.parse::<u64>().ok()) {
            config.http_timeout = Duration::from_secs(seconds);
        }

        if let Some(dir) = lookup("REPORT_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        if let Some(minutes) = lookup("REPORT_LOOKBACK_MINUTES").and_then(|v| v.parse::<u64>().ok()) {
            config.lookback = Duration::from_secs(minutes * 60);
        }

        if let Some(seconds) =
            lookup("REPORT_SAMPLE_INTERVAL_SECONDS").and_then(|v| v.parse::<u64>().ok())
        {
            config.sample_interval = Duration::from_secs(seconds);
        }

        if let Some(points) = lookup("REPORT_SAMPLE_POINTS") {
            config.sample_points = points.parse().ok();
        }

        // non-numeric (e.g. "none") turns rounding off
        if let Some(decimals) = lookup("REPORT_DECIMALS") {
            config.decimals = decimals.parse().ok();
        }

        if let Some(include) = lookup("REPORT_INCLUDE_UPTIME") {
            config.include_uptime = flag(&include);
        }

        if let Some(host) = lookup("SMTP_HOST") {
            config.mail.smtp.host = host;
        }

        if let Some(port) = lookup("SMTP_PORT").and_then(|v| v.parse().ok()) {
            config.mail.smtp.port = port;
        }

        if let Some(starttls) = lookup("SMTP_STARTTLS") {
            config.mail.smtp.starttls = flag(&starttls);
        }

        config.mail.smtp.username = lookup("SMTP_USERNAME").filter(|s| !s.is_empty());
        config.mail.smtp.password = lookup("SMTP_PASSWORD").filter(|s| !s.is_empty());

        if let Some(from) = lookup("MAIL_FROM") {
            config.mail.from = from;
        }

        if let Some(to) = lookup("MAIL_TO") {
            config.mail.to = to
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(subject) = lookup("MAIL_SUBJECT") {
            config.mail.subject = subject;
        }

        if let Some(body) = lookup("MAIL_BODY") {
            config.mail.body = body;
        }

        if let Some(enabled) = lookup("MAIL_ENABLED") {
            config.mail.enabled = flag(&enabled);
        }

        Ok(config)
    }

    /// Base URL of the controller, defaulting to https
    pub fn base_url(&self) -> String {
        let server = self.server.trim_end_matches('/');
        if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("https://{}", server)
        }
    }

    /// Telemetry window ending at `now`
    pub fn sampling_window(&self, now: DateTime<Utc>) -> SamplingWindow {
        let spacing = ChronoDuration::seconds(self.sample_interval.as_secs() as i64);
        match self.sample_points {
            Some(points) => SamplingWindow::Lookback {
                end: now,
                points,
                spacing,
            },
            None => SamplingWindow::trailing(
                now,
                ChronoDuration::seconds(self.lookback.as_secs() as i64),
            ),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.is_empty() {
            return Err("server cannot be empty".to_string());
        }

        match &self.credentials {
            Credentials::None => {
                return Err("either a token or a username is required".to_string());
            }
            Credentials::Token(token) if token.is_empty() => {
                return Err("token cannot be empty".to_string());
            }
            Credentials::Password { username, .. } if username.is_empty() => {
                return Err("username cannot be empty".to_string());
            }
            _ => {}
        }

        if self.sample_interval.is_zero() {
            return Err("sample interval must be greater than 0".to_string());
        }

        if self.sample_points == Some(0) {
            return Err("sample points must be greater than 0".to_string());
        }

        if self.mail.enabled {
            if self.mail.from.is_empty() {
                return Err("mail sender cannot be empty".to_string());
            }

            if self.mail.to.is_empty() {
                return Err("at least one mail recipient must be specified".to_string());
            }

            if self.mail.smtp.host.is_empty() {
                return Err("smtp host cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn load(vars: &[(&str, &str)]) -> crate::errors::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    fn valid() -> Config {
        let mut config = Config::default();
        config.server = "cvp.example.net".to_string();
        config.credentials = Credentials::Token("abc".to_string());
        config.mail.from = "reports@example.net".to_string();
        config.mail.to = vec!["noc@example.net".to_string()];
        config
    }

    #[test]
    fn test_default_config_needs_server() {
        let config = Config::default();
        assert!(config.validate().is_err());
        assert_eq!(config.sample_interval, Duration::from_secs(900));
        assert_eq!(config.decimals, Some(2));
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = valid();
        config.credentials = Credentials::None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recipients_only_required_when_mailing() {
        let mut config = valid();
        config.mail.to.clear();
        assert!(config.validate().is_err());

        config.mail.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url() {
        let mut config = valid();
        assert_eq!(config.base_url(), "https://cvp.example.net");

        config.server = "http://127.0.0.1:8080/".to_string();
        assert_eq!(config.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_sampling_window_modes() {
        let now = Utc::now();
        let mut config = valid();

        match config.sampling_window(now) {
            SamplingWindow::Range { start, end } => {
                assert_eq!(end, now);
                assert_eq!(end - start, ChronoDuration::hours(24));
            }
            other => panic!("unexpected window {:?}", other),
        }

        config.sample_points = Some(96);
        match config.sampling_window(now) {
            SamplingWindow::Lookback { points, spacing, .. } => {
                assert_eq!(points, 96);
                assert_eq!(spacing, ChronoDuration::minutes(15));
            }
            other => panic!("unexpected window {:?}", other),
        }
    }

    #[test]
    fn test_lookup_with_nothing_set_is_default() {
        let config = load(&[]).unwrap();
        assert!(config.server.is_empty());
        assert_eq!(config.credentials, Credentials::None);
        assert_eq!(config.decimals, Some(2));
        assert!(config.mail.enabled);
    }

    #[test]
    fn test_decimals_none_disables_rounding() {
        assert_eq!(load(&[("REPORT_DECIMALS", "none")]).unwrap().decimals, None);
        assert_eq!(load(&[("REPORT_DECIMALS", "3")]).unwrap().decimals, Some(3));
    }

    #[test]
    fn test_mail_to_is_comma_split() {
        let config = load(&[("MAIL_TO", "noc@example.net, ops@example.net,,")]).unwrap();
        assert_eq!(config.mail.to, vec!["noc@example.net", "ops@example.net"]);
    }

    #[test]
    fn test_mail_enabled_false() {
        assert!(!load(&[("MAIL_ENABLED", "false")]).unwrap().mail.enabled);
        assert!(load(&[("MAIL_ENABLED", "yes")]).unwrap().mail.enabled);
    }

    #[test]
    fn test_token_wins_over_username() {
        let config = load(&[
            ("CVP_TOKEN", " tok-123\n"),
            ("CVP_USERNAME", "cvpadmin"),
            ("CVP_PASSWORD", "pw"),
        ])
        .unwrap();
        assert_eq!(config.credentials, Credentials::Token("tok-123".to_string()));
    }

    #[test]
    fn test_username_and_password_from_lookup() {
        let config = load(&[("CVP_USERNAME", "cvpadmin"), ("CVP_PASSWORD", "pw")]).unwrap();
        assert_eq!(
            config.credentials,
            Credentials::Password {
                username: "cvpadmin".to_string(),
                password: "pw".to_string(),
            }
        );
    }

    #[test]
    fn test_token_read_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "file-token\n").unwrap();

        let config = load(&[("CVP_TOKEN_FILE", path.to_str().unwrap())]).unwrap();
        assert_eq!(config.credentials, Credentials::Token("file-token".to_string()));
    }

    #[test]
    fn test_unreadable_token_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-token");
        let path = path.to_str().unwrap();

        let err = load(&[("CVP_TOKEN_FILE", path), ("CVP_USERNAME", "cvpadmin")]).unwrap_err();
        assert!(matches!(err, ReportError::Config(_)));
        let message = err.to_string();
        assert!(message.contains(path));
        assert!(message.contains("cannot read token file"));
    }

    #[test]
    fn test_numeric_overrides() {
        let config = load(&[
            ("REPORT_SAMPLE_INTERVAL_SECONDS", "300"),
            ("REPORT_SAMPLE_POINTS", "12"),
            ("REPORT_LOOKBACK_MINUTES", "60"),
            ("SMTP_PORT", "587"),
            ("SMTP_STARTTLS", "1"),
            ("HTTP_TIMEOUT_SECONDS", "bogus"),
        ])
        .unwrap();
        assert_eq!(config.sample_interval, Duration::from_secs(300));
        assert_eq!(config.sample_points, Some(12));
        assert_eq!(config.lookback, Duration::from_secs(3600));
        assert_eq!(config.mail.smtp.port, 587);
        assert!(config.mail.smtp.starttls);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }
}
