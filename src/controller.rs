//! HTTP client for the CloudVision controller REST API

use crate::config::{Config, Credentials};
use crate::errors::{ReportError, Result};
use crate::telemetry::{Device, Notification, NotificationBatch, SamplingWindow, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Certificate, Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, info};

const LOGIN_PATH: &str = "/cvpservice/login/authenticate.do";
const LOGOUT_PATH: &str = "/cvpservice/login/logout.do";
const INVENTORY_PATH: &str = "/cvpservice/inventory/devices";
const TASKS_PATH: &str = "/cvpservice/task/getTasks.do";
const TELEMETRY_PATH: &str = "/api/v1/rest";

/// Queries the report pipeline needs from a controller.
#[async_trait]
pub trait Controller: Send + Sync {
    /// All provisioned devices
    async fn inventory(&self) -> Result<Vec<Device>>;

    /// Notifications for `fields` under `path` in the device dataset,
    /// oldest first for ranges and newest first for lookback points.
    async fn query_telemetry(
        &self,
        dataset: &str,
        path: &[&str],
        fields: &[&str],
        window: &SamplingWindow,
    ) -> Result<Vec<Notification>>;

    /// Task history filtered to completed tasks
    async fn completed_tasks(&self) -> Result<Vec<Task>>;

    /// End the session, if there is one
    async fn logout(&self) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct TaskPage {
    #[serde(default)]
    data: Vec<Task>,
    #[serde(default)]
    total: u64,
}

/// REST client bound to one authenticated controller session
#[derive(Debug, Clone)]
pub struct CvpClient {
    client: Client,
    base_url: String,
    session_login: bool,
}

impl CvpClient {
    /// Build the HTTP client and authenticate
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.http_timeout)
            .user_agent(format!("cvp_report/{}", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .danger_accept_invalid_certs(config.insecure_tls);

        if let Some(path) = &config.ca_cert {
            let pem = std::fs::read(path)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        if let Credentials::Token(token) = &config.credentials {
            let mut headers = HeaderMap::new();
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ReportError::Config(format!("invalid token: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(ReportError::Http)?;
        let mut cvp = Self {
            client,
            base_url: config.base_url(),
            session_login: false,
        };

        match &config.credentials {
            Credentials::Password { username, password } => {
                cvp.login(username, password).await?;
                cvp.session_login = true;
            }
            Credentials::Token(_) => {
                info!("Using API token for {}", cvp.base_url);
            }
            Credentials::None => {
                return Err(ReportError::Auth("no credentials configured".to_string()));
            }
        }

        Ok(cvp)
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        debug!("Logging in to {} as {}", url, username);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "userId": username, "password": password }))
            .send()
            .await
            .map_err(|e| ReportError::Auth(format!("cannot reach {}: {}", self.base_url, e)))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(ReportError::Auth(format!(
                "login rejected with status {}: {}",
                status,
                error_message(&body).unwrap_or_else(|| "no details".to_string())
            )));
        }

        if let Some(message) = error_message(&body) {
            return Err(ReportError::Auth(message));
        }

        info!("Logged in to {} as {}", self.base_url, username);
        Ok(())
    }

    /// GET a JSON document and decode it, surfacing controller error bodies
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, query);

        let response = self.client.get(&url).query(query).send().await?;
        let body = self.handle_response(response, path).await?;

        serde_json::from_value(body)
            .map_err(|e| ReportError::Query(format!("unexpected response from {}: {}", path, e)))
    }

    /// Map HTTP status and error-carrying bodies onto query failures
    async fn handle_response(&self, response: Response, path: &str) -> Result<Value> {
        let status = response.status();

        if status.is_success() {
            let body: Value = response.json().await?;
            if let Some(message) = error_message(&body) {
                return Err(ReportError::Query(format!("{}: {}", path, message)));
            }
            return Ok(body);
        }

        let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

        let error_message = match status.as_u16() {
            401 => format!("Session not authorized for {}: {}", path, error_body),
            403 => format!("Forbidden for {}: {}", path, error_body),
            404 => format!("Endpoint not found {}: {}", path, error_body),
            500..=599 => format!("Controller error for {}: {}", path, error_body),
            _ => format!("Unexpected response {} for {}: {}", status, path, error_body),
        };

        Err(ReportError::Query(error_message))
    }

    async fn query_range(
        &self,
        url_path: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Notification>> {
        let batch: NotificationBatch = self
            .get_json(
                url_path,
                &[
                    ("start", nanos(start).to_string()),
                    ("end", nanos(end).to_string()),
                ],
            )
            .await?;
        Ok(batch.notifications)
    }
}

#[async_trait]
impl Controller for CvpClient {
    async fn inventory(&self) -> Result<Vec<Device>> {
        let devices: Vec<Device> = self
            .get_json(INVENTORY_PATH, &[("provisioned", "true".to_string())])
            .await?;
        info!("Inventory returned {} devices", devices.len());
        Ok(devices)
    }

    async fn query_telemetry(
        &self,
        dataset: &str,
        path: &[&str],
        fields: &[&str],
        window: &SamplingWindow,
    ) -> Result<Vec<Notification>> {
        let url_path = format!("{}/{}/{}", TELEMETRY_PATH, dataset, path.join("/"));

        let mut notifications = Vec::new();
        match window {
            SamplingWindow::Range { start, end } => {
                notifications = self.query_range(&url_path, *start, *end).await?;
            }
            SamplingWindow::Lookback { .. } => {
                for (start, end) in window.slices() {
                    let slice = self.query_range(&url_path, start, end).await?;
                    if let Some(point) = collapse(slice, nanos(end)) {
                        notifications.push(point);
                    }
                }
            }
        }

        for notification in &mut notifications {
            notification.updates.retain(|key, _| fields.contains(&key.as_str()));
        }

        debug!(
            "{} notifications for {} under {}",
            notifications.len(),
            dataset,
            path.join("/")
        );
        Ok(notifications)
    }

    async fn completed_tasks(&self) -> Result<Vec<Task>> {
        let page: TaskPage = self
            .get_json(
                TASKS_PATH,
                &[
                    ("queryparam", String::new()),
                    ("startIndex", "0".to_string()),
                    ("endIndex", "0".to_string()),
                ],
            )
            .await?;

        let fetched = page.data.len();
        let completed: Vec<Task> = page.data.into_iter().filter(Task::is_completed).collect();
        info!(
            "Task history returned {} of {} tasks, {} completed",
            fetched,
            page.total,
            completed.len()
        );
        Ok(completed)
    }

    async fn logout(&self) -> Result<()> {
        if !self.session_login {
            return Ok(());
        }

        let url = format!("{}{}", self.base_url, LOGOUT_PATH);
        let response = self.client.post(&url).send().await?;
        self.handle_response(response, LOGOUT_PATH).await?;
        info!("Logged out of {}", self.base_url);
        Ok(())
    }
}

/// Controller error bodies carry `errorCode` and `errorMessage`.
fn error_message(body: &Value) -> Option<String> {
    let code = body.get("errorCode");
    let message = body.get("errorMessage");
    if code.is_none() && message.is_none() {
        return None;
    }

    let text = |v: Option<&Value>| match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Some(format!("{} {}", text(code), text(message)).trim().to_string())
}

/// Merge one slice's notifications into a single point, newest update wins.
fn collapse(mut slice: Vec<Notification>, timestamp: i64) -> Option<Notification> {
    if slice.is_empty() {
        return None;
    }

    slice.sort_by_key(|n| n.timestamp);
    let path = slice[0].path.clone();
    let mut updates = HashMap::new();
    for notification in slice {
        updates.extend(notification.updates);
    }

    Some(Notification {
        timestamp,
        path,
        updates,
    })
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}
