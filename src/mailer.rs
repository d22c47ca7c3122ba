//! SMTP delivery of the rendered report
//!
//! The report goes out as a single multipart message: a plaintext part and
//! the workbook as a base64 attachment.

use crate::config::MailConfig;
use crate::errors::{ReportError, Result};
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::Path;
use tracing::{debug, info};

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone)]
pub struct Mailer {
    config: MailConfig,
}

impl Mailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Build the message carrying `attachment`.
    pub async fn compose(&self, attachment: &Path, subject: &str) -> Result<Message> {
        let filename = attachment
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("report.xlsx")
            .to_string();
        let content = tokio::fs::read(attachment).await?;
        let content_type = ContentType::parse(XLSX_CONTENT_TYPE)
            .map_err(|e| ReportError::Mail(format!("invalid content type: {}", e)))?;
        let body = Body::new_with_encoding(content, ContentTransferEncoding::Base64)
            .map_err(|_| ReportError::Mail("attachment cannot be base64 encoded".to_string()))?;

        let mut builder = Message::builder()
            .from(self.config.from.parse()?)
            .subject(subject)
            .date_now();
        for recipient in &self.config.to {
            builder = builder.to(recipient.parse()?);
        }

        let message = builder.multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(self.config.body.clone()))
                .singlepart(Attachment::new(filename).body(body, content_type)),
        )?;

        debug!(
            "Composed report mail for {} recipients with {}",
            self.config.to.len(),
            attachment.display()
        );
        Ok(message)
    }

    fn smtp_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let smtp = &self.config.smtp;

        let mut builder = if smtp.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        };
        builder = builder.port(smtp.port);

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    /// Hand a message to any transport.
    pub async fn deliver<T>(&self, transport: &T, message: Message) -> Result<()>
    where
        T: AsyncTransport + Sync,
        T::Error: std::fmt::Display,
    {
        transport
            .send(message)
            .await
            .map_err(|e| ReportError::Mail(e.to_string()))?;
        Ok(())
    }

    /// Compose and submit the report over SMTP.
    pub async fn send_report(&self, attachment: &Path, subject: &str) -> Result<()> {
        let message = self.compose(attachment, subject).await?;
        let transport = self.smtp_transport()?;

        info!(
            "Sending {} to {} via {}:{}",
            attachment.display(),
            self.config.to.join(", "),
            self.config.smtp.host,
            self.config.smtp.port
        );
        self.deliver(&transport, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmtpConfig;
    use lettre::transport::stub::AsyncStubTransport;
    use tempfile::TempDir;

    fn mail_config() -> MailConfig {
        MailConfig {
            enabled: true,
            from: "reports@example.net".to_string(),
            to: vec!["noc@example.net".to_string(), "ops@example.net".to_string()],
            subject: "Daily Report".to_string(),
            body: "Report attached".to_string(),
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 25,
                starttls: false,
                username: None,
                password: None,
            },
        }
    }

    fn attachment(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("rapor_2024_01_02_03_04_05.xlsx");
        std::fs::write(&path, [0x50, 0x4b, 0x03, 0x04, 0xff, 0xfe, 0x00, 0x81]).unwrap();
        path
    }

    #[tokio::test]
    async fn test_compose_attaches_report() {
        let dir = TempDir::new().unwrap();
        let path = attachment(&dir);
        let mailer = Mailer::new(mail_config());

        let message = mailer
            .compose(&path, "Daily Report 2024_01_02_03_04_05")
            .await
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Subject: Daily Report 2024_01_02_03_04_05"));
        assert!(raw.contains("noc@example.net"));
        assert!(raw.contains("ops@example.net"));
        assert!(raw.contains("Content-Disposition: attachment"));
        assert!(raw.contains("rapor_2024_01_02_03_04_05.xlsx"));
        assert!(raw.contains("Content-Transfer-Encoding: base64"));
        assert!(raw.contains("Report attached"));
    }

    #[tokio::test]
    async fn test_text_attachment_still_base64() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.xlsx");
        std::fs::write(&path, "hello report").unwrap();

        let message = Mailer::new(mail_config())
            .compose(&path, "Daily Report")
            .await
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("Content-Transfer-Encoding: base64"));
        assert!(raw.contains("aGVsbG8gcmVwb3J0"));
        assert!(!raw.contains("hello report"));
    }

    #[tokio::test]
    async fn test_invalid_sender_is_mail_error() {
        let dir = TempDir::new().unwrap();
        let path = attachment(&dir);
        let mut config = mail_config();
        config.from = "not an address".to_string();

        let err = Mailer::new(config).compose(&path, "x").await.unwrap_err();
        assert!(matches!(err, ReportError::Mail(_)));
    }

    #[tokio::test]
    async fn test_missing_attachment_is_io_error() {
        let dir = TempDir::new().unwrap();
        let mailer = Mailer::new(mail_config());

        let err = mailer
            .compose(&dir.path().join("missing.xlsx"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Io(_)));
    }

    #[tokio::test]
    async fn test_deliver_through_transport() {
        let dir = TempDir::new().unwrap();
        let path = attachment(&dir);
        let mailer = Mailer::new(mail_config());
        let message = mailer.compose(&path, "Daily Report").await.unwrap();

        let transport = AsyncStubTransport::new_ok();
        mailer.deliver(&transport, message).await.unwrap();
        assert_eq!(transport.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = attachment(&dir);
        let mailer = Mailer::new(mail_config());
        let message = mailer.compose(&path, "Daily Report").await.unwrap();

        let transport = AsyncStubTransport::new_error();
        let err = mailer.deliver(&transport, message).await.unwrap_err();
        assert!(matches!(err, ReportError::Mail(_)));
    }
}
