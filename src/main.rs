//! CloudVision daily report binary

use chrono::Utc;
use clap::Parser;
use cvp_report::{Config, Credentials, CvpClient, ReportCollector, ReportError, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pull device health and change history from CloudVision and mail it as a spreadsheet
#[derive(Debug, Parser)]
#[command(name = "cvp-report", version)]
struct Cli {
    /// Controller address
    #[arg(long, env = "CVP_SERVER")]
    server: Option<String>,

    /// Log in with this user instead of any configured API token; the password
    /// comes from CVP_PASSWORD or is prompted
    #[arg(short, long)]
    username: Option<String>,

    /// Directory for the generated workbook
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Write the workbook without mailing it
    #[arg(long)]
    no_mail: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    initialize_tracing();

    info!("Starting CloudVision report v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(Cli::parse()).await {
        error!("Report run failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    apply_cli(&mut config, cli, std::env::var("CVP_PASSWORD").ok());
    prompt_missing_password(&mut config)?;

    config.validate().map_err(ReportError::Config)?;

    info!(
        "Report configuration - Server: {}, Output: {}, Mail: {}",
        config.server,
        config.output_dir.display(),
        config.mail.enabled
    );

    let client = CvpClient::connect(&config).await?;
    let outcome = ReportCollector::new(client, config).run(Utc::now()).await?;

    info!(
        "Report written to {} (mailed: {})",
        outcome.path.display(),
        outcome.mailed
    );
    Ok(())
}

/// Layer command-line flags over the environment configuration.
fn apply_cli(config: &mut Config, cli: Cli, env_password: Option<String>) {
    if let Some(server) = cli.server {
        config.server = server;
    }

    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }

    if cli.no_mail {
        config.mail.enabled = false;
    }

    if let Some(username) = cli.username {
        if matches!(config.credentials, Credentials::Token(_)) {
            warn!("--username given; using password login instead of the configured token");
        }
        config.credentials = Credentials::Password {
            username,
            password: env_password.unwrap_or_default(),
        };
    }
}

fn prompt_missing_password(config: &mut Config) -> Result<()> {
    if let Credentials::Password { username, password } = &mut config.credentials {
        if password.is_empty() {
            *password = rpassword::prompt_password(format!("Password for {}: ", username))?;
        }
    }
    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
