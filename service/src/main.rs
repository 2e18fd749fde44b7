//! `govwatch-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): run once at startup, then every
//!   `poll_interval_secs` until Ctrl+C.
//! - **`--once`**: run a single refresh, print the report as JSON and exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use govwatch_core::GovwatchConfig;
use govwatch_service::smtp::SmtpSettings;
use govwatch_service::{build_pipeline, scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set variables directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("govwatch-service v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg = GovwatchConfig::load().context("failed to load configuration")?;
    let smtp = SmtpSettings::from_env().context("invalid SMTP settings")?;
    let pipeline = Arc::new(build_pipeline(&cfg, smtp)?);

    if std::env::args().nth(1).as_deref() == Some("--once") {
        let report = pipeline.run_once().await?;
        scheduler::log_report(&report);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    let interval = Duration::from_secs(cfg.poll_interval_secs);
    tracing::info!(interval_secs = cfg.poll_interval_secs, "scheduling refresh");
    scheduler::run_poll_loop(pipeline, interval, shutdown_rx).await;

    tracing::info!("govwatch-service exiting cleanly");
    Ok(())
}
