//! `govwatch-service`: long-running proposal notifier.
//!
//! Wires the core pipeline to real collaborators: the public proposals feed,
//! the on-disk sent store and an SMTP relay. Runs once at startup and then on
//! a fixed interval until shutdown.

pub mod scheduler;
pub mod smtp;

use std::sync::Arc;

use govwatch_core::notify::MailSettings;
use govwatch_core::{FeedClient, GovwatchConfig, JsonSentStore, Notifier, Pipeline};

/// Build the production pipeline from configuration.
pub fn build_pipeline(
    cfg: &GovwatchConfig,
    smtp: smtp::SmtpSettings,
) -> anyhow::Result<Pipeline> {
    let feed = FeedClient::new(
        cfg.feed_url.clone(),
        cfg.query_limit,
        cfg.default_topics.clone(),
    )?;
    tracing::info!(url = feed.base_url(), "proposal feed configured");
    let store = JsonSentStore::new(cfg.store_path.clone(), cfg.effective_store_capacity());
    tracing::info!(
        path = %store.path().display(),
        capacity = store.capacity(),
        "sent store ready"
    );
    let transport = smtp::SmtpTransport::new(smtp)?;
    let notifier = Notifier::new(Box::new(transport), MailSettings::from_config(cfg));
    Ok(Pipeline::new(
        cfg,
        Arc::new(feed),
        Arc::new(store),
        notifier,
    ))
}
