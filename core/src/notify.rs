//! Message composition and dispatch for one recipient group.
//!
//! The wire protocol lives behind [`MailTransport`]; this module only decides
//! what the message says and who it goes to. It never touches the sent store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};

use crate::config::GovwatchConfig;
use crate::proposal::Proposal;
use crate::router::RecipientGroup;

/// A fully composed email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Transport failure, carried as text so any mail backend can report it.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Delivers composed messages. Returns the transport's message id.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<String, NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub sent: bool,
    pub message_id: Option<String>,
    pub reason: Option<String>,
}

/// Sender identity and presentation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub from: String,
    pub subject: String,
    pub dashboard_base_url: String,
}

impl MailSettings {
    pub fn from_config(cfg: &GovwatchConfig) -> Self {
        Self {
            from: cfg.mail_from.clone(),
            subject: cfg.mail_subject.clone(),
            dashboard_base_url: cfg.dashboard_base_url.clone(),
        }
    }
}

pub struct Notifier {
    transport: Box<dyn MailTransport>,
    settings: MailSettings,
}

impl Notifier {
    pub fn new(transport: Box<dyn MailTransport>, settings: MailSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Send one email for `group`. An empty group sends nothing.
    pub async fn notify(&self, group: &RecipientGroup) -> Result<NotifyOutcome, NotifyError> {
        if group.proposals.is_empty() {
            return Ok(NotifyOutcome {
                sent: false,
                message_id: None,
                reason: Some("no_proposals".to_string()),
            });
        }

        let message = self.compose(group);
        let to = message.to.join(",");
        let message_id = self.transport.send(message).await?;
        tracing::debug!(%message_id, %to, "email sent");
        Ok(NotifyOutcome {
            sent: true,
            message_id: Some(message_id),
            reason: None,
        })
    }

    pub fn compose(&self, group: &RecipientGroup) -> OutboundMessage {
        OutboundMessage {
            from: self.settings.from.clone(),
            to: group.to.clone(),
            subject: self.settings.subject.clone(),
            text: render_text(&group.proposals),
            html: render_html(&group.proposals, &self.settings.dashboard_base_url),
        }
    }
}

fn display_id(p: &Proposal) -> String {
    p.id.map_or_else(|| "unknown".to_string(), |id| id.to_string())
}

pub fn render_text(proposals: &[Proposal]) -> String {
    let lines: Vec<String> = proposals
        .iter()
        .map(|p| {
            format!(
                "#{} [{}] ({}) {} {}",
                display_id(p),
                p.status,
                p.topic,
                p.updated_at.as_deref().unwrap_or_default(),
                p.title
            )
            .trim()
            .to_string()
        })
        .collect();
    format!(
        "New proposals available ({}):\n\n{}",
        proposals.len(),
        lines.join("\n")
    )
}

pub fn render_html(proposals: &[Proposal], dashboard_base_url: &str) -> String {
    let base = dashboard_base_url.trim_end_matches('/');
    let items: String = proposals
        .iter()
        .map(|p| {
            let id = display_id(p);
            let title = if p.title.is_empty() {
                String::new()
            } else {
                format!(
                    "<div><strong>Title:</strong> {}</div>",
                    escape_html(&p.title)
                )
            };
            let created = p
                .timestamp_seconds
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(|at| {
                    format!(
                        "<div><strong>Created:</strong> {}</div>",
                        at.to_rfc3339_opts(SecondsFormat::Millis, true)
                    )
                })
                .unwrap_or_default();
            format!(
                "<li><a href=\"{base}/{id}\" target=\"_blank\" rel=\"noopener noreferrer\">Proposal #{id}</a>\
                 {title}<div><strong>Topic:</strong> {} · <strong>Status:</strong> {}</div>{created}</li>",
                escape_html(&p.topic),
                escape_html(&p.status),
            )
        })
        .collect();
    format!(
        "<div style=\"font-family: system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial, sans-serif; font-size:14px; color:#111;\">\
         <p>New proposals available ({}):</p><ul style=\"padding-left:16px;\">{items}</ul></div>",
        proposals.len()
    )
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}
