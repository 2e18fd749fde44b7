//! SMTP mail transport.
//!
//! Settings come from `SMTP_*` environment variables. Port 465 implies
//! implicit TLS unless `SMTP_SECURE` says otherwise; on other ports TLS is
//! upgraded via STARTTLS when the server offers it, required with
//! `SMTP_REQUIRE_TLS`, or skipped entirely with `SMTP_IGNORE_TLS`.

use std::time::Duration;

use async_trait::async_trait;
use govwatch_core::notify::{MailTransport, NotifyError, OutboundMessage};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

const DEFAULT_PORT: u16 = 587;
const IMPLICIT_TLS_PORT: u16 = 465;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("SMTP_HOST is not set")]
    MissingHost,

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("TLS setup failed: {0}")]
    Tls(#[from] lettre::transport::smtp::Error),
}

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (SMTPS).
    Implicit,
    /// STARTTLS, abort if unavailable.
    Required,
    /// STARTTLS when offered.
    Opportunistic,
    /// Plaintext.
    Disabled,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub secure: bool,
    pub ignore_tls: bool,
    pub require_tls: bool,
    pub greeting_timeout: Duration,
    pub connection_timeout: Duration,
    /// Client hostname announced in EHLO.
    pub name: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub tls_reject_unauthorized: bool,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("ignore_tls", &self.ignore_tls)
            .field("require_tls", &self.require_tls)
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl SmtpSettings {
    pub fn from_env() -> Result<Self, SmtpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SmtpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("SMTP_PORT") {
            Some(v) => parse_env::<u16>("SMTP_PORT", &v)?,
            None => DEFAULT_PORT,
        };
        let timeout = |key: &str| -> Result<Duration, SmtpError> {
            let ms = match get(key) {
                Some(v) => parse_env::<u64>(key, &v)?,
                None => DEFAULT_TIMEOUT_MS,
            };
            Ok(Duration::from_millis(ms))
        };

        Ok(Self {
            host: get("SMTP_HOST").map(|h| h.trim().to_string()),
            port,
            secure: parse_bool(get("SMTP_SECURE").as_deref(), port == IMPLICIT_TLS_PORT),
            ignore_tls: parse_bool(get("SMTP_IGNORE_TLS").as_deref(), false),
            require_tls: parse_bool(get("SMTP_REQUIRE_TLS").as_deref(), false),
            greeting_timeout: timeout("SMTP_GREETING_TIMEOUT")?,
            connection_timeout: timeout("SMTP_CONNECTION_TIMEOUT")?,
            name: get("SMTP_NAME"),
            user: get("SMTP_USER"),
            pass: get("SMTP_PASS"),
            tls_reject_unauthorized: parse_bool(
                get("SMTP_TLS_REJECT_UNAUTHORIZED").as_deref(),
                true,
            ),
        })
    }

    pub fn tls_mode(&self) -> TlsMode {
        if self.secure {
            TlsMode::Implicit
        } else if self.ignore_tls {
            TlsMode::Disabled
        } else if self.require_tls {
            TlsMode::Required
        } else {
            TlsMode::Opportunistic
        }
    }

    /// Credentials are only used when both user and password are set.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.user, &self.pass) {
            (Some(user), Some(pass)) => Some(Credentials::new(user.clone(), pass.clone())),
            _ => None,
        }
    }
}

/// Lenient boolean: `1/true/yes/on`, `0/false/no/off`, anything else is
/// `default`.
pub fn parse_bool(value: Option<&str>, default: bool) -> bool {
    let Some(raw) = value else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SmtpError> {
    value.trim().parse().map_err(|_| SmtpError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// [`MailTransport`] over an async SMTP connection.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(settings: SmtpSettings) -> Result<Self, SmtpError> {
        let host = settings.host.clone().ok_or(SmtpError::MissingHost)?;
        let tls_params = || {
            TlsParameters::builder(host.clone())
                .dangerous_accept_invalid_certs(!settings.tls_reject_unauthorized)
                .build()
        };
        let tls = match settings.tls_mode() {
            TlsMode::Implicit => Tls::Wrapper(tls_params()?),
            TlsMode::Required => Tls::Required(tls_params()?),
            TlsMode::Opportunistic => Tls::Opportunistic(tls_params()?),
            TlsMode::Disabled => Tls::None,
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host.as_str())
            .port(settings.port)
            .tls(tls)
            .timeout(Some(
                settings.connection_timeout.max(settings.greeting_timeout),
            ));
        if let Some(name) = &settings.name {
            builder = builder.hello_name(ClientId::Domain(name.clone()));
        }
        if let Some(credentials) = settings.credentials() {
            builder = builder.credentials(credentials);
        }

        tracing::debug!(
            %host,
            port = settings.port,
            tls = ?settings.tls_mode(),
            "smtp transport configured"
        );
        Ok(Self {
            mailer: builder.build(),
        })
    }
}

/// Turn a composed message into a MIME message with a fresh Message-ID.
pub fn build_message(message: &OutboundMessage) -> Result<(Message, String), NotifyError> {
    let invalid = |what: &str, e: lettre::address::AddressError| {
        NotifyError::InvalidMessage(format!("{what}: {e}"))
    };

    let from: Mailbox = message.from.parse().map_err(|e| invalid("from", e))?;
    let domain = message
        .from
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('>').to_string())
        .unwrap_or_else(|| "govwatch.local".to_string());
    let message_id = format!("<{}@{domain}>", uuid::Uuid::new_v4());

    let recipients: Vec<&str> = message
        .to
        .iter()
        .map(String::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect();
    if recipients.is_empty() {
        return Err(NotifyError::InvalidMessage("no recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(from)
        .subject(message.subject.clone())
        .message_id(Some(message_id.clone()));
    for to in recipients {
        let mailbox: Mailbox = to.parse().map_err(|e| invalid("to", e))?;
        builder = builder.to(mailbox);
    }

    let mime = builder
        .multipart(MultiPart::alternative_plain_html(
            message.text.clone(),
            message.html.clone(),
        ))
        .map_err(|e| NotifyError::InvalidMessage(e.to_string()))?;
    Ok((mime, message_id))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, message: OutboundMessage) -> Result<String, NotifyError> {
        let (mime, message_id) = build_message(&message)?;
        let response = self
            .mailer
            .send(mime)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        tracing::debug!(
            %message_id,
            code = %response.code(),
            "smtp accepted message"
        );
        Ok(message_id)
    }
}
