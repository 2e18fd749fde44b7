//! govwatch configuration loading
//!
//! Loads configuration from `~/.config/govwatch/govwatch.toml` (or the
//! `GOVWATCH_CONFIG` env var), then applies environment overrides.
//!
//! ```toml
//! query_limit = 50
//! fallback_recipients = ["ops@example.com"]
//!
//! [[recipients]]
//! topics = ["TOPIC_GOVERNANCE"]
//! to = ["team-gov@example.com"]
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::fetch::ProposalQuery;

pub const DEFAULT_FEED_URL: &str = "https://ic-api.internetcomputer.org/api/v3/proposals";
pub const DEFAULT_QUERY_LIMIT: u32 = 50;

/// Topics announced when neither the caller nor the config names any.
pub const DEFAULT_TOPICS: [&str; 3] = [
    "TOPIC_APPLICATION_CANISTER_MANAGEMENT",
    "TOPIC_PROTOCOL_CANISTER_MANAGEMENT",
    "TOPIC_GOVERNANCE",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Static topic → recipients entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TopicMapping {
    pub topics: Vec<String>,
    #[serde(default)]
    pub to: Vec<String>,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GovwatchConfig {
    /// Proposals feed endpoint
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Topic allow-list used when a query names no topics
    #[serde(default = "default_topics")]
    pub default_topics: Vec<String>,

    /// Statuses a scheduled run asks for
    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,

    /// Page size for feed requests
    #[serde(default = "default_query_limit")]
    pub query_limit: u32,

    /// Max ids kept in the sent store; `None` means twice the query limit
    #[serde(default)]
    pub store_capacity: Option<usize>,

    /// Location of the sent-id document
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Seconds between scheduled runs
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub recipients: Vec<TopicMapping>,

    /// Catch-all recipients for proposals no mapping covers
    #[serde(default)]
    pub fallback_recipients: Vec<String>,

    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    #[serde(default = "default_mail_subject")]
    pub mail_subject: String,

    /// Base for per-proposal links in the HTML body
    #[serde(default = "default_dashboard_base_url")]
    pub dashboard_base_url: String,
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_topics() -> Vec<String> {
    DEFAULT_TOPICS.iter().map(|t| (*t).to_string()).collect()
}

fn default_statuses() -> Vec<String> {
    vec!["OPEN".to_string()]
}

fn default_query_limit() -> u32 {
    DEFAULT_QUERY_LIMIT
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("govwatch").join("sent.json"))
        .unwrap_or_else(|| PathBuf::from("data").join("sent.json"))
}

fn default_poll_interval_secs() -> u64 {
    60 * 60
}

fn default_mail_from() -> String {
    "support@sdg-office.at".to_string()
}

fn default_mail_subject() -> String {
    "ICP Proposals Update".to_string()
}

fn default_dashboard_base_url() -> String {
    "https://dashboard.internetcomputer.org/proposal".to_string()
}

impl Default for GovwatchConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            default_topics: default_topics(),
            statuses: default_statuses(),
            query_limit: default_query_limit(),
            store_capacity: None,
            store_path: default_store_path(),
            poll_interval_secs: default_poll_interval_secs(),
            recipients: Vec::new(),
            fallback_recipients: Vec::new(),
            mail_from: default_mail_from(),
            mail_subject: default_mail_subject(),
            dashboard_base_url: default_dashboard_base_url(),
        }
    }
}

impl GovwatchConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "GOVWATCH_CONFIG";

    pub const DEFAULT_CONFIG_FILENAME: &'static str = "govwatch.toml";

    /// Load configuration from file, then apply process environment
    /// overrides.
    ///
    /// Resolution order:
    /// 1. `GOVWATCH_CONFIG` environment variable
    /// 2. `~/.config/govwatch/govwatch.toml`
    ///
    /// If the config file doesn't exist, defaults are used.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_layered(&Self::resolve_config_path(), |key| std::env::var(key).ok())
    }

    /// File (or defaults when `path` is absent), then `lookup` overrides,
    /// then a single validation of the merged result.
    pub fn load_layered<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = if path.exists() {
            Self::from_toml(&Self::read(path)?)?
        } else {
            tracing::info!(path = %path.display(), "govwatch config not found, using defaults");
            Self::default()
        };
        cfg.apply_env(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::parse(&Self::read(path)?)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let cfg = Self::from_toml(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    fn read(path: &Path) -> Result<String, ConfigError> {
        std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|d| d.join("govwatch").join(Self::DEFAULT_CONFIG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Overlay environment-style settings. `lookup` is `std::env::var` in
    /// production and a map in tests. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MAIL_FROM") {
            self.mail_from = v.trim().to_string();
        }
        if let Some(v) = get("MAIL_TO") {
            self.fallback_recipients = split_list(&v);
        }
        if let Some(v) = get("MAIL_SUBJECT") {
            self.mail_subject = v;
        }
        if let Some(v) = get("PROPOSAL_DASHBOARD_BASE_URL") {
            self.dashboard_base_url = v.trim().to_string();
        }
        if let Some(v) = get("QUERY_LIMIT") {
            self.query_limit = parse_env("QUERY_LIMIT", &v)?;
        }
        if let Some(v) = get("SENT_STORE_CAPACITY") {
            self.store_capacity = Some(parse_env("SENT_STORE_CAPACITY", &v)?);
        }
        if let Some(v) = get("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_env("POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("SENT_STORE_PATH") {
            self.store_path = PathBuf::from(v.trim());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_limit == 0 {
            return Err(ConfigError::Invalid("query_limit must be > 0".to_string()));
        }
        if self.store_capacity == Some(0) {
            return Err(ConfigError::Invalid("store_capacity must be > 0".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be > 0".to_string(),
            ));
        }
        if let Some(pos) = self.recipients.iter().position(|m| m.topics.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "recipients[{pos}] has no topics"
            )));
        }
        Ok(())
    }

    /// Sent-store capacity: the explicit override, else two polling
    /// cycles' worth of ids.
    pub fn effective_store_capacity(&self) -> usize {
        self.store_capacity
            .unwrap_or_else(|| 2 * self.query_limit as usize)
    }

    /// Query issued by a scheduled run.
    pub fn run_query(&self) -> ProposalQuery {
        ProposalQuery {
            limit: Some(self.query_limit),
            ..ProposalQuery::with_statuses(self.statuses.iter().cloned())
        }
    }
}

/// Split a comma-separated address list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
