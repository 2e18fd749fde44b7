//! Feed client with anchored pagination.
//!
//! The feed grows at the tail while we page through it. Every fetch first
//! asks the feed for its current `max_proposal_index` and then pins the
//! real request to that index, so a later page is computed against the
//! same snapshot instead of shifting under newly inserted proposals.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::proposal::{ProposalPage, anchor_value};

/// Per-request timeout for feed calls.
pub const FEED_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from the upstream feed. Never swallowed by the client.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned HTTP {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("invalid feed url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Caller-side query. `None`/zero fields fall back to client defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalQuery {
    pub topics: Option<Vec<String>>,
    pub statuses: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ProposalQuery {
    pub fn with_statuses<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statuses: Some(statuses.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

/// Anything that can produce a page of proposals.
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn fetch(&self, query: &ProposalQuery) -> Result<ProposalPage, FetchError>;
}

/// HTTP client for the proposals feed.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
    default_limit: u32,
    default_topics: Vec<String>,
}

impl FeedClient {
    pub fn new(
        base_url: impl Into<String>,
        default_limit: u32,
        default_topics: Vec<String>,
    ) -> Result<Self, FetchError> {
        let base_url = base_url.into();
        reqwest::Url::parse(&base_url).map_err(|e| FetchError::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        let http = reqwest::Client::builder().timeout(FEED_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            default_limit,
            default_topics,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn topics<'a>(&'a self, query: &'a ProposalQuery) -> &'a [String] {
        query.topics.as_deref().unwrap_or(&self.default_topics)
    }

    /// Phase one: read the feed's current tail index. A body without a
    /// numeric `max_proposal_index` yields no anchor.
    async fn fetch_anchor(&self, topics: &[String]) -> Result<Option<u64>, FetchError> {
        let mut params: Vec<(&str, String)> = vec![("limit", self.default_limit.to_string())];
        params.extend(topics.iter().map(|t| ("include_topic", t.clone())));

        let body = self.get(&params).await?.text().await?;
        Ok(serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("max_proposal_index").and_then(anchor_value)))
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<reqwest::Response, FetchError> {
        let resp = self.http.get(&self.base_url).query(params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: resp.url().to_string(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ProposalSource for FeedClient {
    async fn fetch(&self, query: &ProposalQuery) -> Result<ProposalPage, FetchError> {
        let topics = self.topics(query);
        let anchor = self.fetch_anchor(topics).await?;
        tracing::debug!(?anchor, topics = topics.len(), "feed anchor resolved");

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(anchor) = anchor {
            params.push(("max_proposal_index", anchor.to_string()));
        }
        if let Some(offset) = query.offset.filter(|o| *o > 0) {
            params.push(("offset", offset.to_string()));
        }
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(self.default_limit);
        params.push(("limit", limit.to_string()));
        params.extend(topics.iter().map(|t| ("include_topic", t.clone())));

        let body = self.get(&params).await?.text().await?;
        Ok(ProposalPage::parse(&body))
    }
}
