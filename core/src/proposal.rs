//! Canonical proposal entity and the page shapes the upstream feed returns.
//!
//! The feed is loose about field names (`id` vs `proposal_id`,
//! `updated_at` vs `updated_at_time`, numbers vs numeric strings). All of
//! that is resolved here, once, so the rest of the crate only ever sees a
//! [`Proposal`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of proposal statuses understood by the filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Adopted,
    Executed,
    Failed,
    Open,
    Rejected,
    Unknown,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 6] = [
        Self::Adopted,
        Self::Executed,
        Self::Failed,
        Self::Open,
        Self::Rejected,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Adopted => "ADOPTED",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
            Self::Open => "OPEN",
            Self::Rejected => "REJECTED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a user- or feed-supplied status. Surrounding whitespace and
    /// case are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single governance proposal as seen by this system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Proposal {
    /// `None` when the feed entry carried no usable id.
    pub id: Option<u64>,
    pub topic: String,
    /// Status exactly as the feed sent it; empty when absent.
    pub status: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_seconds: Option<u64>,
}

impl Proposal {
    /// Normalise one upstream feed entry.
    ///
    /// Field precedence: `id` then `proposal_id`; `updated_at` then
    /// `updated_at_time`; `proposal_timestamp_seconds` then
    /// `created_at_time`. Non-object entries yield an empty proposal that
    /// no topic filter will ever match.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::empty();
        };

        let id = first_present(obj, &["id", "proposal_id"]).and_then(value_as_u64);
        let topic = obj
            .get("topic")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let updated_at = first_present(obj, &["updated_at", "updated_at_time"]).and_then(value_as_text);
        let timestamp_seconds = first_present(obj, &["proposal_timestamp_seconds", "created_at_time"])
            .and_then(value_as_u64);

        Self {
            id,
            topic,
            status,
            title,
            updated_at,
            timestamp_seconds,
        }
    }

    /// The feed status when it is spelled exactly like a known status.
    pub fn known_status(&self) -> Option<ProposalStatus> {
        ProposalStatus::ALL
            .into_iter()
            .find(|s| s.as_str() == self.status)
    }

    /// Id used for ordering; a missing id sorts as 0.
    pub fn sort_key(&self) -> u64 {
        self.id.unwrap_or(0)
    }

    fn empty() -> Self {
        Self {
            id: None,
            topic: String::new(),
            status: String::new(),
            title: String::new(),
            updated_at: None,
            timestamp_seconds: None,
        }
    }
}

/// The feed answers either with a bare array or with an envelope carrying
/// `data` plus metadata. Anything else is kept verbatim as `Malformed`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalPage {
    List(Vec<Proposal>),
    Envelope {
        max_proposal_index: Option<u64>,
        data: Vec<Proposal>,
        /// Remaining envelope fields, untouched.
        extra: Map<String, Value>,
    },
    Malformed(Value),
}

impl ProposalPage {
    /// Parse a response body. Bodies that are not JSON are kept as a
    /// `Malformed` string rather than rejected.
    pub fn parse(body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::Malformed(Value::String(body.to_string())),
        }
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items.iter().map(Proposal::from_value).collect()),
            Value::Object(mut obj) if obj.get("data").is_some_and(Value::is_array) => {
                let data = match obj.remove("data") {
                    Some(Value::Array(items)) => items.iter().map(Proposal::from_value).collect(),
                    _ => Vec::new(),
                };
                let max_proposal_index = obj.get("max_proposal_index").and_then(anchor_value);
                Self::Envelope {
                    max_proposal_index,
                    data,
                    extra: obj,
                }
            }
            other => Self::Malformed(other),
        }
    }

    pub fn proposals(&self) -> &[Proposal] {
        match self {
            Self::List(items) => items,
            Self::Envelope { data, .. } => data,
            Self::Malformed(_) => &[],
        }
    }

    pub fn into_proposals(self) -> Vec<Proposal> {
        match self {
            Self::List(items) => items,
            Self::Envelope { data, .. } => data,
            Self::Malformed(_) => Vec::new(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Read the feed's `max_proposal_index`. Only JSON numbers count; a
/// stringly-typed index is ignored.
pub fn anchor_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        _ => None,
    }
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
