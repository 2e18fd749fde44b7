//! Persistent record of which proposals have already been announced.
//!
//! ## Layout
//!
//! ```text
//! ~/.local/share/govwatch/sent.json
//! {
//!   "sent": { "<proposal id>": <epoch millis of last send> }
//! }
//! ```
//!
//! The document is rewritten as a whole on every mark (temp sibling +
//! rename). A missing, unreadable or corrupt document reads as empty; that
//! loses dedup history and can cause one repeated notification wave, but
//! never blocks a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::proposal::Proposal;

/// Errors from the sent store. Only writes can fail; reads self-heal.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Dedup store seen by the pipeline.
#[async_trait]
pub trait SentStore: Send + Sync {
    /// True iff the proposal has an id and that id has never been marked.
    async fn is_unsent(&self, proposal: &Proposal) -> bool;

    /// Keep only unsent proposals, in input order. Proposals without an id
    /// are dropped.
    async fn filter_unsent(&self, proposals: Vec<Proposal>) -> Vec<Proposal>;

    /// Stamp every id with the current time, then prune to capacity.
    /// Id 0 is never a real proposal and is skipped.
    async fn mark_sent(&self, ids: &[u64]) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SentDocument {
    #[serde(default)]
    sent: BTreeMap<String, i64>,
}

/// [`SentStore`] backed by a single JSON document on disk.
pub struct JsonSentStore {
    path: PathBuf,
    capacity: usize,
    clock: Clock,
    /// Serialises read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonSentStore {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self::with_clock(path, capacity, system_clock())
    }

    /// Create a store with an explicit clock (for testing).
    pub fn with_clock(path: impl Into<PathBuf>, capacity: usize, clock: Clock) -> Self {
        Self {
            path: path.into(),
            capacity,
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current id → timestamp map.
    pub async fn entries(&self) -> BTreeMap<String, i64> {
        let _guard = self.lock.lock().await;
        self.load().await.sent
    }

    async fn load(&self) -> SentDocument {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SentDocument::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "sent store unreadable, starting empty: {e}");
                return SentDocument::default();
            }
        };
        if raw.trim().is_empty() {
            return SentDocument::default();
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => decode_document(&value).unwrap_or_else(|| {
                tracing::warn!(path = %self.path.display(), "sent store has unexpected shape, starting empty");
                SentDocument::default()
            }),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "sent store corrupt, starting empty: {e}");
                SentDocument::default()
            }
        }
    }

    /// Atomically write the document via a `.tmp` sibling.
    async fn persist(&self, doc: &SentDocument) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json.as_bytes()).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl SentStore for JsonSentStore {
    async fn is_unsent(&self, proposal: &Proposal) -> bool {
        let Some(id) = proposal.id else {
            return false;
        };
        let _guard = self.lock.lock().await;
        !self.load().await.sent.contains_key(&id.to_string())
    }

    async fn filter_unsent(&self, proposals: Vec<Proposal>) -> Vec<Proposal> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await;
        proposals
            .into_iter()
            .filter(|p| p.id.is_some_and(|id| !doc.sent.contains_key(&id.to_string())))
            .collect()
    }

    async fn mark_sent(&self, ids: &[u64]) -> Result<(), StoreError> {
        let ids: Vec<u64> = ids.iter().copied().filter(|id| *id != 0).collect();
        if ids.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock().await;
        let mut doc = self.load().await;
        let now = (self.clock)();
        for id in &ids {
            let key = id.to_string();
            let stamp = match doc.sent.get(&key) {
                Some(prev) if *prev >= now => prev + 1,
                _ => now,
            };
            doc.sent.insert(key, stamp);
        }

        let evicted = prune(&mut doc.sent, self.capacity);
        tracing::debug!(
            marked = ids.len(),
            evicted,
            retained = doc.sent.len(),
            "sent store updated"
        );
        self.persist(&doc).await
    }
}

/// Accept `{ "sent": { id: number } }`; entries with non-numeric values are
/// skipped. Any other top-level shape is rejected.
fn decode_document(value: &Value) -> Option<SentDocument> {
    let sent = value.as_object()?.get("sent")?.as_object()?;
    let sent = sent
        .iter()
        .filter_map(|(id, ts)| {
            let ts = ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64))?;
            Some((id.clone(), ts))
        })
        .collect();
    Some(SentDocument { sent })
}

/// Keep the `capacity` most recent entries. Equal timestamps (one batch)
/// keep the larger ids. Returns the number of evicted entries.
fn prune(sent: &mut BTreeMap<String, i64>, capacity: usize) -> usize {
    if sent.len() <= capacity {
        return 0;
    }
    let mut entries: Vec<(String, i64)> = std::mem::take(sent).into_iter().collect();
    entries.sort_by(|(a_id, a_ts), (b_id, b_ts)| {
        b_ts.cmp(a_ts)
            .then_with(|| numeric_id(b_id).cmp(&numeric_id(a_id)))
    });
    let evicted = entries.len() - capacity;
    entries.truncate(capacity);
    sent.extend(entries);
    evicted
}

fn numeric_id(key: &str) -> u64 {
    key.parse().unwrap_or(0)
}
