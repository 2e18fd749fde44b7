//! One complete run: fetch → filter → dedup → route → notify → mark.
//!
//! Runs are serialised by a process-wide guard, so a timer tick that lands
//! while a slow run is still in flight waits instead of racing it on the
//! sent store.
//!
//! Group sends are isolated: a failing group is recorded in the report and
//! the remaining groups still go out. Only proposals whose every group was
//! delivered are marked sent; anything else is offered again next run, which
//! can re-deliver to the groups that did succeed.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::{GovwatchConfig, TopicMapping};
use crate::error::PipelineError;
use crate::fetch::{ProposalQuery, ProposalSource};
use crate::filter::{FilterCriteria, filter_page};
use crate::notify::Notifier;
use crate::router::route;
use crate::store::SentStore;

/// Steps of a run, used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Fetching,
    Filtering,
    Deduping,
    Routing,
    Notifying,
    Marking,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Filtering => "filtering",
            Self::Deduping => "deduping",
            Self::Routing => "routing",
            Self::Notifying => "notifying",
            Self::Marking => "marking",
        }
    }
}

/// Why a run stopped before sending anything.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoProposals,
    AlreadySent,
    NoRecipients,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoProposals => "no_proposals",
            Self::AlreadySent => "already_sent",
            Self::NoRecipients => "no_recipients",
        }
    }
}

/// Result of sending one group.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GroupDelivery {
    pub to: Vec<String>,
    pub proposal_ids: Vec<u64>,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Skipped {
        reason: SkipReason,
    },
    Dispatched {
        deliveries: Vec<GroupDelivery>,
        marked: Vec<u64>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunReport {
    /// Proposals in the fetched page before filtering.
    pub fetched: usize,
    /// Proposals that passed the filter.
    pub matched: usize,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl RunReport {
    fn skipped(fetched: usize, matched: usize, reason: SkipReason) -> Self {
        Self {
            fetched,
            matched,
            outcome: RunOutcome::Skipped { reason },
        }
    }

    /// True when at least one group was delivered.
    pub fn sent(&self) -> bool {
        match &self.outcome {
            RunOutcome::Skipped { .. } => false,
            RunOutcome::Dispatched { deliveries, .. } => deliveries.iter().any(|d| d.sent),
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match &self.outcome {
            RunOutcome::Skipped { reason } => Some(*reason),
            RunOutcome::Dispatched { .. } => None,
        }
    }
}

pub struct Pipeline {
    source: Arc<dyn ProposalSource>,
    store: Arc<dyn SentStore>,
    notifier: Notifier,
    mappings: Vec<TopicMapping>,
    fallback: Vec<String>,
    default_topics: Vec<String>,
    query: ProposalQuery,
    run_guard: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        cfg: &GovwatchConfig,
        source: Arc<dyn ProposalSource>,
        store: Arc<dyn SentStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            mappings: cfg.recipients.clone(),
            fallback: cfg.fallback_recipients.clone(),
            default_topics: cfg.default_topics.clone(),
            query: cfg.run_query(),
            run_guard: Mutex::new(()),
        }
    }

    /// Run with the configured query.
    pub async fn run_once(&self) -> Result<RunReport, PipelineError> {
        self.run_with_query(&self.query).await
    }

    pub async fn run_with_query(&self, query: &ProposalQuery) -> Result<RunReport, PipelineError> {
        let _guard = self.run_guard.lock().await;

        trace_phase(RunPhase::Fetching);
        let page = self.source.fetch(query).await?;
        if page.is_malformed() {
            tracing::warn!("feed returned an unexpected response shape");
        }
        let fetched = page.proposals().len();

        trace_phase(RunPhase::Filtering);
        let criteria = FilterCriteria::new(
            query.topics.as_deref(),
            query.statuses.as_deref(),
            &self.default_topics,
        );
        let proposals = filter_page(page, &criteria).into_proposals();
        let matched = proposals.len();
        if proposals.is_empty() {
            return Ok(RunReport::skipped(fetched, matched, SkipReason::NoProposals));
        }

        trace_phase(RunPhase::Deduping);
        let unsent = self.store.filter_unsent(proposals).await;
        if unsent.is_empty() {
            return Ok(RunReport::skipped(fetched, matched, SkipReason::AlreadySent));
        }

        trace_phase(RunPhase::Routing);
        let groups = route(unsent, &self.mappings, &self.fallback);
        if groups.is_empty() {
            return Ok(RunReport::skipped(fetched, matched, SkipReason::NoRecipients));
        }

        trace_phase(RunPhase::Notifying);
        let mut deliveries = Vec::with_capacity(groups.len());
        let mut failed_ids: HashSet<u64> = HashSet::new();
        for group in &groups {
            let proposal_ids = group.proposal_ids();
            let delivery = match self.notifier.notify(group).await {
                Ok(outcome) => GroupDelivery {
                    to: group.to.clone(),
                    proposal_ids,
                    sent: outcome.sent,
                    message_id: outcome.message_id,
                    error: None,
                },
                Err(e) => {
                    tracing::error!(to = %group.key, "sending proposals email failed: {e}");
                    failed_ids.extend(&proposal_ids);
                    GroupDelivery {
                        to: group.to.clone(),
                        proposal_ids,
                        sent: false,
                        message_id: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            deliveries.push(delivery);
        }

        trace_phase(RunPhase::Marking);
        let mut seen: HashSet<u64> = HashSet::new();
        let marked: Vec<u64> = deliveries
            .iter()
            .filter(|d| d.sent)
            .flat_map(|d| d.proposal_ids.iter().copied())
            .filter(|id| !failed_ids.contains(id) && seen.insert(*id))
            .collect();
        self.store.mark_sent(&marked).await?;

        Ok(RunReport {
            fetched,
            matched,
            outcome: RunOutcome::Dispatched { deliveries, marked },
        })
    }
}

fn trace_phase(phase: RunPhase) {
    tracing::debug!(phase = phase.as_str(), "run phase");
}
