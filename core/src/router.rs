//! Topic → recipient routing.
//!
//! A proposal goes to every mapping whose topic list contains its topic, so
//! one proposal can appear in several groups. Groups are identified by a
//! canonical recipient key: trimmed, lower-cased, de-duplicated, joined with
//! `,` in declared order. The key is not sorted: `[a, b]` and
//! `[b, a]` are two different groups and each gets its own email.

use crate::config::TopicMapping;
use crate::proposal::Proposal;

/// One outgoing email's worth of proposals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientGroup {
    pub key: String,
    pub to: Vec<String>,
    pub proposals: Vec<Proposal>,
}

impl RecipientGroup {
    /// Ids of the member proposals that have one.
    pub fn proposal_ids(&self) -> Vec<u64> {
        self.proposals.iter().filter_map(|p| p.id).collect()
    }
}

/// Canonical identity of a recipient list.
pub fn group_key(recipients: &[String]) -> String {
    dedup_preserving_order(recipients.iter().map(|r| r.trim().to_lowercase())).join(",")
}

/// Recipients as addressed: trimmed, blanks removed, first spelling wins.
pub fn normalize_recipients(recipients: &[String]) -> Vec<String> {
    dedup_preserving_order(recipients.iter().map(|r| r.trim().to_string()))
}

fn dedup_preserving_order(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Group proposals by recipient list.
///
/// Proposals that match no mapping go to `fallback` when it has at least one
/// address; otherwise they are left out and will be offered again next run.
pub fn route(
    proposals: Vec<Proposal>,
    mappings: &[TopicMapping],
    fallback: &[String],
) -> Vec<RecipientGroup> {
    let mut groups: Vec<RecipientGroup> = Vec::new();
    let mut unmatched: Vec<Proposal> = Vec::new();

    for proposal in proposals {
        let matched: Vec<&TopicMapping> = mappings
            .iter()
            .filter(|m| m.topics.iter().any(|t| *t == proposal.topic))
            .collect();
        if matched.is_empty() {
            unmatched.push(proposal);
            continue;
        }
        for mapping in matched {
            let key = group_key(&mapping.to);
            if key.is_empty() {
                continue;
            }
            let group = group_for(&mut groups, key, &mapping.to);
            if !group.proposals.contains(&proposal) {
                group.proposals.push(proposal.clone());
            }
        }
    }

    let fallback_key = group_key(fallback);
    if !unmatched.is_empty() && !fallback_key.is_empty() {
        tracing::debug!(
            count = unmatched.len(),
            "routing unmatched proposals to fallback recipients"
        );
        group_for(&mut groups, fallback_key, fallback)
            .proposals
            .extend(unmatched);
    } else if !unmatched.is_empty() {
        tracing::debug!(
            count = unmatched.len(),
            "no mapping or fallback for proposals, leaving them for a later run"
        );
    }

    groups
}

fn group_for<'a>(
    groups: &'a mut Vec<RecipientGroup>,
    key: String,
    recipients: &[String],
) -> &'a mut RecipientGroup {
    if let Some(pos) = groups.iter().position(|g| g.key == key) {
        return &mut groups[pos];
    }
    groups.push(RecipientGroup {
        key,
        to: normalize_recipients(recipients),
        proposals: Vec::new(),
    });
    let last = groups.len() - 1;
    &mut groups[last]
}
