//! Topic/status filter for a fetched page.
//!
//! Pure: no I/O, no clock. The output page has the same shape as the input
//! page; a malformed page passes through untouched so the caller can see
//! that upstream sent something unexpected.

use crate::proposal::{Proposal, ProposalPage, ProposalStatus};

/// What a page is narrowed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCriteria {
    /// Allow-list of topics. Never "all topics".
    pub topics: Vec<String>,
    /// `None` keeps every status.
    pub statuses: Option<Vec<ProposalStatus>>,
}

impl FilterCriteria {
    /// Build criteria from raw inputs. `topics` of `None` falls back to
    /// `default_topics`. Status values that are not part of the closed
    /// status set are dropped from the filter.
    pub fn new(
        topics: Option<&[String]>,
        statuses: Option<&[String]>,
        default_topics: &[String],
    ) -> Self {
        let topics = topics.unwrap_or(default_topics).to_vec();
        let statuses = statuses.map(|raw| {
            raw.iter()
                .filter_map(|s| ProposalStatus::parse(s))
                .collect::<Vec<_>>()
        });
        Self { topics, statuses }
    }

    pub fn matches(&self, proposal: &Proposal) -> bool {
        if !self.topics.iter().any(|t| *t == proposal.topic) {
            return false;
        }
        match &self.statuses {
            Some(allowed) => proposal
                .known_status()
                .is_some_and(|status| allowed.contains(&status)),
            None => true,
        }
    }
}

/// Filter and sort a page ascending by id.
pub fn filter_page(page: ProposalPage, criteria: &FilterCriteria) -> ProposalPage {
    match page {
        ProposalPage::List(items) => ProposalPage::List(filter_proposals(items, criteria)),
        ProposalPage::Envelope {
            max_proposal_index,
            data,
            extra,
        } => ProposalPage::Envelope {
            max_proposal_index,
            data: filter_proposals(data, criteria),
            extra,
        },
        malformed @ ProposalPage::Malformed(_) => malformed,
    }
}

/// Filter a plain sequence of proposals.
///
/// The sort is stable, so entries without an id (which compare as 0) keep
/// their relative feed order at the front.
pub fn filter_proposals(items: Vec<Proposal>, criteria: &FilterCriteria) -> Vec<Proposal> {
    let mut kept: Vec<Proposal> = items.into_iter().filter(|p| criteria.matches(p)).collect();
    kept.sort_by_key(Proposal::sort_key);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn topics(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn ids(items: &[Proposal]) -> Vec<Option<u64>> {
        items.iter().map(|p| p.id).collect()
    }

    #[test]
    fn sorts_ascending_by_id() {
        let page = ProposalPage::from_value(json!([
            {"id": 5, "topic": "T"},
            {"id": 1, "topic": "T"},
            {"id": 3, "topic": "T"}
        ]));
        let criteria = FilterCriteria::new(None, None, &topics(&["T"]));

        let out = filter_page(page, &criteria);
        assert_eq!(ids(out.proposals()), vec![Some(1), Some(3), Some(5)]);
    }

    #[test]
    fn missing_ids_sort_first() {
        let page = ProposalPage::from_value(json!([
            {"id": 2, "topic": "T"},
            {"topic": "T", "title": "no id"}
        ]));
        let criteria = FilterCriteria::new(None, None, &topics(&["T"]));

        let out = filter_page(page, &criteria);
        assert_eq!(ids(out.proposals()), vec![None, Some(2)]);
    }

    #[test]
    fn explicit_topics_override_defaults() {
        let page = ProposalPage::from_value(json!([
            {"id": 1, "topic": "A"},
            {"id": 2, "topic": "B"}
        ]));
        let explicit = topics(&["B"]);
        let criteria = FilterCriteria::new(Some(explicit.as_slice()), None, &topics(&["A"]));

        let out = filter_page(page, &criteria);
        assert_eq!(ids(out.proposals()), vec![Some(2)]);
    }

    #[test]
    fn invalid_statuses_are_dropped_from_the_filter() {
        let raw = vec![" open".to_string(), "bogus".to_string()];
        let criteria = FilterCriteria::new(None, Some(raw.as_slice()), &topics(&["T"]));
        assert_eq!(criteria.statuses, Some(vec![ProposalStatus::Open]));

        let page = ProposalPage::from_value(json!([
            {"id": 1, "topic": "T", "status": "OPEN"},
            {"id": 2, "topic": "T", "status": "EXECUTED"}
        ]));
        let out = filter_page(page, &criteria);
        assert_eq!(ids(out.proposals()), vec![Some(1)]);
    }

    #[test]
    fn status_match_is_exact_against_feed_value() {
        let page = ProposalPage::from_value(json!([
            {"id": 1, "topic": "T", "status": "WEIRD"},
            {"id": 2, "topic": "T"},
            {"id": 3, "topic": "T", "status": "open"},
            {"id": 4, "topic": "T", "status": "UNKNOWN"}
        ]));
        let unknown = vec!["UNKNOWN".to_string()];
        let criteria = FilterCriteria::new(None, Some(unknown.as_slice()), &topics(&["T"]));
        let out = filter_page(page.clone(), &criteria);
        assert_eq!(ids(out.proposals()), vec![Some(4)]);

        let open = vec!["OPEN".to_string()];
        let criteria = FilterCriteria::new(None, Some(open.as_slice()), &topics(&["T"]));
        let out = filter_page(page, &criteria);
        assert!(out.proposals().is_empty());
    }

    #[test]
    fn envelope_shape_is_preserved() {
        let page = ProposalPage::from_value(json!({
            "max_proposal_index": 100,
            "data": [
                {"id": 10, "topic": "T1", "status": "OPEN"},
                {"id": 11, "topic": "T2", "status": "OPEN"}
            ]
        }));
        let wanted = topics(&["T1"]);
        let criteria = FilterCriteria::new(Some(wanted.as_slice()), None, &[]);

        match filter_page(page, &criteria) {
            ProposalPage::Envelope {
                max_proposal_index,
                data,
                ..
            } => {
                assert_eq!(max_proposal_index, Some(100));
                assert_eq!(ids(&data), vec![Some(10)]);
            }
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[test]
    fn malformed_page_passes_through() {
        let page = ProposalPage::from_value(json!({"error": "rate limited"}));
        let criteria = FilterCriteria::new(None, None, &topics(&["T"]));

        let out = filter_page(page.clone(), &criteria);
        assert_eq!(out, page);
    }
}
