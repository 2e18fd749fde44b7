#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end runs over a fixed feed page, a recording mail transport and a
//! real on-disk sent store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use govwatch_core::PipelineError;
use govwatch_core::fetch::FetchError;
use govwatch_core::notify::{MailSettings, NotifyError, OutboundMessage};
use govwatch_core::pipeline::{RunOutcome, SkipReason};
use govwatch_core::{
    GovwatchConfig, JsonSentStore, MailTransport, Notifier, Pipeline, ProposalPage, ProposalQuery,
    ProposalSource, SentStore, TopicMapping,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;

struct StaticFeed {
    body: Value,
}

#[async_trait]
impl ProposalSource for StaticFeed {
    async fn fetch(&self, _query: &ProposalQuery) -> Result<ProposalPage, FetchError> {
        Ok(ProposalPage::from_value(self.body.clone()))
    }
}

/// Feed that is always down.
struct FailingFeed;

#[async_trait]
impl ProposalSource for FailingFeed {
    async fn fetch(&self, _query: &ProposalQuery) -> Result<ProposalPage, FetchError> {
        Err(FetchError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            url: "https://feed.test/api/v3/proposals".to_string(),
        })
    }
}

/// Records every message; fails any message addressed to `fail_to`.
#[derive(Clone, Default)]
struct Outbox {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    attempts: Arc<AtomicUsize>,
    fail_to: Option<String>,
}

#[async_trait]
impl MailTransport for Outbox {
    async fn send(&self, message: OutboundMessage) -> Result<String, NotifyError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_to.as_deref() == Some(message.to.join(",").as_str()) {
            return Err(NotifyError::Transport("550 mailbox unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(format!("<{n}@test>"))
    }
}

impl Outbox {
    fn recipients(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.to.join(","))
            .collect()
    }
}

struct Harness {
    _tmp: TempDir,
    store: Arc<JsonSentStore>,
    outbox: Outbox,
    pipeline: Pipeline,
}

fn mapping(topics: &[&str], to: &[&str]) -> TopicMapping {
    TopicMapping {
        topics: topics.iter().map(|s| (*s).to_string()).collect(),
        to: to.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn harness(body: Value, cfg: GovwatchConfig, outbox: Outbox) -> Harness {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(JsonSentStore::new(
        tmp.path().join("sent.json"),
        cfg.effective_store_capacity(),
    ));
    let notifier = Notifier::new(Box::new(outbox.clone()), MailSettings::from_config(&cfg));
    let pipeline = Pipeline::new(
        &cfg,
        Arc::new(StaticFeed { body }),
        Arc::clone(&store) as Arc<dyn SentStore>,
        notifier,
    );
    Harness {
        _tmp: tmp,
        store,
        outbox,
        pipeline,
    }
}

fn scenario_feed() -> Value {
    json!({
        "max_proposal_index": 100,
        "data": [
            {"id": 10, "topic": "T1", "status": "OPEN", "title": "Upgrade"},
            {"id": 11, "topic": "T2", "status": "OPEN", "title": "Other"}
        ]
    })
}

fn scenario_config() -> GovwatchConfig {
    GovwatchConfig {
        default_topics: vec!["T1".to_string()],
        recipients: vec![mapping(&["T1"], &["ops@x"])],
        ..GovwatchConfig::default()
    }
}

#[tokio::test]
async fn scenario_sends_once_then_reports_already_sent() {
    let h = harness(scenario_feed(), scenario_config(), Outbox::default());

    let first = h.pipeline.run_once().await.unwrap();
    assert!(first.sent());
    assert_eq!(first.fetched, 2);
    assert_eq!(first.matched, 1);
    match &first.outcome {
        RunOutcome::Dispatched { deliveries, marked } => {
            assert_eq!(deliveries.len(), 1);
            assert_eq!(deliveries[0].to, vec!["ops@x".to_string()]);
            assert_eq!(deliveries[0].proposal_ids, vec![10]);
            assert_eq!(marked, &vec![10]);
        }
        other => panic!("expected dispatch, got {other:?}"),
    }

    let second = h.pipeline.run_once().await.unwrap();
    assert_eq!(second.skip_reason(), Some(SkipReason::AlreadySent));
    assert_eq!(h.outbox.recipients(), vec!["ops@x".to_string()]);
    assert_eq!(h.outbox.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_filter_result_reports_no_proposals() {
    let cfg = GovwatchConfig {
        default_topics: vec!["NOTHING".to_string()],
        ..scenario_config()
    };
    let h = harness(scenario_feed(), cfg, Outbox::default());

    let report = h.pipeline.run_once().await.unwrap();
    assert_eq!(report.skip_reason(), Some(SkipReason::NoProposals));
}

#[tokio::test]
async fn malformed_feed_reports_no_proposals() {
    let h = harness(
        json!({"error": "rate limited"}),
        scenario_config(),
        Outbox::default(),
    );

    let report = h.pipeline.run_once().await.unwrap();
    assert_eq!(report.skip_reason(), Some(SkipReason::NoProposals));
    assert_eq!(report.fetched, 0);
}

#[tokio::test]
async fn unmatched_without_fallback_reports_no_recipients_and_stays_unsent() {
    let cfg = GovwatchConfig {
        default_topics: vec!["T2".to_string()],
        recipients: vec![mapping(&["T1"], &["ops@x"])],
        fallback_recipients: Vec::new(),
        ..GovwatchConfig::default()
    };
    let h = harness(scenario_feed(), cfg, Outbox::default());

    let report = h.pipeline.run_once().await.unwrap();
    assert_eq!(report.skip_reason(), Some(SkipReason::NoRecipients));
    assert!(h.store.entries().await.is_empty());
}

#[tokio::test]
async fn unmatched_with_fallback_goes_to_fallback_group() {
    let cfg = GovwatchConfig {
        default_topics: vec!["T2".to_string()],
        recipients: vec![mapping(&["T1"], &["ops@x"])],
        fallback_recipients: vec!["a@x".to_string(), "b@x".to_string()],
        ..GovwatchConfig::default()
    };
    let h = harness(scenario_feed(), cfg, Outbox::default());

    let report = h.pipeline.run_once().await.unwrap();
    assert!(report.sent());
    assert_eq!(h.outbox.recipients(), vec!["a@x,b@x".to_string()]);
}

#[tokio::test]
async fn failing_group_does_not_block_others_or_get_marked() {
    let cfg = GovwatchConfig {
        default_topics: vec!["T1".to_string(), "T2".to_string()],
        recipients: vec![
            mapping(&["T1"], &["broken@x"]),
            mapping(&["T2"], &["ops@x"]),
        ],
        ..GovwatchConfig::default()
    };
    let outbox = Outbox {
        fail_to: Some("broken@x".to_string()),
        ..Outbox::default()
    };
    let h = harness(scenario_feed(), cfg, outbox);

    let report = h.pipeline.run_once().await.unwrap();
    match &report.outcome {
        RunOutcome::Dispatched { deliveries, marked } => {
            assert!(!deliveries[0].sent);
            assert!(deliveries[0].error.as_deref().unwrap().contains("550"));
            assert!(deliveries[1].sent);
            assert_eq!(marked, &vec![11]);
        }
        other => panic!("expected dispatch, got {other:?}"),
    }
    assert_eq!(h.outbox.recipients(), vec!["ops@x".to_string()]);

    // The failed proposal is offered again; the delivered one is not.
    let retry = h.pipeline.run_once().await.unwrap();
    match &retry.outcome {
        RunOutcome::Dispatched { deliveries, .. } => {
            assert_eq!(deliveries.len(), 1);
            assert_eq!(deliveries[0].proposal_ids, vec![10]);
        }
        other => panic!("expected dispatch, got {other:?}"),
    }
}

#[tokio::test]
async fn fanned_out_proposal_is_marked_only_when_every_group_succeeds() {
    let cfg = GovwatchConfig {
        default_topics: vec!["T1".to_string()],
        recipients: vec![
            mapping(&["T1"], &["ops@x"]),
            mapping(&["T1"], &["broken@x"]),
        ],
        ..GovwatchConfig::default()
    };
    let outbox = Outbox {
        fail_to: Some("broken@x".to_string()),
        ..Outbox::default()
    };
    let h = harness(scenario_feed(), cfg, outbox);

    let report = h.pipeline.run_once().await.unwrap();
    assert!(report.sent());
    match &report.outcome {
        RunOutcome::Dispatched { marked, .. } => assert!(marked.is_empty()),
        other => panic!("expected dispatch, got {other:?}"),
    }
    assert!(h.store.entries().await.is_empty());
}

#[tokio::test]
async fn report_serializes_with_machine_readable_reason() {
    let h = harness(scenario_feed(), scenario_config(), Outbox::default());
    h.pipeline.run_once().await.unwrap();

    let report = h.pipeline.run_once().await.unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["outcome"], "skipped");
    assert_eq!(value["reason"], "already_sent");
}

#[tokio::test]
async fn concurrent_runs_do_not_double_send() {
    let h = Arc::new(harness(scenario_feed(), scenario_config(), Outbox::default()));

    let a = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.pipeline.run_once().await.unwrap() })
    };
    let b = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.pipeline.run_once().await.unwrap() })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.sent() as u8 + b.sent() as u8, 1);
    assert_eq!(h.outbox.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn feed_failure_surfaces_as_fetch_error_without_side_effects() {
    let tmp = TempDir::new().unwrap();
    let cfg = scenario_config();
    let outbox = Outbox::default();
    let store = Arc::new(JsonSentStore::new(tmp.path().join("sent.json"), 10));
    let pipeline = Pipeline::new(
        &cfg,
        Arc::new(FailingFeed),
        Arc::clone(&store) as Arc<dyn SentStore>,
        Notifier::new(Box::new(outbox.clone()), MailSettings::from_config(&cfg)),
    );

    let err = pipeline.run_once().await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Fetch(FetchError::Status { .. })
    ));
    assert_eq!(outbox.attempts.load(Ordering::SeqCst), 0);
    assert!(store.entries().await.is_empty());
    assert!(!tmp.path().join("sent.json").exists());
}

#[tokio::test]
async fn unwritable_store_surfaces_as_store_error() {
    let tmp = TempDir::new().unwrap();
    // A regular file where the store's parent directory should be.
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let cfg = scenario_config();
    let outbox = Outbox::default();
    let pipeline = Pipeline::new(
        &cfg,
        Arc::new(StaticFeed {
            body: scenario_feed(),
        }),
        Arc::new(JsonSentStore::new(blocker.join("sent.json"), 10)),
        Notifier::new(Box::new(outbox.clone()), MailSettings::from_config(&cfg)),
    );

    let err = pipeline.run_once().await.unwrap_err();

    assert!(matches!(err, PipelineError::Store(_)));
    // The email went out before recording failed.
    assert_eq!(outbox.recipients(), vec!["ops@x".to_string()]);
}
