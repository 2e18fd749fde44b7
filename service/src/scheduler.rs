//! Periodic refresh loop.

use std::sync::Arc;
use std::time::Duration;

use govwatch_core::Pipeline;
use govwatch_core::RunReport;
use govwatch_core::pipeline::RunOutcome;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Run the pipeline immediately and then every `interval` until `shutdown`
/// flips to `true` or its sender is dropped.
///
/// A run that fails is logged and the loop keeps going. Ticks missed while a
/// run is in flight are skipped rather than replayed.
pub async fn run_poll_loop(
    pipeline: Arc<Pipeline>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }

        match pipeline.run_once().await {
            Ok(report) => log_report(&report),
            Err(err) => tracing::warn!(error = %err, "background refresh failed"),
        }
    }

    tracing::info!("poll loop stopped");
}

pub fn log_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Skipped { reason } => {
            tracing::info!(
                fetched = report.fetched,
                matched = report.matched,
                count = 0,
                reason = reason.as_str(),
                "background refresh completed"
            );
        }
        RunOutcome::Dispatched { deliveries, marked } => {
            for failed in deliveries.iter().filter(|d| !d.sent) {
                tracing::warn!(
                    to = %failed.to.join(","),
                    error = failed.error.as_deref().unwrap_or("unknown"),
                    "group delivery failed"
                );
            }
            let recipients: Vec<String> = deliveries
                .iter()
                .filter(|d| d.sent)
                .map(|d| d.to.join(","))
                .collect();
            tracing::info!(
                count = marked.len(),
                groups = deliveries.len(),
                recipients = %recipients.join("; "),
                "background refresh completed"
            );
        }
    }
}
