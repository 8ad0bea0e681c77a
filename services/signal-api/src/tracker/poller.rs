use super::lifecycle::plan;
use crate::observability::{metrics, Logger, MetricsCollector};
use crate::store::{SignalStore, StoreError};
use chrono::{DateTime, Utc};
use market_data::{MarketDataError, QuoteFeed};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("signal store failed: {0}")]
    Store(#[from] StoreError),

    #[error("quote feed failed: {0}")]
    Quotes(#[from] MarketDataError),
}

/// What one poll did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub open_signals: usize,
    pub symbols: usize,
    pub planned: usize,
    pub applied: usize,
}

/// Background poller moving open signals through their lifecycle
pub struct SignalTracker {
    store: Arc<dyn SignalStore>,
    quotes: Arc<dyn QuoteFeed>,
    poll_interval: Duration,
    metrics: MetricsCollector,
}

impl SignalTracker {
    pub fn new(
        store: Arc<dyn SignalStore>,
        quotes: Arc<dyn QuoteFeed>,
        poll_interval: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            quotes,
            poll_interval,
            metrics,
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    ///
    /// The first cycle runs immediately. A running cycle is always finished.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Signal tracker started, polling every {}s",
            self.poll_interval.as_secs()
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) if report.planned > 0 => info!(
                            "Tracker cycle: {} open, {} transition(s) applied",
                            report.open_signals, report.applied
                        ),
                        Ok(report) => debug!("Tracker cycle: {} open, no changes", report.open_signals),
                        Err(e) => {
                            self.metrics.increment(metrics::TRACKER_CYCLE_ERRORS, 1).await;
                            error!("Tracker cycle failed, retrying next interval: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Signal tracker stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One fetch, evaluate, write pass
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, TrackerError> {
        self.metrics.increment(metrics::TRACKER_CYCLES, 1).await;

        let signals = self.store.open_signals().await?;
        self.metrics
            .gauge(metrics::TRACKER_OPEN_SIGNALS, signals.len() as f64)
            .await;

        let mut report = CycleReport {
            open_signals: signals.len(),
            ..CycleReport::default()
        };
        if signals.is_empty() {
            return Ok(report);
        }

        let symbols: Vec<String> = signals
            .iter()
            .map(|s| s.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        report.symbols = symbols.len();

        let prices = self.quotes.prices(&symbols).await?;
        let transitions = plan(&signals, &prices, now);
        report.planned = transitions.len();
        if transitions.is_empty() {
            return Ok(report);
        }

        report.applied = self.store.apply_transitions(&transitions).await?;
        self.metrics
            .increment(metrics::TRACKER_TRANSITIONS, report.applied as u64)
            .await;

        for transition in &transitions {
            let price = signals
                .iter()
                .find(|s| s.id == transition.signal_id)
                .and_then(|s| prices.get(&s.symbol))
                .map(|p| p.to_string())
                .unwrap_or_default();
            Logger::transition_event(
                transition.signal_id,
                &format!("{:?}", transition.from),
                &format!("{:?}", transition.to),
                &price,
            );
        }

        Ok(report)
    }
}
