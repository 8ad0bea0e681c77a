//! Observability: log setup, metrics collection and structured events

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches to JSON lines.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Metrics collector for tracking service activity
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
}

struct MetricsInner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner {
                counters: HashMap::new(),
                gauges: HashMap::new(),
                start_time: Instant::now(),
            })),
        }
    }

    /// Increment a counter
    pub async fn increment(&self, name: &str, value: u64) {
        let mut inner = self.inner.write().await;
        *inner.counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Set a gauge value
    pub async fn gauge(&self, name: &str, value: f64) {
        let mut inner = self.inner.write().await;
        inner.gauges.insert(name.to_string(), value);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().await;
        MetricsSnapshot {
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            uptime_secs: inner.start_time.elapsed().as_secs(),
        }
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let inner = self.inner.read().await;
        inner.counters.get(name).copied().unwrap_or(0)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub uptime_secs: u64,
}

/// Structured log events shared by the analysis and tracking paths
pub struct Logger;

impl Logger {
    /// Log one attempt of an analysis run
    pub fn attempt_event(symbol: &str, attempt: usize, result: &str) {
        tracing::info!(
            symbol = %symbol,
            attempt = attempt,
            result = %result,
            "analysis_attempt"
        );
    }

    /// Log the final outcome of an analysis run
    pub fn outcome_event(symbol: &str, strategy: &str, outcome: &str, detail: &str) {
        tracing::info!(
            symbol = %symbol,
            strategy = %strategy,
            outcome = %outcome,
            detail = %detail,
            "analysis_outcome"
        );
    }

    /// Log a signal status change
    pub fn transition_event(signal_id: i64, from: &str, to: &str, price: &str) {
        tracing::info!(
            signal_id = signal_id,
            from = %from,
            to = %to,
            price = %price,
            "signal_transition"
        );
    }
}

/// Predefined metric names
pub mod metrics {
    // Analysis runs
    pub const ANALYSIS_STARTED: &str = "analysis_started_total";
    pub const ANALYSIS_NO_SIGNAL: &str = "analysis_no_signal_total";
    pub const ANALYSIS_AMBIGUOUS: &str = "analysis_ambiguous_total";
    pub const ANALYSIS_SUCCESS: &str = "analysis_success_total";
    pub const ANALYSIS_FAILED: &str = "analysis_failed_total";
    pub const ANALYSES_IN_FLIGHT: &str = "analyses_in_flight";

    // Oracle
    pub const ORACLE_CALLS: &str = "oracle_calls_total";
    pub const ORACLE_ABSTENTIONS: &str = "oracle_abstentions_total";
    pub const CHART_RENDER_FAILURES: &str = "chart_render_failures_total";

    // Tracker
    pub const TRACKER_CYCLES: &str = "tracker_cycles_total";
    pub const TRACKER_CYCLE_ERRORS: &str = "tracker_cycle_errors_total";
    pub const TRACKER_TRANSITIONS: &str = "tracker_transitions_total";
    pub const TRACKER_OPEN_SIGNALS: &str = "tracker_open_signals";

    // Persistence
    pub const SIGNALS_PERSISTED: &str = "signals_persisted_total";
    pub const SIGNAL_PERSIST_ERRORS: &str = "signal_persist_errors_total";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_and_gauges() {
        let collector = MetricsCollector::new();
        collector.increment(metrics::ORACLE_CALLS, 1).await;
        collector.increment(metrics::ORACLE_CALLS, 2).await;
        collector.gauge(metrics::TRACKER_OPEN_SIGNALS, 4.0).await;

        assert_eq!(collector.get_counter(metrics::ORACLE_CALLS).await, 3);
        assert_eq!(collector.get_counter(metrics::TRACKER_CYCLES).await, 0);

        let snapshot = collector.snapshot().await;
        assert_eq!(snapshot.gauges.get(metrics::TRACKER_OPEN_SIGNALS), Some(&4.0));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let collector = MetricsCollector::new();
        let other = collector.clone();
        other.increment(metrics::TRACKER_CYCLES, 1).await;
        assert_eq!(collector.get_counter(metrics::TRACKER_CYCLES).await, 1);
    }
}
