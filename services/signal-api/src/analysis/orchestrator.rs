//! Drives the two analysis stages against the renderer and the oracle

use super::consensus::{decide, Consensus, Decision};
use super::in_flight::InFlightGauge;
use super::outcome::Outcome;
use super::{AnalysisConfig, AnalysisError, TradeIdea};
use crate::observability::{metrics, Logger, MetricsCollector};
use crate::oracle::{Oracle, OracleError};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::strategy::Strategy;
use futures::future::join_all;
use market_data::{ChartArtifact, ChartRenderer, Overlay, QuoteFeed, RenderError, TimeFrame};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::time::timeout;

/// One non-abstaining attempt and the charts it was based on
struct Vote {
    idea: TradeIdea,
    charts: Vec<ChartArtifact>,
}

/// Consensus orchestrator
pub struct Analyzer {
    renderer: Arc<dyn ChartRenderer>,
    oracle: Arc<dyn Oracle>,
    quotes: Arc<dyn QuoteFeed>,
    config: AnalysisConfig,
    retry: RetryPolicy,
    in_flight: InFlightGauge,
    metrics: MetricsCollector,
}

impl Analyzer {
    pub fn new(
        renderer: Arc<dyn ChartRenderer>,
        oracle: Arc<dyn Oracle>,
        quotes: Arc<dyn QuoteFeed>,
        config: AnalysisConfig,
        metrics: MetricsCollector,
    ) -> Self {
        let retry = config.retry_policy();
        Self {
            renderer,
            oracle,
            quotes,
            config,
            retry,
            in_flight: InFlightGauge::new(),
            metrics,
        }
    }

    /// Runs currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze `symbol` with `strategy`.
    ///
    /// Chart files created along the way are removed on every path except
    /// `Outcome::Success`, whose charts belong to the caller.
    pub async fn run_analysis(
        &self,
        symbol: &str,
        strategy: &Strategy,
    ) -> Result<Outcome, AnalysisError> {
        let _guard = self.in_flight.enter();
        self.metrics.increment(metrics::ANALYSIS_STARTED, 1).await;
        self.metrics
            .gauge(metrics::ANALYSES_IN_FLIGHT, self.in_flight.current() as f64)
            .await;

        let result = self.analyze(symbol, strategy).await;

        match &result {
            Ok(outcome) => {
                let (counter, detail) = match outcome {
                    Outcome::NoSignal { reason } => (metrics::ANALYSIS_NO_SIGNAL, reason.clone()),
                    Outcome::Ambiguous { tally } => (metrics::ANALYSIS_AMBIGUOUS, tally.to_string()),
                    Outcome::Success { idea, consensus, .. } => (
                        metrics::ANALYSIS_SUCCESS,
                        format!("{:?} {}", idea.direction, consensus),
                    ),
                };
                self.metrics.increment(counter, 1).await;
                Logger::outcome_event(symbol, &strategy.key, outcome.label(), &detail);
            }
            Err(e) => {
                self.metrics.increment(metrics::ANALYSIS_FAILED, 1).await;
                tracing::error!(symbol, strategy = %strategy.key, "Analysis failed: {}", e);
            }
        }

        result
    }

    async fn analyze(&self, symbol: &str, strategy: &Strategy) -> Result<Outcome, AnalysisError> {
        let price = self.price_snapshot(symbol).await?;
        let prompt = strategy.analysis_prompt(symbol, price);

        // Stage 1: independent attempts, strictly one after another
        let mut votes: Vec<Vote> = Vec::new();
        for attempt in 1..=self.config.max_attempts {
            let charts = self.render_all(symbol, &strategy.timeframes, None).await;
            if charts.is_empty() {
                Logger::attempt_event(symbol, attempt, "no_charts");
                continue;
            }

            match self.consult(&prompt, &charts).await? {
                Some(mut idea) => {
                    idea.symbol = symbol.to_string();
                    Logger::attempt_event(symbol, attempt, &format!("{:?}", idea.direction));
                    votes.push(Vote { idea, charts });
                }
                None => Logger::attempt_event(symbol, attempt, "abstained"),
            }

            if votes.len() >= self.config.target_successes {
                break;
            }
        }

        let ideas: Vec<TradeIdea> = votes.iter().map(|v| v.idea.clone()).collect();
        match decide(&ideas, self.config.quorum) {
            Decision::Empty => Ok(Outcome::no_signal("every attempt abstained")),
            Decision::Ambiguous(tally) => Ok(Outcome::Ambiguous { tally }),
            Decision::Winner {
                representative,
                index,
                consensus,
            } => {
                if !self.config.self_validation {
                    let charts = votes.swap_remove(index).charts;
                    return Ok(Outcome::Success {
                        idea: representative,
                        consensus,
                        charts,
                    });
                }

                // Stage-1 charts are not shown to the critique pass
                drop(votes);
                self.validate(symbol, strategy, price, representative, consensus)
                    .await
            }
        }
    }

    /// Stage 2: ask the oracle to critique the winning idea on annotated charts
    async fn validate(
        &self,
        symbol: &str,
        strategy: &Strategy,
        price: Decimal,
        representative: TradeIdea,
        consensus: Consensus,
    ) -> Result<Outcome, AnalysisError> {
        let overlay = Overlay {
            entry: representative.entry_price,
            stop_loss: representative.stop_loss,
            take_profit: representative.take_profit,
        };
        let charts = self
            .render_all(symbol, &strategy.timeframes, Some(&overlay))
            .await;
        if charts.is_empty() {
            tracing::warn!(symbol, "No annotated chart rendered, cannot validate");
            return Ok(Outcome::no_signal("the trade could not be validated"));
        }

        let prompt = strategy.critique_prompt(symbol, price, &representative);
        match self.consult(&prompt, &charts).await? {
            Some(mut refined) => {
                refined.symbol = symbol.to_string();
                if refined.direction != representative.direction {
                    tracing::info!(
                        symbol,
                        "Validation flipped direction from {:?} to {:?}",
                        representative.direction,
                        refined.direction
                    );
                }
                Ok(Outcome::Success {
                    idea: refined,
                    consensus,
                    charts,
                })
            }
            None => Ok(Outcome::no_signal("self-validation rejected the trade")),
        }
    }

    async fn price_snapshot(&self, symbol: &str) -> Result<Decimal, AnalysisError> {
        match timeout(self.config.call_timeout, self.quotes.price(symbol)).await {
            Ok(Ok(price)) => Ok(price),
            Ok(Err(e)) => Err(AnalysisError::QuoteUnavailable(e.to_string())),
            Err(_) => Err(AnalysisError::QuoteUnavailable(format!(
                "quote timed out after {}s",
                self.config.call_timeout.as_secs()
            ))),
        }
    }

    /// One chart per timeframe, rendered concurrently; failed renders are dropped
    async fn render_all(
        &self,
        symbol: &str,
        timeframes: &[TimeFrame],
        overlay: Option<&Overlay>,
    ) -> Vec<ChartArtifact> {
        let limit = self.config.call_timeout;
        let renders = timeframes.iter().map(|&timeframe| async move {
            match timeout(limit, self.renderer.render(symbol, timeframe, overlay)).await {
                Ok(result) => result,
                Err(_) => Err(RenderError::Timeout {
                    timeframe,
                    secs: limit.as_secs(),
                }),
            }
        });

        let mut charts = Vec::with_capacity(timeframes.len());
        for (timeframe, result) in timeframes.iter().zip(join_all(renders).await) {
            match result {
                Ok(chart) => charts.push(chart),
                Err(e) => {
                    tracing::warn!(symbol, timeframe = %timeframe, "Chart dropped: {}", e);
                    self.metrics
                        .increment(metrics::CHART_RENDER_FAILURES, 1)
                        .await;
                }
            }
        }
        charts
    }

    /// One oracle evaluation under the retry policy.
    ///
    /// `Ok(None)` is an abstention; only a fatal oracle error is returned.
    async fn consult(
        &self,
        prompt: &str,
        charts: &[ChartArtifact],
    ) -> Result<Option<TradeIdea>, AnalysisError> {
        let oracle = &self.oracle;
        let collector = &self.metrics;
        let limit = self.config.call_timeout;

        let outcome = self
            .retry
            .run(move || async move {
                collector.increment(metrics::ORACLE_CALLS, 1).await;
                match timeout(limit, oracle.evaluate(prompt, charts)).await {
                    Ok(result) => result,
                    Err(_) => Err(OracleError::Transient(format!(
                        "oracle call timed out after {}s",
                        limit.as_secs()
                    ))),
                }
            })
            .await;

        match outcome {
            RetryOutcome::Done(idea) => {
                if idea.is_none() {
                    self.metrics.increment(metrics::ORACLE_ABSTENTIONS, 1).await;
                }
                Ok(idea)
            }
            RetryOutcome::Abstained(e) => {
                match &e {
                    OracleError::Malformed { reason, raw } => {
                        tracing::warn!(reason = %reason, raw = %raw, "Malformed oracle answer")
                    }
                    other => tracing::warn!("Oracle abstained: {}", other),
                }
                self.metrics.increment(metrics::ORACLE_ABSTENTIONS, 1).await;
                Ok(None)
            }
            RetryOutcome::Fatal(e) => Err(AnalysisError::Oracle(e)),
        }
    }
}
