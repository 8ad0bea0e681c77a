//! Consensus analysis: repeated oracle attempts reduced to one outcome

pub mod consensus;
pub mod idea;
pub mod in_flight;
pub mod orchestrator;
pub mod outcome;

pub use consensus::{decide, Consensus, Decision, Tally};
pub use idea::{parse_trade_idea, TradeIdea};
pub use in_flight::{InFlightGauge, InFlightGuard};
pub use orchestrator::Analyzer;
pub use outcome::{Outcome, OutcomePayload, SuccessPayload};

use crate::oracle::OracleError;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Errors that abort a run; abstentions and ambiguity are outcomes, not errors
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("current price unavailable: {0}")]
    QuoteUnavailable(String),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Tunables of one analysis run
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Votes after which the search stops early
    pub target_successes: usize,
    /// Hard cap on attempts, voting or not
    pub max_attempts: usize,
    /// Minimum votes for the winning direction
    pub quorum: usize,
    pub self_validation: bool,
    /// Applied to every renderer, oracle and quote call
    pub call_timeout: Duration,
    /// Retries of a transient oracle failure within one attempt
    pub oracle_retries: usize,
    pub retry_delay: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_successes: 3,
            max_attempts: 5,
            quorum: 2,
            self_validation: true,
            call_timeout: Duration::from_secs(120),
            oracle_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl AnalysisConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.oracle_retries, self.retry_delay)
    }
}
