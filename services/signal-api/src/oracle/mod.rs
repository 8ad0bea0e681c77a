//! Generative-AI oracle: prompt + chart images in, trade idea out

pub mod gemini;

pub use gemini::{GeminiClient, GeminiConfig};

use crate::analysis::TradeIdea;
use crate::retry::{Classify, Verdict};
use market_data::ChartArtifact;

/// Error types for oracle calls, classified for the retry policy
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Network failure, timeout, HTTP 429 or 5xx
    #[error("transient oracle failure: {0}")]
    Transient(String),

    /// Safety filter or empty answer
    #[error("oracle answer blocked: {0}")]
    Blocked(String),

    /// Answer arrived but is not a trade idea
    #[error("malformed oracle answer: {reason}")]
    Malformed { reason: String, raw: String },

    /// Request refused outright (bad key, bad request); retrying will not help
    #[error("oracle rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Chart files could not be read for upload
    #[error("oracle input unavailable: {0}")]
    Input(String),
}

impl Classify for OracleError {
    fn verdict(&self) -> Verdict {
        match self {
            OracleError::Transient(_) => Verdict::Retry,
            OracleError::Blocked(_) | OracleError::Malformed { .. } | OracleError::Input(_) => {
                Verdict::Abstain
            }
            OracleError::Rejected { .. } => Verdict::Fatal,
        }
    }
}

/// Evaluates charts against a prompt
#[async_trait::async_trait]
pub trait Oracle: Send + Sync {
    /// `Ok(None)` when the oracle looked and declined to trade
    async fn evaluate(
        &self,
        prompt: &str,
        charts: &[ChartArtifact],
    ) -> Result<Option<TradeIdea>, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(OracleError::Transient("503".into()).verdict(), Verdict::Retry);
        assert_eq!(OracleError::Blocked("SAFETY".into()).verdict(), Verdict::Abstain);
        assert_eq!(
            OracleError::Malformed {
                reason: "no JSON".into(),
                raw: "hello".into()
            }
            .verdict(),
            Verdict::Abstain
        );
        assert_eq!(
            OracleError::Rejected {
                status: 403,
                message: "bad key".into()
            }
            .verdict(),
            Verdict::Fatal
        );
    }
}
