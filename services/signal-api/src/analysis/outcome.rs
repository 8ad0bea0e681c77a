use super::consensus::{Consensus, Tally};
use super::idea::TradeIdea;
use crate::models::{Direction, EntryType, NewSignal};
use market_data::{ChartArtifact, TimeFrame};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final result of one analysis run
#[derive(Debug)]
pub enum Outcome {
    NoSignal {
        reason: String,
    },
    Ambiguous {
        tally: Tally,
    },
    Success {
        idea: TradeIdea,
        consensus: Consensus,
        /// Charts the caller may show; removed from disk when dropped
        charts: Vec<ChartArtifact>,
    },
}

impl Outcome {
    pub fn no_signal(reason: impl Into<String>) -> Self {
        Outcome::NoSignal {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::NoSignal { .. } => "no_signal",
            Outcome::Ambiguous { .. } => "ambiguous",
            Outcome::Success { .. } => "success",
        }
    }
}

/// Quality flag: unanimous votes on a limit entry
pub fn is_high_quality(idea: &TradeIdea, consensus: &Consensus) -> bool {
    consensus.is_unanimous() && idea.entry_type == EntryType::Limit
}

/// Row to persist for a successful run
pub fn new_signal(
    owner_id: Uuid,
    strategy_key: &str,
    idea: &TradeIdea,
    consensus: &Consensus,
) -> NewSignal {
    NewSignal {
        owner_id,
        strategy_key: strategy_key.to_string(),
        symbol: idea.symbol.clone(),
        direction: idea.direction,
        entry_type: idea.entry_type,
        entry_price: idea.entry_price,
        stop_loss: idea.stop_loss,
        take_profit: idea.take_profit,
        risk_reward_ratio: idea.risk_reward_ratio.clone(),
        rationale: idea.analysis_summary.clone(),
        entry_reason: idea.entry_reason.clone(),
        consensus: consensus.to_string(),
        is_high_quality: is_high_quality(idea, consensus),
        invalidation_hours: idea.invalidation_hours,
    }
}

/// Response body of `POST /v1/analyze`
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomePayload {
    NoSignal {
        message: String,
    },
    Ambiguous {
        message: String,
        details: serde_json::Value,
    },
    Success(SuccessPayload),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessPayload {
    pub signal_id: Option<i64>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward_ratio: String,
    pub analysis_summary: String,
    pub entry_reason: Option<String>,
    pub invalidation_hours: i32,
    pub consensus: String,
    pub is_high_quality: bool,
    pub charts: Vec<ChartPayload>,
    /// Set when the signal could not be saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChartPayload {
    pub timeframe: TimeFrame,
    pub image_base64: String,
}

impl SuccessPayload {
    pub fn new(idea: &TradeIdea, consensus: &Consensus, charts: Vec<ChartPayload>) -> Self {
        Self {
            signal_id: None,
            symbol: idea.symbol.clone(),
            direction: idea.direction,
            entry_type: idea.entry_type,
            entry_price: idea.entry_price,
            stop_loss: idea.stop_loss,
            take_profit: idea.take_profit,
            risk_reward_ratio: idea.risk_reward_ratio.clone(),
            analysis_summary: idea.analysis_summary.clone(),
            entry_reason: idea.entry_reason.clone(),
            invalidation_hours: idea.invalidation_hours,
            consensus: consensus.to_string(),
            is_high_quality: is_high_quality(idea, consensus),
            charts,
            detail: None,
        }
    }
}

impl OutcomePayload {
    pub fn no_signal(reason: &str) -> Self {
        OutcomePayload::NoSignal {
            message: format!("No trade signal: {}", reason),
        }
    }

    pub fn ambiguous(tally: &Tally) -> Self {
        OutcomePayload::Ambiguous {
            message: format!(
                "The analyses did not agree on a direction ({} vote(s): {})",
                tally.total(),
                tally
            ),
            details: serde_json::to_value(tally).unwrap_or_default(),
        }
    }
}
