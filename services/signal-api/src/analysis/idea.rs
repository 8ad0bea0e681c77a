//! Trade ideas as returned by the oracle

use crate::models::{Direction, EntryType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Window used when the oracle does not give one
pub const DEFAULT_INVALIDATION_HOURS: i32 = 24;

/// One oracle recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIdea {
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    /// Present iff `entry_type` is `Limit`
    pub entry_price: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward_ratio: String,
    pub analysis_summary: String,
    pub entry_reason: Option<String>,
    pub invalidation_hours: i32,
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("{0}")]
pub struct IdeaParseError(pub String);

impl IdeaParseError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Loose shape of the oracle's JSON; field types vary between answers
#[derive(Debug, Deserialize)]
struct RawIdea {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    entry_type: Option<String>,
    #[serde(default)]
    entry_price: Option<Value>,
    #[serde(default)]
    stop_loss: Option<Value>,
    #[serde(default)]
    take_profit: Option<Value>,
    #[serde(default)]
    risk_reward_ratio: Option<Value>,
    #[serde(default, alias = "rationale")]
    analysis_summary: Option<String>,
    #[serde(default)]
    entry_reason: Option<String>,
    #[serde(default)]
    invalidation_hours: Option<Value>,
}

/// Pull the JSON object out of a model answer, dropping ```json fences and chatter
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
            body.trim_end().trim_end_matches("```")
        }
        None => trimmed,
    };

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (start < end).then(|| &unfenced[start..=end])
}

/// Parse an oracle answer.
///
/// `Ok(None)` means the oracle declined to trade (`"direction": "none"`).
pub fn parse_trade_idea(text: &str) -> Result<Option<TradeIdea>, IdeaParseError> {
    let json = extract_json(text).ok_or_else(|| IdeaParseError::new("no JSON object in answer"))?;
    let raw: RawIdea =
        serde_json::from_str(json).map_err(|e| IdeaParseError::new(format!("invalid JSON: {}", e)))?;

    let direction = match raw
        .direction
        .as_deref()
        .map(|d| d.trim().to_lowercase())
        .as_deref()
    {
        Some("long") | Some("buy") => Direction::Long,
        Some("short") | Some("sell") => Direction::Short,
        Some("none") | Some("") | None => return Ok(None),
        Some(other) => return Err(IdeaParseError::new(format!("unknown direction '{}'", other))),
    };

    // "Market" in the price slot means a market entry
    let entry_is_market_word = matches!(
        &raw.entry_price,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("market")
    );
    let entry_price = if entry_is_market_word {
        None
    } else {
        raw.entry_price.as_ref().map(|v| decimal_field("entry_price", v)).transpose()?
    };

    let entry_type = match raw.entry_type.as_deref().map(|t| t.trim().to_lowercase()).as_deref() {
        Some("market") => EntryType::Market,
        Some("limit") => EntryType::Limit,
        Some(other) => return Err(IdeaParseError::new(format!("unknown entry_type '{}'", other))),
        None if entry_price.is_some() => EntryType::Limit,
        None => EntryType::Market,
    };

    let entry_price = match entry_type {
        EntryType::Limit => Some(entry_price.ok_or_else(|| {
            IdeaParseError::new("limit entry without entry_price")
        })?),
        EntryType::Market => None,
    };

    let stop_loss = required_decimal("stop_loss", raw.stop_loss.as_ref())?;
    let take_profit = required_decimal("take_profit", raw.take_profit.as_ref())?;

    let invalidation_hours = match raw.invalidation_hours.as_ref() {
        None | Some(Value::Null) => DEFAULT_INVALIDATION_HOURS,
        Some(v) => {
            let hours = decimal_field("invalidation_hours", v)?;
            let hours = hours
                .round()
                .to_i32()
                .ok_or_else(|| IdeaParseError::new("invalidation_hours out of range"))?;
            if hours <= 0 {
                return Err(IdeaParseError::new("invalidation_hours must be positive"));
            }
            hours
        }
    };

    let risk_reward_ratio = match raw.risk_reward_ratio {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => format!("1:{}", n),
        _ => "n/a".to_string(),
    };

    Ok(Some(TradeIdea {
        symbol: raw.symbol.unwrap_or_default(),
        direction,
        entry_type,
        entry_price,
        stop_loss,
        take_profit,
        risk_reward_ratio,
        analysis_summary: raw.analysis_summary.unwrap_or_default(),
        entry_reason: raw.entry_reason.filter(|r| !r.trim().is_empty()),
        invalidation_hours,
    }))
}

fn required_decimal(name: &str, value: Option<&Value>) -> Result<Decimal, IdeaParseError> {
    let value = value.ok_or_else(|| IdeaParseError::new(format!("missing {}", name)))?;
    let d = decimal_field(name, value)?;
    if d <= Decimal::ZERO {
        return Err(IdeaParseError::new(format!("{} must be positive", name)));
    }
    Ok(d)
}

/// Numbers may arrive as JSON numbers or numeric strings
fn decimal_field(name: &str, value: &Value) -> Result<Decimal, IdeaParseError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().replace(',', ""),
        other => {
            return Err(IdeaParseError::new(format!(
                "{} is not a number: {}",
                name, other
            )))
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| IdeaParseError::new(format!("{} is not a number: {}", name, text)))
}
