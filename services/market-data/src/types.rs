use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Last traded price for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,          // "BTC/USDT"
    pub source: String,          // "binance"
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// OHLCV candle used for chart rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Supported timeframes
///
/// Serialized as the short exchange notation ("15m", "4h", "1d").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeFrame {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::Minute1 => "1m",
            TimeFrame::Minute5 => "5m",
            TimeFrame::Minute15 => "15m",
            TimeFrame::Minute30 => "30m",
            TimeFrame::Hour1 => "1h",
            TimeFrame::Hour4 => "4h",
            TimeFrame::Day1 => "1d",
            TimeFrame::Week1 => "1w",
        }
    }

    pub fn to_seconds(&self) -> i64 {
        match self {
            TimeFrame::Minute1 => 60,
            TimeFrame::Minute5 => 300,
            TimeFrame::Minute15 => 900,
            TimeFrame::Minute30 => 1800,
            TimeFrame::Hour1 => 3600,
            TimeFrame::Hour4 => 14400,
            TimeFrame::Day1 => 86400,
            TimeFrame::Week1 => 604800,
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFrame {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(TimeFrame::Minute1),
            "5m" => Ok(TimeFrame::Minute5),
            "15m" => Ok(TimeFrame::Minute15),
            "30m" => Ok(TimeFrame::Minute30),
            "1h" => Ok(TimeFrame::Hour1),
            "4h" => Ok(TimeFrame::Hour4),
            "1d" => Ok(TimeFrame::Day1),
            "1w" => Ok(TimeFrame::Week1),
            other => Err(MarketDataError::UnsupportedTimeFrame(other.to_string())),
        }
    }
}

impl TryFrom<String> for TimeFrame {
    type Error = MarketDataError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeFrame> for String {
    fn from(tf: TimeFrame) -> Self {
        tf.as_str().to_string()
    }
}

/// Canonical display form of a trading pair: upper case, trimmed ("btc/usdt" -> "BTC/USDT")
pub fn normalize_pair(pair: &str) -> String {
    pair.trim().to_uppercase()
}

/// Data source health/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub success_rate: f64,
    pub avg_latency_ms: u64,
}

/// Error types for market data retrieval
#[derive(Debug, thiserror::Error)]
pub enum MarketDataError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Rate limit exceeded for {source_name}")]
    RateLimit { source_name: String, retry_after: Option<u64> },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeFrame(String),
}

/// Result type for market data operations
pub type Result<T> = std::result::Result<T, MarketDataError>;

/// Live price snapshots
#[async_trait::async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Current price for one pair
    async fn price(&self, symbol: &str) -> Result<Decimal>;

    /// Current prices for many pairs in one upstream call.
    ///
    /// Keys are the symbols as passed in. Symbols the upstream does not know
    /// are left out of the map rather than failing the whole batch.
    async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>>;

    /// Source health without hitting the upstream
    async fn health(&self) -> SourceHealth;

    /// Source name
    fn name(&self) -> &str;
}

/// Historical candles
#[async_trait::async_trait]
pub trait CandleSource: Send + Sync {
    /// Most recent `limit` candles, oldest first
    async fn candles(&self, symbol: &str, timeframe: TimeFrame, limit: usize) -> Result<Vec<Candle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse_and_display() {
        assert_eq!("4h".parse::<TimeFrame>().unwrap(), TimeFrame::Hour4);
        assert_eq!(" 1D ".parse::<TimeFrame>().unwrap(), TimeFrame::Day1);
        assert_eq!(TimeFrame::Minute15.to_string(), "15m");
        assert!("3h".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn test_timeframe_serde_uses_short_form() {
        let json = serde_json::to_string(&vec![TimeFrame::Day1, TimeFrame::Hour1]).unwrap();
        assert_eq!(json, r#"["1d","1h"]"#);

        let back: Vec<TimeFrame> = serde_json::from_str(r#"["1w","30m"]"#).unwrap();
        assert_eq!(back, vec![TimeFrame::Week1, TimeFrame::Minute30]);
    }

    #[test]
    fn test_normalize_pair() {
        assert_eq!(normalize_pair(" btc/usdt "), "BTC/USDT");
        assert_eq!(normalize_pair("ETHUSDT"), "ETHUSDT");
    }
}
