use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// Re-export types from the market data crate
pub use market_data::types::TimeFrame;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "trade_direction", rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

/// How the trade is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "entry_type", rename_all = "snake_case")]
pub enum EntryType {
    Market,
    Limit,
}

/// Signal lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "signal_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Active,
    Activated,
    Expired,
    TakeProfitHit,
    StopLossHit,
}

impl SignalStatus {
    /// Statuses the tracker still polls
    pub const OPEN: [SignalStatus; 2] = [SignalStatus::Active, SignalStatus::Activated];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignalStatus::Expired | SignalStatus::TakeProfitHit | SignalStatus::StopLossHit
        )
    }

    /// Whether a position was ever entered in this status
    pub fn is_entered(self) -> bool {
        matches!(
            self,
            SignalStatus::Activated | SignalStatus::TakeProfitHit | SignalStatus::StopLossHit
        )
    }
}

/// User entity
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Signal DB model (uses BigDecimal for SQLx compatibility)
#[derive(Debug, Clone, FromRow)]
pub struct SignalRow {
    pub id: i64,
    pub owner_id: Uuid,
    pub strategy_key: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub entry_price: Option<BigDecimal>,
    pub stop_loss: BigDecimal,
    pub take_profit: BigDecimal,
    pub risk_reward_ratio: String,
    pub rationale: String,
    pub entry_reason: Option<String>,
    pub consensus: String,
    pub is_high_quality: bool,
    pub invalidation_hours: i32,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub entered_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Signal API model (uses Decimal for business logic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub owner_id: Uuid,
    pub strategy_key: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward_ratio: String,
    pub rationale: String,
    pub entry_reason: Option<String>,
    pub consensus: String,
    pub is_high_quality: bool,
    pub invalidation_hours: i32,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub entered_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Signal {
    /// End of the window in which an unfilled signal may still activate
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::hours(i64::from(self.invalidation_hours))
    }
}

impl From<SignalRow> for Signal {
    fn from(db: SignalRow) -> Self {
        Self {
            id: db.id,
            owner_id: db.owner_id,
            strategy_key: db.strategy_key,
            symbol: db.symbol,
            direction: db.direction,
            entry_type: db.entry_type,
            entry_price: db.entry_price.map(decimal_from_bigdecimal),
            stop_loss: decimal_from_bigdecimal(db.stop_loss),
            take_profit: decimal_from_bigdecimal(db.take_profit),
            risk_reward_ratio: db.risk_reward_ratio,
            rationale: db.rationale,
            entry_reason: db.entry_reason,
            consensus: db.consensus,
            is_high_quality: db.is_high_quality,
            invalidation_hours: db.invalidation_hours,
            status: db.status,
            created_at: db.created_at,
            entered_at: db.entered_at,
            closed_at: db.closed_at,
        }
    }
}

/// A signal about to be persisted; the store assigns id, status and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewSignal {
    pub owner_id: Uuid,
    pub strategy_key: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward_ratio: String,
    pub rationale: String,
    pub entry_reason: Option<String>,
    pub consensus: String,
    pub is_high_quality: bool,
    pub invalidation_hours: i32,
}

/// One status change computed by the tracker
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub signal_id: i64,
    pub from: SignalStatus,
    pub to: SignalStatus,
    pub at: DateTime<Utc>,
}

impl Transition {
    /// New `entered_at` value, if this transition sets it
    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        (self.to == SignalStatus::Activated).then_some(self.at)
    }

    /// New `closed_at` value, if this transition sets it
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.to.is_terminal().then_some(self.at)
    }
}

// Helper conversions between BigDecimal and Decimal
pub fn decimal_from_bigdecimal(bd: BigDecimal) -> Decimal {
    bd.to_string().parse().unwrap_or_default()
}

pub fn bigdecimal_from_decimal(d: Decimal) -> BigDecimal {
    d.to_string().parse().unwrap_or_default()
}

// Request types for API

#[derive(Debug, Deserialize, validator::Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 3, max = 32))]
    pub pair: String,
    #[validate(length(min = 1, max = 64))]
    pub strategy_key: String,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// Response types for API

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveAnalysesResponse {
    pub active_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StrategySummary {
    pub key: String,
    pub name: String,
    pub description: String,
    pub timeframes: Vec<TimeFrame>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_classes() {
        assert!(!SignalStatus::Active.is_terminal());
        assert!(!SignalStatus::Activated.is_terminal());
        assert!(SignalStatus::Expired.is_terminal());
        assert!(SignalStatus::TakeProfitHit.is_entered());
        assert!(!SignalStatus::Expired.is_entered());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SignalStatus::TakeProfitHit).unwrap();
        assert_eq!(json, "\"take_profit_hit\"");
        assert_eq!(serde_json::to_string(&Direction::Long).unwrap(), "\"Long\"");
    }

    #[test]
    fn test_transition_timestamps() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let fill = Transition {
            signal_id: 1,
            from: SignalStatus::Active,
            to: SignalStatus::Activated,
            at,
        };
        assert_eq!(fill.entered_at(), Some(at));
        assert_eq!(fill.closed_at(), None);

        let expire = Transition {
            to: SignalStatus::Expired,
            ..fill
        };
        assert_eq!(expire.entered_at(), None);
        assert_eq!(expire.closed_at(), Some(at));
    }

    #[test]
    fn test_decimal_bigdecimal_roundtrip() {
        let d: Decimal = "43000.125".parse().unwrap();
        assert_eq!(decimal_from_bigdecimal(bigdecimal_from_decimal(d)), d);
    }
}
