//! Signal persistence

use crate::db::Db;
use crate::models::{bigdecimal_from_decimal, NewSignal, Signal, SignalRow, SignalStatus, Transition};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Table of signals shared by request handlers and the tracker
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert a new `active` signal
    async fn insert(&self, signal: &NewSignal) -> Result<Signal, StoreError>;

    /// Signals of one owner, newest first
    async fn history(&self, owner_id: Uuid) -> Result<Vec<Signal>, StoreError>;

    /// Signals in `active` or `activated`
    async fn open_signals(&self) -> Result<Vec<Signal>, StoreError>;

    /// Apply all transitions atomically; returns the number of rows changed.
    ///
    /// A transition whose signal is no longer in `from` is skipped.
    async fn apply_transitions(&self, transitions: &[Transition]) -> Result<usize, StoreError>;
}

const SIGNAL_COLUMNS: &str = "id, owner_id, strategy_key, symbol, direction, entry_type, \
     entry_price, stop_loss, take_profit, risk_reward_ratio, rationale, entry_reason, \
     consensus, is_high_quality, invalidation_hours, status, created_at, entered_at, closed_at";

/// Postgres-backed store
#[derive(Clone)]
pub struct PgSignalStore {
    db: Db,
}

impl PgSignalStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl SignalStore for PgSignalStore {
    async fn insert(&self, signal: &NewSignal) -> Result<Signal, StoreError> {
        let sql = format!(
            "INSERT INTO signals (owner_id, strategy_key, symbol, direction, entry_type, \
             entry_price, stop_loss, take_profit, risk_reward_ratio, rationale, entry_reason, \
             consensus, is_high_quality, invalidation_hours) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {}",
            SIGNAL_COLUMNS
        );

        let row = sqlx::query_as::<_, SignalRow>(&sql)
            .bind(signal.owner_id)
            .bind(&signal.strategy_key)
            .bind(&signal.symbol)
            .bind(signal.direction)
            .bind(signal.entry_type)
            .bind(signal.entry_price.map(bigdecimal_from_decimal))
            .bind(bigdecimal_from_decimal(signal.stop_loss))
            .bind(bigdecimal_from_decimal(signal.take_profit))
            .bind(&signal.risk_reward_ratio)
            .bind(&signal.rationale)
            .bind(&signal.entry_reason)
            .bind(&signal.consensus)
            .bind(signal.is_high_quality)
            .bind(signal.invalidation_hours)
            .fetch_one(&self.db)
            .await?;

        Ok(row.into())
    }

    async fn history(&self, owner_id: Uuid) -> Result<Vec<Signal>, StoreError> {
        let sql = format!(
            "SELECT {} FROM signals WHERE owner_id = $1 ORDER BY created_at DESC, id DESC",
            SIGNAL_COLUMNS
        );
        let rows = sqlx::query_as::<_, SignalRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.db)
            .await?;

        Ok(rows.into_iter().map(Signal::from).collect())
    }

    async fn open_signals(&self) -> Result<Vec<Signal>, StoreError> {
        let sql = format!(
            "SELECT {} FROM signals WHERE status IN ($1, $2) ORDER BY id",
            SIGNAL_COLUMNS
        );
        let rows = sqlx::query_as::<_, SignalRow>(&sql)
            .bind(SignalStatus::OPEN[0])
            .bind(SignalStatus::OPEN[1])
            .fetch_all(&self.db)
            .await?;

        Ok(rows.into_iter().map(Signal::from).collect())
    }

    async fn apply_transitions(&self, transitions: &[Transition]) -> Result<usize, StoreError> {
        if transitions.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.begin().await?;
        let mut changed = 0usize;

        for transition in transitions {
            let result = sqlx::query(
                "UPDATE signals \
                 SET status = $1, \
                     entered_at = COALESCE($2, entered_at), \
                     closed_at = COALESCE($3, closed_at) \
                 WHERE id = $4 AND status = $5",
            )
            .bind(transition.to)
            .bind(transition.entered_at())
            .bind(transition.closed_at())
            .bind(transition.signal_id)
            .bind(transition.from)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => {
                    tracing::debug!(
                        signal_id = transition.signal_id,
                        "Signal left {:?} before the update, skipped",
                        transition.from
                    );
                }
                Ok(done) => changed += done.rows_affected() as usize,
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e.into());
                }
            }
        }

        tx.commit().await?;
        Ok(changed)
    }
}
