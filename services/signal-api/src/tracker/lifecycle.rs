//! Signal state machine
//!
//! ```text
//! active ──EntryFilled──▶ activated ──TakeProfit──▶ take_profit_hit
//!    │                        └───────StopLoss────▶ stop_loss_hit
//!    └──Expired──▶ expired
//! ```

use crate::models::{Direction, EntryType, Signal, SignalStatus, Transition};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Price or time condition observed during a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    EntryFilled,
    Expired,
    TakeProfit,
    StopLoss,
}

impl SignalStatus {
    /// Transition table; `None` when the trigger does not apply in this state
    pub fn on(self, trigger: Trigger) -> Option<SignalStatus> {
        match (self, trigger) {
            (SignalStatus::Active, Trigger::EntryFilled) => Some(SignalStatus::Activated),
            (SignalStatus::Active, Trigger::Expired) => Some(SignalStatus::Expired),
            (SignalStatus::Active, Trigger::TakeProfit | Trigger::StopLoss) => None,
            (SignalStatus::Activated, Trigger::TakeProfit) => Some(SignalStatus::TakeProfitHit),
            (SignalStatus::Activated, Trigger::StopLoss) => Some(SignalStatus::StopLossHit),
            // No time-based exit once a position is open
            (SignalStatus::Activated, Trigger::EntryFilled | Trigger::Expired) => None,
            (SignalStatus::Expired | SignalStatus::TakeProfitHit | SignalStatus::StopLossHit, _) => {
                None
            }
        }
    }
}

/// Whether the entry order would have filled at `price`.
///
/// Market entries count as filled on sight.
fn entry_filled(signal: &Signal, price: Decimal) -> bool {
    match (signal.entry_type, signal.entry_price) {
        (EntryType::Market, _) => true,
        (EntryType::Limit, Some(entry)) => match signal.direction {
            Direction::Long => price <= entry,
            Direction::Short => price >= entry,
        },
        (EntryType::Limit, None) => {
            tracing::warn!(signal_id = signal.id, "Limit signal without entry price");
            false
        }
    }
}

fn take_profit_hit(signal: &Signal, price: Decimal) -> bool {
    match signal.direction {
        Direction::Long => price >= signal.take_profit,
        Direction::Short => price <= signal.take_profit,
    }
}

fn stop_loss_hit(signal: &Signal, price: Decimal) -> bool {
    match signal.direction {
        Direction::Long => price <= signal.stop_loss,
        Direction::Short => price >= signal.stop_loss,
    }
}

/// Condition that fires for `signal` at `price`, in precedence order
pub fn trigger_for(signal: &Signal, price: Decimal, now: DateTime<Utc>) -> Option<Trigger> {
    match signal.status {
        SignalStatus::Active => {
            if entry_filled(signal, price) {
                Some(Trigger::EntryFilled)
            } else if now > signal.expires_at() {
                Some(Trigger::Expired)
            } else {
                None
            }
        }
        // One sample cannot tell which level was touched first; take profit wins
        SignalStatus::Activated => {
            if take_profit_hit(signal, price) {
                Some(Trigger::TakeProfit)
            } else if stop_loss_hit(signal, price) {
                Some(Trigger::StopLoss)
            } else {
                None
            }
        }
        SignalStatus::Expired | SignalStatus::TakeProfitHit | SignalStatus::StopLossHit => None,
    }
}

pub fn evaluate(signal: &Signal, price: Decimal, now: DateTime<Utc>) -> Option<Transition> {
    let trigger = trigger_for(signal, price, now)?;
    let to = signal.status.on(trigger)?;
    Some(Transition {
        signal_id: signal.id,
        from: signal.status,
        to,
        at: now,
    })
}

/// Transitions for one poll; signals without a price are left alone
pub fn plan(
    signals: &[Signal],
    prices: &HashMap<String, Decimal>,
    now: DateTime<Utc>,
) -> Vec<Transition> {
    signals
        .iter()
        .filter_map(|signal| match prices.get(&signal.symbol) {
            Some(price) => evaluate(signal, *price, now),
            None => {
                tracing::debug!(
                    signal_id = signal.id,
                    symbol = %signal.symbol,
                    "No price this cycle"
                );
                None
            }
        })
        .collect()
}
