use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::side::Side;
use crate::values::{Price, Symbol};

/// Monotonic signal identifier assigned at intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u64);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG-{:06}", self.0)
    }
}

/// Signal lifecycle
///
/// ```text
/// RECEIVED ──► VALIDATED ──► DISTRIBUTING ──► COMPLETED
///                  │               ├────────► PARTIAL ──► CANCELLED
///                  │               ├────────► FAILED
///                  ├──► FAILED     └────────► CANCELLED
///                  └──► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Received,
    Validated,
    Distributing,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl SignalStatus {
    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Completed | SignalStatus::Failed | SignalStatus::Cancelled
        )
    }

    /// Check whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Failed)
                | (Validated, Distributing)
                | (Validated, Failed)
                | (Validated, Cancelled)
                | (Distributing, Completed)
                | (Distributing, Partial)
                | (Distributing, Failed)
                | (Distributing, Cancelled)
                | (Partial, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Received => "RECEIVED",
            SignalStatus::Validated => "VALIDATED",
            SignalStatus::Distributing => "DISTRIBUTING",
            SignalStatus::Completed => "COMPLETED",
            SignalStatus::Partial => "PARTIAL",
            SignalStatus::Failed => "FAILED",
            SignalStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed trade to be executed on behalf of subscribers
///
/// The trade parameters are fixed at construction; only the status moves,
/// and only along the edges allowed by [`SignalStatus::can_transition_to`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Price,
    pub stop_loss: Price,
    pub take_profit: Price,
    /// Requested leverage (1-50)
    pub leverage: u32,
    /// Requested share of balance committed per account, in percent
    pub size_percent: Decimal,
    pub created_at: DateTime<Utc>,
    /// Signal cannot be distributed after this time
    pub expires_at: Option<DateTime<Utc>>,
    status: SignalStatus,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SignalId,
        symbol: impl Into<Symbol>,
        side: Side,
        entry_price: Price,
        stop_loss: Price,
        take_profit: Price,
        leverage: u32,
        size_percent: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            entry_price,
            stop_loss,
            take_profit,
            leverage,
            size_percent,
            created_at,
            expires_at: None,
            status: SignalStatus::Received,
        }
    }

    /// Builder: Set expiry
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn status(&self) -> SignalStatus {
        self.status
    }

    /// Move to `next` if the lifecycle allows it. Returns false otherwise.
    pub fn advance(&mut self, next: SignalStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(false)
    }

    /// Reward-to-risk ratio implied by the stop and target levels
    pub fn risk_reward_ratio(&self) -> Option<Decimal> {
        let risk = (self.entry_price - self.stop_loss).abs();
        if risk.is_zero() {
            return None;
        }
        Some((self.take_profit - self.entry_price).abs() / risk)
    }
}
