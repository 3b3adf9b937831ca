use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::account::{AccountId, ExchangeAccount, ExchangeId};
use super::position::CloseReason;
use super::side::{OrderSide, Side};
use super::signal::{Signal, SignalId};
use crate::values::{Price, Quantity, Symbol, UserId};

/// Bytes of the SHA-256 digest kept in the key. 14 bytes give 28 hex chars,
/// which leaves room for a two-char leg suffix under the strictest exchange
/// client-order-id limit (OKX, 32 alphanumerics).
const KEY_BYTES: usize = 14;

/// Deterministic identifier for one (signal, account) pairing
///
/// Sent to the exchange as the client order id, so a retried call after a
/// network timeout is recognised as the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(signal_id: SignalId, account_id: AccountId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(signal_id.0.to_be_bytes());
        hasher.update(account_id.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..KEY_BYTES]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Client order id for one leg of the execution
    pub fn client_order_id(&self, leg: OrderLeg) -> String {
        format!("{}{}", self.0, leg.suffix())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Orders placed on behalf of one execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderLeg {
    Entry,
    StopLoss,
    TakeProfit,
    Close,
}

impl OrderLeg {
    fn suffix(&self) -> &'static str {
        match self {
            OrderLeg::Entry => "en",
            OrderLeg::StopLoss => "sl",
            OrderLeg::TakeProfit => "tp",
            OrderLeg::Close => "cx",
        }
    }
}

/// A (signal, account) pairing produced by subscriber resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub signal_id: SignalId,
    pub account_id: AccountId,
    pub user_id: UserId,
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: Side,
    pub key: IdempotencyKey,
}

impl ExecutionTarget {
    pub fn new(signal: &Signal, account: &ExchangeAccount) -> Self {
        Self {
            signal_id: signal.id,
            account_id: account.id,
            user_id: account.user_id,
            exchange: account.exchange,
            symbol: signal.symbol.clone(),
            side: signal.side,
            key: IdempotencyKey::derive(signal.id, account.id),
        }
    }
}

/// Fully resolved entry order, as approved by the risk gatekeeper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub key: IdempotencyKey,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Quantity,
    pub leverage: u32,
    /// Signal entry price; used for sizing and as a fill fallback
    pub reference_price: Price,
    pub stop_loss: Price,
    pub take_profit: Price,
    /// Size percent after overrides and clamping
    pub size_percent: Decimal,
}

impl OrderSpec {
    pub fn client_order_id(&self) -> String {
        self.key.client_order_id(OrderLeg::Entry)
    }

    pub fn order_side(&self) -> OrderSide {
        self.side.entry_order_side()
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.reference_price
    }

    pub fn protection_request(&self, filled_quantity: Quantity) -> ProtectionRequest {
        ProtectionRequest {
            key: self.key.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: filled_quantity,
            stop_loss: Some(self.stop_loss),
            take_profit: Some(self.take_profit),
        }
    }
}

/// Exchange acknowledgement of an entry order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: Side,
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub filled_quantity: Quantity,
    /// Average fill price, if the exchange reported one
    pub avg_price: Option<Price>,
    pub fee: Decimal,
}

/// Stop-loss / take-profit legs still to be placed for a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionRequest {
    pub key: IdempotencyKey,
    pub symbol: Symbol,
    /// Side of the position being protected
    pub side: Side,
    pub quantity: Quantity,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
}

impl ProtectionRequest {
    /// Remaining legs after `placed` has been applied
    pub fn remaining(&self, placed: &ProtectionResult) -> Self {
        Self {
            stop_loss: self.stop_loss.filter(|_| placed.stop_loss_order_id.is_none()),
            take_profit: self
                .take_profit
                .filter(|_| placed.take_profit_order_id.is_none()),
            ..self.clone()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none()
    }
}

/// Order ids of the protection legs that were accepted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionResult {
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
}

impl ProtectionResult {
    pub fn is_complete(&self) -> bool {
        self.stop_loss_order_id.is_some() && self.take_profit_order_id.is_some()
    }

    /// Keep already-placed legs, fill in the newly placed ones
    pub fn merge(&mut self, other: ProtectionResult) {
        if self.stop_loss_order_id.is_none() {
            self.stop_loss_order_id = other.stop_loss_order_id;
        }
        if self.take_profit_order_id.is_none() {
            self.take_profit_order_id = other.take_profit_order_id;
        }
    }
}

/// Reduce-only market exit for an open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub key: IdempotencyKey,
    pub symbol: Symbol,
    /// Side of the position being closed
    pub side: Side,
    pub quantity: Quantity,
}

impl CloseRequest {
    pub fn client_order_id(&self) -> String {
        self.key.client_order_id(OrderLeg::Close)
    }
}

/// An execution reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub price: Price,
    pub quantity: Quantity,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A protection leg the exchange reports as executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredLeg {
    pub leg: OrderLeg,
    pub fill: Fill,
}

impl TriggeredLeg {
    pub fn close_reason(&self) -> CloseReason {
        match self.leg {
            OrderLeg::TakeProfit => CloseReason::TakeProfit,
            _ => CloseReason::StopLoss,
        }
    }
}

/// Terminal outcome of one execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    /// Entry filled and both protection legs placed
    EntryFilled,
    EntryRejected,
    /// Entry filled, stop-loss or take-profit could not be placed
    ProtectionPartial,
    Timeout,
    AuthError,
}

impl ExecutionOutcome {
    /// A position was opened on the exchange
    pub fn is_filled(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::EntryFilled | ExecutionOutcome::ProtectionPartial
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::EntryFilled => "ENTRY_FILLED",
            ExecutionOutcome::EntryRejected => "ENTRY_REJECTED",
            ExecutionOutcome::ProtectionPartial => "PROTECTION_PARTIAL",
            ExecutionOutcome::Timeout => "TIMEOUT",
            ExecutionOutcome::AuthError => "AUTH_ERROR",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a dispatched execution target after it settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub target: ExecutionTarget,
    pub outcome: ExecutionOutcome,
    pub filled_price: Option<Price>,
    pub filled_quantity: Quantity,
    pub fee: Decimal,
    pub leverage: u32,
    pub entry_order_id: Option<String>,
    /// Protection levels requested for the position
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub protection: ProtectionResult,
    pub error: Option<String>,
    /// Entry placement attempts, including the first
    pub entry_attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Entry was filled; protection status decides the outcome
    #[allow(clippy::too_many_arguments)]
    pub fn filled(
        target: ExecutionTarget,
        spec: &OrderSpec,
        handle: &OrderHandle,
        fill_price: Price,
        protection: ProtectionResult,
        protection_error: Option<String>,
        entry_attempts: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let outcome = if protection.is_complete() {
            ExecutionOutcome::EntryFilled
        } else {
            ExecutionOutcome::ProtectionPartial
        };
        Self {
            target,
            outcome,
            filled_price: Some(fill_price),
            filled_quantity: handle.filled_quantity,
            fee: handle.fee,
            leverage: spec.leverage,
            entry_order_id: Some(handle.exchange_order_id.clone()),
            stop_loss: Some(spec.stop_loss),
            take_profit: Some(spec.take_profit),
            protection,
            error: protection_error,
            entry_attempts,
            timestamp,
        }
    }

    /// Nothing was opened on the exchange
    pub fn failed(
        target: ExecutionTarget,
        outcome: ExecutionOutcome,
        error: impl Into<String>,
        entry_attempts: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            target,
            outcome,
            filled_price: None,
            filled_quantity: Decimal::ZERO,
            fee: Decimal::ZERO,
            leverage: 0,
            entry_order_id: None,
            stop_loss: None,
            take_profit: None,
            protection: ProtectionResult::default(),
            error: Some(error.into()),
            entry_attempts,
            timestamp,
        }
    }

    /// Attempts beyond the first
    pub fn retries(&self) -> u32 {
        self.entry_attempts.saturating_sub(1)
    }
}
