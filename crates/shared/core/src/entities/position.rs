use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::account::{AccountId, ExchangeId};
use super::execution::{ExecutionResult, IdempotencyKey, ProtectionResult};
use super::side::Side;
use crate::values::{Price, Quantity, Symbol, UserId};

/// Unique identifier for a position
pub type PositionId = Uuid;

/// Ordering key for ledger writes: one open position per (account, symbol)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub account_id: AccountId,
    pub symbol: Symbol,
}

impl PositionKey {
    pub fn new(account_id: AccountId, symbol: impl Into<Symbol>) -> Self {
        Self {
            account_id,
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why (part of) a position was exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    /// Signal was cancelled while the entry was in flight
    SignalCancelled,
    /// Closed because protection could not be placed
    Unprotected,
    /// Netted against an opposite-side entry on the same symbol
    Reversal,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::Manual => "MANUAL",
            CloseReason::SignalCancelled => "SIGNAL_CANCELLED",
            CloseReason::Unprotected => "UNPROTECTED",
            CloseReason::Reversal => "REVERSAL",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open (or closed) position on one exchange account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    /// Account that owns this position
    pub account_id: AccountId,
    pub user_id: UserId,
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: Side,
    /// Average entry price
    pub entry_price: Price,
    /// Remaining quantity (always positive)
    pub quantity: Quantity,
    pub leverage: u32,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
    /// Last mark price
    pub mark_price: Price,
    pub unrealized_pnl: Decimal,
    /// Realized from partial closes so far
    pub realized_pnl: Decimal,
    /// Entry fees not yet charged to a close record
    pub open_fees: Decimal,
    /// Executions that built this position
    pub entry_keys: Vec<IdempotencyKey>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Open a position from a filled execution. Returns None if nothing was filled.
    pub fn from_execution(result: &ExecutionResult) -> Option<Self> {
        let entry_price = result.filled_price?;
        if !result.outcome.is_filled() || result.filled_quantity <= Decimal::ZERO {
            return None;
        }

        let target = &result.target;
        Some(Self {
            id: Uuid::new_v4(),
            account_id: target.account_id,
            user_id: target.user_id,
            exchange: target.exchange,
            symbol: target.symbol.clone(),
            side: target.side,
            entry_price,
            quantity: result.filled_quantity,
            leverage: result.leverage,
            stop_loss: result.stop_loss,
            take_profit: result.take_profit,
            stop_loss_order_id: result.protection.stop_loss_order_id.clone(),
            take_profit_order_id: result.protection.take_profit_order_id.clone(),
            mark_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            open_fees: result.fee,
            entry_keys: vec![target.key.clone()],
            status: PositionStatus::Open,
            opened_at: result.timestamp,
            updated_at: result.timestamp,
            closed_at: None,
        })
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.account_id, self.symbol.clone())
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Both stop-loss and take-profit orders are resting on the exchange
    pub fn is_protected(&self) -> bool {
        self.stop_loss_order_id.is_some() && self.take_profit_order_id.is_some()
    }

    /// Exchange order ids of the protection legs placed for this position
    pub fn protection(&self) -> ProtectionResult {
        ProtectionResult {
            stop_loss_order_id: self.stop_loss_order_id.clone(),
            take_profit_order_id: self.take_profit_order_id.clone(),
        }
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.mark_price
    }

    /// (exit - entry) x quantity x direction, before fees
    pub fn gross_pnl(&self, exit_price: Price, quantity: Quantity) -> Decimal {
        (exit_price - self.entry_price) * quantity * self.side.direction_sign()
    }

    /// Recompute unrealized P&L at `price`; realized figures are untouched
    pub fn mark_to_market(&mut self, price: Price, at: DateTime<Utc>) -> Decimal {
        self.mark_price = price;
        self.unrealized_pnl = self.gross_pnl(price, self.quantity);
        self.updated_at = at;
        self.unrealized_pnl
    }

    /// Add a same-side fill, averaging the entry price
    pub fn increase(&mut self, result: &ExecutionResult, price: Price) {
        let old_notional = self.quantity * self.entry_price;
        let new_notional = result.filled_quantity * price;
        let total_quantity = self.quantity + result.filled_quantity;

        if total_quantity > Decimal::ZERO {
            self.entry_price = (old_notional + new_notional) / total_quantity;
        }

        self.quantity = total_quantity;
        self.open_fees += result.fee;
        self.leverage = self.leverage.max(result.leverage);
        // Newest protection replaces the old levels
        if result.stop_loss.is_some() {
            self.stop_loss = result.stop_loss;
            self.stop_loss_order_id = result.protection.stop_loss_order_id.clone();
        }
        if result.take_profit.is_some() {
            self.take_profit = result.take_profit;
            self.take_profit_order_id = result.protection.take_profit_order_id.clone();
        }
        self.entry_keys.push(result.target.key.clone());
        self.mark_to_market(self.mark_price, result.timestamp);
    }

    /// Exit up to `quantity` at `exit_price`, returning the realized record.
    ///
    /// Entry fees are charged pro rata to the exited quantity.
    pub fn reduce(
        &mut self,
        quantity: Quantity,
        exit_price: Price,
        exit_fee: Decimal,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> PnlRecord {
        let exit_qty = quantity.min(self.quantity);
        let entry_fee_share = if exit_qty == self.quantity {
            self.open_fees
        } else if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.open_fees * exit_qty / self.quantity
        };

        let gross = self.gross_pnl(exit_price, exit_qty);
        let fees = entry_fee_share + exit_fee;
        let realized = gross - fees;

        self.quantity -= exit_qty;
        self.open_fees -= entry_fee_share;
        self.realized_pnl += realized;
        self.updated_at = at;

        if self.quantity.is_zero() {
            self.status = PositionStatus::Closed;
            self.closed_at = Some(at);
            self.unrealized_pnl = Decimal::ZERO;
        } else {
            self.unrealized_pnl = self.gross_pnl(self.mark_price, self.quantity);
        }

        PnlRecord {
            position_id: self.id,
            account_id: self.account_id,
            user_id: self.user_id,
            symbol: self.symbol.clone(),
            side: self.side,
            entry_price: self.entry_price,
            exit_price,
            quantity: exit_qty,
            gross_pnl: gross,
            fees,
            realized_pnl: realized,
            reason,
            closed_at: at,
        }
    }

    /// Exit the whole remaining quantity
    pub fn close(
        &mut self,
        exit_price: Price,
        exit_fee: Decimal,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> PnlRecord {
        self.reduce(self.quantity, exit_price, exit_fee, reason, at)
    }

    /// Stop-loss or take-profit level crossed at `price`
    pub fn triggered_exit(&self, price: Price) -> Option<CloseReason> {
        let stop_hit = self.stop_loss.map(|sl| match self.side {
            Side::Long => price <= sl,
            Side::Short => price >= sl,
        });
        if stop_hit == Some(true) {
            return Some(CloseReason::StopLoss);
        }

        let target_hit = self.take_profit.map(|tp| match self.side {
            Side::Long => price >= tp,
            Side::Short => price <= tp,
        });
        if target_hit == Some(true) {
            return Some(CloseReason::TakeProfit);
        }
        None
    }
}

/// Realized result of closing (part of) a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlRecord {
    pub position_id: PositionId,
    pub account_id: AccountId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Price,
    pub exit_price: Price,
    pub quantity: Quantity,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub realized_pnl: Decimal,
    pub reason: CloseReason,
    pub closed_at: DateTime<Utc>,
}

impl PnlRecord {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::ExchangeAccount;
    use crate::entities::execution::{
        ExecutionOutcome, ExecutionTarget, OrderHandle, OrderSpec, ProtectionResult,
    };
    use crate::entities::signal::{Signal, SignalId};
    use rust_decimal_macros::dec;

    fn filled(side: Side, price: Decimal, qty: Decimal, fee: Decimal) -> ExecutionResult {
        let account = ExchangeAccount::new(1, ExchangeId::Bybit);
        let (sl, tp) = match side {
            Side::Long => (price - dec!(1000), price + dec!(2000)),
            Side::Short => (price + dec!(1000), price - dec!(2000)),
        };
        let signal = Signal::new(SignalId(1), "BTCUSDT", side, price, sl, tp, 10, dec!(5), Utc::now());
        let target = ExecutionTarget::new(&signal, &account);
        let spec = OrderSpec {
            key: target.key.clone(),
            symbol: "BTCUSDT".into(),
            side,
            quantity: qty,
            leverage: 10,
            reference_price: price,
            stop_loss: sl,
            take_profit: tp,
            size_percent: dec!(5),
        };
        let handle = OrderHandle {
            exchange: ExchangeId::Bybit,
            symbol: "BTCUSDT".into(),
            side,
            exchange_order_id: "1".into(),
            client_order_id: spec.client_order_id(),
            filled_quantity: qty,
            avg_price: Some(price),
            fee,
        };
        let protection = ProtectionResult {
            stop_loss_order_id: Some("sl".into()),
            take_profit_order_id: Some("tp".into()),
        };
        ExecutionResult::filled(target, &spec, &handle, price, protection, None, 1, Utc::now())
    }

    #[test]
    fn test_open_from_execution() {
        let result = filled(Side::Long, dec!(35000), dec!(0.2), dec!(1.4));
        assert_eq!(result.outcome, ExecutionOutcome::EntryFilled);

        let pos = Position::from_execution(&result).unwrap();
        assert_eq!(pos.quantity, dec!(0.2));
        assert_eq!(pos.entry_price, dec!(35000));
        assert_eq!(pos.open_fees, dec!(1.4));
        assert!(pos.is_protected());
        assert!(pos.is_open());
    }

    #[test]
    fn test_mark_to_market_keeps_realized() {
        let mut pos =
            Position::from_execution(&filled(Side::Short, dec!(2000), dec!(3), dec!(0))).unwrap();
        let unrealized = pos.mark_to_market(dec!(1900), Utc::now());
        assert_eq!(unrealized, dec!(300));
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_long_close_realized() {
        let mut pos =
            Position::from_execution(&filled(Side::Long, dec!(35000), dec!(0.2), dec!(1.4)))
                .unwrap();
        let record = pos.close(dec!(37000), dec!(1.48), CloseReason::TakeProfit, Utc::now());

        // (37000 - 35000) * 0.2 * 1 - (1.4 + 1.48)
        assert_eq!(record.gross_pnl, dec!(400));
        assert_eq!(record.fees, dec!(2.88));
        assert_eq!(record.realized_pnl, dec!(397.12));
        assert_eq!(pos.status, PositionStatus::Closed);
        assert!(record.is_win());
    }

    #[test]
    fn test_short_close_realized() {
        let mut pos =
            Position::from_execution(&filled(Side::Short, dec!(2000), dec!(5), dec!(1))).unwrap();
        let record = pos.close(dec!(2100), dec!(1), CloseReason::StopLoss, Utc::now());

        // (2100 - 2000) * 5 * -1 - 2
        assert_eq!(record.realized_pnl, dec!(-502));
        assert!(!record.is_win());
    }

    #[test]
    fn test_partial_reduce_charges_fees_pro_rata() {
        let mut pos =
            Position::from_execution(&filled(Side::Long, dec!(100), dec!(4), dec!(2))).unwrap();
        let record = pos.reduce(dec!(1), dec!(110), dec!(0.1), CloseReason::Manual, Utc::now());

        assert_eq!(record.quantity, dec!(1));
        assert_eq!(record.fees, dec!(0.6));
        assert_eq!(record.realized_pnl, dec!(9.4));
        assert_eq!(pos.quantity, dec!(3));
        assert_eq!(pos.open_fees, dec!(1.5));
        assert!(pos.is_open());
    }

    #[test]
    fn test_increase_averages_entry() {
        let mut pos =
            Position::from_execution(&filled(Side::Long, dec!(100), dec!(1), dec!(0))).unwrap();
        pos.increase(&filled(Side::Long, dec!(110), dec!(1), dec!(0)), dec!(110));

        assert_eq!(pos.quantity, dec!(2));
        assert_eq!(pos.entry_price, dec!(105));
        assert_eq!(pos.entry_keys.len(), 2);
    }

    #[test]
    fn test_triggered_exit() {
        let pos =
            Position::from_execution(&filled(Side::Long, dec!(35000), dec!(1), dec!(0))).unwrap();
        assert_eq!(pos.triggered_exit(dec!(35500)), None);
        assert_eq!(pos.triggered_exit(dec!(33999)), Some(CloseReason::StopLoss));
        assert_eq!(pos.triggered_exit(dec!(37000)), Some(CloseReason::TakeProfit));

        let short =
            Position::from_execution(&filled(Side::Short, dec!(2000), dec!(1), dec!(0))).unwrap();
        assert_eq!(short.triggered_exit(dec!(3001)), Some(CloseReason::StopLoss));
        assert_eq!(short.triggered_exit(dec!(0)), Some(CloseReason::TakeProfit));
    }
}
