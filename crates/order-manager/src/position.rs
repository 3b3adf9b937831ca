//! Position & P&L Ledger
//!
//! Authoritative record of executions, open positions and realized P&L.
//!
//! Writes to one position are serialized by a per-(account, symbol) lock;
//! writes to different positions proceed independently. The in-memory state
//! is updated first and then persisted through the [`LedgerStore`] port; a
//! store failure is returned to the caller without rolling the ledger back.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use copytrade_core::{
    AccountId, CloseReason, ExecutionResult, IdempotencyKey, PnlRecord, Position, PositionKey,
    Price, Quantity,
};
use copytrade_ports::LedgerStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Effect of recording one execution
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    /// The open position after the execution, if any
    pub position: Option<Position>,
    /// Realized result when the fill netted against an opposite position
    pub closed: Option<PnlRecord>,
}

/// P&L overview for one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlSummary {
    pub account_id: AccountId,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub fees: Decimal,
    pub closed_trades: usize,
    pub wins: usize,
    pub open_positions: usize,
}

impl PnlSummary {
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    /// Share of closed trades that made money, in percent
    pub fn win_rate(&self) -> Option<Decimal> {
        if self.closed_trades == 0 {
            return None;
        }
        Some(Decimal::from(self.wins) * Decimal::ONE_HUNDRED / Decimal::from(self.closed_trades))
    }
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    open: DashMap<PositionKey, Position>,
    locks: DashMap<PositionKey, Arc<Mutex<()>>>,
    /// Latest result per idempotency key; a retried target overwrites
    executions: DashMap<IdempotencyKey, ExecutionResult>,
    closed: RwLock<Vec<PnlRecord>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            open: DashMap::new(),
            locks: DashMap::new(),
            executions: DashMap::new(),
            closed: RwLock::new(Vec::new()),
        }
    }

    fn lock_for(&self, key: &PositionKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    /// Record a settled execution; a fill opens, grows or nets a position
    ///
    /// A key that already filled is applied once: later results for it are
    /// ignored. A store failure is returned after the in-memory ledger has
    /// taken the fill.
    pub async fn record(&self, result: &ExecutionResult) -> Result<Recorded> {
        let key = PositionKey::new(result.target.account_id, result.target.symbol.clone());
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        if !self.claim(result) {
            debug!("[LEDGER] {} already filled, result ignored", result.target.key);
            return Ok(Recorded {
                position: self.open_position(&key),
                closed: None,
            });
        }

        let mut dirty = Vec::new();
        let mut recorded = Recorded::default();
        if let Some(price) = result
            .filled_price
            .filter(|_| result.outcome.is_filled() && result.filled_quantity > Decimal::ZERO)
        {
            let existing = self.open.get(&key).map(|position| position.clone());
            let position = match existing {
                None => Position::from_execution(result),
                Some(mut position) if position.side == result.target.side => {
                    position.increase(result, price);
                    debug!("[LEDGER] {key} increased to {}", position.quantity);
                    Some(position)
                }
                Some(position) => {
                    let (reduced, record, next) = net_opposite(position, result, price);
                    self.closed.write().push(record.clone());
                    if !reduced.is_open() {
                        self.open.remove(&key);
                        dirty.push(reduced);
                    }
                    recorded.closed = Some(record);
                    next
                }
            };
            if let Some(position) = &position {
                self.open.insert(key.clone(), position.clone());
                dirty.push(position.clone());
            }
            recorded.position = position;
        }

        let mut persisted = self.store.append_execution(result).await;
        for position in &dirty {
            let upserted = self.store.upsert_position(position).await;
            persisted = persisted.and(upserted);
        }
        persisted?;
        Ok(recorded)
    }

    /// Keep `result` as the latest for its key unless the key already filled
    fn claim(&self, result: &ExecutionResult) -> bool {
        match self.executions.entry(result.target.key.clone()) {
            Entry::Occupied(entry) if entry.get().outcome.is_filled() => false,
            Entry::Occupied(mut entry) => {
                entry.insert(result.clone());
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(result.clone());
                true
            }
        }
    }

    /// Recompute unrealized P&L; realized figures are untouched
    pub async fn mark_to_market(&self, key: &PositionKey, price: Price, at: DateTime<Utc>) -> Result<Decimal> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let snapshot = {
            let mut position = self
                .open
                .get_mut(key)
                .ok_or_else(|| Error::PositionNotFound(key.clone()))?;
            position.mark_to_market(price, at);
            position.clone()
        };
        self.store.upsert_position(&snapshot).await?;
        Ok(snapshot.unrealized_pnl)
    }

    /// Exit part of a position; removes it from the open set when nothing remains
    pub async fn reduce(
        &self,
        key: &PositionKey,
        quantity: Quantity,
        exit_price: Price,
        exit_fee: Decimal,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<PnlRecord> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let mut position = self
            .open
            .get(key)
            .map(|position| position.clone())
            .ok_or_else(|| Error::PositionNotFound(key.clone()))?;
        let record = position.reduce(quantity, exit_price, exit_fee, reason, at);

        if position.is_open() {
            self.open.insert(key.clone(), position.clone());
        } else {
            self.open.remove(key);
        }
        self.closed.write().push(record.clone());
        info!(
            "[LEDGER] {key} {} {} @ {} ({}): realized {}",
            record.side, record.quantity, record.exit_price, record.reason, record.realized_pnl
        );

        self.store.upsert_position(&position).await?;
        Ok(record)
    }

    /// Exit the whole position
    ///
    /// Realized P&L = (exit − entry) × quantity × direction − fees.
    pub async fn close(
        &self,
        key: &PositionKey,
        exit_price: Price,
        exit_fee: Decimal,
        reason: CloseReason,
        at: DateTime<Utc>,
    ) -> Result<PnlRecord> {
        self.reduce(key, Decimal::MAX, exit_price, exit_fee, reason, at)
            .await
    }

    /// Reload open positions for `account` from the store
    pub async fn restore(&self, account: AccountId) -> Result<usize> {
        let positions = self.store.get_open_positions(account).await?;
        let count = positions.len();
        for position in positions {
            self.open.insert(position.key(), position);
        }
        Ok(count)
    }

    pub fn open_position(&self, key: &PositionKey) -> Option<Position> {
        self.open.get(key).map(|position| position.clone())
    }

    /// Open positions of one account, oldest first
    pub fn open_positions(&self, account: AccountId) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .open
            .iter()
            .filter(|position| position.account_id == account)
            .map(|position| position.clone())
            .collect();
        positions.sort_by_key(|position| position.opened_at);
        positions
    }

    pub fn all_open(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.open.iter().map(|p| p.clone()).collect();
        positions.sort_by_key(|position| position.opened_at);
        positions
    }

    pub fn open_count(&self, account: AccountId) -> u32 {
        self.open
            .iter()
            .filter(|position| position.account_id == account)
            .count() as u32
    }

    pub fn execution(&self, key: &IdempotencyKey) -> Option<ExecutionResult> {
        self.executions.get(key).map(|result| result.clone())
    }

    /// A position was already opened for this key
    pub fn has_filled(&self, key: &IdempotencyKey) -> bool {
        self.executions
            .get(key)
            .map(|result| result.outcome.is_filled())
            .unwrap_or(false)
    }

    pub fn closed_records(&self) -> Vec<PnlRecord> {
        self.closed.read().clone()
    }

    pub fn summary(&self, account: AccountId) -> PnlSummary {
        let mut summary = PnlSummary {
            account_id: account,
            ..Default::default()
        };

        for record in self.closed.read().iter().filter(|r| r.account_id == account) {
            summary.realized_pnl += record.realized_pnl;
            summary.fees += record.fees;
            summary.closed_trades += 1;
            if record.is_win() {
                summary.wins += 1;
            }
        }
        for position in self.open.iter().filter(|p| p.account_id == account) {
            summary.unrealized_pnl += position.unrealized_pnl;
            summary.open_positions += 1;
        }
        summary
    }

    /// Realized P&L per UTC day
    pub fn daily_pnl(&self, account: AccountId) -> BTreeMap<NaiveDate, Decimal> {
        let mut days = BTreeMap::new();
        for record in self.closed.read().iter().filter(|r| r.account_id == account) {
            *days
                .entry(record.closed_at.date_naive())
                .or_insert(Decimal::ZERO) += record.realized_pnl;
        }
        days
    }
}

/// An opposite-side fill reduces the open position; any excess flips it
///
/// Returns the reduced position, the realized record and whatever is open
/// afterwards.
fn net_opposite(
    mut position: Position,
    result: &ExecutionResult,
    price: Price,
) -> (Position, PnlRecord, Option<Position>) {
    let fill_qty = result.filled_quantity;
    let netted = fill_qty.min(position.quantity);
    let netted_fee = result.fee * netted / fill_qty;

    let record = position.reduce(netted, price, netted_fee, CloseReason::Reversal, result.timestamp);
    info!(
        "[LEDGER] {} reversed by {}: realized {}",
        position.key(),
        result.target.key,
        record.realized_pnl
    );

    let excess = fill_qty - netted;
    let next = if position.is_open() {
        Some(position.clone())
    } else if excess > Decimal::ZERO {
        Position::from_execution(result).map(|mut flipped| {
            flipped.quantity = excess;
            flipped.open_fees = result.fee - netted_fee;
            flipped
        })
    } else {
        None
    };

    (position, record, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;
    use copytrade_core::{
        ExchangeAccount, ExchangeId, ExecutionOutcome, ExecutionTarget, OrderHandle, OrderSpec,
        ProtectionResult, Side, Signal, SignalId,
    };
    use rust_decimal_macros::dec;

    fn filled(
        signal_id: u64,
        account: &ExchangeAccount,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> ExecutionResult {
        let (stop_loss, take_profit) = match side {
            Side::Long => (price * dec!(0.9), price * dec!(1.2)),
            Side::Short => (price * dec!(1.1), price * dec!(0.8)),
        };
        let signal = Signal::new(
            SignalId(signal_id),
            "BTCUSDT",
            side,
            price,
            stop_loss,
            take_profit,
            10,
            dec!(5),
            Utc::now(),
        );
        let target = ExecutionTarget::new(&signal, account);
        let spec = OrderSpec {
            key: target.key.clone(),
            symbol: signal.symbol.clone(),
            side,
            quantity,
            leverage: signal.leverage,
            reference_price: price,
            stop_loss,
            take_profit,
            size_percent: signal.size_percent,
        };
        let handle = OrderHandle {
            exchange: account.exchange,
            symbol: spec.symbol.clone(),
            side,
            exchange_order_id: format!("ord-{signal_id}"),
            client_order_id: spec.client_order_id(),
            filled_quantity: quantity,
            avg_price: Some(price),
            fee,
        };
        let protection = ProtectionResult {
            stop_loss_order_id: Some("sl".into()),
            take_profit_order_id: Some("tp".into()),
        };
        ExecutionResult::filled(
            target,
            &spec,
            &handle,
            price,
            protection,
            None,
            1,
            Utc::now(),
        )
    }

    fn ledger() -> (Ledger, Arc<InMemoryLedgerStore>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        (Ledger::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_long_close_realized_pnl() {
        let (ledger, store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Binance);
        let recorded = ledger
            .record(&filled(1, &account, Side::Long, dec!(0.2), dec!(35000), dec!(1.4)))
            .await
            .unwrap();
        let key = recorded.position.unwrap().key();

        ledger
            .mark_to_market(&key, dec!(36000), Utc::now())
            .await
            .unwrap();
        let record = ledger
            .close(&key, dec!(37000), dec!(1.48), CloseReason::TakeProfit, Utc::now())
            .await
            .unwrap();

        // (37000 − 35000) × 0.2 − (1.4 + 1.48)
        assert_eq!(record.realized_pnl, dec!(397.12));
        assert!(ledger.open_position(&key).is_none());
        assert_eq!(store.executions().len(), 1);
        assert_eq!(store.get_open_positions(account.id).await.unwrap().len(), 0);

        let summary = ledger.summary(account.id);
        assert_eq!(summary.realized_pnl, dec!(397.12));
        assert_eq!(summary.closed_trades, 1);
        assert_eq!(summary.win_rate(), Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_short_close_realized_pnl() {
        let (ledger, _store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Bybit);
        let position = ledger
            .record(&filled(1, &account, Side::Short, dec!(0.2), dec!(35000), dec!(1)))
            .await
            .unwrap()
            .position
            .unwrap();

        let record = ledger
            .close(&position.key(), dec!(37500), dec!(1), CloseReason::StopLoss, Utc::now())
            .await
            .unwrap();
        // (37500 − 35000) × 0.2 × −1 − 2
        assert_eq!(record.realized_pnl, dec!(-502));
        assert!(!record.is_win());
    }

    #[tokio::test]
    async fn test_mark_to_market_leaves_realized_untouched() {
        let (ledger, _store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Okx);
        let key = ledger
            .record(&filled(1, &account, Side::Long, dec!(1), dec!(100), dec!(0)))
            .await
            .unwrap()
            .position
            .unwrap()
            .key();

        let unrealized = ledger.mark_to_market(&key, dec!(90), Utc::now()).await.unwrap();
        assert_eq!(unrealized, dec!(-10));
        let position = ledger.open_position(&key).unwrap();
        assert_eq!(position.realized_pnl, Decimal::ZERO);
        assert_eq!(ledger.summary(account.id).unrealized_pnl, dec!(-10));
    }

    #[tokio::test]
    async fn test_same_side_fills_average_and_opposite_fills_net() {
        let (ledger, _store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Bitget);
        ledger
            .record(&filled(1, &account, Side::Long, dec!(1), dec!(100), dec!(0)))
            .await
            .unwrap();
        let grown = ledger
            .record(&filled(2, &account, Side::Long, dec!(1), dec!(110), dec!(0)))
            .await
            .unwrap()
            .position
            .unwrap();
        assert_eq!(grown.entry_price, dec!(105));
        assert_eq!(grown.quantity, dec!(2));
        assert_eq!(ledger.open_count(account.id), 1);

        // Selling 3 against 2 long closes the long and opens 1 short
        let recorded = ledger
            .record(&filled(3, &account, Side::Short, dec!(3), dec!(120), dec!(0)))
            .await
            .unwrap();
        let closed = recorded.closed.unwrap();
        assert_eq!(closed.reason, CloseReason::Reversal);
        assert_eq!(closed.realized_pnl, dec!(30));
        let flipped = recorded.position.unwrap();
        assert_eq!(flipped.side, Side::Short);
        assert_eq!(flipped.quantity, dec!(1));
    }

    #[tokio::test]
    async fn test_retried_result_overwrites() {
        let (ledger, _store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Mexc);
        let fill = filled(1, &account, Side::Long, dec!(1), dec!(100), dec!(0));
        let failed = ExecutionResult::failed(
            fill.target.clone(),
            ExecutionOutcome::Timeout,
            "timeout",
            3,
            Utc::now(),
        );

        ledger.record(&failed).await.unwrap();
        assert!(!ledger.has_filled(&fill.target.key));
        ledger.record(&fill).await.unwrap();
        assert!(ledger.has_filled(&fill.target.key));
        assert_eq!(ledger.execution(&fill.target.key).unwrap().entry_attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_serialized_per_key() {
        let (ledger, _store) = ledger();
        let ledger = Arc::new(ledger);
        let a = ExchangeAccount::new(1, ExchangeId::Binance);
        let b = ExchangeAccount::new(2, ExchangeId::Binance);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..50u64 {
            for account in [&a, &b] {
                let ledger = ledger.clone();
                let result = filled(i + 1, account, Side::Long, dec!(0.1), dec!(100), dec!(0.01));
                tasks.spawn(async move { ledger.record(&result).await.map(|_| ()) });
            }
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        for account in [&a, &b] {
            let positions = ledger.open_positions(account.id);
            assert_eq!(positions.len(), 1);
            assert_eq!(positions[0].quantity, dec!(5));
            assert_eq!(positions[0].open_fees, dec!(0.5));
            assert_eq!(positions[0].entry_keys.len(), 50);
        }
    }

    #[tokio::test]
    async fn test_daily_pnl_and_restore() {
        let (ledger, store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Binance);
        let key = ledger
            .record(&filled(1, &account, Side::Long, dec!(1), dec!(100), dec!(0)))
            .await
            .unwrap()
            .position
            .unwrap()
            .key();
        ledger
            .reduce(&key, dec!(0.5), dec!(110), dec!(0), CloseReason::Manual, Utc::now())
            .await
            .unwrap();

        let days = ledger.daily_pnl(account.id);
        assert_eq!(days.values().copied().sum::<Decimal>(), dec!(5));

        let fresh = Ledger::new(store);
        assert_eq!(fresh.restore(account.id).await.unwrap(), 1);
        assert_eq!(fresh.open_position(&key).unwrap().quantity, dec!(0.5));
    }

    #[tokio::test]
    async fn test_store_outage_keeps_fill_in_memory() {
        let (ledger, store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Binance);
        let fill = filled(1, &account, Side::Long, dec!(1), dec!(100), dec!(0));
        store.set_unavailable(true);

        let err = ledger.record(&fill).await.unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));

        let key = PositionKey::new(account.id, "BTCUSDT".to_string());
        assert_eq!(ledger.open_count(account.id), 1);
        assert!(ledger.has_filled(&fill.target.key));
        assert_eq!(ledger.open_position(&key).unwrap().quantity, dec!(1));

        store.set_unavailable(false);
        let record = ledger
            .close(&key, dec!(110), dec!(0), CloseReason::Manual, Utc::now())
            .await
            .unwrap();
        assert_eq!(record.realized_pnl, dec!(10));
        assert_eq!(ledger.open_count(account.id), 0);
    }

    #[tokio::test]
    async fn test_repeated_fill_for_key_applies_once() {
        let (ledger, store) = ledger();
        let account = ExchangeAccount::new(1, ExchangeId::Bybit);
        let fill = filled(1, &account, Side::Long, dec!(1), dec!(100), dec!(0));

        ledger.record(&fill).await.unwrap();
        let again = ledger.record(&fill).await.unwrap();

        let position = again.position.unwrap();
        assert_eq!(position.quantity, dec!(1));
        assert_eq!(position.entry_keys.len(), 1);
        assert_eq!(store.executions().len(), 1);

        let late_failure = ExecutionResult::failed(
            fill.target.clone(),
            ExecutionOutcome::Timeout,
            "timeout",
            3,
            Utc::now(),
        );
        ledger.record(&late_failure).await.unwrap();
        assert!(ledger.has_filled(&fill.target.key));
    }
}
