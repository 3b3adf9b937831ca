//! Execution Orchestrator
//!
//! Fans a distributing signal out to every eligible account and folds the
//! per-account outcomes into one signal status.
//!
//! ```text
//!                     ┌─► target 1 ─► balance ─► risk ─► entry ─► protection ─► ledger ─┐
//! distribute(signal) ─┼─► target 2 ─► ...                                               ├─► aggregate
//!                     └─► target N ─► ...                                               ┘
//!                          (at most max_parallel_calls in flight)
//! ```
//!
//! Each target is its own failure domain: an error on one account is
//! recorded against that account and never reaches another. The aggregate
//! status is computed only after every dispatched target has settled.

use crate::config::{ExchangeSettings, ExecutionSettings};
use crate::error::{Error, Result};
use crate::intake::SignalBook;
use crate::position::Ledger;
use crate::resolver::{AccountDirectory, ResolvedTarget};
use copytrade_core::{
    AccountId, CloseReason, CloseRequest, EngineEvent, ExchangeId, ExecutionOutcome,
    ExecutionResult, ExecutionTarget, Fill, IdempotencyKey, OrderHandle, OrderSpec, PnlRecord,
    Position, PositionKey, ProtectionResult, Signal, SignalId, SignalStatus, UserId,
};
use copytrade_ports::{
    Clock, ExchangeAdapter, ExchangeError, NotificationSink, ProtectionError,
};
use copytrade_risk_manager::{RiskContext, RiskGatekeeper, RiskRejection};
use dashmap::DashSet;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What happened to one account during a distribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TargetEntry {
    /// Reached the exchange; the result carries the outcome
    Executed(ExecutionResult),
    /// Refused by the gatekeeper before any exchange call
    RiskRejected(RiskRejection),
    /// Not dispatched
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetReport {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub exchange: ExchangeId,
    pub entry: TargetEntry,
}

impl TargetReport {
    fn new(target: &ResolvedTarget, entry: TargetEntry) -> Self {
        Self {
            account_id: target.account.id,
            user_id: target.account.user_id,
            exchange: target.account.exchange,
            entry,
        }
    }

    pub fn result(&self) -> Option<&ExecutionResult> {
        match &self.entry {
            TargetEntry::Executed(result) => Some(result),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<ExecutionOutcome> {
        self.result().map(|result| result.outcome)
    }

    pub fn is_filled(&self) -> bool {
        self.result()
            .map(|result| result.outcome.is_filled())
            .unwrap_or(false)
    }

    /// Filled with both stop-loss and take-profit resting
    pub fn is_protected(&self) -> bool {
        self.result()
            .map(|result| result.outcome == ExecutionOutcome::EntryFilled)
            .unwrap_or(false)
    }

    /// Filled but left without full protection
    pub fn needs_attention(&self) -> bool {
        self.is_filled() && !self.is_protected()
    }

    pub fn label(&self) -> String {
        match &self.entry {
            TargetEntry::Executed(result) => result.outcome.as_str().to_string(),
            TargetEntry::RiskRejected(rejection) => format!("RISK_REJECTED ({})", rejection.code()),
            TargetEntry::Skipped(reason) => format!("SKIPPED ({reason})"),
        }
    }
}

/// Aggregate outcome plus the per-account breakdown, in resolution order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionReport {
    pub signal_id: SignalId,
    pub status: SignalStatus,
    pub targets: Vec<TargetReport>,
}

impl DistributionReport {
    pub fn filled(&self) -> usize {
        self.targets.iter().filter(|t| t.is_filled()).count()
    }

    pub fn target(&self, account_id: AccountId) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.account_id == account_id)
    }

    /// Accounts holding a position without full protection
    pub fn unprotected(&self) -> Vec<AccountId> {
        self.targets
            .iter()
            .filter(|t| t.needs_attention())
            .map(|t| t.account_id)
            .collect()
    }
}

/// COMPLETED only when every target filled with protection; FAILED when none filled
pub fn aggregate_status(targets: &[TargetReport]) -> SignalStatus {
    let filled = targets.iter().filter(|t| t.is_filled()).count();
    let protected = targets.iter().filter(|t| t.is_protected()).count();
    if filled == 0 {
        SignalStatus::Failed
    } else if protected == targets.len() {
        SignalStatus::Completed
    } else {
        SignalStatus::Partial
    }
}

/// Dispatches signals to accounts and owns the per-target flow
#[derive(Clone)]
pub struct Orchestrator {
    settings: Arc<ExecutionSettings>,
    gatekeeper: Arc<RiskGatekeeper>,
    directory: Arc<AccountDirectory>,
    ledger: Arc<Ledger>,
    book: Arc<SignalBook>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    /// Idempotency keys with an execution under way
    in_flight: Arc<DashSet<IdempotencyKey>>,
}

impl Orchestrator {
    pub fn new(
        settings: ExecutionSettings,
        gatekeeper: Arc<RiskGatekeeper>,
        directory: Arc<AccountDirectory>,
        ledger: Arc<Ledger>,
        book: Arc<SignalBook>,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            gatekeeper,
            directory,
            ledger,
            book,
            notifier,
            clock,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Execute a VALIDATED signal against every eligible account
    pub async fn distribute(&self, signal_id: SignalId) -> Result<DistributionReport> {
        let signal = self
            .book
            .get(signal_id)
            .ok_or(Error::UnknownSignal(signal_id))?;
        let now = self.clock.now();

        if signal.is_expired(now) {
            self.book.transition(signal_id, SignalStatus::Failed)?;
            warn!("[ORCHESTRATOR] {signal_id} expired before distribution");
            self.notifier.notify(EngineEvent::SignalSettled {
                signal_id,
                status: SignalStatus::Failed,
                filled: 0,
                total: 0,
            });
            return Err(Error::SignalExpired(signal_id));
        }

        self.book.transition(signal_id, SignalStatus::Distributing)?;
        let max_daily_trades = self.gatekeeper.limits().max_daily_trades;
        let targets = self.directory.resolve(&signal, now, max_daily_trades);
        info!(
            "[ORCHESTRATOR] {signal_id} {} {} dispatching to {} accounts",
            signal.symbol,
            signal.side,
            targets.len()
        );

        let reports = self.fan_out(&signal, targets).await;

        let status = aggregate_status(&reports);
        let status = match self.book.transition(signal_id, status) {
            Ok(()) => status,
            Err(_) if self.book.is_cancelled(signal_id) => {
                self.unwind_cancelled(signal_id, &reports).await;
                SignalStatus::Cancelled
            }
            Err(err) => return Err(err),
        };

        let report = DistributionReport {
            signal_id,
            status,
            targets: reports,
        };
        info!(
            "[ORCHESTRATOR] {signal_id} settled {status}: {}/{} filled",
            report.filled(),
            report.targets.len()
        );
        self.notifier.notify(EngineEvent::SignalSettled {
            signal_id,
            status,
            filled: report.filled(),
            total: report.targets.len(),
        });
        Ok(report)
    }

    /// Close positions still open from a signal cancelled after its
    /// targets finished their own cancellation check
    async fn unwind_cancelled(&self, signal_id: SignalId, reports: &[TargetReport]) {
        for result in reports.iter().filter(|t| t.is_filled()).filter_map(TargetReport::result) {
            let target = &result.target;
            let key = PositionKey::new(target.account_id, target.symbol.clone());
            let still_open = self
                .ledger
                .open_position(&key)
                .map(|position| position.entry_keys.contains(&target.key))
                .unwrap_or(false);
            if !still_open {
                continue;
            }
            warn!("[ORCHESTRATOR] {signal_id} cancelled during distribution, closing {key}");
            if let Err(err) = self
                .close_position(target.account_id, &target.symbol, CloseReason::SignalCancelled)
                .await
            {
                error!("[ORCHESTRATOR] {key} close after cancellation failed: {err}");
            }
        }
    }

    /// Run every target on the bounded pool and wait for all of them
    async fn fan_out(&self, signal: &Signal, targets: Vec<ResolvedTarget>) -> Vec<TargetReport> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel_calls.max(1)));
        let mut tasks = JoinSet::new();

        for (index, target) in targets.iter().cloned().enumerate() {
            let this = self.clone();
            let signal = signal.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let report = match semaphore.acquire_owned().await {
                    Ok(permit) => {
                        let report = this.execute_target(&signal, &target).await;
                        drop(permit);
                        report
                    }
                    Err(_) => TargetReport::new(&target, TargetEntry::Skipped("dispatch pool closed".into())),
                };
                (index, report)
            });
        }

        let mut slots: Vec<Option<TargetReport>> = vec![None; targets.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, report)) => slots[index] = Some(report),
                Err(err) => error!("[ORCHESTRATOR] {} target task aborted: {err}", signal.id),
            }
        }

        slots
            .into_iter()
            .zip(&targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    TargetReport::new(target, TargetEntry::Skipped("execution task aborted".into()))
                })
            })
            .collect()
    }

    async fn execute_target(&self, signal: &Signal, target: &ResolvedTarget) -> TargetReport {
        let execution = ExecutionTarget::new(signal, &target.account);
        let key = execution.key.clone();

        if self.book.is_cancelled(signal.id) {
            debug!("[ORCHESTRATOR] {key} not dispatched: signal cancelled");
            return TargetReport::new(target, TargetEntry::Skipped("signal cancelled".into()));
        }
        if !self.in_flight.insert(key.clone()) {
            warn!("[ORCHESTRATOR] {key} already in flight");
            return TargetReport::new(target, TargetEntry::Skipped("already in flight".into()));
        }
        if self.ledger.has_filled(&key) {
            self.in_flight.remove(&key);
            warn!("[ORCHESTRATOR] {key} already filled, not resubmitting");
            return TargetReport::new(target, TargetEntry::Skipped("already filled".into()));
        }

        let entry = self.run_target(signal, target, execution).await;
        self.in_flight.remove(&key);
        TargetReport::new(target, entry)
    }

    /// balance → risk → entry → protection → ledger → notification
    async fn run_target(
        &self,
        signal: &Signal,
        target: &ResolvedTarget,
        execution: ExecutionTarget,
    ) -> TargetEntry {
        let account = &target.account;
        let adapter = target.adapter.as_ref();
        let exchange = self.settings.for_exchange(account.exchange);
        let timeout = exchange.call_timeout();

        let balance = match self.refresh_balance(target, timeout).await {
            Ok(balance) => balance,
            Err(err) => {
                let result = self.failed(execution, &err, 0);
                return self.settle(result).await;
            }
        };

        let now = self.clock.now();
        let trades_today = self
            .directory
            .subscription(account.user_id)
            .map(|subscription| subscription.trades_today(now))
            .unwrap_or(0);
        let context = RiskContext {
            balance,
            open_positions: self.ledger.open_count(account.id),
            trades_today,
            min_notional: exchange.min_notional,
        };
        let spec = match self
            .gatekeeper
            .evaluate(signal, account, &target.subscription, context)
        {
            Ok(approval) => approval.spec,
            Err(rejection) => return TargetEntry::RiskRejected(rejection),
        };

        // The slot is held from before the entry goes out until it fills or fails
        let limit = self.gatekeeper.limits().max_daily_trades;
        if !self.directory.try_reserve_trade(account.user_id, now, limit) {
            let trades = self
                .directory
                .subscription(account.user_id)
                .map(|subscription| subscription.trades_today(now))
                .unwrap_or(limit);
            info!(
                "[ORCHESTRATOR] {} daily limit taken by a concurrent target ({trades}/{limit})",
                account.id
            );
            return TargetEntry::RiskRejected(RiskRejection::DailyLimit { trades, limit });
        }

        let (handle, attempts) = match self.place_entry(adapter, &spec, exchange).await {
            Ok(placed) => placed,
            Err((err, attempts)) => {
                self.directory.release_trade(account.user_id);
                let result = self.failed(execution, &err, attempts);
                return self.settle(result).await;
            }
        };

        let fill_price = handle.avg_price.unwrap_or(spec.reference_price);
        let (protection, protection_error) = self.protect(adapter, &handle, &spec, timeout).await;
        if !protection.is_complete() {
            error!(
                "[PROTECTION PARTIAL] {} {} {} {} left without full protection (SL {:?}, TP {:?}): {}",
                account.id,
                account.exchange,
                spec.symbol,
                handle.filled_quantity,
                protection.stop_loss_order_id,
                protection.take_profit_order_id,
                protection_error.as_deref().unwrap_or("unknown")
            );
        }

        let now = self.clock.now();
        let result = ExecutionResult::filled(
            execution,
            &spec,
            &handle,
            fill_price,
            protection,
            protection_error,
            attempts,
            now,
        );
        let unprotected = !result.protection.is_complete();
        let entry = self.settle(result).await;

        let follow_up = if self.book.is_cancelled(signal.id) {
            Some(CloseReason::SignalCancelled)
        } else if unprotected && self.settings.auto_close_unprotected {
            Some(CloseReason::Unprotected)
        } else {
            None
        };
        if let Some(reason) = follow_up {
            if let Err(err) = self.close_position(account.id, &spec.symbol, reason).await {
                error!(
                    "[ORCHESTRATOR] {} {} close after fill ({reason}) failed: {err}",
                    account.id, spec.symbol
                );
            }
        }
        entry
    }

    /// Current exchange balance, falling back to the stored snapshot on
    /// transient failures
    async fn refresh_balance(
        &self,
        target: &ResolvedTarget,
        timeout: Duration,
    ) -> std::result::Result<rust_decimal::Decimal, ExchangeError> {
        let account = &target.account;
        if !self.settings.refresh_balance {
            return Ok(account.balance);
        }

        match tokio::time::timeout(timeout, target.adapter.get_balance()).await {
            Ok(Ok(balance)) => {
                if let Err(err) = self
                    .directory
                    .update_balance(account.id, balance, self.clock.now())
                {
                    warn!("[ORCHESTRATOR] {} balance snapshot not stored: {err}", account.id);
                }
                Ok(balance)
            }
            Ok(Err(err)) if err.is_auth() => Err(err),
            Ok(Err(err)) => {
                warn!(
                    "[ORCHESTRATOR] {} balance refresh failed ({err}), using snapshot {}",
                    account.id, account.balance
                );
                Ok(account.balance)
            }
            Err(_) => {
                warn!(
                    "[ORCHESTRATOR] {} balance refresh timed out, using snapshot {}",
                    account.id, account.balance
                );
                Ok(account.balance)
            }
        }
    }

    /// Entry with retries; an exhausted transient failure is reconciled by
    /// looking the order up under its client id
    async fn place_entry(
        &self,
        adapter: &dyn ExchangeAdapter,
        spec: &OrderSpec,
        exchange: &ExchangeSettings,
    ) -> std::result::Result<(OrderHandle, u32), (ExchangeError, u32)> {
        let client_order_id = spec.client_order_id();
        let label = format!("{} entry {}", adapter.exchange(), client_order_id);
        let attempted = exchange
            .retry
            .run(&label, exchange.call_timeout(), || adapter.place_entry_order(spec))
            .await;
        let attempts = attempted.attempts;

        let handle = match attempted.result {
            Ok(handle) => handle,
            Err(err) if err.is_transient() => {
                let lookup = tokio::time::timeout(
                    exchange.call_timeout(),
                    adapter.query_order(&spec.symbol, &client_order_id),
                )
                .await;
                match lookup {
                    Ok(Ok(handle)) => {
                        info!("[ORCHESTRATOR] {client_order_id} found on exchange after {err}");
                        handle
                    }
                    _ => return Err((err, attempts)),
                }
            }
            Err(err) => return Err((err, attempts)),
        };

        // Market orders acknowledged without a fill report are taken as filled
        if handle.filled_quantity.is_zero() {
            return Ok((
                OrderHandle {
                    filled_quantity: spec.quantity,
                    ..handle
                },
                attempts,
            ));
        }
        Ok((handle, attempts))
    }

    /// Place stop-loss and take-profit, retrying only the missing legs
    async fn protect(
        &self,
        adapter: &dyn ExchangeAdapter,
        handle: &OrderHandle,
        spec: &OrderSpec,
        timeout: Duration,
    ) -> (ProtectionResult, Option<String>) {
        let policy = self.settings.protection_retry;
        let mut request = spec.protection_request(handle.filled_quantity);
        let mut placed = ProtectionResult::default();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(timeout, adapter.place_protection(handle, &request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProtectionError::from(ExchangeError::timeout(format!(
                    "no response within {}ms",
                    timeout.as_millis()
                )))),
            };

            let err = match outcome {
                Ok(result) => {
                    placed.merge(result);
                    return (placed, None);
                }
                Err(err) => err,
            };

            placed.merge(err.placed.clone());
            request = request.remaining(&placed);
            if request.is_empty() {
                return (placed, None);
            }
            if !err.source.is_transient() || attempt >= policy.attempts() {
                return (placed, Some(err.source.to_string()));
            }

            let delay = policy.delay_for(attempt);
            warn!(
                "[RETRY] {} protection {}: attempt {attempt}/{} failed ({}), retrying in {}ms",
                adapter.exchange(),
                spec.key,
                policy.attempts(),
                err.source,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn failed(&self, execution: ExecutionTarget, err: &ExchangeError, attempts: u32) -> ExecutionResult {
        let outcome = if err.is_auth() {
            if let Err(directory_err) = self.directory.mark_auth_failed(execution.account_id) {
                warn!("[ORCHESTRATOR] {directory_err}");
            }
            ExecutionOutcome::AuthError
        } else if err.is_transient() {
            ExecutionOutcome::Timeout
        } else {
            ExecutionOutcome::EntryRejected
        };
        warn!(
            "[ORCHESTRATOR] {} {} {}: {err}",
            execution.account_id,
            execution.exchange,
            outcome.as_str()
        );
        ExecutionResult::failed(execution, outcome, err.to_string(), attempts, self.clock.now())
    }

    /// Record a terminal result and publish it
    async fn settle(&self, result: ExecutionResult) -> TargetEntry {
        let account_id = result.target.account_id;
        match self.ledger.record(&result).await {
            Ok(recorded) => {
                if let Some(record) = recorded.closed {
                    self.notifier.notify(EngineEvent::PositionClosed { record });
                }
            }
            Err(err) => error!("[ORCHESTRATOR] {} ledger write failed: {err}", result.target.key),
        }
        self.sync_open_positions(account_id);

        self.notifier.notify(EngineEvent::target_settled(result.clone()));
        TargetEntry::Executed(result)
    }

    fn sync_open_positions(&self, account_id: AccountId) {
        let count = self.ledger.open_count(account_id);
        if let Err(err) = self.directory.set_open_positions(account_id, count) {
            debug!("[ORCHESTRATOR] {err}");
        }
    }

    /// Exit an open position on the exchange and in the ledger
    ///
    /// Resting protection legs are cancelled first; a failed cancel is
    /// logged and does not stop the close.
    pub async fn close_position(
        &self,
        account_id: AccountId,
        symbol: &str,
        reason: CloseReason,
    ) -> Result<PnlRecord> {
        let key = PositionKey::new(account_id, symbol);
        let position = self
            .ledger
            .open_position(&key)
            .ok_or_else(|| Error::PositionNotFound(key.clone()))?;
        let adapter = self
            .directory
            .adapter(account_id)
            .ok_or(Error::UnknownAccount(account_id))?;
        let exchange = self.settings.for_exchange(position.exchange);
        let timeout = exchange.call_timeout();

        self.cancel_legs(adapter.as_ref(), &position, None, timeout).await;

        let close_key = position
            .entry_keys
            .last()
            .cloned()
            .ok_or_else(|| Error::PositionNotFound(key.clone()))?;
        let request = CloseRequest {
            key: close_key,
            symbol: position.symbol.clone(),
            side: position.side,
            quantity: position.quantity,
        };
        let label = format!("{} close {}", position.exchange, request.client_order_id());
        let fill = exchange
            .retry
            .run(&label, timeout, || adapter.close_position(&request))
            .await
            .result?;

        self.book_close(&key, &fill, reason).await
    }

    /// Close the ledger entry of a position whose stop-loss or take-profit
    /// the exchange reports as executed
    ///
    /// `Ok(None)` while every placed leg is still resting. No exit order is
    /// sent; the leg's own fill is the exit.
    pub async fn settle_triggered_protection(&self, position: &Position) -> Result<Option<PnlRecord>> {
        let protection = position.protection();
        if protection.stop_loss_order_id.is_none() && protection.take_profit_order_id.is_none() {
            return Ok(None);
        }
        let adapter = self
            .directory
            .adapter(position.account_id)
            .ok_or(Error::UnknownAccount(position.account_id))?;
        let timeout = self.settings.for_exchange(position.exchange).call_timeout();

        let queried = tokio::time::timeout(timeout, adapter.query_protection(&position.symbol, &protection))
            .await
            .map_err(|_| {
                ExchangeError::timeout(format!("no response within {}ms", timeout.as_millis()))
            })?;
        let Some(triggered) = queried? else {
            return Ok(None);
        };

        let key = position.key();
        info!(
            "[ORCHESTRATOR] {key} {:?} executed on {} @ {}",
            triggered.leg, position.exchange, triggered.fill.price
        );
        self.cancel_legs(adapter.as_ref(), position, Some(&triggered.fill.order_id), timeout)
            .await;
        self.book_close(&key, &triggered.fill, triggered.close_reason())
            .await
            .map(Some)
    }

    /// Cancel the resting protection legs of `position`, except `keep`
    async fn cancel_legs(
        &self,
        adapter: &dyn ExchangeAdapter,
        position: &Position,
        keep: Option<&str>,
        timeout: Duration,
    ) {
        let key = position.key();
        let legs = [&position.stop_loss_order_id, &position.take_profit_order_id];
        for order_id in legs.into_iter().flatten() {
            if keep == Some(order_id.as_str()) {
                continue;
            }
            match tokio::time::timeout(timeout, adapter.cancel_order(&position.symbol, order_id)).await {
                Ok(Ok(())) => debug!("[ORCHESTRATOR] {key} cancelled leg {order_id}"),
                Ok(Err(err)) => warn!("[ORCHESTRATOR] {key} cancel {order_id} failed: {err}"),
                Err(_) => warn!("[ORCHESTRATOR] {key} cancel {order_id} timed out"),
            }
        }
    }

    /// Record an exit fill in the ledger and publish the close
    async fn book_close(&self, key: &PositionKey, fill: &Fill, reason: CloseReason) -> Result<PnlRecord> {
        let record = self
            .ledger
            .close(key, fill.price, fill.fee, reason, self.clock.now())
            .await?;
        self.sync_open_positions(key.account_id);
        info!(
            "[ORCHESTRATOR] {key} closed ({reason}) @ {}: realized {}",
            record.exit_price, record.realized_pnl
        );
        self.notifier.notify(EngineEvent::PositionClosed {
            record: record.clone(),
        });
        Ok(record)
    }

    /// Operator cancellation: no further targets are dispatched; fills that
    /// land afterwards are closed
    pub fn cancel(&self, signal_id: SignalId) -> Result<()> {
        self.book.cancel(signal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_core::{ExchangeAccount, Side};
    use rust_decimal_macros::dec;

    fn report(account: &ExchangeAccount, entry: TargetEntry) -> TargetReport {
        TargetReport {
            account_id: account.id,
            user_id: account.user_id,
            exchange: account.exchange,
            entry,
        }
    }

    fn executed(account: &ExchangeAccount, outcome: ExecutionOutcome) -> TargetEntry {
        let signal = Signal::new(
            SignalId(1),
            "BTCUSDT",
            Side::Long,
            dec!(35000),
            dec!(34000),
            dec!(37000),
            10,
            dec!(5),
            chrono::Utc::now(),
        );
        let mut result = ExecutionResult::failed(
            ExecutionTarget::new(&signal, account),
            ExecutionOutcome::Timeout,
            "",
            1,
            chrono::Utc::now(),
        );
        result.outcome = outcome;
        TargetEntry::Executed(result)
    }

    #[test]
    fn test_aggregate_status() {
        let a = ExchangeAccount::new(1, ExchangeId::Binance);
        let b = ExchangeAccount::new(2, ExchangeId::Bybit);
        let filled = report(&a, executed(&a, ExecutionOutcome::EntryFilled));
        let partial = report(&a, executed(&a, ExecutionOutcome::ProtectionPartial));
        let auth = report(&b, executed(&b, ExecutionOutcome::AuthError));
        let rejected = report(
            &b,
            TargetEntry::RiskRejected(RiskRejection::DailyLimit { trades: 10, limit: 10 }),
        );

        assert_eq!(aggregate_status(&[filled.clone()]), SignalStatus::Completed);
        assert_eq!(aggregate_status(&[filled.clone(), auth.clone()]), SignalStatus::Partial);
        assert_eq!(aggregate_status(&[filled.clone(), rejected.clone()]), SignalStatus::Partial);
        assert_eq!(aggregate_status(&[filled, partial.clone()]), SignalStatus::Partial);
        assert_eq!(aggregate_status(&[partial.clone()]), SignalStatus::Partial);
        assert_eq!(aggregate_status(&[auth, rejected]), SignalStatus::Failed);
        assert_eq!(aggregate_status(&[]), SignalStatus::Failed);
        assert!(partial.needs_attention());
    }

    #[test]
    fn test_labels() {
        let a = ExchangeAccount::new(1, ExchangeId::Okx);
        assert_eq!(report(&a, executed(&a, ExecutionOutcome::Timeout)).label(), "TIMEOUT");
        assert_eq!(
            report(&a, TargetEntry::Skipped("signal cancelled".into())).label(),
            "SKIPPED (signal cancelled)"
        );
        let rejected = report(
            &a,
            TargetEntry::RiskRejected(RiskRejection::TooManyPositions { open: 5, limit: 5 }),
        );
        assert_eq!(rejected.label(), "RISK_REJECTED (TOO_MANY_POSITIONS)");
    }

    #[tokio::test]
    async fn test_unknown_signal() {
        let clock = copytrade_clock::ManualClock::new();
        let (notifier, _rx) = crate::events::ChannelNotifier::new(8);
        let orchestrator = Orchestrator::new(
            ExecutionSettings::default(),
            Arc::new(RiskGatekeeper::new(Default::default())),
            Arc::new(AccountDirectory::new()),
            Arc::new(Ledger::new(Arc::new(crate::store::InMemoryLedgerStore::new()))),
            Arc::new(SignalBook::new()),
            Arc::new(notifier),
            clock,
        );
        let err = orchestrator.distribute(SignalId(42)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownSignal(SignalId(42))));
    }
}
