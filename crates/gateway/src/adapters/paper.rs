//! In-process paper exchange
//!
//! Fills market orders immediately at the symbol's mark price (or the signal
//! entry price when no mark is set) and keeps protection legs as resting
//! orders. Moving the mark through a leg's trigger executes that leg at the
//! trigger price and releases the other legs on the symbol. Every operation can be scripted to fail, lose its acknowledgement
//! or take a given latency, which is how the orchestrator's retry, timeout
//! and isolation behaviour is exercised in tests.

use async_trait::async_trait;
use chrono::Utc;
use copytrade_core::{
    CloseRequest, ExchangeId, Fill, OrderHandle, OrderLeg, OrderSpec, Price, ProtectionRequest,
    ProtectionResult, Quantity, Side, Symbol, TriggeredLeg,
};
use copytrade_ports::{
    ExchangeAdapter, ExchangeError, ExchangeErrorKind, ExchangeResult, ProtectionError,
};
use dashmap::DashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{place_legs, triggers_on_rise};

/// Adapter operations that can be scripted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaperOp {
    Entry,
    StopLoss,
    TakeProfit,
    Cancel,
    Balance,
    Close,
    Query,
    QueryProtection,
}

/// Scripted outcome for one call
#[derive(Debug, Clone)]
pub enum PaperFault {
    /// Fail without side effects
    Reject(ExchangeError),
    /// Apply the operation, then report the error (lost acknowledgement)
    LostAck(ExchangeError),
}

#[derive(Debug, Clone)]
struct RestingOrder {
    client_order_id: String,
    symbol: Symbol,
    leg: OrderLeg,
    /// Side of the protected position
    side: Side,
    trigger: Price,
    quantity: Quantity,
}

impl RestingOrder {
    fn is_crossed(&self, mark: Price) -> bool {
        if triggers_on_rise(self.side, self.leg) {
            mark >= self.trigger
        } else {
            mark <= self.trigger
        }
    }
}

pub struct PaperExchange {
    exchange: ExchangeId,
    balance: RwLock<Decimal>,
    taker_fee_rate: Decimal,
    marks: DashMap<Symbol, Price>,
    /// Entry orders by client order id
    orders: DashMap<String, OrderHandle>,
    /// Close fills by client order id
    closes: DashMap<String, Fill>,
    /// Protection legs by exchange order id
    resting: DashMap<String, RestingOrder>,
    /// Executed protection legs by exchange order id
    triggered: DashMap<String, Fill>,
    scripted: Mutex<HashMap<PaperOp, VecDeque<PaperFault>>>,
    persistent: Mutex<HashMap<PaperOp, ExchangeError>>,
    latency: Mutex<HashMap<PaperOp, Duration>>,
    calls: DashMap<PaperOp, usize>,
    next_id: AtomicU64,
}

impl PaperExchange {
    /// `exchange` is the venue this paper account stands in for
    pub fn new(exchange: ExchangeId, balance: Decimal) -> Self {
        Self {
            exchange,
            balance: RwLock::new(balance),
            taker_fee_rate: Decimal::new(5, 4),
            marks: DashMap::new(),
            orders: DashMap::new(),
            closes: DashMap::new(),
            resting: DashMap::new(),
            triggered: DashMap::new(),
            scripted: Mutex::new(HashMap::new()),
            persistent: Mutex::new(HashMap::new()),
            latency: Mutex::new(HashMap::new()),
            calls: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_fee_rate(mut self, rate: Decimal) -> Self {
        self.taker_fee_rate = rate;
        self
    }

    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.write() = balance;
    }

    pub fn set_mark_price(&self, symbol: &str, price: Price) {
        self.marks.insert(symbol.to_string(), price);
        self.trigger_crossed(symbol, price);
    }

    pub fn set_latency(&self, op: PaperOp, latency: Duration) {
        self.latency.lock().insert(op, latency);
    }

    /// Queue a fault for the next call of `op`; faults are consumed in order
    pub fn fail_next(&self, op: PaperOp, fault: PaperFault) -> &Self {
        self.scripted.lock().entry(op).or_default().push_back(fault);
        self
    }

    /// Reject every call of `op` until cleared
    pub fn fail_always(&self, op: PaperOp, error: ExchangeError) -> &Self {
        self.persistent.lock().insert(op, error);
        self
    }

    pub fn clear_faults(&self) {
        self.scripted.lock().clear();
        self.persistent.lock().clear();
    }

    /// Number of calls made to `op`, including failed ones
    pub fn calls(&self, op: PaperOp) -> usize {
        self.calls.get(&op).map(|count| *count).unwrap_or(0)
    }

    pub fn order(&self, client_order_id: &str) -> Option<OrderHandle> {
        self.orders.get(client_order_id).map(|order| order.clone())
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn resting_orders(&self) -> usize {
        self.resting.len()
    }

    pub fn is_resting(&self, order_id: &str) -> bool {
        self.resting.contains_key(order_id)
    }

    pub fn is_triggered(&self, order_id: &str) -> bool {
        self.triggered.contains_key(order_id)
    }

    /// Execute the first resting leg on `symbol` that `mark` has reached
    fn trigger_crossed(&self, symbol: &str, mark: Price) {
        let fired = self
            .resting
            .iter()
            .find(|order| order.symbol == symbol && order.is_crossed(mark))
            .map(|order| (order.key().clone(), order.value().clone()));
        let Some((order_id, order)) = fired else {
            return;
        };

        let fill = Fill {
            order_id: order_id.clone(),
            price: order.trigger,
            quantity: order.quantity,
            fee: order.quantity * order.trigger * self.taker_fee_rate,
            timestamp: Utc::now(),
        };
        debug!(
            "[PAPER] {:?} {} {} triggered @ {}",
            order.leg, order.quantity, order.symbol, order.trigger
        );
        // The position is flat; its other legs go with it
        self.resting.retain(|_, resting| resting.symbol != symbol);
        self.triggered.insert(order_id, fill);
    }

    /// Count the call, apply its latency and pick its scripted fault
    async fn begin(&self, op: PaperOp) -> Option<PaperFault> {
        *self.calls.entry(op).or_default() += 1;

        let latency = self.latency.lock().get(&op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.persistent.lock().get(&op) {
            return Some(PaperFault::Reject(error.clone()));
        }
        self.scripted
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn fill_price(&self, symbol: &str, fallback: Option<Price>) -> ExchangeResult<Price> {
        self.marks
            .get(symbol)
            .map(|mark| *mark)
            .or(fallback)
            .ok_or_else(|| {
                ExchangeError::new(
                    ExchangeErrorKind::SymbolUnavailable,
                    format!("no price for {symbol}"),
                )
            })
    }

    fn fill_entry(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let client_order_id = spec.client_order_id();
        if let Some(existing) = self.orders.get(&client_order_id) {
            return Ok(existing.clone());
        }

        let price = self.fill_price(&spec.symbol, Some(spec.reference_price))?;
        let margin = spec.quantity * price / Decimal::from(spec.leverage.max(1));
        let available = *self.balance.read();
        if margin > available {
            return Err(ExchangeError::new(
                ExchangeErrorKind::InsufficientMargin,
                format!("margin {margin} exceeds available {available}"),
            ));
        }

        let handle = OrderHandle {
            exchange: self.exchange,
            symbol: spec.symbol.clone(),
            side: spec.side,
            exchange_order_id: self.next_order_id(),
            client_order_id: client_order_id.clone(),
            filled_quantity: spec.quantity,
            avg_price: Some(price),
            fee: spec.quantity * price * self.taker_fee_rate,
        };
        debug!(
            "[PAPER] {} {} {} @ {price}",
            handle.side, handle.filled_quantity, handle.symbol
        );
        self.orders.insert(client_order_id, handle.clone());
        Ok(handle)
    }

    fn rest(&self, request: &ProtectionRequest, leg: OrderLeg, trigger: Price) -> String {
        let client_order_id = request.key.client_order_id(leg);
        if let Some(existing) = self
            .resting
            .iter()
            .find(|order| order.client_order_id == client_order_id)
        {
            return existing.key().clone();
        }

        let order_id = self.next_order_id();
        self.resting.insert(
            order_id.clone(),
            RestingOrder {
                client_order_id,
                symbol: request.symbol.clone(),
                leg,
                side: request.side,
                trigger,
                quantity: request.quantity,
            },
        );
        order_id
    }

    fn fill_close(&self, request: &CloseRequest) -> ExchangeResult<Fill> {
        let client_order_id = request.client_order_id();
        if let Some(existing) = self.closes.get(&client_order_id) {
            return Ok(existing.clone());
        }

        let entry_price = self
            .orders
            .get(&request.key.client_order_id(OrderLeg::Entry))
            .and_then(|order| order.avg_price);
        let price = self.fill_price(&request.symbol, entry_price)?;
        let fill = Fill {
            order_id: self.next_order_id(),
            price,
            quantity: request.quantity,
            fee: request.quantity * price * self.taker_fee_rate,
            timestamp: Utc::now(),
        };

        // Closing the position releases its protection legs
        self.resting.retain(|_, order| order.symbol != request.symbol);
        self.closes.insert(client_order_id, fill.clone());
        Ok(fill)
    }
}

/// Apply a scripted fault around an operation
fn settle<T>(
    fault: Option<PaperFault>,
    apply: impl FnOnce() -> ExchangeResult<T>,
) -> ExchangeResult<T> {
    match fault {
        Some(PaperFault::Reject(error)) => Err(error),
        Some(PaperFault::LostAck(error)) => {
            apply()?;
            Err(error)
        }
        None => apply(),
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    async fn place_entry_order(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let fault = self.begin(PaperOp::Entry).await;
        settle(fault, || self.fill_entry(spec))
    }

    async fn place_protection(
        &self,
        _handle: &OrderHandle,
        request: &ProtectionRequest,
    ) -> Result<ProtectionResult, ProtectionError> {
        place_legs(request, |leg, trigger| async move {
            let op = match leg {
                OrderLeg::StopLoss => PaperOp::StopLoss,
                _ => PaperOp::TakeProfit,
            };
            let fault = self.begin(op).await;
            settle(fault, || Ok(self.rest(request, leg, trigger)))
        })
        .await
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let fault = self.begin(PaperOp::Cancel).await;
        settle(fault, || {
            self.resting.remove(order_id).map(|_| ()).ok_or_else(|| {
                ExchangeError::new(
                    ExchangeErrorKind::OrderNotFound,
                    format!("no resting order {order_id}"),
                )
            })
        })
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        let fault = self.begin(PaperOp::Balance).await;
        settle(fault, || Ok(*self.balance.read()))
    }

    async fn close_position(&self, request: &CloseRequest) -> ExchangeResult<Fill> {
        let fault = self.begin(PaperOp::Close).await;
        settle(fault, || self.fill_close(request))
    }

    async fn query_protection(
        &self,
        _symbol: &str,
        protection: &ProtectionResult,
    ) -> ExchangeResult<Option<TriggeredLeg>> {
        let fault = self.begin(PaperOp::QueryProtection).await;
        settle(fault, || {
            let legs = [
                (OrderLeg::StopLoss, &protection.stop_loss_order_id),
                (OrderLeg::TakeProfit, &protection.take_profit_order_id),
            ];
            Ok(legs.into_iter().find_map(|(leg, order_id)| {
                let fill = self.triggered.get(order_id.as_ref()?)?;
                Some(TriggeredLeg {
                    leg,
                    fill: fill.clone(),
                })
            }))
        })
    }

    async fn query_order(&self, _symbol: &str, client_order_id: &str) -> ExchangeResult<OrderHandle> {
        let fault = self.begin(PaperOp::Query).await;
        settle(fault, || {
            self.order(client_order_id).ok_or_else(|| {
                ExchangeError::new(
                    ExchangeErrorKind::OrderNotFound,
                    format!("no order {client_order_id}"),
                )
            })
        })
    }
}

impl std::fmt::Debug for PaperExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperExchange")
            .field("exchange", &self.exchange)
            .field("balance", &*self.balance.read())
            .field("orders", &self.orders.len())
            .field("resting", &self.resting.len())
            .finish()
    }
}
