use async_trait::async_trait;
use copytrade_core::{
    CloseRequest, ExchangeId, Fill, OrderHandle, OrderSpec, ProtectionRequest, ProtectionResult,
    TriggeredLeg,
};
use rust_decimal::Decimal;

use crate::error::{ExchangeResult, ProtectionError};

/// Port for order execution on one exchange account
///
/// One implementation per exchange, bound to one account's credentials at
/// setup time. Every order-creating call carries a client order id derived
/// from the execution's idempotency key, so repeating a call after a timeout
/// resolves to the same exchange order instead of opening a second one.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Which exchange this adapter talks to
    fn exchange(&self) -> ExchangeId;

    /// Set leverage (where required) and submit the market entry order
    async fn place_entry_order(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle>;

    /// Place the requested stop-loss / take-profit legs for a filled entry
    ///
    /// Legs set to `None` in the request are left alone.
    async fn place_protection(
        &self,
        handle: &OrderHandle,
        request: &ProtectionRequest,
    ) -> Result<ProtectionResult, ProtectionError>;

    /// Cancel a resting order by exchange order id
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()>;

    /// Available balance in the quote currency
    async fn get_balance(&self) -> ExchangeResult<Decimal>;

    /// Reduce-only market exit
    async fn close_position(&self, request: &CloseRequest) -> ExchangeResult<Fill>;

    /// Report the first protection leg of `protection` that has executed
    ///
    /// `Ok(None)` while every placed leg is still resting.
    async fn query_protection(
        &self,
        symbol: &str,
        protection: &ProtectionResult,
    ) -> ExchangeResult<Option<TriggeredLeg>>;

    /// Look up an order by the client order id it was submitted with
    async fn query_order(&self, symbol: &str, client_order_id: &str)
    -> ExchangeResult<OrderHandle>;
}
