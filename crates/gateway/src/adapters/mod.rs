//! Exchange adapters
//!
//! One [`ExchangeAdapter`] implementation per venue. Each adapter owns the
//! credentials of a single account and translates the engine's normalized
//! order model into the venue's REST API:
//!
//! | Venue   | Symbol          | Client id field     | Signature          |
//! |---------|-----------------|---------------------|--------------------|
//! | Binance | `BTCUSDT`       | `newClientOrderId`  | hex, query string  |
//! | Bybit   | `BTCUSDT`       | `orderLinkId`       | hex, headers       |
//! | OKX     | `BTC-USDT-SWAP` | `clOrdId`           | base64, passphrase |
//! | Bitget  | `BTCUSDT`       | `clientOid`         | base64, passphrase |
//! | MEXC    | `BTC_USDT`      | `externalOid`       | hex, headers       |

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod mexc;
pub mod okx;
pub mod paper;

pub use binance::BinanceAdapter;
pub use bitget::BitgetAdapter;
pub use bybit::BybitAdapter;
pub use mexc::MexcAdapter;
pub use okx::OkxAdapter;
pub use paper::{PaperExchange, PaperFault, PaperOp};

use crate::auth::Credentials;
use crate::error::GatewayError;
use crate::transport::{RestResponse, RestTransport, http::HttpTransport};
use copytrade_core::{
    ExchangeId, Fill, OrderHandle, OrderLeg, OrderSpec, Price, ProtectionRequest, ProtectionResult,
    Side, TriggeredLeg,
};
use copytrade_ports::{
    Clock, ExchangeAdapter, ExchangeError, ExchangeErrorKind, ExchangeResult, ProtectionError,
};
use log::warn;
use rust_decimal::Decimal;
use std::str::FromStr;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Per-venue connection options
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Override the venue's production REST URL (testnet, proxy)
    pub base_url: Option<String>,
    /// Signature validity window, for venues that support one
    pub recv_window_ms: u64,
    /// HTTP client timeout
    pub request_timeout: Duration,
    /// Used to estimate fees when the venue does not report them
    pub taker_fee_rate: Decimal,
    /// Base units per contract, keyed by signal symbol (OKX, MEXC)
    pub contract_sizes: HashMap<String, Decimal>,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            recv_window_ms: 5000,
            request_timeout: Duration::from_secs(10),
            taker_fee_rate: Decimal::new(5, 4),
            contract_sizes: HashMap::new(),
        }
    }
}

impl AdapterOptions {
    pub fn contract_size(&self, symbol: &str) -> Decimal {
        self.contract_sizes
            .get(symbol)
            .copied()
            .filter(|size| *size > Decimal::ZERO)
            .unwrap_or(Decimal::ONE)
    }

    pub fn estimate_fee(&self, quantity: Decimal, price: Decimal) -> Decimal {
        quantity * price * self.taker_fee_rate
    }
}

/// Production REST endpoint for a venue
pub fn default_base_url(exchange: ExchangeId) -> &'static str {
    match exchange {
        ExchangeId::Binance => "https://fapi.binance.com",
        ExchangeId::Bybit => "https://api.bybit.com",
        ExchangeId::Okx => "https://www.okx.com",
        ExchangeId::Bitget => "https://api.bitget.com",
        ExchangeId::Mexc => "https://contract.mexc.com",
        ExchangeId::Paper => "",
    }
}

/// Build the adapter for one account over HTTPS
pub fn connect(
    exchange: ExchangeId,
    credentials: Credentials,
    options: AdapterOptions,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn ExchangeAdapter>, GatewayError> {
    if exchange == ExchangeId::Paper {
        return Ok(Arc::new(PaperExchange::new(exchange, Decimal::ZERO)));
    }
    if credentials.is_empty() {
        return Err(GatewayError::MissingCredentials(exchange));
    }
    if exchange.requires_passphrase() && credentials.passphrase().is_empty() {
        return Err(GatewayError::MissingPassphrase(exchange));
    }

    let base_url = options
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(exchange).to_string());
    let transport = Arc::new(HttpTransport::new(base_url, options.request_timeout)?);
    Ok(connect_with_transport(
        exchange,
        credentials,
        options,
        transport,
        clock,
    ))
}

/// Build the adapter for one account over a caller-supplied transport
pub fn connect_with_transport(
    exchange: ExchangeId,
    credentials: Credentials,
    options: AdapterOptions,
    transport: Arc<dyn RestTransport>,
    clock: Arc<dyn Clock>,
) -> Arc<dyn ExchangeAdapter> {
    match exchange {
        ExchangeId::Binance => Arc::new(BinanceAdapter::new(credentials, options, transport, clock)),
        ExchangeId::Bybit => Arc::new(BybitAdapter::new(credentials, options, transport, clock)),
        ExchangeId::Okx => Arc::new(OkxAdapter::new(credentials, options, transport, clock)),
        ExchangeId::Bitget => Arc::new(BitgetAdapter::new(credentials, options, transport, clock)),
        ExchangeId::Mexc => Arc::new(MexcAdapter::new(credentials, options, transport, clock)),
        ExchangeId::Paper => Arc::new(PaperExchange::new(exchange, Decimal::ZERO)),
    }
}

// ---------------------------------------------------------------------------
// Response helpers shared by the venue adapters
// ---------------------------------------------------------------------------

/// Decimal rendered without trailing zeros, as venues expect
pub(crate) fn fmt_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Read a decimal that may be sent as a JSON string or number
pub(crate) fn decimal_at(value: &Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Read an identifier that may be sent as a JSON string or number
pub(crate) fn string_at(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Map a bare HTTP status when the body carries no venue error code
pub(crate) fn status_error(response: &RestResponse) -> ExchangeError {
    let kind = match response.status {
        401 | 403 => ExchangeErrorKind::Auth,
        418 | 429 => ExchangeErrorKind::RateLimited,
        500..=599 => ExchangeErrorKind::Network,
        _ => ExchangeErrorKind::Unknown,
    };
    let mut detail = response.body.clone();
    detail.truncate(200);
    ExchangeError::new(kind, format!("HTTP {}: {}", response.status, detail)).with_code(response.status)
}

/// Parse the body as JSON, falling back to the HTTP status on garbage
pub(crate) fn parse_body(response: &RestResponse) -> Result<Value, ExchangeError> {
    serde_json::from_str(&response.body).map_err(|_| status_error(response))
}

/// Whether a trigger order for `leg` fires on a rising price
pub(crate) fn triggers_on_rise(side: Side, leg: OrderLeg) -> bool {
    matches!(
        (side, leg),
        (Side::Long, OrderLeg::TakeProfit) | (Side::Short, OrderLeg::StopLoss)
    )
}

/// Resolve the fill of a just-accepted market entry
///
/// Venues that only acknowledge an order id are queried for the fill; if the
/// lookup fails the order is still reported as accepted for its full
/// quantity so protection goes on, priced later from the signal entry.
pub(crate) fn accepted_entry(
    exchange: ExchangeId,
    spec: &OrderSpec,
    exchange_order_id: String,
    fill: ExchangeResult<OrderHandle>,
) -> OrderHandle {
    match fill {
        Ok(handle) if !handle.filled_quantity.is_zero() => handle,
        Ok(_) | Err(_) => {
            warn!(
                "[{}] fill lookup for {} unavailable, assuming full fill",
                exchange.as_str().to_ascii_uppercase(),
                spec.client_order_id()
            );
            OrderHandle {
                exchange,
                symbol: spec.symbol.clone(),
                side: spec.side,
                exchange_order_id,
                client_order_id: spec.client_order_id(),
                filled_quantity: spec.quantity,
                avg_price: None,
                fee: Decimal::ZERO,
            }
        }
    }
}

/// Place each requested protection leg in turn, stop-loss first
///
/// Stops at the first failing leg and reports the legs already accepted.
pub(crate) async fn place_legs<F, Fut>(
    request: &ProtectionRequest,
    mut place: F,
) -> Result<ProtectionResult, ProtectionError>
where
    F: FnMut(OrderLeg, Price) -> Fut,
    Fut: Future<Output = ExchangeResult<String>>,
{
    let mut placed = ProtectionResult::default();

    if let Some(stop_loss) = request.stop_loss {
        match place(OrderLeg::StopLoss, stop_loss).await {
            Ok(order_id) => placed.stop_loss_order_id = Some(order_id),
            Err(err) => return Err(ProtectionError::new(placed, err)),
        }
    }
    if let Some(take_profit) = request.take_profit {
        match place(OrderLeg::TakeProfit, take_profit).await {
            Ok(order_id) => placed.take_profit_order_id = Some(order_id),
            Err(err) => return Err(ProtectionError::new(placed, err)),
        }
    }

    Ok(placed)
}

/// Look up each placed protection leg, stop-loss first, and report the
/// first one the venue has executed
pub(crate) async fn first_triggered<F, Fut>(
    protection: &ProtectionResult,
    mut query: F,
) -> ExchangeResult<Option<TriggeredLeg>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ExchangeResult<Option<Fill>>>,
{
    let legs = [
        (OrderLeg::StopLoss, &protection.stop_loss_order_id),
        (OrderLeg::TakeProfit, &protection.take_profit_order_id),
    ];
    for (leg, order_id) in legs {
        let Some(order_id) = order_id else {
            continue;
        };
        if let Some(fill) = query(order_id.clone()).await? {
            return Ok(Some(TriggeredLeg { leg, fill }));
        }
    }
    Ok(None)
}

pub(crate) fn missing_field(venue: &str, field: &str) -> ExchangeError {
    ExchangeError::new(
        ExchangeErrorKind::Unknown,
        format!("{venue} response missing {field}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use copytrade_clock::SystemClock;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_and_string_fields() {
        let v = json!({"a": "35000.5", "b": 12, "c": "", "d": 12345678901u64});
        assert_eq!(decimal_at(&v, "a"), Some(dec!(35000.5)));
        assert_eq!(decimal_at(&v, "b"), Some(dec!(12)));
        assert_eq!(decimal_at(&v, "c"), None);
        assert_eq!(string_at(&v, "d").as_deref(), Some("12345678901"));
        assert_eq!(fmt_decimal(dec!(0.0100)), "0.01");
    }

    #[test]
    fn test_status_fallback() {
        let err = status_error(&RestResponse::new(429, "Too many requests"));
        assert_eq!(err.kind, ExchangeErrorKind::RateLimited);
        assert_eq!(status_error(&RestResponse::new(401, "")).kind, ExchangeErrorKind::Auth);
        assert!(status_error(&RestResponse::new(502, "bad gateway")).is_transient());
    }

    #[test]
    fn test_connect_checks_credentials() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let missing = connect(
            ExchangeId::Binance,
            Credentials::new("", ""),
            AdapterOptions::default(),
            clock.clone(),
        );
        assert!(matches!(missing, Err(GatewayError::MissingCredentials(_))));

        let no_pass = connect(
            ExchangeId::Okx,
            Credentials::new("k", "s"),
            AdapterOptions::default(),
            clock.clone(),
        );
        assert!(matches!(no_pass, Err(GatewayError::MissingPassphrase(_))));

        let adapter = connect(
            ExchangeId::Bitget,
            Credentials::new("k", "s").with_passphrase("p"),
            AdapterOptions::default(),
            clock,
        )
        .unwrap();
        assert_eq!(adapter.exchange(), ExchangeId::Bitget);
    }

    #[test]
    fn test_contract_size_defaults_to_one() {
        let mut options = AdapterOptions::default();
        options.contract_sizes.insert("BTCUSDT".into(), dec!(0.01));
        assert_eq!(options.contract_size("BTCUSDT"), dec!(0.01));
        assert_eq!(options.contract_size("ETHUSDT"), Decimal::ONE);
        assert_eq!(options.estimate_fee(dec!(1), dec!(1000)), dec!(0.5));
    }
}
