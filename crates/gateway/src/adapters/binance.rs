//! Binance USDT-margined futures (`/fapi`)
//!
//! | Operation      | Method | Path                    |
//! |----------------|--------|-------------------------|
//! | Set leverage   | POST   | `/fapi/v1/leverage`     |
//! | Place order    | POST   | `/fapi/v1/order`        |
//! | Query order    | GET    | `/fapi/v1/order`        |
//! | Query SL / TP  | GET    | `/fapi/v1/order`        |
//! | Cancel order   | DELETE | `/fapi/v1/order`        |
//! | Balance        | GET    | `/fapi/v2/balance`      |
//!
//! Signed parameters travel in the query string, followed by
//! `&signature=<hex hmac>`; the API key goes in `X-MBX-APIKEY`.

use async_trait::async_trait;
use copytrade_core::{
    CloseRequest, ExchangeId, Fill, OrderHandle, OrderLeg, OrderSpec, Price, ProtectionRequest,
    ProtectionResult, Side, TriggeredLeg,
};
use copytrade_ports::{
    Clock, ExchangeAdapter, ExchangeError, ExchangeErrorKind, ExchangeResult, ProtectionError,
};
use log::{debug, info};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;

use super::{
    AdapterOptions, decimal_at, first_triggered, fmt_decimal, parse_body, place_legs, status_error,
    string_at,
};
use crate::auth::{Credentials, encode_query, sign_hex};
use crate::symbols::SymbolFormat;
use crate::transport::{Method, RestRequest, RestTransport};

const FORMAT: SymbolFormat = SymbolFormat::Concatenated;

pub struct BinanceAdapter {
    credentials: Credentials,
    options: AdapterOptions,
    transport: Arc<dyn RestTransport>,
    clock: Arc<dyn Clock>,
}

impl BinanceAdapter {
    pub fn new(
        credentials: Credentials,
        options: AdapterOptions,
        transport: Arc<dyn RestTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            options,
            transport,
            clock,
        }
    }

    fn signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<RestRequest> {
        params.push(("recvWindow", self.options.recv_window_ms.to_string()));
        params.push(("timestamp", self.clock.now_millis().to_string()));

        let query = encode_query(&params);
        let signature = sign_hex(&self.credentials.api_secret, &query)?;
        Ok(RestRequest::new(method, path)
            .with_query(format!("{query}&signature={signature}"))
            .with_header("X-MBX-APIKEY", self.credentials.api_key.as_str()))
    }

    async fn call(&self, request: RestRequest) -> ExchangeResult<Value> {
        let response = self.transport.send(request).await?;
        let body = parse_body(&response)?;
        if response.is_success() {
            return Ok(body);
        }

        // Error body: {"code": -2019, "msg": "Margin is insufficient."}
        match body.get("code").and_then(Value::as_i64) {
            Some(code) => {
                let msg = body.get("msg").and_then(Value::as_str).unwrap_or_default();
                Err(map_error(code, msg))
            }
            None => Err(status_error(&response)),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let request = self.signed(
            Method::Post,
            "/fapi/v1/leverage",
            vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())],
        )?;
        self.call(request).await?;
        debug!("[BINANCE] leverage {symbol} -> {leverage}x");
        Ok(())
    }

    async fn submit_entry(&self, symbol: &str, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let request = self.signed(
            Method::Post,
            "/fapi/v1/order",
            vec![
                ("symbol", symbol.to_string()),
                ("side", spec.order_side().as_str().to_ascii_uppercase()),
                ("type", "MARKET".to_string()),
                ("quantity", fmt_decimal(spec.quantity)),
                ("newClientOrderId", spec.client_order_id()),
                ("newOrderRespType", "RESULT".to_string()),
            ],
        )?;
        let body = self.call(request).await?;
        let mut handle = self.handle_from(&body, &spec.symbol)?;
        if handle.filled_quantity.is_zero() {
            handle.filled_quantity = spec.quantity;
        }
        Ok(handle)
    }

    async fn place_trigger(
        &self,
        symbol: &str,
        request: &ProtectionRequest,
        leg: OrderLeg,
        trigger: Price,
    ) -> ExchangeResult<String> {
        let order_type = match leg {
            OrderLeg::StopLoss => "STOP_MARKET",
            _ => "TAKE_PROFIT_MARKET",
        };
        let client_id = request.key.client_order_id(leg);
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", request.side.exit_order_side().as_str().to_ascii_uppercase()),
            ("type", order_type.to_string()),
            ("stopPrice", fmt_decimal(trigger)),
            ("closePosition", "true".to_string()),
            ("workingType", "MARK_PRICE".to_string()),
            ("newClientOrderId", client_id.clone()),
        ];

        match self.call(self.signed(Method::Post, "/fapi/v1/order", params)?).await {
            Ok(body) => string_at(&body, "orderId").ok_or_else(|| super::missing_field("binance", "orderId")),
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[BINANCE] {client_id} already placed, recovering");
                Ok(self.query_order(&request.symbol, &client_id).await?.exchange_order_id)
            }
            Err(err) => Err(err),
        }
    }

    /// Fill of a stop / take-profit order, once its status is `FILLED`
    async fn leg_fill(&self, symbol: &str, order_id: &str) -> ExchangeResult<Option<Fill>> {
        let request = self.signed(
            Method::Get,
            "/fapi/v1/order",
            vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
        )?;
        let body = self.call(request).await?;
        if body.get("status").and_then(Value::as_str) != Some("FILLED") {
            return Ok(None);
        }

        let price = decimal_at(&body, "avgPrice")
            .filter(|p| *p > Decimal::ZERO)
            .or_else(|| decimal_at(&body, "stopPrice"))
            .ok_or_else(|| super::missing_field("binance", "avgPrice"))?;
        let quantity = decimal_at(&body, "executedQty").unwrap_or_default();
        Ok(Some(Fill {
            order_id: order_id.to_string(),
            price,
            quantity,
            fee: self.options.estimate_fee(quantity, price),
            timestamp: self.clock.now(),
        }))
    }

    fn handle_from(&self, body: &Value, symbol: &str) -> ExchangeResult<OrderHandle> {
        let exchange_order_id =
            string_at(body, "orderId").ok_or_else(|| super::missing_field("binance", "orderId"))?;
        let filled_quantity = decimal_at(body, "executedQty").unwrap_or_default();
        let avg_price = decimal_at(body, "avgPrice").filter(|p| *p > Decimal::ZERO);
        let side = match body.get("side").and_then(Value::as_str) {
            Some("SELL") => Side::Short,
            _ => Side::Long,
        };
        let fee = avg_price
            .map(|price| self.options.estimate_fee(filled_quantity, price))
            .unwrap_or_default();

        Ok(OrderHandle {
            exchange: ExchangeId::Binance,
            symbol: symbol.to_string(),
            side,
            exchange_order_id,
            client_order_id: string_at(body, "clientOrderId").unwrap_or_default(),
            filled_quantity,
            avg_price,
            fee,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Binance
    }

    async fn place_entry_order(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let symbol = FORMAT.to_venue(&spec.symbol)?;
        self.set_leverage(&symbol, spec.leverage).await?;

        match self.submit_entry(&symbol, spec).await {
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[BINANCE] entry {} already placed, recovering", spec.client_order_id());
                self.query_order(&spec.symbol, &spec.client_order_id()).await
            }
            other => other,
        }
    }

    async fn place_protection(
        &self,
        _handle: &OrderHandle,
        request: &ProtectionRequest,
    ) -> Result<ProtectionResult, ProtectionError> {
        let symbol = FORMAT.to_venue(&request.symbol)?;
        place_legs(request, |leg, trigger| {
            let symbol = symbol.clone();
            async move { self.place_trigger(&symbol, request, leg, trigger).await }
        })
        .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let request = self.signed(
            Method::Delete,
            "/fapi/v1/order",
            vec![("symbol", FORMAT.to_venue(symbol)?), ("orderId", order_id.to_string())],
        )?;
        self.call(request).await?;
        Ok(())
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        let body = self
            .call(self.signed(Method::Get, "/fapi/v2/balance", Vec::new())?)
            .await?;

        body.as_array()
            .and_then(|assets| {
                assets
                    .iter()
                    .find(|a| a.get("asset").and_then(Value::as_str) == Some("USDT"))
            })
            .and_then(|usdt| decimal_at(usdt, "availableBalance"))
            .ok_or_else(|| super::missing_field("binance", "USDT availableBalance"))
    }

    async fn close_position(&self, request: &CloseRequest) -> ExchangeResult<Fill> {
        let symbol = FORMAT.to_venue(&request.symbol)?;
        let params = vec![
            ("symbol", symbol),
            ("side", request.side.exit_order_side().as_str().to_ascii_uppercase()),
            ("type", "MARKET".to_string()),
            ("quantity", fmt_decimal(request.quantity)),
            ("reduceOnly", "true".to_string()),
            ("newClientOrderId", request.client_order_id()),
            ("newOrderRespType", "RESULT".to_string()),
        ];

        let handle = match self.call(self.signed(Method::Post, "/fapi/v1/order", params)?).await {
            Ok(body) => self.handle_from(&body, &request.symbol)?,
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                self.query_order(&request.symbol, &request.client_order_id()).await?
            }
            Err(err) => return Err(err),
        };

        let price = handle
            .avg_price
            .ok_or_else(|| super::missing_field("binance", "avgPrice"))?;
        Ok(Fill {
            order_id: handle.exchange_order_id,
            price,
            quantity: handle.filled_quantity,
            fee: handle.fee,
            timestamp: self.clock.now(),
        })
    }

    async fn query_protection(
        &self,
        symbol: &str,
        protection: &ProtectionResult,
    ) -> ExchangeResult<Option<TriggeredLeg>> {
        let symbol = FORMAT.to_venue(symbol)?;
        first_triggered(protection, |order_id| {
            let symbol = symbol.clone();
            async move { self.leg_fill(&symbol, &order_id).await }
        })
        .await
    }

    async fn query_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<OrderHandle> {
        let request = self.signed(
            Method::Get,
            "/fapi/v1/order",
            vec![
                ("symbol", FORMAT.to_venue(symbol)?),
                ("origClientOrderId", client_order_id.to_string()),
            ],
        )?;
        let body = self.call(request).await?;
        self.handle_from(&body, symbol)
    }
}

/// Map a Binance error code into the shared taxonomy
pub fn map_error(code: i64, msg: &str) -> ExchangeError {
    let kind = match code {
        -1002 | -1022 | -2014 | -2015 => ExchangeErrorKind::Auth,
        -1003 | -1015 => ExchangeErrorKind::RateLimited,
        -1007 => ExchangeErrorKind::Timeout,
        -1001 => ExchangeErrorKind::Network,
        -2018 | -2019 | -2027 | -2028 => ExchangeErrorKind::InsufficientMargin,
        -1121 | -4140 => ExchangeErrorKind::SymbolUnavailable,
        -4116 => ExchangeErrorKind::DuplicateOrder,
        -2011 | -2013 => ExchangeErrorKind::OrderNotFound,
        -1013 | -1111 | -2010 | -2020 | -2021 | -2022 | -4003 | -4164 => {
            ExchangeErrorKind::OrderRejected
        }
        _ => ExchangeErrorKind::Unknown,
    };
    ExchangeError::new(kind, msg).with_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use copytrade_clock::ManualClock;
    use copytrade_core::{IdempotencyKey, SignalId};
    use rust_decimal_macros::dec;

    fn adapter(transport: Arc<ScriptedTransport>) -> BinanceAdapter {
        BinanceAdapter::new(
            Credentials::new("key", "secret"),
            AdapterOptions::default(),
            transport,
            ManualClock::new(),
        )
    }

    fn spec() -> OrderSpec {
        OrderSpec {
            key: IdempotencyKey::derive(SignalId(1), uuid_nil()),
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            quantity: dec!(0.014),
            leverage: 10,
            reference_price: dec!(35000),
            stop_loss: dec!(34000),
            take_profit: dec!(37000),
            size_percent: dec!(5),
        }
    }

    fn uuid_nil() -> copytrade_core::AccountId {
        copytrade_core::AccountId::nil()
    }

    #[tokio::test]
    async fn test_entry_sets_leverage_and_signs() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"symbol":"BTCUSDT","leverage":10}"#)
            .push(
                200,
                r#"{"orderId":28,"clientOrderId":"x","side":"BUY","executedQty":"0.014","avgPrice":"35010.0","status":"FILLED"}"#,
            );

        let handle = adapter(transport.clone()).place_entry_order(&spec()).await.unwrap();
        assert_eq!(handle.exchange_order_id, "28");
        assert_eq!(handle.avg_price, Some(dec!(35010)));
        assert_eq!(handle.filled_quantity, dec!(0.014));

        let requests = transport.requests();
        assert_eq!(requests[0].path, "/fapi/v1/leverage");
        let order = &requests[1];
        assert_eq!(order.header("X-MBX-APIKEY"), Some("key"));
        assert!(order.query.contains("side=BUY"));
        assert!(order.query.contains(&format!("newClientOrderId={}", spec().client_order_id())));

        // Signature covers everything before it
        let (payload, signature) = order.query.split_once("&signature=").unwrap();
        assert_eq!(signature, sign_hex("secret", payload).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_entry_recovers_existing_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"leverage":10}"#)
            .push(400, r#"{"code":-4116,"msg":"ClientOrderId is duplicated."}"#)
            .push(
                200,
                r#"{"orderId":77,"side":"BUY","executedQty":"0.014","avgPrice":"35000"}"#,
            );

        let handle = adapter(transport.clone()).place_entry_order(&spec()).await.unwrap();
        assert_eq!(handle.exchange_order_id, "77");
        assert!(transport.requests()[2].query.contains("origClientOrderId="));
    }

    #[tokio::test]
    async fn test_error_codes_are_normalized() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"leverage":10}"#)
            .push(400, r#"{"code":-2019,"msg":"Margin is insufficient."}"#);

        let err = adapter(transport).place_entry_order(&spec()).await.unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::InsufficientMargin);
        assert!(!err.is_transient());

        assert_eq!(map_error(-2015, "").kind, ExchangeErrorKind::Auth);
        assert!(map_error(-1003, "").is_transient());
    }

    #[tokio::test]
    async fn test_protection_reports_placed_legs_on_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"orderId":501}"#)
            .push(429, r#"{"code":-1003,"msg":"Too many requests"}"#);

        let adapter = adapter(transport.clone());
        let spec = spec();
        let handle = OrderHandle {
            exchange: ExchangeId::Binance,
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            exchange_order_id: "28".into(),
            client_order_id: spec.client_order_id(),
            filled_quantity: dec!(0.014),
            avg_price: Some(dec!(35000)),
            fee: Decimal::ZERO,
        };

        let err = adapter
            .place_protection(&handle, &spec.protection_request(dec!(0.014)))
            .await
            .unwrap_err();
        assert_eq!(err.placed.stop_loss_order_id.as_deref(), Some("501"));
        assert_eq!(err.placed.take_profit_order_id, None);
        assert!(err.source.is_transient());

        let requests = transport.requests();
        assert!(requests[0].query.contains("type=STOP_MARKET"));
        assert!(requests[0].query.contains("side=SELL"));
        assert!(requests[1].query.contains("type=TAKE_PROFIT_MARKET"));
    }

    #[tokio::test]
    async fn test_executed_take_profit_is_reported() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"orderId":501,"status":"NEW","type":"STOP_MARKET","executedQty":"0"}"#)
            .push(
                200,
                r#"{"orderId":502,"status":"FILLED","type":"TAKE_PROFIT_MARKET","executedQty":"0.014","avgPrice":"37004.5"}"#,
            );

        let protection = ProtectionResult {
            stop_loss_order_id: Some("501".into()),
            take_profit_order_id: Some("502".into()),
        };
        let triggered = adapter(transport.clone())
            .query_protection("BTCUSDT", &protection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(triggered.leg, OrderLeg::TakeProfit);
        assert_eq!(triggered.fill.order_id, "502");
        assert_eq!(triggered.fill.price, dec!(37004.5));
        assert_eq!(triggered.fill.quantity, dec!(0.014));

        let requests = transport.requests();
        assert!(requests[0].query.contains("orderId=501"));
        assert!(requests[1].query.contains("orderId=502"));
    }

    #[tokio::test]
    async fn test_balance_reads_usdt() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            200,
            r#"[{"asset":"BNB","availableBalance":"1"},{"asset":"USDT","availableBalance":"1250.5"}]"#,
        );
        assert_eq!(adapter(transport).get_balance().await.unwrap(), dec!(1250.5));
    }
}
