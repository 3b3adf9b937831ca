//! Bybit v5 linear perpetuals
//!
//! Requests are signed with `hex(hmac(timestamp + api_key + recv_window + payload))`
//! where the payload is the query string (GET) or the JSON body (POST).
//! Responses share the envelope `{"retCode": 0, "retMsg": "OK", "result": {...}}`.

use async_trait::async_trait;
use copytrade_core::{
    CloseRequest, ExchangeId, Fill, OrderHandle, OrderLeg, OrderSide, OrderSpec, Price,
    ProtectionRequest, ProtectionResult, Side, TriggeredLeg,
};
use copytrade_ports::{
    Clock, ExchangeAdapter, ExchangeError, ExchangeErrorKind, ExchangeResult, ProtectionError,
};
use log::{debug, info};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::Arc;

use super::{
    AdapterOptions, accepted_entry, decimal_at, first_triggered, fmt_decimal, missing_field,
    parse_body, place_legs, status_error, string_at, triggers_on_rise,
};
use crate::auth::{Credentials, encode_query, sign_hex};
use crate::symbols::SymbolFormat;
use crate::transport::{RestRequest, RestTransport};

const FORMAT: SymbolFormat = SymbolFormat::Concatenated;
const CATEGORY: &str = "linear";
/// `leverage not modified`
const LEVERAGE_UNCHANGED: &str = "110043";

pub struct BybitAdapter {
    credentials: Credentials,
    options: AdapterOptions,
    transport: Arc<dyn RestTransport>,
    clock: Arc<dyn Clock>,
}

impl BybitAdapter {
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

    fn sign(&self, request: RestRequest, payload: &str) -> ExchangeResult<RestRequest> {
        let timestamp = self.clock.now_millis().to_string();
        let recv_window = self.options.recv_window_ms.to_string();
        let prehash = format!(
            "{timestamp}{}{recv_window}{payload}",
            self.credentials.api_key
        );
        let signature = sign_hex(&self.credentials.api_secret, &prehash)?;

        Ok(request
            .with_header("X-BAPI-API-KEY", self.credentials.api_key.as_str())
            .with_header("X-BAPI-TIMESTAMP", timestamp)
            .with_header("X-BAPI-RECV-WINDOW", recv_window)
            .with_header("X-BAPI-SIGN", signature))
    }

    fn get(&self, path: &str, params: &[(&str, String)]) -> ExchangeResult<RestRequest> {
        let query = encode_query(params);
        self.sign(RestRequest::get(path).with_query(query.clone()), &query)
    }

    fn post(&self, path: &str, body: Value) -> ExchangeResult<RestRequest> {
        let body = body.to_string();
        self.sign(RestRequest::post(path).with_body(body.clone()), &body)
    }

    async fn call(&self, request: RestRequest) -> ExchangeResult<Value> {
        let response = self.transport.send(request).await?;
        let body = parse_body(&response)?;

        match body.get("retCode").and_then(Value::as_i64) {
            Some(0) => Ok(body.get("result").cloned().unwrap_or(Value::Null)),
            Some(code) => {
                let msg = body.get("retMsg").and_then(Value::as_str).unwrap_or_default();
                Err(map_error(code, msg))
            }
            None => Err(status_error(&response)),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let request = self.post(
            "/v5/position/set-leverage",
            json!({
                "category": CATEGORY,
                "symbol": symbol,
                "buyLeverage": leverage.to_string(),
                "sellLeverage": leverage.to_string(),
            }),
        )?;
        match self.call(request).await {
            Ok(_) => Ok(()),
            Err(err) if err.code.as_deref() == Some(LEVERAGE_UNCHANGED) => Ok(()),
            Err(err) => Err(err),
        }?;
        debug!("[BYBIT] leverage {symbol} -> {leverage}x");
        Ok(())
    }

    /// Market order; returns the exchange order id
    async fn create_order(&self, body: Value) -> ExchangeResult<String> {
        let result = self.call(self.post("/v5/order/create", body)?).await?;
        string_at(&result, "orderId").ok_or_else(|| missing_field("bybit", "orderId"))
    }

    async fn place_trigger(
        &self,
        symbol: &str,
        request: &ProtectionRequest,
        leg: OrderLeg,
        trigger: Price,
    ) -> ExchangeResult<String> {
        let client_id = request.key.client_order_id(leg);
        let direction = if triggers_on_rise(request.side, leg) { 1 } else { 2 };
        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side_str(request.side.exit_order_side()),
            "orderType": "Market",
            "qty": fmt_decimal(request.quantity),
            "triggerPrice": fmt_decimal(trigger),
            "triggerDirection": direction,
            "triggerBy": "MarkPrice",
            "reduceOnly": true,
            "closeOnTrigger": true,
            "orderLinkId": client_id,
        });

        match self.create_order(body).await {
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[BYBIT] {client_id} already placed, recovering");
                Ok(self.query_order(&request.symbol, &client_id).await?.exchange_order_id)
            }
            other => other,
        }
    }

    /// Fill of a conditional order once the order history shows it `Filled`
    async fn leg_fill(&self, symbol: &str, order_id: &str) -> ExchangeResult<Option<Fill>> {
        let request = self.get(
            "/v5/order/history",
            &[
                ("category", CATEGORY.to_string()),
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
        )?;
        let result = self.call(request).await?;
        let Some(order) = result.get("list").and_then(|list| list.get(0)) else {
            return Ok(None);
        };
        if order.get("orderStatus").and_then(Value::as_str) != Some("Filled") {
            return Ok(None);
        }

        Ok(Some(Fill {
            order_id: order_id.to_string(),
            price: decimal_at(order, "avgPrice")
                .filter(|p| *p > Decimal::ZERO)
                .ok_or_else(|| missing_field("bybit", "avgPrice"))?,
            quantity: decimal_at(order, "cumExecQty").unwrap_or_default(),
            fee: decimal_at(order, "cumExecFee").unwrap_or_default(),
            timestamp: self.clock.now(),
        }))
    }

    fn handle_from(&self, order: &Value, symbol: &str) -> ExchangeResult<OrderHandle> {
        let side = match order.get("side").and_then(Value::as_str) {
            Some("Sell") => Side::Short,
            _ => Side::Long,
        };
        Ok(OrderHandle {
            exchange: ExchangeId::Bybit,
            symbol: symbol.to_string(),
            side,
            exchange_order_id: string_at(order, "orderId")
                .ok_or_else(|| missing_field("bybit", "orderId"))?,
            client_order_id: string_at(order, "orderLinkId").unwrap_or_default(),
            filled_quantity: decimal_at(order, "cumExecQty").unwrap_or_default(),
            avg_price: decimal_at(order, "avgPrice").filter(|p| *p > Decimal::ZERO),
            fee: decimal_at(order, "cumExecFee").unwrap_or_default(),
        })
    }
}

fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "Buy",
        OrderSide::Sell => "Sell",
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    async fn place_entry_order(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let symbol = FORMAT.to_venue(&spec.symbol)?;
        self.set_leverage(&symbol, spec.leverage).await?;

        let body = json!({
            "category": CATEGORY,
            "symbol": symbol,
            "side": side_str(spec.order_side()),
            "orderType": "Market",
            "qty": fmt_decimal(spec.quantity),
            "orderLinkId": spec.client_order_id(),
        });

        let order_id = match self.create_order(body).await {
            Ok(order_id) => order_id,
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[BYBIT] entry {} already placed, recovering", spec.client_order_id());
                return self.query_order(&spec.symbol, &spec.client_order_id()).await;
            }
            Err(err) => return Err(err),
        };

        let fill = self.query_order(&spec.symbol, &spec.client_order_id()).await;
        Ok(accepted_entry(ExchangeId::Bybit, spec, order_id, fill))
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
        let request = self.post(
            "/v5/order/cancel",
            json!({
                "category": CATEGORY,
                "symbol": FORMAT.to_venue(symbol)?,
                "orderId": order_id,
            }),
        )?;
        self.call(request).await?;
        Ok(())
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        let request = self.get(
            "/v5/account/wallet-balance",
            &[("accountType", "UNIFIED".to_string()), ("coin", "USDT".to_string())],
        )?;
        let result = self.call(request).await?;

        result
            .get("list")
            .and_then(|list| list.get(0))
            .and_then(|account| decimal_at(account, "totalAvailableBalance"))
            .ok_or_else(|| missing_field("bybit", "totalAvailableBalance"))
    }

    async fn close_position(&self, request: &CloseRequest) -> ExchangeResult<Fill> {
        let body = json!({
            "category": CATEGORY,
            "symbol": FORMAT.to_venue(&request.symbol)?,
            "side": side_str(request.side.exit_order_side()),
            "orderType": "Market",
            "qty": fmt_decimal(request.quantity),
            "reduceOnly": true,
            "orderLinkId": request.client_order_id(),
        });

        match self.create_order(body).await {
            Ok(_) => {}
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {}
            Err(err) => return Err(err),
        }

        let handle = self
            .query_order(&request.symbol, &request.client_order_id())
            .await?;
        Ok(Fill {
            order_id: handle.exchange_order_id,
            price: handle
                .avg_price
                .ok_or_else(|| missing_field("bybit", "avgPrice"))?,
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
        let request = self.get(
            "/v5/order/realtime",
            &[
                ("category", CATEGORY.to_string()),
                ("symbol", FORMAT.to_venue(symbol)?),
                ("orderLinkId", client_order_id.to_string()),
            ],
        )?;
        let result = self.call(request).await?;

        let order = result
            .get("list")
            .and_then(|list| list.get(0))
            .ok_or_else(|| {
                ExchangeError::new(
                    ExchangeErrorKind::OrderNotFound,
                    format!("no order with orderLinkId {client_order_id}"),
                )
            })?;
        self.handle_from(order, symbol)
    }
}

/// Map a Bybit `retCode` into the shared taxonomy
pub fn map_error(code: i64, msg: &str) -> ExchangeError {
    let kind = match code {
        10003 | 10004 | 10005 | 10007 | 33004 => ExchangeErrorKind::Auth,
        10006 | 10018 => ExchangeErrorKind::RateLimited,
        10016 => ExchangeErrorKind::Network,
        110004 | 110007 | 110012 | 110045 => ExchangeErrorKind::InsufficientMargin,
        110072 => ExchangeErrorKind::DuplicateOrder,
        110001 => ExchangeErrorKind::OrderNotFound,
        10001 if msg.to_ascii_lowercase().contains("symbol") => {
            ExchangeErrorKind::SymbolUnavailable
        }
        10001 | 110017 | 110094 => ExchangeErrorKind::OrderRejected,
        _ => ExchangeErrorKind::Unknown,
    };
    ExchangeError::new(kind, msg).with_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use copytrade_clock::ManualClock;
    use copytrade_core::{AccountId, IdempotencyKey, SignalId};
    use rust_decimal_macros::dec;

    fn adapter(transport: Arc<ScriptedTransport>) -> BybitAdapter {
        BybitAdapter::new(
            Credentials::new("key", "secret"),
            AdapterOptions::default(),
            transport,
            ManualClock::new(),
        )
    }

    fn spec(side: Side) -> OrderSpec {
        OrderSpec {
            key: IdempotencyKey::derive(SignalId(3), AccountId::nil()),
            symbol: "ETHUSDT".into(),
            side,
            quantity: dec!(0.5),
            leverage: 5,
            reference_price: dec!(2000),
            stop_loss: dec!(2100),
            take_profit: dec!(1800),
            size_percent: dec!(5),
        }
    }

    #[tokio::test]
    async fn test_entry_queries_fill() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"retCode":110043,"retMsg":"leverage not modified","result":{}}"#)
            .push(200, r#"{"retCode":0,"retMsg":"OK","result":{"orderId":"b-1","orderLinkId":"x"}}"#)
            .push(
                200,
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"orderId":"b-1","side":"Sell","cumExecQty":"0.5","avgPrice":"1999.5","cumExecFee":"0.55"}]}}"#,
            );

        let handle = adapter(transport.clone())
            .place_entry_order(&spec(Side::Short))
            .await
            .unwrap();
        assert_eq!(handle.exchange_order_id, "b-1");
        assert_eq!(handle.side, Side::Short);
        assert_eq!(handle.avg_price, Some(dec!(1999.5)));
        assert_eq!(handle.fee, dec!(0.55));

        let create = &transport.requests()[1];
        let body: Value = serde_json::from_str(create.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["side"], "Sell");
        assert_eq!(body["orderLinkId"], spec(Side::Short).client_order_id());

        // Signature covers timestamp, key, window and body
        let prehash = format!(
            "{}key5000{}",
            create.header("X-BAPI-TIMESTAMP").unwrap(),
            create.body.as_deref().unwrap()
        );
        assert_eq!(create.header("X-BAPI-SIGN"), Some(sign_hex("secret", &prehash).unwrap().as_str()));
    }

    #[tokio::test]
    async fn test_short_protection_trigger_directions() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"retCode":0,"result":{"orderId":"sl-1"}}"#)
            .push(200, r#"{"retCode":0,"result":{"orderId":"tp-1"}}"#);

        let spec = spec(Side::Short);
        let handle = accepted_entry(ExchangeId::Bybit, &spec, "b-1".into(), Err(ExchangeError::timeout("")));
        let placed = adapter(transport.clone())
            .place_protection(&handle, &spec.protection_request(dec!(0.5)))
            .await
            .unwrap();
        assert!(placed.is_complete());

        let requests = transport.requests();
        let sl: Value = serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
        let tp: Value = serde_json::from_str(requests[1].body.as_deref().unwrap()).unwrap();
        assert_eq!(sl["triggerDirection"], 1);
        assert_eq!(tp["triggerDirection"], 2);
        assert_eq!(sl["side"], "Buy");
        assert_eq!(sl["reduceOnly"], true);
    }

    #[tokio::test]
    async fn test_filled_stop_loss_is_reported() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            200,
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"orderId":"sl-1","orderStatus":"Filled","avgPrice":"2101","cumExecQty":"0.5","cumExecFee":"0.58"}]}}"#,
        );

        let protection = ProtectionResult {
            stop_loss_order_id: Some("sl-1".into()),
            take_profit_order_id: Some("tp-1".into()),
        };
        let triggered = adapter(transport.clone())
            .query_protection("ETHUSDT", &protection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(triggered.close_reason(), copytrade_core::CloseReason::StopLoss);
        assert_eq!(triggered.fill.price, dec!(2101));
        assert_eq!(triggered.fill.fee, dec!(0.58));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/v5/order/history");
        assert!(requests[0].query.contains("orderId=sl-1"));
    }

    #[tokio::test]
    async fn test_untriggered_legs_report_nothing() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"retCode":0,"retMsg":"OK","result":{"list":[]}}"#)
            .push(
                200,
                r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"orderId":"tp-1","orderStatus":"Untriggered"}]}}"#,
            );

        let protection = ProtectionResult {
            stop_loss_order_id: Some("sl-1".into()),
            take_profit_order_id: Some("tp-1".into()),
        };
        let triggered = adapter(transport).query_protection("ETHUSDT", &protection).await.unwrap();
        assert!(triggered.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, r#"{"retCode":10006,"retMsg":"Too many visits!","result":{}}"#);

        let err = adapter(transport).get_balance().await.unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::RateLimited);
        assert!(err.is_transient());
        assert_eq!(map_error(10003, "API key is invalid.").kind, ExchangeErrorKind::Auth);
        assert_eq!(map_error(10001, "params error: symbol invalid").kind, ExchangeErrorKind::SymbolUnavailable);
    }
}
