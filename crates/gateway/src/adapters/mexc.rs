//! MEXC contract (perpetual) API
//!
//! Signature: `hex(hmac(api_key + request_time + param_string))` where the
//! param string is the sorted query (GET) or the JSON body (POST). Volumes
//! are in contracts; leverage travels with each opening order. Protection
//! legs are market plan orders.

use async_trait::async_trait;
use copytrade_core::{
    CloseRequest, ExchangeId, Fill, OrderHandle, OrderLeg, OrderSpec, Price, ProtectionRequest,
    ProtectionResult, Quantity, Side, TriggeredLeg,
};
use copytrade_ports::{
    Clock, ExchangeAdapter, ExchangeError, ExchangeErrorKind, ExchangeResult, ProtectionError,
};
use log::info;
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

const FORMAT: SymbolFormat = SymbolFormat::Underscore;
/// Cross margin
const OPEN_TYPE: u8 = 2;
/// Market order
const ORDER_TYPE_MARKET: u8 = 5;
/// Plan order state once it has fired and its order executed
const PLAN_EXECUTED: i64 = 3;

/// MEXC encodes direction and open/close together
fn side_code(side: Side, opening: bool) -> u8 {
    match (side, opening) {
        (Side::Long, true) => 1,
        (Side::Short, false) => 2,
        (Side::Short, true) => 3,
        (Side::Long, false) => 4,
    }
}

pub struct MexcAdapter {
    credentials: Credentials,
    options: AdapterOptions,
    transport: Arc<dyn RestTransport>,
    clock: Arc<dyn Clock>,
}

impl MexcAdapter {
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

    fn sign(&self, request: RestRequest, params: &str) -> ExchangeResult<RestRequest> {
        let request_time = self.clock.now_millis().to_string();
        let prehash = format!("{}{request_time}{params}", self.credentials.api_key);
        let signature = sign_hex(&self.credentials.api_secret, &prehash)?;

        Ok(request
            .with_header("ApiKey", self.credentials.api_key.as_str())
            .with_header("Request-Time", request_time)
            .with_header("Signature", signature))
    }

    fn get(&self, path: &str, params: &mut [(&str, String)]) -> ExchangeResult<RestRequest> {
        params.sort_by(|a, b| a.0.cmp(b.0));
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

        match body.get("success").and_then(Value::as_bool) {
            Some(true) => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
            Some(false) => {
                let code = body.get("code").and_then(Value::as_i64).unwrap_or_default();
                let msg = string_at(&body, "message").unwrap_or_default();
                Err(map_error(code, &msg))
            }
            None => Err(status_error(&response)),
        }
    }

    fn contracts(&self, symbol: &str, quantity: Quantity) -> String {
        fmt_decimal(quantity / self.options.contract_size(symbol))
    }

    /// Submit an order; returns the exchange order id
    async fn submit(&self, body: Value) -> ExchangeResult<String> {
        let data = self.call(self.post("/api/v1/private/order/submit", body)?).await?;
        match &data {
            Value::Object(_) => string_at(&data, "orderId"),
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
        .ok_or_else(|| missing_field("mexc", "orderId"))
    }

    async fn place_trigger(
        &self,
        symbol: &str,
        request: &ProtectionRequest,
        leg: OrderLeg,
        trigger: Price,
    ) -> ExchangeResult<String> {
        // 1: fire at or above, 2: at or below
        let trigger_type = if triggers_on_rise(request.side, leg) { 1 } else { 2 };
        let body = json!({
            "symbol": symbol,
            "vol": self.contracts(&request.symbol, request.quantity),
            "side": side_code(request.side, false),
            "openType": OPEN_TYPE,
            "triggerPrice": fmt_decimal(trigger),
            "triggerType": trigger_type,
            "executeCycle": 1,
            "orderType": ORDER_TYPE_MARKET,
            "trend": 1,
            "externalOid": request.key.client_order_id(leg),
        });

        let data = self.call(self.post("/api/v1/private/planorder/place", body)?).await?;
        match &data {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => string_at(&data, "id"),
        }
        .ok_or_else(|| missing_field("mexc", "plan order id"))
    }

    async fn leg_fill(&self, venue_symbol: &str, symbol: &str, plan_id: &str) -> ExchangeResult<Option<Fill>> {
        let plans = self
            .call(self.get(
                "/api/v1/private/planorder/list/orders",
                &mut [
                    ("symbol", venue_symbol.to_string()),
                    ("states", PLAN_EXECUTED.to_string()),
                    ("page_num", "1".to_string()),
                    ("page_size", "100".to_string()),
                ],
            )?)
            .await?;
        let plan = plans.as_array().and_then(|plans| {
            plans
                .iter()
                .find(|p| string_at(p, "id").as_deref() == Some(plan_id))
        });
        let Some(plan) = plan else {
            return Ok(None);
        };
        if plan.get("state").and_then(Value::as_i64) != Some(PLAN_EXECUTED) {
            return Ok(None);
        }

        let order_id = string_at(plan, "orderId").ok_or_else(|| missing_field("mexc", "orderId"))?;
        let path = format!("/api/v1/private/order/get/{order_id}");
        let order = self.call(self.get(&path, &mut [])?).await?;
        let handle = self.handle_from(&order, symbol)?;
        Ok(Some(Fill {
            order_id: plan_id.to_string(),
            price: handle
                .avg_price
                .ok_or_else(|| missing_field("mexc", "dealAvgPrice"))?,
            quantity: handle.filled_quantity,
            fee: handle.fee,
            timestamp: self.clock.now(),
        }))
    }

    fn handle_from(&self, order: &Value, symbol: &str) -> ExchangeResult<OrderHandle> {
        let side = match order.get("side").and_then(Value::as_i64) {
            // 1 open long, 4 close long, 2 close short, 3 open short
            Some(2) | Some(3) => Side::Short,
            _ => Side::Long,
        };
        let contracts = decimal_at(order, "dealVol").unwrap_or_default();
        Ok(OrderHandle {
            exchange: ExchangeId::Mexc,
            symbol: symbol.to_string(),
            side,
            exchange_order_id: string_at(order, "orderId")
                .ok_or_else(|| missing_field("mexc", "orderId"))?,
            client_order_id: string_at(order, "externalOid").unwrap_or_default(),
            filled_quantity: contracts * self.options.contract_size(symbol),
            avg_price: decimal_at(order, "dealAvgPrice").filter(|p| *p > Decimal::ZERO),
            fee: decimal_at(order, "takerFee").unwrap_or_default().abs(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for MexcAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Mexc
    }

    async fn place_entry_order(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let body = json!({
            "symbol": FORMAT.to_venue(&spec.symbol)?,
            "price": fmt_decimal(spec.reference_price),
            "vol": self.contracts(&spec.symbol, spec.quantity),
            "leverage": spec.leverage,
            "side": side_code(spec.side, true),
            "type": ORDER_TYPE_MARKET,
            "openType": OPEN_TYPE,
            "externalOid": spec.client_order_id(),
        });

        let order_id = match self.submit(body).await {
            Ok(order_id) => order_id,
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[MEXC] entry {} already placed, recovering", spec.client_order_id());
                return self.query_order(&spec.symbol, &spec.client_order_id()).await;
            }
            Err(err) => return Err(err),
        };

        let fill = self.query_order(&spec.symbol, &spec.client_order_id()).await;
        Ok(accepted_entry(ExchangeId::Mexc, spec, order_id, fill))
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

    /// Cancels a plan order
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let body = json!([{"symbol": FORMAT.to_venue(symbol)?, "orderId": order_id}]);
        self.call(self.post("/api/v1/private/planorder/cancel", body)?)
            .await?;
        Ok(())
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        let data = self
            .call(self.get("/api/v1/private/account/asset/USDT", &mut [])?)
            .await?;
        decimal_at(&data, "availableBalance").ok_or_else(|| missing_field("mexc", "availableBalance"))
    }

    async fn close_position(&self, request: &CloseRequest) -> ExchangeResult<Fill> {
        let body = json!({
            "symbol": FORMAT.to_venue(&request.symbol)?,
            "vol": self.contracts(&request.symbol, request.quantity),
            "side": side_code(request.side, false),
            "type": ORDER_TYPE_MARKET,
            "openType": OPEN_TYPE,
            "reduceOnly": true,
            "externalOid": request.client_order_id(),
        });

        match self.submit(body).await {
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
                .ok_or_else(|| missing_field("mexc", "dealAvgPrice"))?,
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
        let venue_symbol = FORMAT.to_venue(symbol)?;
        first_triggered(protection, |plan_id| {
            let venue_symbol = venue_symbol.clone();
            async move { self.leg_fill(&venue_symbol, symbol, &plan_id).await }
        })
        .await
    }

    async fn query_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<OrderHandle> {
        let path = format!(
            "/api/v1/private/order/external/{}/{client_order_id}",
            FORMAT.to_venue(symbol)?
        );
        let data = self.call(self.get(&path, &mut [])?).await?;
        if data.is_null() {
            return Err(ExchangeError::new(
                ExchangeErrorKind::OrderNotFound,
                format!("no order with externalOid {client_order_id}"),
            ));
        }
        self.handle_from(&data, symbol)
    }
}

/// Map a MEXC error code into the shared taxonomy
pub fn map_error(code: i64, msg: &str) -> ExchangeError {
    let lowered = msg.to_ascii_lowercase();
    let kind = match code {
        401 | 402 | 406 | 602 => ExchangeErrorKind::Auth,
        510 => ExchangeErrorKind::RateLimited,
        500 | 501 => ExchangeErrorKind::Network,
        2005 => ExchangeErrorKind::InsufficientMargin,
        1001 | 1002 => ExchangeErrorKind::SymbolUnavailable,
        2009 | 2011 => ExchangeErrorKind::OrderNotFound,
        // No dedicated code for a reused externalOid
        _ if lowered.contains("externaloid") && (lowered.contains("exist") || lowered.contains("repeat")) => {
            ExchangeErrorKind::DuplicateOrder
        }
        2015 | 2021 | 2022 | 2040 => ExchangeErrorKind::OrderRejected,
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

    fn adapter(transport: Arc<ScriptedTransport>) -> MexcAdapter {
        MexcAdapter::new(
            Credentials::new("key", "secret"),
            AdapterOptions::default(),
            transport,
            ManualClock::new(),
        )
    }

    fn spec() -> OrderSpec {
        OrderSpec {
            key: IdempotencyKey::derive(SignalId(11), AccountId::nil()),
            symbol: "DOGEUSDT".into(),
            side: Side::Short,
            quantity: dec!(1000),
            leverage: 20,
            reference_price: dec!(0.08),
            stop_loss: dec!(0.085),
            take_profit: dec!(0.07),
            size_percent: dec!(4),
        }
    }

    #[test]
    fn test_side_codes() {
        assert_eq!(side_code(Side::Long, true), 1);
        assert_eq!(side_code(Side::Short, true), 3);
        assert_eq!(side_code(Side::Long, false), 4);
        assert_eq!(side_code(Side::Short, false), 2);
    }

    #[tokio::test]
    async fn test_entry_carries_leverage_and_external_id() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"success":true,"code":0,"data":{"orderId":"739113577038255616"}}"#)
            .push(
                200,
                r#"{"success":true,"code":0,"data":{"orderId":"739113577038255616","side":3,"dealVol":1000,"dealAvgPrice":0.0799,"takerFee":0.04}}"#,
            );

        let handle = adapter(transport.clone()).place_entry_order(&spec()).await.unwrap();
        assert_eq!(handle.side, Side::Short);
        assert_eq!(handle.avg_price, Some(dec!(0.0799)));

        let requests = transport.requests();
        let body: Value = serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["symbol"], "DOGE_USDT");
        assert_eq!(body["leverage"], 20);
        assert_eq!(body["side"], 3);
        assert_eq!(body["externalOid"], spec().client_order_id());
        assert!(requests[1].path.ends_with(&format!("/DOGE_USDT/{}", spec().client_order_id())));

        let prehash = format!(
            "key{}{}",
            requests[0].header("Request-Time").unwrap(),
            requests[0].body.as_deref().unwrap()
        );
        assert_eq!(requests[0].header("Signature"), Some(sign_hex("secret", &prehash).unwrap().as_str()));
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, r#"{"success":false,"code":2005,"message":"Insufficient balance"}"#);
        let err = adapter(transport).place_entry_order(&spec()).await.unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::InsufficientMargin);

        assert!(map_error(510, "Requests are too frequent").is_transient());
        assert_eq!(map_error(602, "Signature verification failed").kind, ExchangeErrorKind::Auth);
        assert_eq!(
            map_error(9999, "externalOid already exists").kind,
            ExchangeErrorKind::DuplicateOrder
        );
    }

    #[tokio::test]
    async fn test_executed_plan_order_is_reported() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"success":true,"code":0,"data":[]}"#)
            .push(
                200,
                r#"{"success":true,"code":0,"data":[{"id":"901","state":3,"orderId":"740001"}]}"#,
            )
            .push(
                200,
                r#"{"success":true,"code":0,"data":{"orderId":"740001","side":2,"dealVol":1000,"dealAvgPrice":0.0701,"takerFee":0.035}}"#,
            );

        let protection = ProtectionResult {
            stop_loss_order_id: Some("900".into()),
            take_profit_order_id: Some("901".into()),
        };
        let triggered = adapter(transport.clone())
            .query_protection("DOGEUSDT", &protection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(triggered.leg, OrderLeg::TakeProfit);
        assert_eq!(triggered.fill.price, dec!(0.0701));
        assert_eq!(triggered.fill.quantity, dec!(1000));

        let requests = transport.requests();
        assert!(requests[0].query.contains("states=3"));
        assert!(requests[0].query.contains("symbol=DOGE_USDT"));
        assert_eq!(requests[2].path, "/api/v1/private/order/get/740001");
    }
}
