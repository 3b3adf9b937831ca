//! Bitget v2 USDT-margined futures (one-way mode, cross margin)
//!
//! Signature: `base64(hmac(timestamp + METHOD + path?query + body))` with a
//! millisecond timestamp, plus the key passphrase header. Protection legs are
//! position-level TP/SL plan orders (`pos_loss` / `pos_profit`).

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
use serde_json::{Value, json};
use std::sync::Arc;

use super::{
    AdapterOptions, accepted_entry, decimal_at, first_triggered, fmt_decimal, missing_field,
    parse_body, place_legs, status_error, string_at,
};
use crate::auth::{Credentials, encode_query, sign_base64};
use crate::symbols::SymbolFormat;
use crate::transport::{RestRequest, RestTransport};

const FORMAT: SymbolFormat = SymbolFormat::Concatenated;
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";
const SUCCESS: &str = "00000";

pub struct BitgetAdapter {
    credentials: Credentials,
    options: AdapterOptions,
    transport: Arc<dyn RestTransport>,
    clock: Arc<dyn Clock>,
}

impl BitgetAdapter {
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

    fn sign(&self, request: RestRequest) -> ExchangeResult<RestRequest> {
        let timestamp = self.clock.now_millis().to_string();
        let prehash = format!(
            "{timestamp}{}{}{}",
            request.method.as_str(),
            request.path_and_query(),
            request.body.as_deref().unwrap_or_default()
        );
        let signature = sign_base64(&self.credentials.api_secret, &prehash)?;

        Ok(request
            .with_header("ACCESS-KEY", self.credentials.api_key.as_str())
            .with_header("ACCESS-SIGN", signature)
            .with_header("ACCESS-TIMESTAMP", timestamp)
            .with_header("ACCESS-PASSPHRASE", self.credentials.passphrase())
            .with_header("locale", "en-US"))
    }

    fn get(&self, path: &str, params: &[(&str, String)]) -> ExchangeResult<RestRequest> {
        self.sign(RestRequest::get(path).with_query(encode_query(params)))
    }

    fn post(&self, path: &str, body: Value) -> ExchangeResult<RestRequest> {
        self.sign(RestRequest::post(path).with_body(body.to_string()))
    }

    /// Returns the `data` member
    async fn call(&self, request: RestRequest) -> ExchangeResult<Value> {
        let response = self.transport.send(request).await?;
        let body = parse_body(&response)?;

        match string_at(&body, "code").as_deref() {
            Some(SUCCESS) => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
            Some(code) => {
                let msg = string_at(&body, "msg").unwrap_or_default();
                Err(map_error(code.parse().unwrap_or_default(), &msg))
            }
            None => Err(status_error(&response)),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let request = self.post(
            "/api/v2/mix/account/set-leverage",
            json!({
                "symbol": symbol,
                "productType": PRODUCT_TYPE,
                "marginCoin": MARGIN_COIN,
                "leverage": leverage.to_string(),
            }),
        )?;
        self.call(request).await?;
        debug!("[BITGET] leverage {symbol} -> {leverage}x");
        Ok(())
    }

    async fn create_order(&self, body: Value) -> ExchangeResult<String> {
        let data = self.call(self.post("/api/v2/mix/order/place-order", body)?).await?;
        string_at(&data, "orderId").ok_or_else(|| missing_field("bitget", "orderId"))
    }

    async fn place_trigger(
        &self,
        symbol: &str,
        request: &ProtectionRequest,
        leg: OrderLeg,
        trigger: Price,
    ) -> ExchangeResult<String> {
        let client_id = request.key.client_order_id(leg);
        let plan_type = match leg {
            OrderLeg::StopLoss => "pos_loss",
            _ => "pos_profit",
        };
        let hold_side = match request.side {
            Side::Long => "long",
            Side::Short => "short",
        };
        let body = json!({
            "marginCoin": MARGIN_COIN,
            "productType": PRODUCT_TYPE,
            "symbol": symbol,
            "planType": plan_type,
            "triggerPrice": fmt_decimal(trigger),
            "triggerType": "mark_price",
            "executePrice": "0",
            "holdSide": hold_side,
            "clientOid": client_id,
        });

        match self.call(self.post("/api/v2/mix/order/place-tpsl-order", body)?).await {
            Ok(data) => string_at(&data, "orderId").ok_or_else(|| missing_field("bitget", "orderId")),
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[BITGET] {client_id} already placed, recovering");
                self.query_plan(symbol, &client_id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Find a pending TP/SL plan order by client id
    async fn query_plan(&self, symbol: &str, client_id: &str) -> ExchangeResult<String> {
        let request = self.get(
            "/api/v2/mix/order/orders-plan-pending",
            &[
                ("symbol", symbol.to_string()),
                ("productType", PRODUCT_TYPE.to_string()),
                ("planType", "profit_loss".to_string()),
            ],
        )?;
        let data = self.call(request).await?;

        data.get("entrustedList")
            .and_then(Value::as_array)
            .and_then(|orders| {
                orders
                    .iter()
                    .find(|o| string_at(o, "clientOid").as_deref() == Some(client_id))
            })
            .and_then(|o| string_at(o, "orderId"))
            .ok_or_else(|| {
                ExchangeError::new(
                    ExchangeErrorKind::OrderNotFound,
                    format!("no plan order {client_id}"),
                )
            })
    }

    /// Fill of a TP/SL plan the history reports `executed`, read from the
    /// order it spawned
    async fn leg_fill(&self, venue_symbol: &str, symbol: &str, plan_id: &str) -> ExchangeResult<Option<Fill>> {
        let request = self.get(
            "/api/v2/mix/order/orders-plan-history",
            &[
                ("symbol", venue_symbol.to_string()),
                ("productType", PRODUCT_TYPE.to_string()),
                ("planType", "profit_loss".to_string()),
                ("orderId", plan_id.to_string()),
            ],
        )?;
        let data = self.call(request).await?;
        let plan = data
            .get("entrustedList")
            .and_then(Value::as_array)
            .and_then(|plans| {
                plans
                    .iter()
                    .find(|p| string_at(p, "orderId").as_deref() == Some(plan_id))
            });
        let Some(plan) = plan else {
            return Ok(None);
        };
        if plan.get("planStatus").and_then(Value::as_str) != Some("executed") {
            return Ok(None);
        }

        let executed_id = string_at(plan, "executeOrderId")
            .ok_or_else(|| missing_field("bitget", "executeOrderId"))?;
        let order = self
            .call(self.get(
                "/api/v2/mix/order/detail",
                &[
                    ("symbol", venue_symbol.to_string()),
                    ("productType", PRODUCT_TYPE.to_string()),
                    ("orderId", executed_id),
                ],
            )?)
            .await?;
        let handle = self.handle_from(&order, symbol)?;
        Ok(Some(Fill {
            order_id: plan_id.to_string(),
            price: handle
                .avg_price
                .ok_or_else(|| missing_field("bitget", "priceAvg"))?,
            quantity: handle.filled_quantity,
            fee: handle.fee,
            timestamp: self.clock.now(),
        }))
    }

    fn handle_from(&self, order: &Value, symbol: &str) -> ExchangeResult<OrderHandle> {
        let side = match order.get("side").and_then(Value::as_str) {
            Some("sell") => Side::Short,
            _ => Side::Long,
        };
        Ok(OrderHandle {
            exchange: ExchangeId::Bitget,
            symbol: symbol.to_string(),
            side,
            exchange_order_id: string_at(order, "orderId")
                .ok_or_else(|| missing_field("bitget", "orderId"))?,
            client_order_id: string_at(order, "clientOid").unwrap_or_default(),
            filled_quantity: decimal_at(order, "baseVolume").unwrap_or_default(),
            avg_price: decimal_at(order, "priceAvg").filter(|p| *p > Decimal::ZERO),
            fee: decimal_at(order, "fee").unwrap_or_default().abs(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for BitgetAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Bitget
    }

    async fn place_entry_order(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let symbol = FORMAT.to_venue(&spec.symbol)?;
        self.set_leverage(&symbol, spec.leverage).await?;

        let body = json!({
            "symbol": symbol,
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": MARGIN_COIN,
            "size": fmt_decimal(spec.quantity),
            "side": spec.order_side().as_str(),
            "orderType": "market",
            "clientOid": spec.client_order_id(),
        });

        let order_id = match self.create_order(body).await {
            Ok(order_id) => order_id,
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[BITGET] entry {} already placed, recovering", spec.client_order_id());
                return self.query_order(&spec.symbol, &spec.client_order_id()).await;
            }
            Err(err) => return Err(err),
        };

        let fill = self.query_order(&spec.symbol, &spec.client_order_id()).await;
        Ok(accepted_entry(ExchangeId::Bitget, spec, order_id, fill))
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

    /// Cancels a TP/SL plan order
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let body = json!({
            "symbol": FORMAT.to_venue(symbol)?,
            "productType": PRODUCT_TYPE,
            "marginCoin": MARGIN_COIN,
            "orderIdList": [{"orderId": order_id}],
        });
        self.call(self.post("/api/v2/mix/order/cancel-plan-order", body)?)
            .await?;
        Ok(())
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        let data = self
            .call(self.get(
                "/api/v2/mix/account/accounts",
                &[("productType", PRODUCT_TYPE.to_string())],
            )?)
            .await?;

        data.as_array()
            .and_then(|accounts| {
                accounts
                    .iter()
                    .find(|a| a.get("marginCoin").and_then(Value::as_str) == Some(MARGIN_COIN))
            })
            .and_then(|usdt| decimal_at(usdt, "available"))
            .ok_or_else(|| missing_field("bitget", "USDT available"))
    }

    async fn close_position(&self, request: &CloseRequest) -> ExchangeResult<Fill> {
        let body = json!({
            "symbol": FORMAT.to_venue(&request.symbol)?,
            "productType": PRODUCT_TYPE,
            "marginMode": "crossed",
            "marginCoin": MARGIN_COIN,
            "size": fmt_decimal(request.quantity),
            "side": request.side.exit_order_side().as_str(),
            "orderType": "market",
            "reduceOnly": "YES",
            "clientOid": request.client_order_id(),
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
                .ok_or_else(|| missing_field("bitget", "priceAvg"))?,
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
        let request = self.get(
            "/api/v2/mix/order/detail",
            &[
                ("symbol", FORMAT.to_venue(symbol)?),
                ("productType", PRODUCT_TYPE.to_string()),
                ("clientOid", client_order_id.to_string()),
            ],
        )?;
        let data = self.call(request).await?;
        if data.is_null() {
            return Err(ExchangeError::new(
                ExchangeErrorKind::OrderNotFound,
                format!("no order with clientOid {client_order_id}"),
            ));
        }
        self.handle_from(&data, symbol)
    }
}

/// Map a Bitget error code into the shared taxonomy
pub fn map_error(code: i64, msg: &str) -> ExchangeError {
    let kind = match code {
        40006 | 40009 | 40012 | 40014 | 40037 => ExchangeErrorKind::Auth,
        429 | 40010 => ExchangeErrorKind::RateLimited,
        40725 => ExchangeErrorKind::Timeout,
        40762 | 43012 => ExchangeErrorKind::InsufficientMargin,
        40034 | 40309 => ExchangeErrorKind::SymbolUnavailable,
        40786 => ExchangeErrorKind::DuplicateOrder,
        40768 | 43001 => ExchangeErrorKind::OrderNotFound,
        40774 | 43011 | 45110 => ExchangeErrorKind::OrderRejected,
        _ => ExchangeErrorKind::Unknown,
    };
    ExchangeError::new(kind, msg).with_code(code)
}
