//! OKX v5 perpetual swaps (cross margin)
//!
//! Signature: `base64(hmac(timestamp + METHOD + path?query + body))` with an
//! ISO-8601 millisecond timestamp, plus the key passphrase header. Sizes are
//! in contracts; `AdapterOptions::contract_sizes` converts from base units.
//! Stop-loss and take-profit are placed as `conditional` algo orders. An
//! algo order in state `effective` has fired; its fill is read from the
//! market order it spawned (`ordId`).

use async_trait::async_trait;
use chrono::SecondsFormat;
use copytrade_core::{
    CloseRequest, ExchangeId, Fill, OrderHandle, OrderLeg, OrderSpec, Price, ProtectionRequest,
    ProtectionResult, Quantity, Side, TriggeredLeg,
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

const FORMAT: SymbolFormat = SymbolFormat::OkxSwap;
const MARGIN_MODE: &str = "cross";

pub struct OkxAdapter {
    credentials: Credentials,
    options: AdapterOptions,
    transport: Arc<dyn RestTransport>,
    clock: Arc<dyn Clock>,
}

impl OkxAdapter {
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
        let timestamp = self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let prehash = format!(
            "{timestamp}{}{}{}",
            request.method.as_str(),
            request.path_and_query(),
            request.body.as_deref().unwrap_or_default()
        );
        let signature = sign_base64(&self.credentials.api_secret, &prehash)?;

        Ok(request
            .with_header("OK-ACCESS-KEY", self.credentials.api_key.as_str())
            .with_header("OK-ACCESS-SIGN", signature)
            .with_header("OK-ACCESS-TIMESTAMP", timestamp)
            .with_header("OK-ACCESS-PASSPHRASE", self.credentials.passphrase()))
    }

    fn get(&self, path: &str, params: &[(&str, String)]) -> ExchangeResult<RestRequest> {
        self.sign(RestRequest::get(path).with_query(encode_query(params)))
    }

    fn post(&self, path: &str, body: Value) -> ExchangeResult<RestRequest> {
        self.sign(RestRequest::post(path).with_body(body.to_string()))
    }

    /// Returns the `data` array
    async fn call(&self, request: RestRequest) -> ExchangeResult<Vec<Value>> {
        let response = self.transport.send(request).await?;
        let body = parse_body(&response)?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        match body.get("code").and_then(Value::as_str) {
            Some("0") => Ok(data),
            Some(code) => {
                // Order endpoints report the real cause per item in sCode/sMsg
                let item = data
                    .first()
                    .filter(|d| string_at(d, "sCode").is_some_and(|c| c != "0"));
                let (code, msg) = match item {
                    Some(d) => (
                        string_at(d, "sCode").unwrap_or_default(),
                        string_at(d, "sMsg").unwrap_or_default(),
                    ),
                    None => (
                        code.to_string(),
                        string_at(&body, "msg").unwrap_or_default(),
                    ),
                };
                Err(map_error(code.parse().unwrap_or_default(), &msg))
            }
            None => Err(status_error(&response)),
        }
    }

    fn contracts(&self, symbol: &str, quantity: Quantity) -> String {
        fmt_decimal(quantity / self.options.contract_size(symbol))
    }

    async fn set_leverage(&self, inst_id: &str, leverage: u32) -> ExchangeResult<()> {
        let request = self.post(
            "/api/v5/account/set-leverage",
            json!({"instId": inst_id, "lever": leverage.to_string(), "mgnMode": MARGIN_MODE}),
        )?;
        self.call(request).await?;
        debug!("[OKX] leverage {inst_id} -> {leverage}x");
        Ok(())
    }

    async fn create_order(&self, body: Value) -> ExchangeResult<String> {
        let data = self.call(self.post("/api/v5/trade/order", body)?).await?;
        data.first()
            .and_then(|d| string_at(d, "ordId"))
            .ok_or_else(|| missing_field("okx", "ordId"))
    }

    async fn place_trigger(
        &self,
        inst_id: &str,
        request: &ProtectionRequest,
        leg: OrderLeg,
        trigger: Price,
    ) -> ExchangeResult<String> {
        let client_id = request.key.client_order_id(leg);
        let mut body = json!({
            "instId": inst_id,
            "tdMode": MARGIN_MODE,
            "side": request.side.exit_order_side().as_str(),
            "ordType": "conditional",
            "sz": self.contracts(&request.symbol, request.quantity),
            "reduceOnly": true,
            "algoClOrdId": client_id,
        });
        let (trigger_key, price_key) = match leg {
            OrderLeg::StopLoss => ("slTriggerPx", "slOrdPx"),
            _ => ("tpTriggerPx", "tpOrdPx"),
        };
        body[trigger_key] = json!(fmt_decimal(trigger));
        // -1 executes at market once triggered
        body[price_key] = json!("-1");

        match self.call(self.post("/api/v5/trade/order-algo", body)?).await {
            Ok(data) => data
                .first()
                .and_then(|d| string_at(d, "algoId"))
                .ok_or_else(|| missing_field("okx", "algoId")),
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[OKX] {client_id} already placed, recovering");
                self.query_algo(&client_id).await
            }
            Err(err) => Err(err),
        }
    }

    async fn query_algo(&self, algo_client_id: &str) -> ExchangeResult<String> {
        let request = self.get(
            "/api/v5/trade/order-algo",
            &[("algoClOrdId", algo_client_id.to_string())],
        )?;
        let data = self.call(request).await?;
        data.first()
            .and_then(|d| string_at(d, "algoId"))
            .ok_or_else(|| {
                ExchangeError::new(
                    ExchangeErrorKind::OrderNotFound,
                    format!("no algo order {algo_client_id}"),
                )
            })
    }

    async fn leg_fill(&self, inst_id: &str, symbol: &str, algo_id: &str) -> ExchangeResult<Option<Fill>> {
        let algo = self
            .call(self.get("/api/v5/trade/order-algo", &[("algoId", algo_id.to_string())])?)
            .await?;
        let Some(algo) = algo.first() else {
            return Ok(None);
        };
        if algo.get("state").and_then(Value::as_str) != Some("effective") {
            return Ok(None);
        }

        let ord_id = string_at(algo, "ordId").ok_or_else(|| missing_field("okx", "ordId"))?;
        let data = self
            .call(self.get(
                "/api/v5/trade/order",
                &[("instId", inst_id.to_string()), ("ordId", ord_id)],
            )?)
            .await?;
        let order = data.first().ok_or_else(|| missing_field("okx", "order"))?;
        let handle = self.handle_from(order, symbol)?;
        Ok(Some(Fill {
            order_id: algo_id.to_string(),
            price: handle.avg_price.ok_or_else(|| missing_field("okx", "avgPx"))?,
            quantity: handle.filled_quantity,
            fee: handle.fee,
            timestamp: self.clock.now(),
        }))
    }

    fn handle_from(&self, order: &Value, symbol: &str) -> ExchangeResult<OrderHandle> {
        let contracts = decimal_at(order, "accFillSz").unwrap_or_default();
        let side = match order.get("side").and_then(Value::as_str) {
            Some("sell") => Side::Short,
            _ => Side::Long,
        };
        Ok(OrderHandle {
            exchange: ExchangeId::Okx,
            symbol: symbol.to_string(),
            side,
            exchange_order_id: string_at(order, "ordId")
                .ok_or_else(|| missing_field("okx", "ordId"))?,
            client_order_id: string_at(order, "clOrdId").unwrap_or_default(),
            filled_quantity: contracts * self.options.contract_size(symbol),
            avg_price: decimal_at(order, "avgPx").filter(|p| *p > Decimal::ZERO),
            // Fees are reported as negative amounts
            fee: decimal_at(order, "fee").unwrap_or_default().abs(),
        })
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn exchange(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    async fn place_entry_order(&self, spec: &OrderSpec) -> ExchangeResult<OrderHandle> {
        let inst_id = FORMAT.to_venue(&spec.symbol)?;
        self.set_leverage(&inst_id, spec.leverage).await?;

        let body = json!({
            "instId": inst_id,
            "tdMode": MARGIN_MODE,
            "side": spec.order_side().as_str(),
            "ordType": "market",
            "sz": self.contracts(&spec.symbol, spec.quantity),
            "clOrdId": spec.client_order_id(),
        });

        let order_id = match self.create_order(body).await {
            Ok(order_id) => order_id,
            Err(err) if err.kind == ExchangeErrorKind::DuplicateOrder => {
                info!("[OKX] entry {} already placed, recovering", spec.client_order_id());
                return self.query_order(&spec.symbol, &spec.client_order_id()).await;
            }
            Err(err) => return Err(err),
        };

        let fill = self.query_order(&spec.symbol, &spec.client_order_id()).await;
        Ok(accepted_entry(ExchangeId::Okx, spec, order_id, fill))
    }

    async fn place_protection(
        &self,
        _handle: &OrderHandle,
        request: &ProtectionRequest,
    ) -> Result<ProtectionResult, ProtectionError> {
        let inst_id = FORMAT.to_venue(&request.symbol)?;
        place_legs(request, |leg, trigger| {
            let inst_id = inst_id.clone();
            async move { self.place_trigger(&inst_id, request, leg, trigger).await }
        })
        .await
    }

    /// Cancels an algo order; the only resting orders this adapter creates
    /// are protection legs.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let body = json!([{"algoId": order_id, "instId": FORMAT.to_venue(symbol)?}]);
        self.call(self.post("/api/v5/trade/cancel-algos", body)?).await?;
        Ok(())
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        let data = self
            .call(self.get("/api/v5/account/balance", &[("ccy", "USDT".to_string())])?)
            .await?;

        data.first()
            .and_then(|account| account.get("details"))
            .and_then(|details| details.get(0))
            .and_then(|usdt| decimal_at(usdt, "availBal").or_else(|| decimal_at(usdt, "availEq")))
            .ok_or_else(|| missing_field("okx", "availBal"))
    }

    async fn close_position(&self, request: &CloseRequest) -> ExchangeResult<Fill> {
        let body = json!({
            "instId": FORMAT.to_venue(&request.symbol)?,
            "tdMode": MARGIN_MODE,
            "side": request.side.exit_order_side().as_str(),
            "ordType": "market",
            "sz": self.contracts(&request.symbol, request.quantity),
            "reduceOnly": true,
            "clOrdId": request.client_order_id(),
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
            price: handle.avg_price.ok_or_else(|| missing_field("okx", "avgPx"))?,
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
        let inst_id = FORMAT.to_venue(symbol)?;
        first_triggered(protection, |algo_id| {
            let inst_id = inst_id.clone();
            async move { self.leg_fill(&inst_id, symbol, &algo_id).await }
        })
        .await
    }

    async fn query_order(&self, symbol: &str, client_order_id: &str) -> ExchangeResult<OrderHandle> {
        let request = self.get(
            "/api/v5/trade/order",
            &[
                ("instId", FORMAT.to_venue(symbol)?),
                ("clOrdId", client_order_id.to_string()),
            ],
        )?;
        let data = self.call(request).await?;
        let order = data.first().ok_or_else(|| {
            ExchangeError::new(
                ExchangeErrorKind::OrderNotFound,
                format!("no order with clOrdId {client_order_id}"),
            )
        })?;
        self.handle_from(order, symbol)
    }
}

/// Map an OKX `code`/`sCode` into the shared taxonomy
pub fn map_error(code: i64, msg: &str) -> ExchangeError {
    let kind = match code {
        50100 | 50105 | 50111 | 50113 | 50114 => ExchangeErrorKind::Auth,
        50011 | 50061 => ExchangeErrorKind::RateLimited,
        50004 => ExchangeErrorKind::Timeout,
        50001 | 50013 => ExchangeErrorKind::Network,
        51008 | 51004 => ExchangeErrorKind::InsufficientMargin,
        51001 | 51155 => ExchangeErrorKind::SymbolUnavailable,
        51016 => ExchangeErrorKind::DuplicateOrder,
        51603 => ExchangeErrorKind::OrderNotFound,
        51000 | 51006 | 51121 | 51169 => ExchangeErrorKind::OrderRejected,
        _ => ExchangeErrorKind::Unknown,
    };
    ExchangeError::new(kind, msg).with_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use chrono::{TimeZone, Utc};
    use copytrade_clock::ManualClock;
    use copytrade_core::{AccountId, IdempotencyKey, SignalId};
    use rust_decimal_macros::dec;

    fn adapter(transport: Arc<ScriptedTransport>) -> OkxAdapter {
        let mut options = AdapterOptions::default();
        options.contract_sizes.insert("BTCUSDT".into(), dec!(0.01));
        OkxAdapter::new(
            Credentials::new("key", "secret").with_passphrase("phrase"),
            options,
            transport,
            ManualClock::starting_at(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        )
    }

    fn spec() -> OrderSpec {
        OrderSpec {
            key: IdempotencyKey::derive(SignalId(5), AccountId::nil()),
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            quantity: dec!(0.02),
            leverage: 10,
            reference_price: dec!(35000),
            stop_loss: dec!(34000),
            take_profit: dec!(37000),
            size_percent: dec!(2),
        }
    }

    #[tokio::test]
    async fn test_entry_in_contracts_and_signed() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"code":"0","msg":"","data":[{"lever":"10"}]}"#)
            .push(200, r#"{"code":"0","msg":"","data":[{"ordId":"o-9","clOrdId":"x","sCode":"0"}]}"#)
            .push(
                200,
                r#"{"code":"0","data":[{"ordId":"o-9","side":"buy","accFillSz":"2","avgPx":"35001","fee":"-0.35"}]}"#,
            );

        let handle = adapter(transport.clone()).place_entry_order(&spec()).await.unwrap();
        assert_eq!(handle.filled_quantity, dec!(0.02));
        assert_eq!(handle.fee, dec!(0.35));

        let order = &transport.requests()[1];
        let body: Value = serde_json::from_str(order.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["instId"], "BTC-USDT-SWAP");
        assert_eq!(body["sz"], "2");
        assert_eq!(order.header("OK-ACCESS-PASSPHRASE"), Some("phrase"));
        assert_eq!(order.header("OK-ACCESS-TIMESTAMP"), Some("2024-01-02T03:04:05.000Z"));

        let prehash = format!(
            "2024-01-02T03:04:05.000ZPOST/api/v5/trade/order{}",
            order.body.as_deref().unwrap()
        );
        assert_eq!(
            order.header("OK-ACCESS-SIGN"),
            Some(sign_base64("secret", &prehash).unwrap().as_str())
        );
    }

    #[tokio::test]
    async fn test_item_code_wins_over_envelope() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"code":"0","data":[{}]}"#)
            .push(
                200,
                r#"{"code":"1","msg":"Operation failed.","data":[{"sCode":"51008","sMsg":"Insufficient margin"}]}"#,
            );

        let err = adapter(transport).place_entry_order(&spec()).await.unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::InsufficientMargin);
        assert_eq!(err.code.as_deref(), Some("51008"));
    }

    #[tokio::test]
    async fn test_protection_uses_algo_orders() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"code":"0","data":[{"algoId":"a-1","sCode":"0"}]}"#)
            .push(200, r#"{"code":"1","data":[{"sCode":"51016","sMsg":"Duplicated clOrdId"}]}"#)
            .push(200, r#"{"code":"0","data":[{"algoId":"a-2"}]}"#);

        let spec = spec();
        let handle = accepted_entry(ExchangeId::Okx, &spec, "o-9".into(), Err(ExchangeError::timeout("")));
        let placed = adapter(transport.clone())
            .place_protection(&handle, &spec.protection_request(dec!(0.02)))
            .await
            .unwrap();
        assert_eq!(placed.stop_loss_order_id.as_deref(), Some("a-1"));
        assert_eq!(placed.take_profit_order_id.as_deref(), Some("a-2"));

        let requests = transport.requests();
        let sl: Value = serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(sl["slTriggerPx"], "34000");
        assert_eq!(sl["side"], "sell");
        assert!(requests[2].query.starts_with("algoClOrdId="));
    }

    #[tokio::test]
    async fn test_effective_algo_reads_spawned_order() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push(200, r#"{"code":"0","data":[{"algoId":"a-1","state":"live"}]}"#)
            .push(200, r#"{"code":"0","data":[{"algoId":"a-2","state":"effective","ordId":"o-77"}]}"#)
            .push(
                200,
                r#"{"code":"0","data":[{"ordId":"o-77","side":"sell","accFillSz":"2","avgPx":"37010","fee":"-0.37"}]}"#,
            );

        let protection = ProtectionResult {
            stop_loss_order_id: Some("a-1".into()),
            take_profit_order_id: Some("a-2".into()),
        };
        let triggered = adapter(transport.clone())
            .query_protection("BTCUSDT", &protection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(triggered.leg, OrderLeg::TakeProfit);
        assert_eq!(triggered.fill.order_id, "a-2");
        assert_eq!(triggered.fill.price, dec!(37010));
        assert_eq!(triggered.fill.quantity, dec!(0.02));
        assert_eq!(triggered.fill.fee, dec!(0.37));

        let requests = transport.requests();
        assert!(requests[2].query.contains("ordId=o-77"));
        assert!(requests[2].query.contains("instId=BTC-USDT-SWAP"));
    }
}
