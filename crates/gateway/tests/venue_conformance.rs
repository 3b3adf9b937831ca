//! Cross-venue checks through the public gateway surface
//!
//! Every live adapter is driven over a scripted transport: the entry order
//! must carry the idempotency-derived client id in the venue's own field,
//! and a credential failure must surface as the shared `Auth` kind.

use copytrade_clock::ManualClock;
use copytrade_core::{AccountId, ExchangeId, IdempotencyKey, OrderSpec, Side, SignalId};
use copytrade_gateway::{
    AdapterOptions, Credentials, GatewayError, PaperExchange, ScriptedTransport, connect,
    connect_with_transport,
};
use copytrade_ports::{ExchangeAdapter, ExchangeErrorKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn spec() -> OrderSpec {
    OrderSpec {
        key: IdempotencyKey::derive(SignalId(42), AccountId::nil()),
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

struct Venue {
    exchange: ExchangeId,
    /// Response accepted by the venue's set-leverage call, if it has one
    leverage_ok: Option<&'static str>,
    auth_failure: &'static str,
    client_id_field: &'static str,
}

fn venues() -> Vec<Venue> {
    vec![
        Venue {
            exchange: ExchangeId::Binance,
            leverage_ok: Some(r#"{"symbol":"BTCUSDT","leverage":10}"#),
            auth_failure: r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions for action."}"#,
            client_id_field: "newClientOrderId",
        },
        Venue {
            exchange: ExchangeId::Bybit,
            leverage_ok: Some(r#"{"retCode":0,"retMsg":"OK","result":{}}"#),
            auth_failure: r#"{"retCode":10003,"retMsg":"API key is invalid."}"#,
            client_id_field: "orderLinkId",
        },
        Venue {
            exchange: ExchangeId::Okx,
            leverage_ok: Some(r#"{"code":"0","msg":"","data":[{"lever":"10"}]}"#),
            auth_failure: r#"{"code":"50111","msg":"Invalid OK-ACCESS-KEY","data":[]}"#,
            client_id_field: "clOrdId",
        },
        Venue {
            exchange: ExchangeId::Bitget,
            leverage_ok: Some(r#"{"code":"00000","msg":"success","data":{}}"#),
            auth_failure: r#"{"code":"40037","msg":"Apikey does not exist"}"#,
            client_id_field: "clientOid",
        },
        Venue {
            exchange: ExchangeId::Mexc,
            leverage_ok: None,
            auth_failure: r#"{"success":false,"code":402,"message":"Api key expired"}"#,
            client_id_field: "externalOid",
        },
    ]
}

#[tokio::test]
async fn test_auth_failure_is_normalized_on_every_venue() {
    let _ = env_logger::builder().is_test(true).try_init();
    let spec = spec();

    for venue in venues() {
        let transport = Arc::new(ScriptedTransport::new());
        if let Some(ok) = venue.leverage_ok {
            transport.push(200, ok);
        }
        transport.push(401, venue.auth_failure);

        let adapter = connect_with_transport(
            venue.exchange,
            Credentials::new("key", "secret").with_passphrase("phrase"),
            AdapterOptions::default(),
            transport.clone(),
            ManualClock::new(),
        );
        assert_eq!(adapter.exchange(), venue.exchange);

        let err = adapter.place_entry_order(&spec).await.unwrap_err();
        assert_eq!(err.kind, ExchangeErrorKind::Auth, "{}", venue.exchange);
        assert!(!err.is_transient());

        let entry = transport.requests().pop().unwrap();
        let payload = format!("{}{}", entry.query, entry.body.unwrap_or_default());
        assert!(
            payload.contains(venue.client_id_field),
            "{} entry lacks {}",
            venue.exchange,
            venue.client_id_field
        );
        assert!(payload.contains(&spec.client_order_id()));
    }
}

#[test]
fn test_connect_requires_credentials_for_live_venues() {
    for exchange in ExchangeId::LIVE {
        let result = connect(
            exchange,
            Credentials::new("", ""),
            AdapterOptions::default(),
            ManualClock::new(),
        );
        assert!(matches!(result, Err(GatewayError::MissingCredentials(e)) if e == exchange));
    }

    let paper = connect(
        ExchangeId::Paper,
        Credentials::new("", ""),
        AdapterOptions::default(),
        ManualClock::new(),
    )
    .unwrap();
    assert_eq!(paper.exchange(), ExchangeId::Paper);
}

#[tokio::test]
async fn test_paper_round_trip() {
    let paper = PaperExchange::new(ExchangeId::Paper, dec!(10000));
    let spec = spec();

    let handle = paper.place_entry_order(&spec).await.unwrap();
    assert_eq!(handle.avg_price, Some(dec!(35000)));

    let placed = paper
        .place_protection(&handle, &spec.protection_request(handle.filled_quantity))
        .await
        .unwrap();
    assert!(placed.is_complete());
    assert_eq!(paper.resting_orders(), 2);

    paper.set_mark_price("BTCUSDT", dec!(36000));
    let fill = paper
        .close_position(&copytrade_core::CloseRequest {
            key: spec.key.clone(),
            symbol: spec.symbol.clone(),
            side: spec.side,
            quantity: handle.filled_quantity,
        })
        .await
        .unwrap();
    assert_eq!(fill.price, dec!(36000));
    assert_eq!(fill.quantity, dec!(0.014));
    assert!(fill.fee > Decimal::ZERO);
    assert_eq!(paper.resting_orders(), 0);
}
