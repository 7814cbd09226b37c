use async_trait::async_trait;
use hlkit_core::prelude::*;
use hlkit_exchange::mock::MockTransport;
use hlkit_exchange::{ConnectionEvent, ConnectionState, EventKind, RestClient};
use hlkit_hyperliquid::*;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const ACCOUNT: &str = "0x00000000000000000000000000000000000000aa";

/// Answers `/info` and `/exchange` requests the way the venue would.
struct FakeVenue {
    posted: Mutex<Vec<(String, Value)>>,
}

impl FakeVenue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            posted: Mutex::new(Vec::new()),
        })
    }

    fn posted_types(&self) -> Vec<String> {
        self.posted
            .lock()
            .iter()
            .map(|(endpoint, body)| {
                let kind = body
                    .get("type")
                    .or_else(|| body.get("action").and_then(|a| a.get("type")))
                    .and_then(Value::as_str)
                    .unwrap_or("?");
                format!("{}:{}", endpoint, kind)
            })
            .collect()
    }

    fn last_body(&self) -> Value {
        self.posted.lock().last().map(|(_, body)| body.clone()).unwrap_or(Value::Null)
    }
}

#[async_trait]
impl RestClient for FakeVenue {
    async fn post(&self, endpoint: &str, body: &Value, _weight: u32) -> Result<Value> {
        self.posted.lock().push((endpoint.to_string(), body.clone()));

        match (endpoint, body.get("type").and_then(Value::as_str)) {
            ("/info", Some("meta")) => Ok(json!({
                "universe": [
                    {"name": "BTC", "szDecimals": 5, "maxLeverage": 50},
                    {"name": "ETH", "szDecimals": 4, "maxLeverage": 50}
                ]
            })),
            ("/info", Some("spotMeta")) => Ok(json!({
                "tokens": [{"name": "PURR", "index": 0}, {"name": "USDC", "index": 1}],
                "universe": [{"name": "PURR/USDC", "tokens": [0, 1], "index": 0}]
            })),
            ("/info", Some("l2Book")) => Ok(json!({
                "coin": body["coin"],
                "time": 1700000000000u64,
                "levels": [[{"px": "64000.0", "sz": "0.25", "n": 1}], [{"px": "64001.5", "sz": "1", "n": 2}]]
            })),
            ("/exchange", _) => Ok(json!({
                "status": "ok",
                "response": {"type": "order", "data": {"statuses": [{"resting": {"oid": 1001}}]}}
            })),
            _ => Err(HlError::Api(format!("unexpected request {} {}", endpoint, body))),
        }
    }
}

struct StaticSigner;

#[async_trait]
impl Signer for StaticSigner {
    async fn sign(&self, _action: &Value, _context: &SigningContext) -> Result<Signature> {
        Ok(Signature {
            r: "0x1".to_string(),
            s: "0x2".to_string(),
            v: 28,
        })
    }
}

fn client(venue: &Arc<FakeVenue>, transport: &MockTransport) -> HyperliquidClient {
    HyperliquidClient::builder()
        .network(Network::Testnet)
        .rest_client(Arc::clone(venue) as Arc<dyn RestClient>)
        .transport(Arc::new(transport.clone()))
        .signer(Arc::new(StaticSigner), ACCOUNT)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_rest_flow_resolves_symbols_end_to_end() {
    let venue = FakeVenue::new();
    let transport = MockTransport::new();
    let client = client(&venue, &transport);

    client.initialize().await.unwrap();
    assert_eq!(client.symbols().symbols(AssetClass::Perp), vec!["BTC-PERP", "ETH-PERP"]);

    let book = client.info().l2_book("BTC-PERP").await.unwrap();
    assert_eq!(book.coin, "BTC-PERP");
    assert_eq!(book.best_ask(), Some(dec!(64001.5)));
    assert_eq!(venue.last_body(), json!({"type": "l2Book", "coin": "BTC"}));

    let exchange = client.exchange().expect("signer configured");
    let placed = exchange
        .place_order(&OrderRequest::limit("PURR-USDC", true, dec!(0.25), dec!(40)))
        .await
        .unwrap();
    assert_eq!(placed.response["data"]["statuses"][0]["resting"]["oid"], json!(1001));

    let envelope = venue.last_body();
    assert_eq!(envelope["action"]["orders"][0]["a"], json!(10_000));
    assert_eq!(envelope["signature"]["v"], json!(28));

    assert!(matches!(
        exchange.place_order(&OrderRequest::limit("SOL-PERP", true, dec!(1), dec!(1))).await,
        Err(HlError::UnknownAsset(_))
    ));

    let mut posted = venue.posted_types();
    posted[..2].sort();
    assert_eq!(posted, vec!["/info:meta", "/info:spotMeta", "/info:l2Book", "/exchange:order"]);

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_are_replayed_after_reconnect() {
    let venue = FakeVenue::new();
    let transport = MockTransport::new();
    let client = client(&venue, &transport);
    client.initialize().await.unwrap();

    let books = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&books);
    client
        .ws()
        .subscribe_l2_book("ETH", move |book| sink.lock().push(book))
        .await
        .unwrap();
    client.ws().subscribe_all_mids(|_| {}).await.unwrap();
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.sent_with_method("subscribe").len(), 2);

    transport.clear_sent();
    transport.drop_connection();
    sleep(Duration::from_millis(1_500)).await;

    assert_eq!(transport.connect_count(), 2);
    assert_eq!(client.connection().state(), ConnectionState::Open);
    let mut replayed: Vec<String> = transport
        .sent_with_method("subscribe")
        .iter()
        .map(|frame| frame["subscription"]["type"].as_str().unwrap_or_default().to_string())
        .collect();
    replayed.sort();
    assert_eq!(replayed, vec!["allMids", "l2Book"]);

    transport.push_json(&json!({
        "channel": "l2Book",
        "data": {"coin": "ETH", "time": 2, "levels": [[{"px": "3100", "sz": "2", "n": 1}], []]}
    }));
    sleep(Duration::from_millis(10)).await;
    assert_eq!(books.lock().len(), 1);
    assert_eq!(books.lock()[0].coin, "ETH-PERP");

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_needs_explicit_connect() {
    let venue = FakeVenue::new();
    let transport = MockTransport::new();
    let client = client(&venue, &transport);
    client.initialize().await.unwrap();

    let terminal = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&terminal);
    client
        .connection()
        .events()
        .on(EventKind::MaxReconnectAttemptsReached, move |event| {
            if let ConnectionEvent::MaxReconnectAttemptsReached { attempts } = event {
                sink.lock().push(*attempts);
            }
        });

    client.ws().subscribe_trades("BTC", |_| {}).await.unwrap();
    transport.set_fail_connects(true);
    transport.drop_connection();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(*terminal.lock(), vec![5]);
    assert_eq!(transport.connect_count(), 6);
    assert_eq!(client.connection().state(), ConnectionState::Closed);
    assert_eq!(client.ws().active_subscriptions(), vec!["trades:coin=BTC"]);

    transport.set_fail_connects(false);
    transport.clear_sent();
    client.connection().connect().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    let replayed = transport.sent_with_method("subscribe");
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0]["subscription"], json!({"type": "trades", "coin": "BTC"}));

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribing_last_listener_releases_capacity() {
    let venue = FakeVenue::new();
    let transport = MockTransport::new();
    let client = client(&venue, &transport);
    client.initialize().await.unwrap();

    let first = client.ws().subscribe_trades("BTC", |_| {}).await.unwrap();
    let second = client.ws().subscribe_trades("BTC-PERP", |_| {}).await.unwrap();
    assert_eq!(first.key(), second.key());
    assert_eq!(client.connection().subscription_count(), 1);
    assert_eq!(transport.sent_with_method("subscribe").len(), 1);

    client.ws().unsubscribe(&first).await.unwrap();
    assert!(transport.sent_with_method("unsubscribe").is_empty());

    client.ws().unsubscribe(&second).await.unwrap();
    assert_eq!(transport.sent_with_method("unsubscribe").len(), 1);
    assert_eq!(client.connection().subscription_count(), 0);

    client.shutdown().await.unwrap();
}
