use hlkit_core::{HlError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::events::{ConnectionEvent, EventKind, ListenerId};
use crate::traits::MessageTransform;
use crate::websocket::ConnectionManager;

/// A logical server-side feed: a subscription type plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    kind: String,
    channel: String,
    params: BTreeMap<String, Value>,
}

impl Subscription {
    /// Inbound messages are expected on a channel named like the subscription type unless
    /// overridden with [`Subscription::on_channel`].
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            channel: kind.clone(),
            kind,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Canonical identity: type plus parameters in sorted order.
    pub fn key(&self) -> String {
        if self.params.is_empty() {
            return self.kind.clone();
        }

        let params: Vec<String> = self
            .params
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}={}", key, s),
                other => format!("{}={}", key, other),
            })
            .collect();
        format!("{}:{}", self.kind, params.join(","))
    }

    pub fn to_wire(&self) -> Value {
        let mut body = Map::new();
        body.insert("type".to_string(), Value::String(self.kind.clone()));
        for (key, value) in &self.params {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }

    pub fn subscribe_message(&self) -> Value {
        json!({ "method": "subscribe", "subscription": self.to_wire() })
    }

    pub fn unsubscribe_message(&self) -> Value {
        json!({ "method": "unsubscribe", "subscription": self.to_wire() })
    }

    /// Whether an inbound message belongs to this feed: same channel, and every filtering
    /// parameter agrees with the payload when the payload carries that field.
    pub fn matches(&self, message: &Value) -> bool {
        if message.get("channel").and_then(Value::as_str) != Some(self.channel.as_str()) {
            return false;
        }

        let data = message.get("data").unwrap_or(&Value::Null);
        let probe = match data {
            Value::Array(items) => items.first().unwrap_or(&Value::Null),
            other => other,
        };

        ROUTING_FIELDS.iter().all(|(param, fields, ignore_case)| {
            match self.param(param).and_then(Value::as_str) {
                Some(expected) => field_agrees(probe, fields, expected, *ignore_case),
                None => true,
            }
        })
    }
}

/// Subscription parameter, payload fields that may carry it, case-insensitive.
const ROUTING_FIELDS: &[(&str, &[&str], bool)] = &[
    ("coin", &["coin", "s"], false),
    ("interval", &["i"], false),
    ("user", &["user"], true),
];

fn field_agrees(data: &Value, candidates: &[&str], expected: &str, ignore_case: bool) -> bool {
    match candidates.iter().find_map(|field| data.get(*field).and_then(Value::as_str)) {
        Some(actual) if ignore_case => actual.eq_ignore_ascii_case(expected),
        Some(actual) => actual == expected,
        None => true,
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

pub type MessageListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Returned by [`SubscriptionRegistry::subscribe`]; pass back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    key: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

struct Registration {
    subscription: Subscription,
    listeners: Vec<(u64, MessageListener)>,
    /// Connection generation the last wire subscribe went out on.
    sent_on: Option<u64>,
}

struct RegistryInner {
    connection: Arc<ConnectionManager>,
    transform: Option<Arc<dyn MessageTransform>>,
    registrations: RwLock<HashMap<String, Registration>>,
    /// Serializes wire traffic so each key has at most one subscribe in flight.
    ops: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

/// De-duplicating fan-out of server feeds to local listeners.
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
    event_listeners: Vec<(EventKind, ListenerId)>,
}

impl SubscriptionRegistry {
    pub fn new(connection: Arc<ConnectionManager>, transform: Option<Arc<dyn MessageTransform>>) -> Self {
        let inner = Arc::new(RegistryInner {
            connection: Arc::clone(&connection),
            transform,
            registrations: RwLock::new(HashMap::new()),
            ops: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        });

        let events = connection.events();

        let weak: Weak<RegistryInner> = Arc::downgrade(&inner);
        let message_listener = events.on(EventKind::Message, move |event| {
            if let (Some(inner), ConnectionEvent::Message(message)) = (weak.upgrade(), event) {
                inner.dispatch(message);
            }
        });

        let weak: Weak<RegistryInner> = Arc::downgrade(&inner);
        let reconnect_listener = events.on(EventKind::Reconnect, move |_| {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move { inner.resubscribe_all().await });
            }
        });

        Self {
            inner,
            event_listeners: vec![
                (EventKind::Message, message_listener),
                (EventKind::Reconnect, reconnect_listener),
            ],
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.inner.connection
    }

    /// Attaches `listener` to `subscription`, sending a wire subscribe only for a new key.
    pub async fn subscribe<F>(&self, subscription: Subscription, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let _guard = inner.ops.lock().await;
        let key = subscription.key();
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle { key: key.clone(), id };
        let listener: MessageListener = Arc::new(listener);

        {
            let mut registrations = inner.registrations.write();
            if let Some(registration) = registrations.get_mut(&key) {
                registration.listeners.push((id, listener));
                debug!("Attached listener {} to existing subscription {}", id, key);
                return Ok(handle);
            }
        }

        let connection = &inner.connection;
        if !connection.increment_subscription_count() {
            warn!("Refusing subscription {}: limit of {} reached", key, connection.max_subscriptions());
            return Err(HlError::SubscriptionLimitExceeded(connection.max_subscriptions()));
        }

        let message = subscription.subscribe_message();
        inner.registrations.write().insert(
            key.clone(),
            Registration {
                subscription,
                listeners: vec![(id, listener)],
                sent_on: None,
            },
        );

        let sent = match connection.connect().await {
            Ok(()) => connection.send_message(&message).await,
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            inner.registrations.write().remove(&key);
            connection.decrement_subscription_count();
            warn!("Failed to subscribe {}: {}", key, e);
            return Err(e);
        }

        if let Some(registration) = inner.registrations.write().get_mut(&key) {
            registration.sent_on = Some(connection.generation());
        }
        info!("Subscribed to {}", key);
        Ok(handle)
    }

    /// Like [`subscribe`](Self::subscribe) but decodes each message's `data` into `T`.
    /// A message that fails to decode is logged and skipped.
    pub async fn subscribe_typed<T, F>(&self, subscription: Subscription, listener: F) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let key = subscription.key();
        self.subscribe(subscription, move |message| {
            let data = message.get("data").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<T>(data) {
                Ok(decoded) => listener(decoded),
                Err(e) => warn!("Failed to decode message for {}: {}", key, e),
            }
        })
        .await
    }

    /// Detaches one listener. Returns `false` if the handle was already released.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        let inner = &self.inner;
        let _guard = inner.ops.lock().await;

        let released = {
            let mut registrations = inner.registrations.write();
            let Some(registration) = registrations.get_mut(&handle.key) else {
                return Ok(false);
            };

            let before = registration.listeners.len();
            registration.listeners.retain(|(id, _)| *id != handle.id);
            if registration.listeners.len() == before {
                return Ok(false);
            }

            if registration.listeners.is_empty() {
                registrations.remove(&handle.key).map(|r| r.subscription)
            } else {
                None
            }
        };

        if let Some(subscription) = released {
            inner.connection.decrement_subscription_count();
            if inner.connection.is_connected() {
                if let Err(e) = inner.connection.send_message(&subscription.unsubscribe_message()).await {
                    warn!("Failed to send unsubscribe for {}: {}", handle.key, e);
                }
            }
            info!("Unsubscribed from {}", handle.key);
        }

        Ok(true)
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.registrations.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .registrations
            .read()
            .get(key)
            .map_or(0, |r| r.listeners.len())
    }

    /// Re-sends every active subscription; the server keeps none across a reconnect.
    pub async fn resubscribe_all(&self) {
        self.inner.resubscribe_all().await;
    }
}

impl RegistryInner {
    fn dispatch(&self, message: &Value) {
        // Route on the raw payload; the transform may rewrite the fields routing reads.
        let listeners: Vec<MessageListener> = self
            .registrations
            .read()
            .values()
            .filter(|registration| registration.subscription.matches(message))
            .flat_map(|registration| registration.listeners.iter().map(|(_, l)| Arc::clone(l)))
            .collect();

        if listeners.is_empty() {
            return;
        }

        let message = match &self.transform {
            Some(transform) => transform.transform(message),
            None => message.clone(),
        };

        for listener in listeners {
            listener(&message);
        }
    }

    async fn resubscribe_all(&self) {
        let _guard = self.ops.lock().await;
        let generation = self.connection.generation();
        // A subscribe that opened this socket has already sent its own frame.
        let subscriptions: Vec<Subscription> = self
            .registrations
            .read()
            .values()
            .filter(|registration| registration.sent_on != Some(generation))
            .map(|registration| registration.subscription.clone())
            .collect();

        info!("Re-issuing {} subscriptions after reconnect", subscriptions.len());
        for subscription in subscriptions {
            let key = subscription.key();
            match self.connection.send_message(&subscription.subscribe_message()).await {
                Ok(()) => {
                    if let Some(registration) = self.registrations.write().get_mut(&key) {
                        registration.sent_on = Some(generation);
                    }
                }
                Err(e) => warn!("Failed to re-subscribe {}: {}", key, e),
            }
        }
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        let events = self.inner.connection.events();
        for (kind, id) in self.event_listeners.drain(..) {
            events.off(kind, id);
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active_keys", &self.active_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::TransportSelector;
    use crate::websocket::ConnectionOptions;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::time::Duration;
    use url::Url;

    fn registry_with(transport: &MockTransport, max_subscriptions: usize) -> SubscriptionRegistry {
        let mut options = ConnectionOptions::new(Url::parse("wss://example.test/ws").unwrap());
        options.max_subscriptions = max_subscriptions;
        let connection = Arc::new(ConnectionManager::new(
            options,
            TransportSelector::new().with_factory(Arc::new(transport.clone())),
        ));
        SubscriptionRegistry::new(connection, None)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_canonical_key_and_wire_format() {
        let a = Subscription::new("l2Book").with_param("nSigFigs", 5).with_param("coin", "BTC");
        let b = Subscription::new("l2Book").with_param("coin", "BTC").with_param("nSigFigs", 5);
        assert_eq!(a.key(), "l2Book:coin=BTC,nSigFigs=5");
        assert_eq!(a.key(), b.key());
        assert_eq!(Subscription::new("allMids").key(), "allMids");

        assert_eq!(
            a.subscribe_message(),
            json!({"method": "subscribe", "subscription": {"type": "l2Book", "coin": "BTC", "nSigFigs": 5}})
        );
        assert_eq!(a.unsubscribe_message()["method"], "unsubscribe");
    }

    #[test]
    fn test_message_routing() {
        let btc = Subscription::new("trades").with_param("coin", "BTC");
        assert!(btc.matches(&json!({"channel": "trades", "data": [{"coin": "BTC", "px": "1"}]})));
        assert!(!btc.matches(&json!({"channel": "trades", "data": [{"coin": "ETH", "px": "1"}]})));
        assert!(!btc.matches(&json!({"channel": "l2Book", "data": {"coin": "BTC"}})));

        let candle = Subscription::new("candle").with_param("coin", "ETH").with_param("interval", "1m");
        assert!(candle.matches(&json!({"channel": "candle", "data": {"s": "ETH", "i": "1m"}})));
        assert!(!candle.matches(&json!({"channel": "candle", "data": {"s": "ETH", "i": "1h"}})));

        let user = Subscription::new("userEvents")
            .with_param("user", "0xAbC0000000000000000000000000000000000001")
            .on_channel("user");
        assert!(user.matches(&json!({"channel": "user", "data": {"fills": []}})));
        assert!(!user.matches(&json!({"channel": "userEvents", "data": {}})));

        let fills = Subscription::new("userFills").with_param("user", "0xabc0000000000000000000000000000000000001");
        assert!(fills.matches(&json!({
            "channel": "userFills",
            "data": {"user": "0xABC0000000000000000000000000000000000001", "fills": []}
        })));
    }

    #[tokio::test]
    async fn test_duplicate_subscriptions_share_one_wire_message() {
        let transport = MockTransport::new();
        let registry = registry_with(&transport, 1000);
        let sub = || Subscription::new("l2Book").with_param("coin", "BTC");

        let first = registry.subscribe(sub(), |_| {}).await.unwrap();
        let second = registry.subscribe(sub(), |_| {}).await.unwrap();
        let third = registry.subscribe(sub(), |_| {}).await.unwrap();
        assert_eq!(transport.sent_with_method("subscribe").len(), 1);
        assert_eq!(registry.listener_count("l2Book:coin=BTC"), 3);
        assert_eq!(registry.connection().subscription_count(), 1);

        assert!(registry.unsubscribe(&first).await.unwrap());
        assert!(registry.unsubscribe(&second).await.unwrap());
        assert!(transport.sent_with_method("unsubscribe").is_empty());

        assert!(registry.unsubscribe(&third).await.unwrap());
        assert_eq!(transport.sent_with_method("unsubscribe").len(), 1);
        assert!(!registry.unsubscribe(&third).await.unwrap());
        assert_eq!(registry.connection().subscription_count(), 0);
        assert!(registry.active_keys().is_empty());

        // A fresh subscribe after full release goes back on the wire.
        registry.subscribe(sub(), |_| {}).await.unwrap();
        assert_eq!(transport.sent_with_method("subscribe").len(), 2);
    }

    #[tokio::test]
    async fn test_subscription_limit() {
        let transport = MockTransport::new();
        let registry = registry_with(&transport, 2);

        registry.subscribe(Subscription::new("trades").with_param("coin", "BTC"), |_| {}).await.unwrap();
        let eth = registry
            .subscribe(Subscription::new("trades").with_param("coin", "ETH"), |_| {})
            .await
            .unwrap();

        let refused = registry
            .subscribe(Subscription::new("trades").with_param("coin", "SOL"), |_| {})
            .await;
        assert!(matches!(refused, Err(HlError::SubscriptionLimitExceeded(2))));
        assert_eq!(transport.sent_with_method("subscribe").len(), 2);

        // Existing keys still accept listeners at the cap.
        registry.subscribe(Subscription::new("trades").with_param("coin", "BTC"), |_| {}).await.unwrap();

        registry.unsubscribe(&eth).await.unwrap();
        registry
            .subscribe(Subscription::new("trades").with_param("coin", "SOL"), |_| {})
            .await
            .unwrap();
        assert_eq!(registry.active_keys(), vec!["trades:coin=BTC", "trades:coin=SOL"]);
    }

    #[tokio::test]
    async fn test_failed_connect_releases_capacity() {
        let transport = MockTransport::new();
        transport.set_fail_connects(true);
        let registry = registry_with(&transport, 10);

        let result = registry.subscribe(Subscription::new("allMids"), |_| {}).await;
        assert!(result.is_err());
        assert_eq!(registry.connection().subscription_count(), 0);
        assert!(registry.active_keys().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_to_matching_listeners() {
        let transport = MockTransport::new();
        let registry = registry_with(&transport, 1000);
        let btc_hits = Arc::new(Mutex::new(Vec::new()));
        let eth_hits = Arc::new(Mutex::new(0));

        for _ in 0..2 {
            let hits = Arc::clone(&btc_hits);
            registry
                .subscribe(Subscription::new("l2Book").with_param("coin", "BTC"), move |m| {
                    hits.lock().push(m["data"]["time"].clone());
                })
                .await
                .unwrap();
        }
        let hits = Arc::clone(&eth_hits);
        registry
            .subscribe(Subscription::new("l2Book").with_param("coin", "ETH"), move |_| {
                *hits.lock() += 1;
            })
            .await
            .unwrap();

        transport.push_json(&json!({"channel": "l2Book", "data": {"coin": "BTC", "time": 1}}));
        transport.push_json(&json!({"channel": "subscriptionResponse", "data": {}}));
        settle().await;

        assert_eq!(*btc_hits.lock(), vec![json!(1), json!(1)]);
        assert_eq!(*eth_hits.lock(), 0);
    }

    #[derive(Debug, Deserialize)]
    struct Mids {
        mids: HashMap<String, String>,
    }

    #[tokio::test]
    async fn test_typed_decode_failures_are_isolated() {
        let transport = MockTransport::new();
        let registry = registry_with(&transport, 1000);
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&received);

        registry
            .subscribe_typed(Subscription::new("allMids"), move |mids: Mids| {
                r.lock().push(mids.mids.len());
            })
            .await
            .unwrap();

        transport.push_json(&json!({"channel": "allMids", "data": {"mids": {"BTC": "1"}}}));
        transport.push_json(&json!({"channel": "allMids", "data": {"unexpected": true}}));
        transport.push_json(&json!({"channel": "allMids", "data": {"mids": {"BTC": "1", "ETH": "2"}}}));
        settle().await;

        assert_eq!(*received.lock(), vec![1, 2]);
    }

    struct Tagger;

    impl MessageTransform for Tagger {
        fn transform(&self, message: &Value) -> Value {
            let mut out = message.clone();
            out["data"]["coin"] = json!("BTC-PERP");
            out
        }
    }

    #[tokio::test]
    async fn test_transform_applies_after_routing() {
        let transport = MockTransport::new();
        let url = Url::parse("wss://example.test/ws").unwrap();
        let connection = Arc::new(ConnectionManager::new(
            ConnectionOptions::new(url),
            TransportSelector::new().with_factory(Arc::new(transport.clone())),
        ));
        let registry = SubscriptionRegistry::new(connection, Some(Arc::new(Tagger)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);

        registry
            .subscribe(Subscription::new("l2Book").with_param("coin", "BTC"), move |m| {
                s.lock().push(m["data"]["coin"].clone());
            })
            .await
            .unwrap();

        transport.push_json(&json!({"channel": "l2Book", "data": {"coin": "BTC"}}));
        settle().await;
        assert_eq!(*seen.lock(), vec![json!("BTC-PERP")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replays_active_subscriptions() {
        let transport = MockTransport::new();
        let registry = registry_with(&transport, 1000);

        registry.subscribe(Subscription::new("allMids"), |_| {}).await.unwrap();
        registry
            .subscribe(Subscription::new("trades").with_param("coin", "BTC"), |_| {})
            .await
            .unwrap();
        let gone = registry
            .subscribe(Subscription::new("trades").with_param("coin", "ETH"), |_| {})
            .await
            .unwrap();
        registry.unsubscribe(&gone).await.unwrap();
        transport.clear_sent();

        transport.drop_connection();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        settle().await;

        let mut replayed: Vec<String> = transport
            .sent_with_method("subscribe")
            .iter()
            .map(|m| m["subscription"]["type"].as_str().unwrap_or_default().to_string())
            .collect();
        replayed.sort();
        assert_eq!(replayed, vec!["allMids", "trades"]);
        assert_eq!(registry.connection().subscription_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_that_reopens_socket_sends_one_frame() {
        let transport = MockTransport::new();
        let registry = registry_with(&transport, 1000);

        registry.subscribe(Subscription::new("allMids"), |_| {}).await.unwrap();
        registry.connection().close().await.unwrap();
        transport.clear_sent();

        // Reopening emits Reconnect, so a replay runs right after this subscribe.
        registry
            .subscribe(Subscription::new("trades").with_param("coin", "BTC"), |_| {})
            .await
            .unwrap();
        settle().await;

        let frames = transport.sent_with_method("subscribe");
        let trades = frames
            .iter()
            .filter(|m| m["subscription"] == json!({"type": "trades", "coin": "BTC"}))
            .count();
        let mids = frames
            .iter()
            .filter(|m| m["subscription"]["type"] == json!("allMids"))
            .count();
        assert_eq!(trades, 1);
        assert_eq!(mids, 1);
        assert_eq!(transport.connect_count(), 2);
    }
}
