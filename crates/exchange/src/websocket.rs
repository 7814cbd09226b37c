use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use hlkit_core::config::ConnectionSettings;
use hlkit_core::{HlError, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::events::{ConnectionEvent, EventEmitter};
use crate::heartbeat::HeartbeatMonitor;
use crate::traits::{TransportConnection, TransportEvent, TransportFactory, TransportSink, TransportStream};
use crate::transport::TransportSelector;

type PendingConnect = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub url: Url,
    pub backoff: BackoffPolicy,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_subscriptions: usize,
}

impl ConnectionOptions {
    pub fn new(url: Url) -> Self {
        Self::from_settings(url, &ConnectionSettings::default())
    }

    pub fn from_settings(url: Url, settings: &ConnectionSettings) -> Self {
        Self {
            url,
            backoff: BackoffPolicy::from_settings(settings),
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
            max_subscriptions: settings.max_subscriptions,
        }
    }
}

#[derive(Debug)]
struct ConnectionStatus {
    state: ConnectionState,
    reconnect_attempts: u32,
    /// Bumped on every open and every explicit close; tasks of older generations go quiet.
    generation: u64,
    pending: Option<PendingConnect>,
    opened_before: bool,
    max_reached_reported: bool,
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for handle in [self.reader.take(), self.heartbeat.take(), self.reconnect.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    options: ConnectionOptions,
    selector: TransportSelector,
    status: Mutex<ConnectionStatus>,
    sink: tokio::sync::Mutex<Option<Box<dyn TransportSink>>>,
    heartbeat: Arc<HeartbeatMonitor>,
    subscription_count: AtomicUsize,
    events: EventEmitter,
    tasks: Mutex<Tasks>,
}

/// One logical streaming connection that survives physical disconnects.
///
/// Unexpected closes and heartbeat timeouts go through the same backoff schedule. When the
/// budget is spent a terminal `maxReconnectAttemptsReached` event is emitted and the
/// manager stays closed until [`ConnectionManager::connect`] is called again.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(options: ConnectionOptions, selector: TransportSelector) -> Self {
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            options.heartbeat_interval,
            options.heartbeat_timeout,
        ));

        Self {
            inner: Arc::new(Inner {
                options,
                selector,
                status: Mutex::new(ConnectionStatus {
                    state: ConnectionState::Idle,
                    reconnect_attempts: 0,
                    generation: 0,
                    pending: None,
                    opened_before: false,
                    max_reached_reported: false,
                }),
                sink: tokio::sync::Mutex::new(None),
                heartbeat,
                subscription_count: AtomicUsize::new(0),
                events: EventEmitter::new(),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    /// Resolves once the socket is open. Concurrent callers share one attempt.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut status = self.inner.status.lock();
            if status.state != ConnectionState::Open && status.pending.is_none() {
                // Caller-driven connect supersedes a sleeping reconnect and refills the budget.
                if let Some(handle) = self.inner.tasks.lock().reconnect.take() {
                    handle.abort();
                }
                status.reconnect_attempts = 0;
                status.max_reached_reported = false;
            }
        }
        Inner::connect(&self.inner).await
    }

    pub async fn send_message(&self, payload: &Value) -> Result<()> {
        self.inner.send_message(payload).await
    }

    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.status.lock().reconnect_attempts
    }

    /// Bumped whenever a socket opens or is retired; frames sent under one value went to
    /// the same socket.
    pub fn generation(&self) -> u64 {
        self.inner.status.lock().generation
    }

    pub fn last_heartbeat_ack(&self) -> Instant {
        self.inner.heartbeat.last_ack()
    }

    pub fn url(&self) -> &Url {
        &self.inner.options.url
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    pub fn max_subscriptions(&self) -> usize {
        self.inner.options.max_subscriptions
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscription_count.load(Ordering::SeqCst)
    }

    /// Reserves one subscription slot; `false` once the cap is reached.
    pub fn increment_subscription_count(&self) -> bool {
        let max = self.inner.options.max_subscriptions;
        self.inner
            .subscription_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < max).then_some(count + 1)
            })
            .is_ok()
    }

    pub fn decrement_subscription_count(&self) {
        let _ = self
            .inner
            .subscription_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.tasks.lock().abort_all();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.inner.status.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.options.url.as_str())
            .field("state", &status.state)
            .field("reconnect_attempts", &status.reconnect_attempts)
            .field("subscription_count", &self.subscription_count())
            .finish()
    }
}

impl Inner {
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let pending = {
            let mut status = self.status.lock();
            if status.state == ConnectionState::Open {
                return Ok(());
            }

            if let Some(pending) = status.pending.clone() {
                pending
            } else {
                let factory = self.selector.select()?;
                status.state = ConnectionState::Connecting;

                let this = Arc::clone(self);
                let start_generation = status.generation;
                let attempt = async move {
                    this.open_transport(factory, start_generation)
                        .await
                        .map_err(|e| e.to_string())
                }
                .boxed()
                .shared();

                status.pending = Some(attempt.clone());
                attempt
            }
        };

        pending.await.map_err(HlError::WebSocket)
    }

    async fn open_transport(
        self: Arc<Self>,
        factory: Arc<dyn TransportFactory>,
        start_generation: u64,
    ) -> Result<()> {
        info!("Connecting to {} via {}", self.options.url, factory.name());

        let TransportConnection { sink, stream } = match factory.connect(&self.options.url).await {
            Ok(connection) => connection,
            Err(e) => {
                let mut status = self.status.lock();
                status.pending = None;
                if status.generation == start_generation {
                    status.state = ConnectionState::Closed;
                }
                error!("Failed to open connection: {}", e);
                return Err(e);
            }
        };

        let mut sink_slot = self.sink.lock().await;
        let opened = {
            let mut status = self.status.lock();
            status.pending = None;

            if status.generation == start_generation {
                status.generation += 1;
                status.state = ConnectionState::Open;
                status.max_reached_reported = false;
                let attempt = std::mem::take(&mut status.reconnect_attempts);
                let reopened = std::mem::replace(&mut status.opened_before, true);
                Some((status.generation, attempt, reopened))
            } else {
                None
            }
        };

        let Some((generation, attempt, reopened)) = opened else {
            drop(sink_slot);
            warn!("Connection closed while opening; discarding socket");
            let mut sink = sink;
            let _ = timeout(SINK_CLOSE_TIMEOUT, sink.close()).await;
            return Err(HlError::WebSocket("connection closed while opening".to_string()));
        };
        *sink_slot = Some(sink);
        drop(sink_slot);

        self.heartbeat.reset();
        self.spawn_tasks(stream, generation);

        info!("Connection open (generation {})", generation);
        self.events.emit(&ConnectionEvent::Open);
        if reopened {
            self.events.emit(&ConnectionEvent::Reconnect { attempt });
        }
        Ok(())
    }

    fn spawn_tasks(self: &Arc<Self>, stream: TransportStream, generation: u64) {
        let reader = tokio::spawn(Arc::clone(self).read_loop(stream, generation));

        let pinger = Arc::clone(self);
        let on_timeout = Arc::clone(self);
        let heartbeat = self.heartbeat.start(
            move || {
                let pinger = Arc::clone(&pinger);
                async move { pinger.send_message(&json!({ "method": "ping" })).await }
            },
            move || async move { on_timeout.handle_heartbeat_timeout(generation).await },
        );

        let mut tasks = self.tasks.lock();
        for old in [tasks.reader.replace(reader), tasks.heartbeat.replace(heartbeat)]
            .into_iter()
            .flatten()
        {
            old.abort();
        }
    }

    async fn read_loop(self: Arc<Self>, mut stream: TransportStream, generation: u64) {
        let mut code = None;
        let mut reason = "stream ended".to_string();

        while let Some(event) = stream.next().await {
            match event {
                TransportEvent::Message(text) => self.handle_text(&text),
                TransportEvent::Error(e) => {
                    warn!("Transport error: {}", e);
                    self.events.emit(&ConnectionEvent::Error(e));
                }
                TransportEvent::Closed { code: c, reason: r } => {
                    code = c;
                    reason = r;
                    break;
                }
            }
        }

        self.handle_transport_closed(generation, code, reason).await;
    }

    fn handle_text(&self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding unparseable frame: {}", e);
                self.events
                    .emit(&ConnectionEvent::Error(format!("Failed to parse message: {}", e)));
                return;
            }
        };

        if message.get("channel").and_then(Value::as_str) == Some("pong") {
            self.heartbeat.record_ack();
            return;
        }

        self.events.emit(&ConnectionEvent::Message(message));
    }

    async fn handle_transport_closed(self: &Arc<Self>, generation: u64, code: Option<u16>, reason: String) {
        let unexpected = {
            let status = self.status.lock();
            if status.generation != generation {
                return;
            }
            !matches!(status.state, ConnectionState::Closing | ConnectionState::Closed)
        };

        if let Some(handle) = self.tasks.lock().heartbeat.take() {
            handle.abort();
        }
        self.sink.lock().await.take();

        warn!("Connection closed (code {:?}): {}", code, reason);
        self.events.emit(&ConnectionEvent::Close { code, reason });

        if unexpected {
            self.schedule_reconnect();
        }
    }

    async fn handle_heartbeat_timeout(self: &Arc<Self>, generation: u64) {
        {
            let mut status = self.status.lock();
            if status.generation != generation || status.state != ConnectionState::Open {
                return;
            }
            // Retire the current socket so its reader cannot trigger a second reconnect.
            status.generation += 1;
        }

        if let Some(handle) = self.tasks.lock().reader.take() {
            handle.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = timeout(SINK_CLOSE_TIMEOUT, sink.close()).await;
        }

        self.events.emit(&ConnectionEvent::Close {
            code: None,
            reason: "heartbeat timeout".to_string(),
        });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let policy = self.options.backoff;
        let attempt = {
            let mut status = self.status.lock();
            let attempt = status.reconnect_attempts + 1;

            if policy.exhausted(attempt) {
                status.state = ConnectionState::Closed;
                let first_report = !std::mem::replace(&mut status.max_reached_reported, true);
                drop(status);

                if first_report {
                    error!("Giving up after {} reconnect attempts", policy.max_attempts);
                    self.events.emit(&ConnectionEvent::MaxReconnectAttemptsReached {
                        attempts: policy.max_attempts,
                    });
                }
                return;
            }

            status.reconnect_attempts = attempt;
            status.state = ConnectionState::Connecting;
            attempt
        };

        let delay = policy.delay_for(attempt);
        warn!(
            "Attempting to reconnect ({}/{}) in {:?}",
            attempt, policy.max_attempts, delay
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sleep(delay).await;

            if this.status.lock().state != ConnectionState::Connecting {
                debug!("Reconnect attempt {} cancelled", attempt);
                return;
            }

            match Inner::connect(&this).await {
                Ok(()) => info!("Reconnected successfully on attempt {}", attempt),
                Err(e) => {
                    warn!("Reconnection attempt {} failed: {}", attempt, e);
                    this.schedule_reconnect();
                }
            }
        });

        self.tasks.lock().reconnect = Some(handle);
    }

    async fn send_message(&self, payload: &Value) -> Result<()> {
        if self.status.lock().state != ConnectionState::Open {
            return Err(HlError::NotConnected);
        }

        let text = serde_json::to_string(payload)?;
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => {
                sink.send_text(text).await?;
                debug!("Sent message: {}", payload);
                Ok(())
            }
            None => Err(HlError::NotConnected),
        }
    }

    async fn close(&self) -> Result<()> {
        let was_open = {
            let mut status = self.status.lock();
            let was_open = status.state == ConnectionState::Open;
            status.state = ConnectionState::Closing;
            status.generation += 1;
            status.pending = None;
            status.reconnect_attempts = 0;
            was_open
        };

        self.tasks.lock().abort_all();

        let result = match self.sink.lock().await.take() {
            Some(mut sink) => timeout(SINK_CLOSE_TIMEOUT, sink.close())
                .await
                .unwrap_or_else(|_| Err(HlError::WebSocket("close timed out".to_string()))),
            None => Ok(()),
        };

        self.status.lock().state = ConnectionState::Closed;
        info!("Connection closed by client");

        if was_open {
            self.events.emit(&ConnectionEvent::Close {
                code: Some(1000),
                reason: "client closed".to_string(),
            });
        }

        if let Err(e) = &result {
            debug!("Error while closing socket: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::mock::MockTransport;
    use std::sync::atomic::AtomicU32;

    fn manager_with(transport: &MockTransport) -> ConnectionManager {
        let url = Url::parse("wss://example.test/ws").unwrap();
        ConnectionManager::new(
            ConnectionOptions::new(url),
            TransportSelector::new().with_factory(Arc::new(transport.clone())),
        )
    }

    fn count_events(manager: &ConnectionManager, kind: EventKind) -> Arc<AtomicU32> {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        manager.events().on(kind, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        counter
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);
        let opens = count_events(&manager, EventKind::Open);

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(matches!(
            manager.send_message(&json!({"method": "ping"})).await,
            Err(HlError::NotConnected)
        ));

        manager.connect().await.unwrap();
        assert!(manager.is_connected());
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        // Already open: no new socket.
        manager.connect().await.unwrap();
        assert_eq!(transport.connect_count(), 1);

        manager.send_message(&json!({"method": "subscribe"})).await.unwrap();
        assert_eq!(transport.sent_json(), vec![json!({"method": "subscribe"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_opens_one_transport() {
        let transport = MockTransport::new();
        transport.set_connect_delay(Duration::from_millis(100));
        let manager = manager_with(&transport);

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_unavailable() {
        let url = Url::parse("wss://example.test/ws").unwrap();
        let manager = ConnectionManager::new(ConnectionOptions::new(url), TransportSelector::new());
        assert!(matches!(manager.connect().await, Err(HlError::TransportUnavailable(_))));

        let transport = MockTransport::unavailable();
        let manager = manager_with(&transport);
        assert!(matches!(manager.connect().await, Err(HlError::TransportUnavailable(_))));
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_schedule() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);
        let max_reached = count_events(&manager, EventKind::MaxReconnectAttemptsReached);

        manager.connect().await.unwrap();
        transport.set_fail_connects(true);
        let dropped_at = Instant::now();
        transport.drop_connection();

        sleep(Duration::from_secs(120)).await;

        let times = transport.connect_times();
        assert_eq!(times.len(), 6, "initial connect plus five retries");

        let mut previous = dropped_at;
        let mut gaps = Vec::new();
        for at in &times[1..] {
            gaps.push((*at - previous).as_millis());
            previous = *at;
        }
        assert_eq!(gaps, vec![1000, 2000, 4000, 8000, 16000]);

        assert_eq!(max_reached.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);

        sleep(Duration::from_secs(300)).await;
        assert_eq!(transport.connect_count(), 6);
        assert_eq!(max_reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_attempts() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);
        let reconnects = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&reconnects);
        manager.events().on(EventKind::Reconnect, move |event| {
            if let ConnectionEvent::Reconnect { attempt } = event {
                r.lock().push(*attempt);
            }
        });

        manager.connect().await.unwrap();
        transport.set_fail_connects(true);
        transport.drop_connection();

        // Attempt 1 at +1s fails, attempt 2 at +3s succeeds.
        sleep(Duration::from_millis(1500)).await;
        transport.set_fail_connects(false);
        sleep(Duration::from_secs(2)).await;

        assert!(manager.is_connected());
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(*reconnects.lock(), vec![2]);
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_close_suppresses_reconnect() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);
        let closes = count_events(&manager, EventKind::Close);

        manager.connect().await.unwrap();
        manager.close().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_count(), 1);
        assert!(matches!(
            manager.send_message(&json!({"method": "ping"})).await,
            Err(HlError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_backoff_cancels_retry() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);

        manager.connect().await.unwrap();
        transport.drop_connection();
        sleep(Duration::from_millis(500)).await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        manager.close().await.unwrap();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_and_pong_ack() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);
        manager.connect().await.unwrap();
        let opened_at = manager.last_heartbeat_ack();

        sleep(Duration::from_millis(15_100)).await;
        assert!(transport.sent_json().contains(&json!({"method": "ping"})));

        transport.push_json(&json!({"channel": "pong"}));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(manager.last_heartbeat_ack() > opened_at);

        // Acked every interval: the socket is never recycled.
        for _ in 0..4 {
            sleep(Duration::from_secs(15)).await;
            transport.push_json(&json!({"channel": "pong"}));
        }
        assert_eq!(transport.connect_count(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_reconnects() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);
        let reconnects = count_events(&manager, EventKind::Reconnect);
        manager.connect().await.unwrap();

        // Silent server: stale at the 45s check, reconnect 1s later.
        sleep(Duration::from_secs(45)).await;
        assert_eq!(transport.connect_count(), 1);
        sleep(Duration::from_millis(1_100)).await;

        assert_eq!(transport.connect_count(), 2);
        assert!(manager.is_connected());
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unparseable_frame_emits_error_and_keeps_reading() {
        let transport = MockTransport::new();
        let manager = manager_with(&transport);
        let errors = count_events(&manager, EventKind::Error);
        let messages = count_events(&manager, EventKind::Message);
        manager.connect().await.unwrap();

        transport.push("not json {");
        transport.push_json(&json!({"channel": "allMids", "data": {"mids": {}}}));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(messages.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_accounting() {
        let url = Url::parse("wss://example.test/ws").unwrap();
        let mut options = ConnectionOptions::new(url);
        options.max_subscriptions = 2;
        let manager = ConnectionManager::new(options, TransportSelector::new());

        manager.decrement_subscription_count();
        assert_eq!(manager.subscription_count(), 0);

        assert!(manager.increment_subscription_count());
        assert!(manager.increment_subscription_count());
        assert!(!manager.increment_subscription_count());
        assert_eq!(manager.subscription_count(), 2);

        manager.decrement_subscription_count();
        assert_eq!(manager.subscription_count(), 1);
    }
}
