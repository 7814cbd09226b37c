//! In-memory transport for driving a [`ConnectionManager`](crate::websocket::ConnectionManager)
//! without a network.

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use hlkit_core::{HlError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use url::Url;

use crate::traits::{TransportConnection, TransportEvent, TransportFactory, TransportSink};

#[derive(Debug)]
struct MockState {
    available: bool,
    fail_connects: bool,
    connect_delay: Duration,
    connect_times: Vec<Instant>,
    sent: Vec<String>,
    peer: Option<UnboundedSender<TransportEvent>>,
}

/// Cloneable handle; every clone observes and drives the same fake server.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                available: true,
                fail_connects: false,
                connect_delay: Duration::ZERO,
                connect_times: Vec::new(),
                sent: Vec::new(),
                peer: None,
            })),
        }
    }

    pub fn unavailable() -> Self {
        let transport = Self::new();
        transport.state.lock().available = false;
        transport
    }

    pub fn set_fail_connects(&self, fail: bool) {
        self.state.lock().fail_connects = fail;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_times.len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.state.lock().connect_times.clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Sent frames that parse as JSON.
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Sent frames with `"method"` equal to `method`.
    pub fn sent_with_method(&self, method: &str) -> Vec<Value> {
        self.sent_json()
            .into_iter()
            .filter(|frame| frame.get("method").and_then(Value::as_str) == Some(method))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Delivers a text frame on the most recent connection.
    pub fn push(&self, text: impl Into<String>) -> bool {
        match &self.state.lock().peer {
            Some(peer) => peer.unbounded_send(TransportEvent::Message(text.into())).is_ok(),
            None => false,
        }
    }

    pub fn push_json(&self, message: &Value) -> bool {
        self.push(message.to_string())
    }

    /// Simulates the server dropping the most recent connection.
    pub fn drop_connection(&self) {
        if let Some(peer) = self.state.lock().peer.take() {
            let _ = peer.unbounded_send(TransportEvent::Closed {
                code: Some(1006),
                reason: "abnormal closure".to_string(),
            });
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for MockTransport {
    async fn connect(&self, _url: &Url) -> Result<TransportConnection> {
        let delay = {
            let mut state = self.state.lock();
            state.connect_times.push(Instant::now());
            state.connect_delay
        };

        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.fail_connects {
            return Err(HlError::WebSocket("connection refused".to_string()));
        }

        let (tx, rx) = unbounded();
        state.peer = Some(tx);

        Ok(TransportConnection::new(
            Box::new(MockSink {
                state: Arc::clone(&self.state),
            }),
            Box::pin(rx),
        ))
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_available(&self) -> bool {
        self.state.lock().available
    }
}

struct MockSink {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.state.lock().sent.push(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
