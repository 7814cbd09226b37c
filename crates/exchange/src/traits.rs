use async_trait::async_trait;
use futures::Stream;
use hlkit_core::{Lookup, Result};
use serde_json::Value;
use std::pin::Pin;
use url::Url;

/// Inbound traffic and lifecycle notifications from a physical socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

pub type TransportStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Write half of a physical socket.
#[async_trait]
pub trait TransportSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// An open socket. Returning one from [`TransportFactory::connect`] is the "open" signal.
pub struct TransportConnection {
    pub sink: Box<dyn TransportSink>,
    pub stream: TransportStream,
}

impl TransportConnection {
    pub fn new(sink: Box<dyn TransportSink>, stream: TransportStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection").finish_non_exhaustive()
    }
}

/// One concrete socket implementation.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<TransportConnection>;

    fn name(&self) -> &'static str;

    /// Whether this implementation can run in the current process.
    fn is_available(&self) -> bool {
        true
    }
}

/// Read-only symbol lookups consumed by response normalization.
pub trait SymbolResolver: Send + Sync {
    fn resolve_index(&self, symbol: &str) -> Result<Lookup<u32>>;
    fn resolve_exchange_name(&self, internal_symbol: &str) -> Result<Lookup<String>>;
    fn resolve_internal_name(&self, exchange_name: &str) -> Result<Lookup<String>>;
    fn is_spot_token(&self, name: &str) -> bool;
}

/// Rewrites an inbound payload before listeners see it.
pub trait MessageTransform: Send + Sync {
    fn transform(&self, message: &Value) -> Value;
}

/// Opaque request function used by the venue REST wrappers.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// `weight` is the request's cost against the client-side rate limit.
    async fn post(&self, endpoint: &str, body: &Value, weight: u32) -> Result<Value>;
}
