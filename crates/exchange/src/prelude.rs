//! Prelude module for hlkit-exchange
//!
//! Re-exports commonly used types and traits

pub use crate::traits::{
    MessageTransform,
    RestClient,
    SymbolResolver,
    TransportConnection,
    TransportEvent,
    TransportFactory,
    TransportSink,
    TransportStream,
};

pub use crate::events::{ConnectionEvent, EventEmitter, EventKind, ListenerId};
pub use crate::normalizer::{convert_to_number, ResponseNormalizer};
pub use crate::rest::RestTransport;
pub use crate::subscription::{Subscription, SubscriptionHandle, SubscriptionRegistry};
pub use crate::transport::TransportSelector;
pub use crate::websocket::{ConnectionManager, ConnectionOptions, ConnectionState};

// Re-export common types from core
pub use hlkit_core::prelude::*;
