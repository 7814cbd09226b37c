//! Hyperliquid venue adapter
//!
//! Symbol resolution, REST queries and actions, and typed websocket feeds built on the
//! venue-agnostic plumbing in `hlkit-exchange`.

pub mod client;
pub mod exchange;
pub mod info;
pub mod models;
pub mod symbols;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use client::{HyperliquidClient, HyperliquidClientBuilder};
pub use exchange::{
    wire_decimal, ExchangeApi, OrderRequest, OrderType, PlacedOrder, Signature, Signer, SigningContext,
    TimeInForce, TpSl,
};
pub use info::{InfoApi, RestMetadataFetcher};
pub use models::*;
pub use symbols::{MetadataFetcher, SymbolCache, SymbolTable};
pub use ws::WsApi;
