//! Hyperliquid client toolkit
//!
//! Re-exports the workspace crates so applications can depend on `hlkit` alone.

pub use hlkit_core as core;
pub use hlkit_exchange as exchange;
pub use hlkit_hyperliquid as hyperliquid;
pub use hlkit_monitoring as monitoring;

pub use hlkit_hyperliquid::{HyperliquidClient, HyperliquidClientBuilder};

pub mod prelude {
    pub use hlkit_exchange::prelude::*;
    pub use hlkit_hyperliquid::{
        ExchangeApi, HyperliquidClient, HyperliquidClientBuilder, InfoApi, OrderRequest, Signer, SymbolCache,
        WsApi,
    };
    pub use hlkit_monitoring::prelude::*;
}
