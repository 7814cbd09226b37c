//! Prelude module - re-exports commonly used types for convenience

pub use crate::config::{
    ConnectionSettings, HlConfig, LoggingSettings, NetworkSettings, RestSettings,
    SymbolCacheSettings,
};
pub use crate::error::{HlError, Result};
pub use crate::types::{asset::*, network::*};
pub use crate::utils::{generate_cloid, now_timestamp_ms, NonceGenerator};
