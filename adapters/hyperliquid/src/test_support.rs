//! Fixtures shared by the unit tests of this crate.

use async_trait::async_trait;
use hlkit_core::config::SymbolCacheSettings;
use hlkit_core::{HlError, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::symbols::{MetadataFetcher, SymbolCache};

/// BTC, ETH, PURR, FTT (delisted), SOL.
pub fn sample_perp_meta() -> Value {
    json!({
        "universe": [
            {"name": "BTC", "szDecimals": 5, "maxLeverage": 50},
            {"name": "ETH", "szDecimals": 4, "maxLeverage": 50},
            {"name": "PURR", "szDecimals": 0, "maxLeverage": 3, "onlyIsolated": true},
            {"name": "FTT", "szDecimals": 1, "maxLeverage": 3, "isDelisted": true},
            {"name": "SOL", "szDecimals": 2, "maxLeverage": 20}
        ]
    })
}

/// PURR/USDC (canonical), HYPE/USDC as `@1`, HYPE/USDT as `@2`.
pub fn sample_spot_meta() -> Value {
    json!({
        "tokens": [
            {"name": "PURR", "index": 0, "szDecimals": 0, "weiDecimals": 5, "tokenId": "0xc1fb", "isCanonical": true},
            {"name": "USDC", "index": 1, "szDecimals": 8, "weiDecimals": 8, "tokenId": "0x6d1e", "isCanonical": true},
            {"name": "HYPE", "index": 2, "szDecimals": 2, "weiDecimals": 8, "tokenId": "0x0d01", "isCanonical": false},
            {"name": "USDT", "index": 3, "szDecimals": 2, "weiDecimals": 8, "tokenId": "0x25fa", "isCanonical": false}
        ],
        "universe": [
            {"name": "PURR/USDC", "tokens": [0, 1], "index": 0, "isCanonical": true},
            {"name": "@1", "tokens": [2, 1], "index": 1, "isCanonical": false},
            {"name": "@2", "tokens": [2, 3], "index": 2, "isCanonical": false}
        ]
    })
}

/// Serves fixed metadata, optionally slowly or not at all.
pub struct StaticFetcher {
    perp: Mutex<Value>,
    spot: Mutex<Value>,
    delay: Mutex<Duration>,
    fail: AtomicBool,
    perp_calls: AtomicUsize,
    spot_calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(perp: Value, spot: Value) -> Self {
        Self {
            perp: Mutex::new(perp),
            spot: Mutex::new(spot),
            delay: Mutex::new(Duration::ZERO),
            fail: AtomicBool::new(false),
            perp_calls: AtomicUsize::new(0),
            spot_calls: AtomicUsize::new(0),
        }
    }

    pub fn sample() -> Self {
        Self::new(sample_perp_meta(), sample_spot_meta())
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_perp(&self, perp: Value) {
        *self.perp.lock() = perp;
    }

    pub fn perp_calls(&self) -> usize {
        self.perp_calls.load(Ordering::SeqCst)
    }

    pub fn spot_calls(&self) -> usize {
        self.spot_calls.load(Ordering::SeqCst)
    }

    async fn serve(&self, source: &Mutex<Value>) -> Result<Value> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HlError::Api("metadata unavailable".to_string()));
        }
        Ok(source.lock().clone())
    }
}

#[async_trait]
impl MetadataFetcher for StaticFetcher {
    async fn fetch_perp_meta(&self) -> Result<Value> {
        self.perp_calls.fetch_add(1, Ordering::SeqCst);
        self.serve(&self.perp).await
    }

    async fn fetch_spot_meta(&self) -> Result<Value> {
        self.spot_calls.fetch_add(1, Ordering::SeqCst);
        self.serve(&self.spot).await
    }
}

/// A cache loaded with the sample metadata and no background refresh.
pub async fn loaded_cache() -> Arc<SymbolCache> {
    let cache = Arc::new(SymbolCache::new(
        Arc::new(StaticFetcher::sample()),
        SymbolCacheSettings::default(),
    ));
    cache.refresh().await.expect("sample metadata loads");
    cache
}
