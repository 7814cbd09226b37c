use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use hlkit_core::config::SymbolCacheSettings;
use hlkit_core::prelude::*;
use hlkit_exchange::SymbolResolver;
use hlkit_monitoring::StructuredLogger;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::models::{PerpMeta, SpotMeta};

/// Source of the two metadata listings the cache is built from.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch_perp_meta(&self) -> Result<Value>;
    async fn fetch_spot_meta(&self) -> Result<Value>;
}

/// One immutable generation of symbol mappings.
#[derive(Debug, Default)]
pub struct SymbolTable {
    records: Vec<AssetRecord>,
    exchange_to_internal: HashMap<String, String>,
    internal_to_exchange: HashMap<String, String>,
    internal_to_index: HashMap<String, u32>,
    by_internal: HashMap<String, usize>,
    spot_tokens: HashSet<String>,
}

impl SymbolTable {
    pub fn build(perp: &PerpMeta, spot: &SpotMeta) -> Self {
        let mut table = SymbolTable::default();

        // Delisted perps keep their slot; later indices depend on it.
        for (position, asset) in perp.universe.iter().enumerate() {
            let Ok(position) = u32::try_from(position) else {
                warn!("Perp universe exceeds the index range at {}; ignoring the rest", asset.name);
                break;
            };
            let record = AssetRecord::perp(asset.name.clone(), position)
                .with_sz_decimals(asset.sz_decimals)
                .delisted(asset.is_delisted);
            table.insert(record);
        }

        let tokens: HashMap<u32, &crate::models::SpotToken> =
            spot.tokens.iter().map(|token| (token.index, token)).collect();
        table.spot_tokens = spot.tokens.iter().map(|token| token.name.clone()).collect();

        for pair in &spot.universe {
            let (Some(base), Some(quote)) = (tokens.get(&pair.tokens[0]), tokens.get(&pair.tokens[1])) else {
                warn!(
                    "Spot market {} references unknown tokens {:?}; skipping",
                    pair.display_name(),
                    pair.tokens
                );
                continue;
            };

            let Some(record) = AssetRecord::spot(pair.display_name(), &base.name, &quote.name, pair.index) else {
                warn!(
                    "Spot market {} index {} overflows the asset index range; skipping",
                    pair.display_name(),
                    pair.index
                );
                continue;
            };
            table.insert(record.with_sz_decimals(base.sz_decimals));
        }

        table
    }

    fn insert(&mut self, record: AssetRecord) {
        if self.internal_to_index.contains_key(&record.internal_symbol) {
            warn!(
                "Duplicate symbol {} (index {}); keeping the first mapping",
                record.internal_symbol, record.index
            );
            return;
        }

        self.exchange_to_internal
            .entry(record.exchange_name.clone())
            .or_insert_with(|| record.internal_symbol.clone());
        self.internal_to_exchange
            .insert(record.internal_symbol.clone(), record.exchange_name.clone());
        self.internal_to_index
            .insert(record.internal_symbol.clone(), record.index);
        self.by_internal
            .insert(record.internal_symbol.clone(), self.records.len());
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AssetRecord] {
        &self.records
    }

    pub fn index_of(&self, internal_symbol: &str) -> Lookup<u32> {
        self.internal_to_index.get(internal_symbol).copied().into()
    }

    pub fn exchange_name_of(&self, internal_symbol: &str) -> Lookup<String> {
        self.internal_to_exchange.get(internal_symbol).cloned().into()
    }

    pub fn internal_name_of(&self, exchange_name: &str) -> Lookup<String> {
        self.exchange_to_internal.get(exchange_name).cloned().into()
    }

    pub fn record(&self, internal_symbol: &str) -> Lookup<AssetRecord> {
        self.by_internal
            .get(internal_symbol)
            .and_then(|position| self.records.get(*position))
            .cloned()
            .into()
    }

    pub fn is_spot_token(&self, name: &str) -> bool {
        self.spot_tokens.contains(name)
    }

    pub fn contains(&self, internal_symbol: &str) -> bool {
        self.internal_to_index.contains_key(internal_symbol)
    }
}

fn parse_perp_meta(value: Value) -> Result<PerpMeta> {
    if !value.get("universe").map_or(false, Value::is_array) {
        return Err(HlError::InvalidMetadataResponse(
            "perp metadata is missing the universe array".to_string(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| HlError::InvalidMetadataResponse(format!("perp metadata: {}", e)))
}

fn parse_spot_meta(value: Value) -> Result<SpotMeta> {
    for field in ["tokens", "universe"] {
        if !value.get(field).map_or(false, Value::is_array) {
            return Err(HlError::InvalidMetadataResponse(format!(
                "spot metadata is missing the {} array",
                field
            )));
        }
    }
    serde_json::from_value(value)
        .map_err(|e| HlError::InvalidMetadataResponse(format!("spot metadata: {}", e)))
}

type SharedRefresh = Shared<BoxFuture<'static, std::result::Result<usize, Arc<HlError>>>>;

/// Every waiter of a shared refresh gets the same error; only the last one can own it.
fn unshare(error: Arc<HlError>) -> HlError {
    match Arc::try_unwrap(error) {
        Ok(error) => error,
        Err(shared) => match shared.as_ref() {
            HlError::InvalidMetadataResponse(msg) => HlError::InvalidMetadataResponse(msg.clone()),
            HlError::RateLimit(msg) => HlError::RateLimit(msg.clone()),
            HlError::Api(msg) => HlError::Api(msg.clone()),
            HlError::InvalidData(msg) => HlError::InvalidData(msg.clone()),
            other => HlError::Api(other.to_string()),
        },
    }
}

struct CacheInner {
    fetcher: Arc<dyn MetadataFetcher>,
    settings: SymbolCacheSettings,
    table: RwLock<Option<Arc<SymbolTable>>>,
    in_flight: Mutex<Option<SharedRefresh>>,
    consecutive_failures: AtomicU32,
    logger: StructuredLogger,
}

impl CacheInner {
    fn refresh(self: &Arc<Self>) -> SharedRefresh {
        let mut slot = self.in_flight.lock();
        if let Some(pending) = slot.as_ref() {
            debug!("Joining in-flight metadata refresh");
            return pending.clone();
        }

        let inner = Arc::clone(self);
        let pending = async move {
            let outcome = inner.load().await;
            match &outcome {
                Ok(count) => {
                    inner.consecutive_failures.store(0, Ordering::SeqCst);
                    inner.logger.log_metadata_refresh(true, *count, 0);
                }
                Err(_) => {
                    let failures = inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    inner.logger.log_metadata_refresh(false, 0, failures);
                }
            }
            *inner.in_flight.lock() = None;
            outcome.map_err(Arc::new)
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        pending
    }

    async fn load(&self) -> Result<usize> {
        let (perp, spot) = tokio::join!(self.fetcher.fetch_perp_meta(), self.fetcher.fetch_spot_meta());
        let perp = parse_perp_meta(perp?)?;
        let spot = parse_spot_meta(spot?)?;

        let table = SymbolTable::build(&perp, &spot);
        let count = table.len();
        *self.table.write() = Some(Arc::new(table));
        Ok(count)
    }
}

/// Bidirectional symbol and asset-index maps kept in step with the venue's metadata.
///
/// Lookups only read the current generation and never touch the network. A refresh
/// builds a complete new [`SymbolTable`] and swaps it in, so readers see either the old
/// generation or the new one. Concurrent refreshes share one physical round trip.
///
/// Periodic refresh stops by itself after `max_consecutive_failures` failures in a row
/// and stays off until [`SymbolCache::start_periodic_refresh`] is called.
pub struct SymbolCache {
    inner: Arc<CacheInner>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl SymbolCache {
    pub fn new(fetcher: Arc<dyn MetadataFetcher>, settings: SymbolCacheSettings) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                fetcher,
                settings,
                table: RwLock::new(None),
                in_flight: Mutex::new(None),
                consecutive_failures: AtomicU32::new(0),
                logger: StructuredLogger::new("symbol_cache"),
            }),
            refresh_task: Mutex::new(None),
        }
    }

    /// First refresh plus periodic refresh. Returns at once if already initialized.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        match self.refresh().await {
            Ok(count) => {
                info!("Symbol cache initialized with {} assets", count);
                self.start_periodic_refresh();
                Ok(())
            }
            Err(e) => {
                error!("Symbol cache initialization failed: {}", e);
                Err(HlError::InitializationFailed(e.to_string()))
            }
        }
    }

    /// Reloads both metadata listings and swaps in the new generation.
    /// Returns the number of assets in it.
    pub async fn refresh(&self) -> Result<usize> {
        self.inner.refresh().await.map_err(unshare)
    }

    /// Starts (or restarts after self-disable) the background refresh loop.
    /// A restart clears the consecutive-failure count.
    pub fn start_periodic_refresh(&self) {
        let mut task = self.refresh_task.lock();
        if task.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }

        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        let period = self.inner.settings.refresh_interval();
        let threshold = self.inner.settings.max_consecutive_failures;
        let weak = Arc::downgrade(&self.inner);

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };

                if let Err(e) = inner.refresh().await {
                    let failures = inner.consecutive_failures.load(Ordering::SeqCst);
                    warn!("Periodic metadata refresh failed ({} in a row): {}", failures, e);
                    if failures >= threshold {
                        error!(
                            "Disabling periodic metadata refresh after {} consecutive failures",
                            failures
                        );
                        break;
                    }
                }
            }
        }));
        debug!("Periodic metadata refresh every {:?}", period);
    }

    pub fn stop_periodic_refresh(&self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
            debug!("Periodic metadata refresh stopped");
        }
    }

    pub fn is_periodic_refresh_active(&self) -> bool {
        self.refresh_task
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.table.read().is_some()
    }

    /// Current generation, or `NotInitialized` before the first successful refresh.
    pub fn table(&self) -> Result<Arc<SymbolTable>> {
        self.inner.table.read().clone().ok_or(HlError::NotInitialized)
    }

    pub fn resolve_index(&self, symbol: &str) -> Result<Lookup<u32>> {
        Ok(self.table()?.index_of(symbol))
    }

    pub fn resolve_exchange_name(&self, internal_symbol: &str) -> Result<Lookup<String>> {
        Ok(self.table()?.exchange_name_of(internal_symbol))
    }

    pub fn resolve_internal_name(&self, exchange_name: &str) -> Result<Lookup<String>> {
        Ok(self.table()?.internal_name_of(exchange_name))
    }

    pub fn record(&self, internal_symbol: &str) -> Result<Lookup<AssetRecord>> {
        Ok(self.table()?.record(internal_symbol))
    }

    /// Maps a possibly bare symbol to an internal one.
    ///
    /// Known internal symbols are returned as is. Otherwise `Perp` mode appends `-PERP`;
    /// `Spot` mode leaves known spot token names alone and suffixes the rest.
    pub fn normalize_symbol(&self, symbol: &str, mode: NormalizationMode) -> String {
        if symbol.ends_with(PERP_SUFFIX) {
            return symbol.to_string();
        }

        let table = self.inner.table.read().clone();
        if let Some(table) = table {
            if table.contains(symbol) {
                return symbol.to_string();
            }
            if mode == NormalizationMode::Spot && table.is_spot_token(symbol) {
                return symbol.to_string();
            }
        }

        perp_symbol(symbol)
    }

    pub fn records(&self) -> Vec<AssetRecord> {
        self.inner
            .table
            .read()
            .as_ref()
            .map(|table| table.records().to_vec())
            .unwrap_or_default()
    }

    /// Sorted internal symbols of one class.
    pub fn symbols(&self, class: AssetClass) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .records()
            .into_iter()
            .filter(|record| record.class == class)
            .map(|record| record.internal_symbol)
            .collect();
        symbols.sort();
        symbols
    }

    pub fn is_spot_token(&self, name: &str) -> bool {
        self.inner
            .table
            .read()
            .as_ref()
            .map_or(false, |table| table.is_spot_token(name))
    }
}

impl SymbolResolver for SymbolCache {
    fn resolve_index(&self, symbol: &str) -> Result<Lookup<u32>> {
        SymbolCache::resolve_index(self, symbol)
    }

    fn resolve_exchange_name(&self, internal_symbol: &str) -> Result<Lookup<String>> {
        SymbolCache::resolve_exchange_name(self, internal_symbol)
    }

    fn resolve_internal_name(&self, exchange_name: &str) -> Result<Lookup<String>> {
        SymbolCache::resolve_internal_name(self, exchange_name)
    }

    fn is_spot_token(&self, name: &str) -> bool {
        SymbolCache::is_spot_token(self, name)
    }
}

impl Drop for SymbolCache {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_task.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SymbolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolCache")
            .field("initialized", &self.is_initialized())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("periodic_refresh", &self.is_periodic_refresh_active())
            .finish()
    }
}
