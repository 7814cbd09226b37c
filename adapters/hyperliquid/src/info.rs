use async_trait::async_trait;
use hlkit_core::prelude::*;
use hlkit_core::utils::validate_address;
use hlkit_exchange::{ResponseNormalizer, RestClient};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::models::{AllMids, L2Book, OpenOrder, PerpMeta, SpotMeta, UserFill};
use crate::symbols::{MetadataFetcher, SymbolCache};

pub const INFO_ENDPOINT: &str = "/info";

const LIGHT_WEIGHT: u32 = 2;
const DEFAULT_WEIGHT: u32 = 20;

/// Raw `meta` / `spotMeta` requests used to feed the symbol cache.
#[derive(Clone)]
pub struct RestMetadataFetcher {
    rest: Arc<dyn RestClient>,
}

impl RestMetadataFetcher {
    pub fn new(rest: Arc<dyn RestClient>) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl MetadataFetcher for RestMetadataFetcher {
    async fn fetch_perp_meta(&self) -> Result<Value> {
        self.rest
            .post(INFO_ENDPOINT, &json!({"type": "meta"}), DEFAULT_WEIGHT)
            .await
    }

    async fn fetch_spot_meta(&self) -> Result<Value> {
        self.rest
            .post(INFO_ENDPOINT, &json!({"type": "spotMeta"}), DEFAULT_WEIGHT)
            .await
    }
}

/// Read-only venue queries. Replies are normalized: internal symbols, numeric values.
pub struct InfoApi {
    rest: Arc<dyn RestClient>,
    symbols: Arc<SymbolCache>,
    normalizer: ResponseNormalizer,
}

impl InfoApi {
    pub fn new(rest: Arc<dyn RestClient>, symbols: Arc<SymbolCache>, normalizer: ResponseNormalizer) -> Self {
        Self {
            rest,
            symbols,
            normalizer,
        }
    }

    async fn request(&self, body: Value, weight: u32) -> Result<Value> {
        debug!("info request: {}", body);
        self.rest.post(INFO_ENDPOINT, &body, weight).await
    }

    async fn request_normalized<T: DeserializeOwned>(&self, body: Value, weight: u32) -> Result<T> {
        let raw = self.request(body, weight).await?;
        Ok(serde_json::from_value(self.normalizer.normalize(&raw))?)
    }

    /// Wire name for a symbol; fails with `UnknownAsset` rather than sending a guess.
    fn exchange_name(&self, symbol: &str) -> Result<String> {
        let internal = self.symbols.normalize_symbol(symbol, NormalizationMode::Perp);
        self.symbols.resolve_exchange_name(&internal)?.or_unknown(symbol)
    }

    /// Perp universe exactly as the venue lists it.
    pub async fn meta(&self) -> Result<PerpMeta> {
        let raw = self.request(json!({"type": "meta"}), DEFAULT_WEIGHT).await?;
        serde_json::from_value(raw).map_err(|e| HlError::InvalidMetadataResponse(e.to_string()))
    }

    pub async fn spot_meta(&self) -> Result<SpotMeta> {
        let raw = self.request(json!({"type": "spotMeta"}), DEFAULT_WEIGHT).await?;
        serde_json::from_value(raw).map_err(|e| HlError::InvalidMetadataResponse(e.to_string()))
    }

    /// Mid prices keyed by internal symbol.
    pub async fn all_mids(&self) -> Result<AllMids> {
        let raw = self.request(json!({"type": "allMids"}), LIGHT_WEIGHT).await?;
        // The reply is a bare symbol-keyed object; wrap it so the keys get resolved too.
        let normalized = self.normalizer.normalize(&json!({ "mids": raw }));
        Ok(serde_json::from_value(normalized)?)
    }

    pub async fn l2_book(&self, symbol: &str) -> Result<L2Book> {
        let coin = self.exchange_name(symbol)?;
        self.request_normalized(json!({"type": "l2Book", "coin": coin}), LIGHT_WEIGHT)
            .await
    }

    pub async fn clearinghouse_state(&self, user: &str) -> Result<Value> {
        validate_address(user)?;
        let raw = self
            .request(json!({"type": "clearinghouseState", "user": user}), LIGHT_WEIGHT)
            .await?;
        Ok(self.normalizer.normalize(&raw))
    }

    pub async fn spot_clearinghouse_state(&self, user: &str) -> Result<Value> {
        validate_address(user)?;
        let raw = self
            .request(json!({"type": "spotClearinghouseState", "user": user}), LIGHT_WEIGHT)
            .await?;
        Ok(self.normalizer.normalize(&raw))
    }

    pub async fn open_orders(&self, user: &str) -> Result<Vec<OpenOrder>> {
        validate_address(user)?;
        self.request_normalized(json!({"type": "openOrders", "user": user}), DEFAULT_WEIGHT)
            .await
    }

    pub async fn user_fills(&self, user: &str) -> Result<Vec<UserFill>> {
        validate_address(user)?;
        self.request_normalized(json!({"type": "userFills", "user": user}), DEFAULT_WEIGHT)
            .await
    }
}

impl std::fmt::Debug for InfoApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoApi").finish_non_exhaustive()
    }
}
