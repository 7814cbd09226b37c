use async_trait::async_trait;
use hlkit_core::prelude::*;
use hlkit_core::utils::{validate_price, validate_size};
use hlkit_exchange::{ResponseNormalizer, RestClient};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::symbols::SymbolCache;

pub const EXCHANGE_ENDPOINT: &str = "/exchange";

const ACTION_WEIGHT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub nonce: u64,
    pub vault_address: Option<String>,
    pub is_mainnet: bool,
}

/// Opaque signing capability. Actions reach it with asset indices already resolved.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, action: &Value, context: &SigningContext) -> Result<Signature>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good til cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Add liquidity only.
    Alo,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "Gtc"),
            TimeInForce::Ioc => write!(f, "Ioc"),
            TimeInForce::Alo => write!(f, "Alo"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpSl {
    TakeProfit,
    StopLoss,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderType {
    Limit(TimeInForce),
    Trigger {
        trigger_px: Decimal,
        is_market: bool,
        tpsl: TpSl,
    },
}

impl OrderType {
    fn to_wire(&self) -> Value {
        match self {
            OrderType::Limit(tif) => json!({"limit": {"tif": tif.to_string()}}),
            OrderType::Trigger {
                trigger_px,
                is_market,
                tpsl,
            } => {
                let tpsl = match tpsl {
                    TpSl::TakeProfit => "tp",
                    TpSl::StopLoss => "sl",
                };
                json!({
                    "trigger": {
                        "isMarket": is_market,
                        "triggerPx": wire_decimal(*trigger_px),
                        "tpsl": tpsl,
                    }
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub is_buy: bool,
    pub price: Decimal,
    pub size: Decimal,
    pub reduce_only: bool,
    pub order_type: OrderType,
    /// Generated when absent.
    pub cloid: Option<String>,
}

impl OrderRequest {
    pub fn limit(symbol: impl Into<String>, is_buy: bool, price: Decimal, size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            is_buy,
            price,
            size,
            reduce_only: false,
            order_type: OrderType::Limit(TimeInForce::Gtc),
            cloid: None,
        }
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.order_type = OrderType::Limit(tif);
        self
    }

    pub fn with_trigger(mut self, trigger_px: Decimal, is_market: bool, tpsl: TpSl) -> Self {
        self.order_type = OrderType::Trigger {
            trigger_px,
            is_market,
            tpsl,
        };
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_cloid(mut self, cloid: impl Into<String>) -> Self {
        self.cloid = Some(cloid.into());
        self
    }
}

/// Decimal in the venue's wire form: plain notation, no trailing zeros.
pub fn wire_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub cloid: String,
    /// Normalized `response` object of the venue's reply.
    pub response: Value,
}

/// Unwraps `{"status": "ok", "response": ...}`; anything else becomes an `Api` error.
fn check_exchange_status(reply: Value) -> Result<Value> {
    match reply.get("status").and_then(Value::as_str) {
        Some("ok") => Ok(reply.get("response").cloned().unwrap_or(Value::Null)),
        Some(_) => {
            let message = match reply.get("response") {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => reply.to_string(),
            };
            Err(HlError::Api(message))
        }
        None => Err(HlError::InvalidData(format!("Unexpected exchange reply: {}", reply))),
    }
}

/// Authenticated actions. Only constructed when a signer and account address are known.
pub struct ExchangeApi {
    rest: Arc<dyn RestClient>,
    symbols: Arc<SymbolCache>,
    signer: Arc<dyn Signer>,
    normalizer: ResponseNormalizer,
    account_address: String,
    vault_address: Option<String>,
    is_mainnet: bool,
    nonces: NonceGenerator,
}

impl ExchangeApi {
    pub fn new(
        rest: Arc<dyn RestClient>,
        symbols: Arc<SymbolCache>,
        signer: Arc<dyn Signer>,
        normalizer: ResponseNormalizer,
        account_address: impl Into<String>,
        network: Network,
    ) -> Self {
        Self {
            rest,
            symbols,
            signer,
            normalizer,
            account_address: account_address.into(),
            vault_address: None,
            is_mainnet: network.is_mainnet(),
            nonces: NonceGenerator::new(),
        }
    }

    pub fn with_vault_address(mut self, vault_address: impl Into<String>) -> Self {
        self.vault_address = Some(vault_address.into());
        self
    }

    pub fn account_address(&self) -> &str {
        &self.account_address
    }

    pub fn vault_address(&self) -> Option<&str> {
        self.vault_address.as_deref()
    }

    /// Asset index for a symbol; never guesses.
    pub fn asset_index(&self, symbol: &str) -> Result<u32> {
        let internal = self.symbols.normalize_symbol(symbol, NormalizationMode::Perp);
        self.symbols.resolve_index(&internal)?.or_unknown(symbol)
    }

    async fn post_action(&self, action: Value) -> Result<Value> {
        let context = SigningContext {
            nonce: self.nonces.next_nonce(),
            vault_address: self.vault_address.clone(),
            is_mainnet: self.is_mainnet,
        };

        let signature = self.signer.sign(&action, &context).await?;
        let envelope = json!({
            "action": action,
            "nonce": context.nonce,
            "signature": signature,
            "vaultAddress": context.vault_address,
        });

        debug!("exchange action {} (nonce {})", envelope["action"]["type"], context.nonce);
        let reply = self.rest.post(EXCHANGE_ENDPOINT, &envelope, ACTION_WEIGHT).await?;
        let response = check_exchange_status(reply).map_err(|e| {
            warn!("Exchange rejected action: {}", e);
            e
        })?;
        Ok(self.normalizer.normalize(&response))
    }

    pub async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder> {
        validate_price(order.price)?;
        validate_size(order.size)?;
        let asset = self.asset_index(&order.symbol)?;
        let cloid = order.cloid.clone().unwrap_or_else(generate_cloid);

        let action = json!({
            "type": "order",
            "orders": [{
                "a": asset,
                "b": order.is_buy,
                "p": wire_decimal(order.price),
                "s": wire_decimal(order.size),
                "r": order.reduce_only,
                "t": order.order_type.to_wire(),
                "c": cloid,
            }],
            "grouping": "na",
        });

        let response = self.post_action(action).await?;
        info!(
            "Placed {} order on {} ({} @ {}), cloid {}",
            if order.is_buy { "buy" } else { "sell" },
            order.symbol,
            order.size,
            order.price,
            cloid
        );
        Ok(PlacedOrder { cloid, response })
    }

    pub async fn cancel_order(&self, symbol: &str, oid: u64) -> Result<Value> {
        let asset = self.asset_index(symbol)?;
        self.post_action(json!({
            "type": "cancel",
            "cancels": [{"a": asset, "o": oid}],
        }))
        .await
    }

    pub async fn cancel_by_cloid(&self, symbol: &str, cloid: &str) -> Result<Value> {
        let asset = self.asset_index(symbol)?;
        self.post_action(json!({
            "type": "cancelByCloid",
            "cancels": [{"asset": asset, "cloid": cloid}],
        }))
        .await
    }

    pub async fn update_leverage(&self, symbol: &str, leverage: u32, is_cross: bool) -> Result<Value> {
        if leverage == 0 {
            return Err(HlError::InvalidData("Leverage must be at least 1".to_string()));
        }
        let asset = self.asset_index(symbol)?;
        self.post_action(json!({
            "type": "updateLeverage",
            "asset": asset,
            "isCross": is_cross,
            "leverage": leverage,
        }))
        .await
    }
}

impl fmt::Debug for ExchangeApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeApi")
            .field("account_address", &self.account_address)
            .field("vault_address", &self.vault_address)
            .field("is_mainnet", &self.is_mainnet)
            .finish()
    }
}
