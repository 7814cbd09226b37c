use hlkit_core::prelude::*;
use hlkit_core::utils::validate_address;
use hlkit_exchange::{Subscription, SubscriptionHandle, SubscriptionRegistry};
use hlkit_monitoring::StructuredLogger;
use serde_json::Value;
use std::sync::Arc;

use crate::models::{AllMids, Candle, L2Book, OrderUpdate, Trade, UserFills};
use crate::symbols::SymbolCache;

pub const CANDLE_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Typed streaming subscriptions. Symbols are resolved to wire names before subscribing,
/// and listeners receive payloads with internal symbols.
pub struct WsApi {
    registry: SubscriptionRegistry,
    symbols: Arc<SymbolCache>,
    logger: StructuredLogger,
}

impl WsApi {
    pub fn new(registry: SubscriptionRegistry, symbols: Arc<SymbolCache>) -> Self {
        Self {
            registry,
            symbols,
            logger: StructuredLogger::new("subscriptions"),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn coin(&self, symbol: &str) -> Result<String> {
        let internal = self.symbols.normalize_symbol(symbol, NormalizationMode::Perp);
        self.symbols.resolve_exchange_name(&internal)?.or_unknown(symbol)
    }

    fn log_subscribed(&self, handle: &SubscriptionHandle) {
        self.logger
            .log_subscription_change(handle.key(), true, self.registry.active_keys().len());
    }

    /// Untyped subscription; the listener gets the whole normalized message.
    pub async fn subscribe_raw<F>(&self, subscription: Subscription, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let handle = self.registry.subscribe(subscription, listener).await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    pub async fn subscribe_all_mids<F>(&self, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(AllMids) + Send + Sync + 'static,
    {
        let handle = self
            .registry
            .subscribe_typed(Subscription::new("allMids"), listener)
            .await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    pub async fn subscribe_l2_book<F>(&self, symbol: &str, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(L2Book) + Send + Sync + 'static,
    {
        let subscription = Subscription::new("l2Book").with_param("coin", self.coin(symbol)?);
        let handle = self.registry.subscribe_typed(subscription, listener).await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    pub async fn subscribe_trades<F>(&self, symbol: &str, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Vec<Trade>) + Send + Sync + 'static,
    {
        let subscription = Subscription::new("trades").with_param("coin", self.coin(symbol)?);
        let handle = self.registry.subscribe_typed(subscription, listener).await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    pub async fn subscribe_candle<F>(&self, symbol: &str, interval: &str, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Candle) + Send + Sync + 'static,
    {
        if !CANDLE_INTERVALS.contains(&interval) {
            return Err(HlError::InvalidData(format!("Unsupported candle interval: {}", interval)));
        }

        let subscription = Subscription::new("candle")
            .with_param("coin", self.coin(symbol)?)
            .with_param("interval", interval);
        let handle = self.registry.subscribe_typed(subscription, listener).await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    /// Account events arrive on the `user` channel.
    pub async fn subscribe_user_events<F>(&self, user: &str, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        validate_address(user)?;
        let subscription = Subscription::new("userEvents")
            .with_param("user", user)
            .on_channel("user");
        let handle = self.registry.subscribe_typed(subscription, listener).await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    pub async fn subscribe_order_updates<F>(&self, user: &str, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Vec<OrderUpdate>) + Send + Sync + 'static,
    {
        validate_address(user)?;
        let subscription = Subscription::new("orderUpdates").with_param("user", user);
        let handle = self.registry.subscribe_typed(subscription, listener).await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    pub async fn subscribe_user_fills<F>(&self, user: &str, listener: F) -> Result<SubscriptionHandle>
    where
        F: Fn(UserFills) + Send + Sync + 'static,
    {
        validate_address(user)?;
        let subscription = Subscription::new("userFills").with_param("user", user);
        let handle = self.registry.subscribe_typed(subscription, listener).await?;
        self.log_subscribed(&handle);
        Ok(handle)
    }

    /// Returns `false` if the handle was already released.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        let released = self.registry.unsubscribe(handle).await?;
        if released && self.registry.listener_count(handle.key()) == 0 {
            self.logger
                .log_subscription_change(handle.key(), false, self.registry.active_keys().len());
        }
        Ok(released)
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        self.registry.active_keys()
    }
}

impl std::fmt::Debug for WsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsApi")
            .field("active_subscriptions", &self.active_subscriptions())
            .finish()
    }
}
