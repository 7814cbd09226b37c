use hlkit_core::prelude::*;
use hlkit_core::utils::validate_address;
use hlkit_exchange::{
    ConnectionEvent, ConnectionManager, ConnectionOptions, EventKind, ResponseNormalizer, RestClient,
    RestTransport, SubscriptionRegistry, SymbolResolver, TransportFactory, TransportSelector,
};
use hlkit_monitoring::StructuredLogger;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::exchange::{ExchangeApi, Signer};
use crate::info::{InfoApi, RestMetadataFetcher};
use crate::symbols::{MetadataFetcher, SymbolCache};
use crate::ws::WsApi;

/// Collaborators default to the real network stack; tests and embedders swap them out.
#[derive(Default)]
pub struct HyperliquidClientBuilder {
    config: HlConfig,
    transport: Option<Arc<dyn TransportFactory>>,
    rest: Option<Arc<dyn RestClient>>,
    fetcher: Option<Arc<dyn MetadataFetcher>>,
    signer: Option<(Arc<dyn Signer>, String)>,
    vault_address: Option<String>,
}

impl HyperliquidClientBuilder {
    pub fn config(mut self, config: HlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.config.network.network = network;
        self
    }

    /// Socket implementation used instead of the native one.
    pub fn transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn rest_client(mut self, rest: Arc<dyn RestClient>) -> Self {
        self.rest = Some(rest);
        self
    }

    /// Metadata source for the symbol cache. Defaults to `meta`/`spotMeta` over REST.
    pub fn metadata_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Enables [`HyperliquidClient::exchange`].
    pub fn signer(mut self, signer: Arc<dyn Signer>, account_address: impl Into<String>) -> Self {
        self.signer = Some((signer, account_address.into()));
        self
    }

    pub fn vault_address(mut self, vault_address: impl Into<String>) -> Self {
        self.vault_address = Some(vault_address.into());
        self
    }

    pub fn build(self) -> Result<HyperliquidClient> {
        let config = self.config;

        let rest: Arc<dyn RestClient> = match self.rest {
            Some(rest) => rest,
            None => Arc::new(RestTransport::new(config.network.api_url(), &config.rest)?),
        };
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(RestMetadataFetcher::new(Arc::clone(&rest))));

        let symbols = Arc::new(SymbolCache::new(fetcher, config.symbols.clone()));
        let resolver: Arc<dyn SymbolResolver> = symbols.clone();
        let normalizer = ResponseNormalizer::new(resolver);

        let selector = match self.transport {
            Some(transport) => TransportSelector::new().with_factory(transport),
            None => TransportSelector::native(),
        };
        let ws_url = Url::parse(config.network.ws_url())
            .map_err(|e| HlError::InvalidData(format!("Invalid websocket URL {}: {}", config.network.ws_url(), e)))?;
        let connection = Arc::new(ConnectionManager::new(
            ConnectionOptions::from_settings(ws_url, &config.connection),
            selector,
        ));
        attach_connection_logging(&connection, config.connection.max_reconnect_attempts);

        let registry = SubscriptionRegistry::new(Arc::clone(&connection), Some(Arc::new(normalizer.clone())));

        let exchange = match self.signer {
            Some((signer, address)) => {
                validate_address(&address)?;
                let api = ExchangeApi::new(
                    Arc::clone(&rest),
                    Arc::clone(&symbols),
                    signer,
                    normalizer.clone(),
                    address,
                    config.network.network,
                );
                Some(match self.vault_address {
                    Some(vault) => api.with_vault_address(vault),
                    None => api,
                })
            }
            None => None,
        };

        info!(
            "Hyperliquid client for {} ({}), authenticated: {}",
            config.network.network,
            config.network.api_url(),
            exchange.is_some()
        );

        Ok(HyperliquidClient {
            info: InfoApi::new(rest, Arc::clone(&symbols), normalizer),
            ws: WsApi::new(registry, Arc::clone(&symbols)),
            exchange,
            symbols,
            connection,
            config,
        })
    }
}

fn attach_connection_logging(connection: &ConnectionManager, max_attempts: u32) {
    let logger = StructuredLogger::new("connection");
    let url = connection.url().to_string();

    for kind in EventKind::ALL {
        if kind == EventKind::Message {
            continue;
        }
        let logger = logger.clone();
        let url = url.clone();
        connection.events().on(kind, move |event| match event {
            ConnectionEvent::Open => logger.log_connection_state("open", &url),
            ConnectionEvent::Close { code, reason } => {
                logger.log_connection_state(&format!("closed ({:?}: {})", code, reason), &url)
            }
            ConnectionEvent::Reconnect { attempt } => logger.log_reconnect_attempt(*attempt, max_attempts),
            ConnectionEvent::MaxReconnectAttemptsReached { attempts } => logger.log_reconnect_exhausted(*attempts),
            ConnectionEvent::Error(message) => logger.log_error(message, Some("websocket")),
            ConnectionEvent::Message(_) => {}
        });
    }
}

/// Entry point: symbol cache, REST queries, authenticated actions and streaming feeds
/// over one shared connection.
pub struct HyperliquidClient {
    config: HlConfig,
    symbols: Arc<SymbolCache>,
    connection: Arc<ConnectionManager>,
    info: InfoApi,
    exchange: Option<ExchangeApi>,
    ws: WsApi,
}

impl HyperliquidClient {
    pub fn builder() -> HyperliquidClientBuilder {
        HyperliquidClientBuilder::default()
    }

    /// Loads symbol metadata and starts its periodic refresh. The socket opens lazily on
    /// the first subscription.
    pub async fn initialize(&self) -> Result<()> {
        self.symbols.initialize().await
    }

    pub fn config(&self) -> &HlConfig {
        &self.config
    }

    pub fn info(&self) -> &InfoApi {
        &self.info
    }

    /// `None` unless the client was built with a signer.
    pub fn exchange(&self) -> Option<&ExchangeApi> {
        self.exchange.as_ref()
    }

    pub fn ws(&self) -> &WsApi {
        &self.ws
    }

    pub fn symbols(&self) -> &Arc<SymbolCache> {
        &self.symbols
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Stops background refresh and closes the socket. Subscriptions are dropped.
    pub async fn shutdown(&self) -> Result<()> {
        self.symbols.stop_periodic_refresh();
        self.connection.close().await?;
        info!("Hyperliquid client shut down");
        Ok(())
    }
}

impl std::fmt::Debug for HyperliquidClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidClient")
            .field("network", &self.config.network.network)
            .field("symbols", &self.symbols)
            .field("connection", &self.connection)
            .field("authenticated", &self.exchange.is_some())
            .finish()
    }
}
