use hlkit_core::{HlError, Result};
use std::sync::Arc;
use tracing::debug;

use crate::traits::TransportFactory;

/// Ordered list of socket implementations; the first available one wins.
#[derive(Clone, Default)]
pub struct TransportSelector {
    factories: Vec<Arc<dyn TransportFactory>>,
}

impl TransportSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector preloaded with the implementations compiled into this build.
    pub fn native() -> Self {
        #[allow(unused_mut)]
        let mut selector = Self::new();
        #[cfg(feature = "native-ws")]
        selector.register(Arc::new(tungstenite::TungsteniteTransport::new()));
        selector
    }

    pub fn with_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn register(&mut self, factory: Arc<dyn TransportFactory>) {
        debug!("Registering transport: {}", factory.name());
        self.factories.push(factory);
    }

    pub fn select(&self) -> Result<Arc<dyn TransportFactory>> {
        self.factories
            .iter()
            .find(|factory| factory.is_available())
            .cloned()
            .ok_or_else(|| {
                let tried: Vec<&str> = self.factories.iter().map(|f| f.name()).collect();
                HlError::TransportUnavailable(if tried.is_empty() {
                    "no transport implementation registered".to_string()
                } else {
                    format!("none of [{}] is usable in this runtime", tried.join(", "))
                })
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for TransportSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSelector")
            .field("factories", &self.names())
            .finish()
    }
}

#[cfg(feature = "native-ws")]
pub use tungstenite::TungsteniteTransport;

#[cfg(feature = "native-ws")]
mod tungstenite {
    use async_trait::async_trait;
    use futures::stream::{SplitSink, StreamExt};
    use futures::SinkExt;
    use hlkit_core::{HlError, Result};
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tokio::sync::Mutex;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
    use tracing::{debug, info};
    use url::Url;

    use crate::traits::{TransportConnection, TransportEvent, TransportFactory, TransportSink};

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
    type WsWriter = Arc<Mutex<SplitSink<WsStream, Message>>>;

    /// Native socket backed by tokio-tungstenite.
    #[derive(Debug, Default)]
    pub struct TungsteniteTransport;

    impl TungsteniteTransport {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl TransportFactory for TungsteniteTransport {
        async fn connect(&self, url: &Url) -> Result<TransportConnection> {
            let (ws_stream, response) = connect_async(url.as_str())
                .await
                .map_err(|e| HlError::WebSocket(format!("Connection failed: {}", e)))?;
            info!("WebSocket connected. Response: {:?}", response.status());

            let (write, read) = ws_stream.split();
            let writer: WsWriter = Arc::new(Mutex::new(write));
            let pong_writer = Arc::clone(&writer);

            let stream = read.filter_map(move |frame| {
                let pong_writer = Arc::clone(&pong_writer);
                async move {
                    match frame {
                        Ok(Message::Text(text)) => Some(TransportEvent::Message(text)),
                        Ok(Message::Binary(data)) => Some(TransportEvent::Message(
                            String::from_utf8_lossy(&data).into_owned(),
                        )),
                        Ok(Message::Ping(data)) => {
                            debug!("Received WebSocket ping");
                            if let Err(e) = pong_writer.lock().await.send(Message::Pong(data)).await {
                                return Some(TransportEvent::Error(format!("Failed to send pong: {}", e)));
                            }
                            None
                        }
                        Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
                        Ok(Message::Close(frame)) => Some(match frame {
                            Some(frame) => TransportEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.to_string(),
                            },
                            None => TransportEvent::Closed {
                                code: None,
                                reason: "close frame without payload".to_string(),
                            },
                        }),
                        Err(e) => Some(TransportEvent::Error(e.to_string())),
                    }
                }
            });

            Ok(TransportConnection::new(
                Box::new(TungsteniteSink { writer }),
                Box::pin(stream),
            ))
        }

        fn name(&self) -> &'static str {
            "tokio-tungstenite"
        }
    }

    struct TungsteniteSink {
        writer: WsWriter,
    }

    #[async_trait]
    impl TransportSink for TungsteniteSink {
        async fn send_text(&mut self, text: String) -> Result<()> {
            self.writer
                .lock()
                .await
                .send(Message::Text(text))
                .await
                .map_err(|e| HlError::WebSocket(format!("Failed to send message: {}", e)))
        }

        async fn close(&mut self) -> Result<()> {
            self.writer
                .lock()
                .await
                .close()
                .await
                .map_err(|e| HlError::WebSocket(format!("Failed to close socket: {}", e)))
        }
    }
}
