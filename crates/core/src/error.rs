use thiserror::Error;

pub type Result<T> = std::result::Result<T, HlError>;

#[derive(Error, Debug)]
pub enum HlError {
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Subscription limit exceeded: at most {0} active subscriptions")]
    SubscriptionLimitExceeded(usize),

    #[error("Invalid metadata response: {0}")]
    InvalidMetadataResponse(String),

    #[error("Symbol cache initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Symbol cache not initialized")]
    NotInitialized,

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HlError {
    /// Errors the connection layer recovers from by itself through reconnection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HlError::NotConnected | HlError::WebSocket(_) | HlError::Http(_) | HlError::RateLimit(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(HlError::NotConnected.to_string(), "Not connected");
        assert_eq!(
            HlError::UnknownAsset("FOO-PERP".to_string()).to_string(),
            "Unknown asset: FOO-PERP"
        );
        assert_eq!(
            HlError::SubscriptionLimitExceeded(1000).to_string(),
            "Subscription limit exceeded: at most 1000 active subscriptions"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(HlError::NotConnected.is_transient());
        assert!(HlError::WebSocket("reset".to_string()).is_transient());
        assert!(!HlError::NotInitialized.is_transient());
        assert!(!HlError::InvalidMetadataResponse("missing universe".to_string()).is_transient());
    }
}
