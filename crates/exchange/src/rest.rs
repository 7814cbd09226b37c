use async_trait::async_trait;
use hlkit_core::config::RestSettings;
use hlkit_core::{HlError, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use crate::rate_limiter::RateLimiter;
use crate::traits::RestClient;

/// JSON-over-HTTP transport with client-side rate limiting.
#[derive(Debug)]
pub struct RestTransport {
    client: Client,
    base_url: Url,
    rate_limiter: RateLimiter,
}

impl RestTransport {
    pub fn new(base_url: &str, settings: &RestSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        let base_url = Url::parse(base_url)
            .map_err(|e| HlError::InvalidData(format!("Invalid base URL {}: {}", base_url, e)))?;

        Ok(Self {
            client,
            base_url,
            rate_limiter: RateLimiter::from_settings(settings),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn build_url(&self, endpoint: &str) -> Result<Url> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| HlError::InvalidData(format!("Invalid endpoint {}: {}", endpoint, e)))
    }
}

/// Maps an HTTP status and body to the library's error taxonomy.
fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("Rate limit exceeded: {}", body);
        return Err(HlError::RateLimit(format!("HTTP 429: {}", body)));
    }

    if !status.is_success() {
        error!("HTTP error {}: {}", status, body);
        return Err(HlError::Api(format!("HTTP error {}: {}", status, body)));
    }

    Ok(())
}

#[async_trait]
impl RestClient for RestTransport {
    async fn post(&self, endpoint: &str, body: &Value, weight: u32) -> Result<Value> {
        self.rate_limiter.acquire(weight).await;

        let url = self.build_url(endpoint)?;
        debug!("POST {} (weight {})", url, weight);

        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        check_status(status, &text)?;

        Ok(serde_json::from_str(&text)?)
    }
}
