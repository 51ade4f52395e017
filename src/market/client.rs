//! Polymarket public API client: order books, windows and resolutions.

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::instrument;

use super::book::OrderBookResponse;
use super::discovery;
use super::types::{BookQuote, MarketWindow, Outcome, WindowStatus};
use crate::config::Config;
use crate::error::{MarketError, TradingError};
use crate::trading::gateway::{BookSource, ResolutionSource, WindowSource};

/// Build the shared HTTP client with low-latency settings.
pub fn http_client(timeout_ms: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .connect_timeout(std::time::Duration::from_millis(500))
        // Disable Nagle's algorithm
        .tcp_nodelay(true)
        .tcp_keepalive(std::time::Duration::from_secs(30))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .build()
}

/// Polymarket CLOB and Gamma API client.
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL for CLOB API.
    clob_url: String,
    /// Base URL for Gamma API.
    gamma_url: String,
    /// Window slug prefix.
    slug_prefix: String,
    /// Window duration in seconds.
    window_seconds: i64,
}

impl PolymarketClient {
    /// Create a new Polymarket client from config.
    pub fn new(config: &Config) -> Result<Self, MarketError> {
        Ok(Self::with_http(http_client(config.http_timeout_ms)?, config))
    }

    /// Create a client sharing an existing HTTP client.
    pub fn with_http(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            clob_url: config.polymarket_clob_url.trim_end_matches('/').to_string(),
            gamma_url: config.polymarket_gamma_url.trim_end_matches('/').to_string(),
            slug_prefix: config.market_slug_prefix.clone(),
            window_seconds: config.window_seconds,
        }
    }

    /// Get the HTTP client reference.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Get the CLOB base URL.
    pub fn clob_url(&self) -> &str {
        &self.clob_url
    }

    /// Get the Gamma base URL.
    pub fn gamma_url(&self) -> &str {
        &self.gamma_url
    }

    /// Fetch the raw order book for a token.
    #[instrument(skip(self), fields(token_id = %token_id))]
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBookResponse, MarketError> {
        let url = format!("{}/book", self.clob_url);

        let response = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketError::FetchFailed {
                slug: token_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response
            .json()
            .await
            .map_err(|e| MarketError::ParseError(format!("Failed to parse order book: {}", e)))
    }
}

#[async_trait]
impl BookSource for PolymarketClient {
    async fn quote(&self, window: &MarketWindow, outcome: Outcome) -> Result<BookQuote, MarketError> {
        let token_id = window.token_id(outcome);
        let book = self.get_order_book(token_id).await?;
        book.top_of_book(token_id, outcome, OffsetDateTime::now_utc())
    }
}

#[async_trait]
impl WindowSource for PolymarketClient {
    async fn current_window(&self, now: OffsetDateTime) -> Result<MarketWindow, MarketError> {
        discovery::discover_window(
            &self.http,
            &self.gamma_url,
            &self.slug_prefix,
            self.window_seconds,
            now,
        )
        .await
    }
}

#[async_trait]
impl ResolutionSource for PolymarketClient {
    async fn resolve(&self, window: &MarketWindow) -> Result<WindowStatus, TradingError> {
        discovery::fetch_window_status(&self.http, &self.gamma_url, window)
            .await
            .map_err(|e| TradingError::ResolutionFailed {
                slug: window.slug.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation_works() {
        let config = Config {
            polymarket_clob_url: "https://clob.example.com/".to_string(),
            ..Config::default()
        };
        let client = PolymarketClient::new(&config).unwrap();
        assert_eq!(client.clob_url(), "https://clob.example.com");
        assert_eq!(client.gamma_url(), "https://gamma-api.polymarket.com");
    }
}
