//! BTC spot price oracle backed by the Binance ticker endpoint.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::OracleError;
use crate::market::PriceSample;
use crate::trading::gateway::PriceSource;

/// Base delay of the retry backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Ticker payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerResponse {
    /// Symbol, e.g. "BTCUSDT".
    pub symbol: Option<String>,
    /// Last price as a decimal string.
    pub price: String,
}

/// Fetches the latest trade price over REST.
#[derive(Debug, Clone)]
pub struct BinanceOracle {
    http: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl BinanceOracle {
    /// Create an oracle sharing `http`.
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            url: format!("{}{}", config.oracle_url, config.oracle_symbol),
            max_retries: config.oracle_max_retries.max(1),
        }
    }

    /// Ticker URL including the symbol.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_once(&self) -> Result<Decimal, FetchAttempt> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchAttempt::Retry(e.into()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FetchAttempt::Retry(OracleError::BadStatus {
                status: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(FetchAttempt::Fatal(OracleError::BadStatus {
                status: status.as_u16(),
            }));
        }

        let ticker: TickerResponse = response
            .json()
            .await
            .map_err(|e| FetchAttempt::Fatal(OracleError::ParseError(e.to_string())))?;
        parse_price(&ticker).map_err(FetchAttempt::Fatal)
    }
}

enum FetchAttempt {
    Retry(OracleError),
    Fatal(OracleError),
}

/// Validate and parse a ticker price.
pub fn parse_price(ticker: &TickerResponse) -> Result<Decimal, OracleError> {
    let price: Decimal = ticker
        .price
        .parse()
        .map_err(|_| OracleError::ParseError(format!("invalid price {:?}", ticker.price)))?;
    if price <= Decimal::ZERO {
        return Err(OracleError::ParseError(format!("non-positive price {}", price)));
    }
    Ok(price)
}

/// Backoff before retry number `attempt` (0-based): 0.5s, 1s, 2s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt)
}

#[async_trait]
impl PriceSource for BinanceOracle {
    #[instrument(skip(self))]
    async fn latest_sample(&self) -> Result<PriceSample, OracleError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once().await {
                Ok(price) => {
                    let sample = PriceSample::new(OffsetDateTime::now_utc(), price);
                    debug!(price = %price, "Oracle sample");
                    return Ok(sample);
                }
                Err(FetchAttempt::Fatal(e)) => return Err(e),
                Err(FetchAttempt::Retry(e)) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    let delay = backoff_delay(attempt - 1);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Oracle request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_price_accepts_decimal_strings() {
        let ticker = TickerResponse {
            symbol: Some("BTCUSDT".to_string()),
            price: "60050.12000000".to_string(),
        };
        assert_eq!(parse_price(&ticker).unwrap(), dec!(60050.12));
    }

    #[test]
    fn parse_price_rejects_garbage_and_zero() {
        let garbage = TickerResponse {
            symbol: None,
            price: "n/a".to_string(),
        };
        assert!(parse_price(&garbage).is_err());

        let zero = TickerResponse {
            symbol: None,
            price: "0".to_string(),
        };
        assert!(parse_price(&zero).is_err());
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
    }

    #[test]
    fn oracle_url_includes_symbol() {
        let http = reqwest::Client::new();
        let oracle = BinanceOracle::new(http, &Config::default());
        assert_eq!(
            oracle.url(),
            "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT"
        );
    }
}
