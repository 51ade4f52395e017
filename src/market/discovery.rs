//! Window discovery for BTC up/down markets.
//!
//! Windows are aligned to the unix epoch, so the slug of the current window
//! can be computed from the clock and looked up on the Gamma events API.

use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::types::{GammaEvent, GammaMarket, MarketWindow, WindowStatus};
use crate::error::MarketError;

/// How many windows ahead of the current one to look up before giving up.
const LOOKAHEAD_WINDOWS: i64 = 2;

/// Start of the window containing `now`.
pub fn window_start(now: OffsetDateTime, window_seconds: i64) -> i64 {
    now.unix_timestamp().div_euclid(window_seconds) * window_seconds
}

/// Slug of the window starting at `start`.
pub fn window_slug(prefix: &str, start: i64) -> String {
    format!("{}-{}", prefix, start)
}

/// Parse the start timestamp from a slug.
pub fn slug_timestamp(slug: &str) -> Result<i64, MarketError> {
    slug.rsplit('-')
        .next()
        .and_then(|ts| ts.parse::<i64>().ok())
        .ok_or_else(|| MarketError::ParseError(format!("Slug not in expected format: {}", slug)))
}

/// Get the next window slug based on current slug.
pub fn next_slug(slug: &str, window_seconds: i64) -> Result<String, MarketError> {
    let ts = slug_timestamp(slug)?;
    let prefix = &slug[..slug.len() - ts.to_string().len()];
    Ok(format!("{}{}", prefix, ts + window_seconds))
}

/// Find the window that is tradable at `now`.
///
/// Tries the window containing `now` first, then the following ones, in case
/// the current market was not listed.
#[instrument(skip(client, gamma_url))]
pub async fn discover_window(
    client: &reqwest::Client,
    gamma_url: &str,
    prefix: &str,
    window_seconds: i64,
    now: OffsetDateTime,
) -> Result<MarketWindow, MarketError> {
    let current = window_start(now, window_seconds);
    let mut last_error = None;

    for i in 0..=LOOKAHEAD_WINDOWS {
        let slug = window_slug(prefix, current + i * window_seconds);
        debug!(slug = %slug, "Checking computed slug");

        match fetch_window(client, gamma_url, &slug, window_seconds).await {
            Ok(window) if !window.is_expired_at(now) => {
                info!(slug = %window.slug, end = window.end_timestamp, "Found market window");
                return Ok(window);
            }
            Ok(window) => {
                debug!(slug = %window.slug, "Market exists but is closed");
            }
            Err(e) => {
                debug!(slug = %slug, error = %e, "Slug not found");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(MarketError::WindowNotFound {
        slug: window_slug(prefix, current),
    }))
}

/// Fetch the single market of a window event.
async fn fetch_gamma_market(
    client: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
) -> Result<GammaMarket, MarketError> {
    let url = format!("{}/events", gamma_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .query(&[("slug", slug)])
        .header("User-Agent", "Mozilla/5.0")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let events: Vec<GammaEvent> = response.json().await.map_err(|e| {
        MarketError::ParseError(format!("Failed to parse Gamma events response: {}", e))
    })?;

    events
        .into_iter()
        .next()
        .and_then(|event| event.markets.into_iter().next())
        .ok_or_else(|| MarketError::WindowNotFound {
            slug: slug.to_string(),
        })
}

/// Fetch window details from a slug.
#[instrument(skip(client, gamma_url))]
pub async fn fetch_window(
    client: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
    window_seconds: i64,
) -> Result<MarketWindow, MarketError> {
    let market = fetch_gamma_market(client, gamma_url, slug).await?;
    window_from_market(slug, market, window_seconds)
}

/// Build a [`MarketWindow`] from a Gamma market.
pub fn window_from_market(
    slug: &str,
    market: GammaMarket,
    window_seconds: i64,
) -> Result<MarketWindow, MarketError> {
    let tokens = market
        .token_ids()
        .ok_or_else(|| MarketError::ParseError("No clobTokenIds".to_string()))?;
    if tokens.len() != 2 {
        return Err(MarketError::ParseError(format!(
            "Expected 2 token IDs, got {}",
            tokens.len()
        )));
    }

    let start_timestamp = slug_timestamp(slug)?;
    let end_timestamp = market
        .end_timestamp()
        .unwrap_or(start_timestamp + window_seconds);

    Ok(MarketWindow {
        slug: slug.to_string(),
        condition_id: market.condition_id.clone().unwrap_or_default(),
        up_token_id: tokens[0].clone(),
        down_token_id: tokens[1].clone(),
        start_timestamp,
        end_timestamp,
        question: market.question,
    })
}

/// Resolution state of a window from Gamma.
#[instrument(skip(client, gamma_url), fields(slug = %window.slug))]
pub async fn fetch_window_status(
    client: &reqwest::Client,
    gamma_url: &str,
    window: &MarketWindow,
) -> Result<WindowStatus, MarketError> {
    let market = fetch_gamma_market(client, gamma_url, &window.slug).await?;
    Ok(status_from_market(&market))
}

/// Interpret Gamma's `closed` flag and final outcome prices.
pub fn status_from_market(market: &GammaMarket) -> WindowStatus {
    if market.closed != Some(true) {
        return WindowStatus::Open;
    }
    WindowStatus::Closed {
        winner: market.winner(),
    }
}
