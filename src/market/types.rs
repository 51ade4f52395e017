//! Market-related types for BTC up/down prediction windows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// Market outcome for BTC up/down binary markets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// BTC goes up (YES token).
    #[strum(serialize = "up", serialize = "yes", serialize = "UP", serialize = "YES")]
    #[default]
    Up,
    /// BTC goes down (NO token).
    #[strum(serialize = "down", serialize = "no", serialize = "DOWN", serialize = "NO")]
    Down,
}

impl Outcome {
    /// Get the opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }

    /// Index of this outcome in Gamma's `outcomes`/`clobTokenIds` arrays.
    pub fn index(&self) -> usize {
        match self {
            Outcome::Up => 0,
            Outcome::Down => 1,
        }
    }
}

/// One fixed-duration BTC up/down market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketWindow {
    /// Market slug (e.g., "btc-updown-5m-1765301400"), used as the window id.
    pub slug: String,
    /// Condition id of the market.
    pub condition_id: String,
    /// UP (YES) token ID for CLOB.
    pub up_token_id: String,
    /// DOWN (NO) token ID for CLOB.
    pub down_token_id: String,
    /// Unix timestamp when the window opened.
    pub start_timestamp: i64,
    /// Unix timestamp when the window closes.
    pub end_timestamp: i64,
    /// Market question text.
    pub question: Option<String>,
}

impl MarketWindow {
    /// Window identifier.
    pub fn id(&self) -> &str {
        &self.slug
    }

    /// Get the token ID for a given outcome.
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Map a token id back to its outcome.
    pub fn outcome_for_token(&self, token_id: &str) -> Option<Outcome> {
        if token_id == self.up_token_id {
            Some(Outcome::Up)
        } else if token_id == self.down_token_id {
            Some(Outcome::Down)
        } else {
            None
        }
    }

    /// Window duration in seconds.
    pub fn duration_seconds(&self) -> i64 {
        self.end_timestamp - self.start_timestamp
    }

    /// Whether the window has closed at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= self.end_timestamp
    }

    /// Whether the window has opened by `at`.
    pub fn has_started_at(&self, at: OffsetDateTime) -> bool {
        at.unix_timestamp() >= self.start_timestamp
    }

    /// Seconds left until close, clamped at zero.
    pub fn seconds_remaining(&self, now: OffsetDateTime) -> i64 {
        (self.end_timestamp - now.unix_timestamp()).max(0)
    }

    /// Format remaining time as "Xm Ys" string.
    pub fn time_remaining_str(&self, now: OffsetDateTime) -> String {
        match self.seconds_remaining(now) {
            0 => "CLOSED".to_string(),
            secs => format!("{}m {}s", secs / 60, secs % 60),
        }
    }
}

/// Timestamped spot price from the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceSample {
    /// When the price was observed.
    pub timestamp: OffsetDateTime,
    /// Spot price.
    pub price: Decimal,
}

impl PriceSample {
    /// Create a new sample.
    pub fn new(timestamp: OffsetDateTime, price: Decimal) -> Self {
        Self { timestamp, price }
    }
}

/// Top of book for one outcome token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BookQuote {
    /// Outcome this quote belongs to.
    pub outcome: Outcome,
    /// Best bid price.
    pub best_bid: Decimal,
    /// Best ask price.
    pub best_ask: Decimal,
    /// When the quote was observed.
    pub observed_at: OffsetDateTime,
}

impl BookQuote {
    /// Bid/ask spread.
    pub fn spread(&self) -> Decimal {
        self.best_ask - self.best_bid
    }

    /// Midpoint price.
    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }
}

/// Quotes for both outcomes of one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSnapshot {
    /// Window the quotes belong to.
    pub window_id: String,
    /// UP (YES) quote.
    pub up: BookQuote,
    /// DOWN (NO) quote.
    pub down: BookQuote,
}

impl BookSnapshot {
    /// Quote for the given outcome.
    pub fn quote(&self, outcome: Outcome) -> &BookQuote {
        match outcome {
            Outcome::Up => &self.up,
            Outcome::Down => &self.down,
        }
    }

    /// Oldest observation time of the two quotes.
    pub fn observed_at(&self) -> OffsetDateTime {
        self.up.observed_at.min(self.down.observed_at)
    }
}

/// Resolution state of a window as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WindowStatus {
    /// Still trading or not yet resolved.
    Open,
    /// Closed; `winner` is `None` when the payout cannot be determined.
    Closed {
        /// Winning outcome, if known.
        winner: Option<Outcome>,
    },
}

/// Event returned by the Gamma `events` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaEvent {
    /// Event slug.
    pub slug: Option<String>,
    /// Markets inside the event (one for up/down windows).
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

/// Market info from Gamma API.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    /// Market slug.
    pub slug: Option<String>,
    /// Condition id.
    #[serde(rename = "conditionId")]
    pub condition_id: Option<String>,
    /// Market question.
    pub question: Option<String>,
    /// End date (ISO format).
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    /// CLOB token IDs; Gamma sends either an array or a JSON-encoded string.
    #[serde(rename = "clobTokenIds")]
    pub clob_token_ids: Option<Value>,
    /// Outcome prices, same encoding as `clob_token_ids`.
    #[serde(rename = "outcomePrices")]
    pub outcome_prices: Option<Value>,
    /// Whether market is closed.
    pub closed: Option<bool>,
}

impl GammaMarket {
    /// Token ids as a list.
    pub fn token_ids(&self) -> Option<Vec<String>> {
        self.clob_token_ids.as_ref().and_then(string_list)
    }

    /// Outcome prices parsed as decimals.
    pub fn prices(&self) -> Option<Vec<Decimal>> {
        let raw = self.outcome_prices.as_ref().and_then(string_list)?;
        raw.iter().map(|p| p.parse().ok()).collect()
    }

    /// End of trading, if the date parses.
    pub fn end_timestamp(&self) -> Option<i64> {
        let raw = self.end_date.as_deref()?;
        OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
            .ok()
            .map(|dt| dt.unix_timestamp())
    }

    /// Winner once resolved: the outcome whose price settled at or above 0.99.
    pub fn winner(&self) -> Option<Outcome> {
        let threshold = Decimal::new(99, 2);
        let prices = self.prices()?;
        if prices.len() != 2 {
            return None;
        }
        match (prices[0] >= threshold, prices[1] >= threshold) {
            (true, false) => Some(Outcome::Up),
            (false, true) => Some(Outcome::Down),
            _ => None,
        }
    }
}

/// Decode a list that may arrive as an array or as a JSON string holding one.
fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(encoded) => {
            let inner: Value = serde_json::from_str(encoded).ok()?;
            match inner {
                Value::Array(_) => string_list(&inner),
                _ => None,
            }
        }
        _ => None,
    }
}
