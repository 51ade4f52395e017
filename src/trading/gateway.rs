//! Seams between the engine and the outside world.
//!
//! The strategy engine and driver only talk to these traits, so the same
//! lifecycle code runs against the live CLOB, the paper simulator, or test
//! doubles.

use async_trait::async_trait;
use time::OffsetDateTime;

use super::order::{OrderParams, OrderResult, OrderState};
use crate::error::{MarketError, OracleError, TradingError};
use crate::market::{BookQuote, BookSnapshot, MarketWindow, Outcome, PriceSample, WindowStatus};

/// Timestamped spot prices for the underlying.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Most recent sample.
    async fn latest_sample(&self) -> Result<PriceSample, OracleError>;
}

/// Top-of-book quotes for window outcome tokens.
#[async_trait]
pub trait BookSource: Send + Sync {
    /// Best bid/ask for one outcome.
    async fn quote(&self, window: &MarketWindow, outcome: Outcome) -> Result<BookQuote, MarketError>;

    /// Quotes for both outcomes of a window.
    async fn snapshot(&self, window: &MarketWindow) -> Result<BookSnapshot, MarketError> {
        let up = self.quote(window, Outcome::Up).await?;
        let down = self.quote(window, Outcome::Down).await?;
        Ok(BookSnapshot {
            window_id: window.id().to_string(),
            up,
            down,
        })
    }
}

/// Maps wall-clock time to the tradable window.
#[async_trait]
pub trait WindowSource: Send + Sync {
    /// Window that is current at `now`.
    async fn current_window(&self, now: OffsetDateTime) -> Result<MarketWindow, MarketError>;
}

/// Reports how a window resolved.
#[async_trait]
pub trait ResolutionSource: Send + Sync {
    /// Resolution state of `window`.
    async fn resolve(&self, window: &MarketWindow) -> Result<WindowStatus, TradingError>;
}

/// Order entry and settlement status.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Place a limit order.
    async fn place_limit_order(&self, params: &OrderParams) -> Result<OrderResult, TradingError>;

    /// Cancel a resting order. Cancelling an order that already reached a
    /// terminal state succeeds.
    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError>;

    /// Current state of an order.
    async fn order_status(&self, order_id: &str) -> Result<OrderState, TradingError>;

    /// Resolution state of a window.
    async fn window_status(&self, window: &MarketWindow) -> Result<WindowStatus, TradingError>;

    /// Fresh book data for the window being traded. Simulated gateways use
    /// it to fill resting orders.
    fn observe_book(&self, _window: &MarketWindow, _book: &BookSnapshot) {}
}
