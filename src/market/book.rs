//! CLOB order book payloads and top-of-book extraction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::types::{BookQuote, Outcome};
use crate::error::MarketError;

/// Order book response from API.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    /// Bid levels.
    pub bids: Option<Vec<OrderLevel>>,
    /// Ask levels.
    pub asks: Option<Vec<OrderLevel>>,
    /// Market ID.
    pub market: Option<String>,
    /// Asset ID.
    pub asset_id: Option<String>,
}

/// Single price level in order book.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderLevel {
    /// Price at this level.
    pub price: String,
    /// Size available at this level.
    pub size: String,
}

impl OrderBookResponse {
    /// Reduce the book to its best bid and best ask.
    ///
    /// Levels with unparseable or zero size are ignored. The CLOB does not
    /// guarantee level ordering, so the extremes are searched.
    pub fn top_of_book(
        &self,
        token_id: &str,
        outcome: Outcome,
        observed_at: OffsetDateTime,
    ) -> Result<BookQuote, MarketError> {
        let best_bid = live_prices(self.bids.as_deref()).max();
        let best_ask = live_prices(self.asks.as_deref()).min();

        match (best_bid, best_ask) {
            (Some(best_bid), Some(best_ask)) => Ok(BookQuote {
                outcome,
                best_bid,
                best_ask,
                observed_at,
            }),
            _ => Err(MarketError::EmptyBook {
                token_id: token_id.to_string(),
            }),
        }
    }
}

fn live_prices(levels: Option<&[OrderLevel]>) -> impl Iterator<Item = Decimal> + '_ {
    levels.unwrap_or_default().iter().filter_map(|level| {
        let price: Decimal = level.price.parse().ok()?;
        let size: Decimal = level.size.parse().ok()?;
        (size > Decimal::ZERO).then_some(price)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    fn level(price: &str, size: &str) -> OrderLevel {
        OrderLevel {
            price: price.to_string(),
            size: size.to_string(),
        }
    }

    #[test]
    fn top_of_book_picks_extremes() {
        let book = OrderBookResponse {
            bids: Some(vec![level("0.40", "10"), level("0.45", "5"), level("0.44", "1")]),
            asks: Some(vec![level("0.52", "3"), level("0.47", "8")]),
            market: None,
            asset_id: Some("token".to_string()),
        };
        let at = datetime!(2023-11-14 22:15:00 UTC);

        let quote = book.top_of_book("token", Outcome::Up, at).unwrap();
        assert_eq!(quote.best_bid, dec!(0.45));
        assert_eq!(quote.best_ask, dec!(0.47));
        assert_eq!(quote.observed_at, at);
    }

    #[test]
    fn zero_size_levels_are_ignored() {
        let book = OrderBookResponse {
            bids: Some(vec![level("0.50", "0"), level("0.41", "2")]),
            asks: Some(vec![level("0.43", "1")]),
            market: None,
            asset_id: None,
        };
        let quote = book
            .top_of_book("token", Outcome::Down, datetime!(2023-11-14 22:15:00 UTC))
            .unwrap();
        assert_eq!(quote.best_bid, dec!(0.41));
    }

    #[test]
    fn one_sided_book_is_empty() {
        let book = OrderBookResponse {
            bids: Some(vec![level("0.41", "2")]),
            asks: None,
            market: None,
            asset_id: None,
        };
        let result = book.top_of_book("token", Outcome::Up, datetime!(2023-11-14 22:15:00 UTC));
        assert!(matches!(result, Err(MarketError::EmptyBook { .. })));
    }
}
