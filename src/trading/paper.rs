//! Simulated exchange gateway for paper trading.
//!
//! Orders rest in memory and fill against the book snapshots the driver feeds
//! in through [`ExchangeGateway::observe_book`]. A resting BUY fills once the
//! best ask reaches its limit, a resting SELL once the best bid does. Fills are
//! all-or-nothing at the limit price. A quote no newer than the last one seen
//! for its token is ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

/// Seconds after a window closes before its quotes and finished orders are dropped.
const PRUNE_AFTER_SECONDS: i64 = 60;

use super::gateway::{ExchangeGateway, ResolutionSource};
use super::order::{OrderParams, OrderResult, OrderState, OrderStatus, Side};
use crate::error::TradingError;
use crate::market::{BookQuote, BookSnapshot, MarketWindow, Outcome, WindowStatus};

#[derive(Debug, Clone)]
struct PaperOrder {
    params: OrderParams,
    status: OrderStatus,
    fill_price: Option<Decimal>,
}

#[derive(Debug, Default)]
struct PaperState {
    next_id: u64,
    orders: HashMap<String, PaperOrder>,
    quotes: HashMap<String, BookQuote>,
    /// Token id to the close timestamp of its window.
    closes_at: HashMap<String, i64>,
    settlements: HashMap<String, WindowStatus>,
}

impl PaperState {
    fn prune(&mut self, now: i64) {
        let expired: Vec<String> = self
            .closes_at
            .iter()
            .filter(|(_, end)| now >= **end + PRUNE_AFTER_SECONDS)
            .map(|(token, _)| token.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        for token in &expired {
            self.quotes.remove(token);
        }
        let before = self.orders.len();
        self.orders
            .retain(|_, o| !(o.status.is_terminal() && expired.contains(&o.params.token_id)));
        // Tokens with live orders stay tracked until those orders finish.
        self.closes_at.retain(|token, _| {
            !expired.contains(token)
                || self
                    .orders
                    .values()
                    .any(|o| &o.params.token_id == token)
        });
        debug!(
            tokens = expired.len(),
            orders = before - self.orders.len(),
            "[PAPER] Pruned expired window state"
        );
    }
}

/// In-memory exchange that simulates maker fills.
pub struct PaperGateway {
    state: Mutex<PaperState>,
    resolver: Option<Arc<dyn ResolutionSource>>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperGateway {
    /// Create a gateway whose windows stay open until settled by hand.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            resolver: None,
        }
    }

    /// Create a gateway that asks `resolver` how real windows settled.
    pub fn with_resolver(resolver: Arc<dyn ResolutionSource>) -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            resolver: Some(resolver),
        }
    }

    /// Force the resolution of a window. Takes precedence over the resolver.
    pub fn settle(&self, window_id: &str, status: WindowStatus) {
        if let Ok(mut state) = self.state.lock() {
            state.settlements.insert(window_id.to_string(), status);
        }
    }

    /// Number of orders still resting.
    pub fn resting_orders(&self) -> usize {
        self.state
            .lock()
            .map(|state| {
                state
                    .orders
                    .values()
                    .filter(|o| !o.status.is_terminal())
                    .count()
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>, TradingError> {
        self.state
            .lock()
            .map_err(|e| TradingError::SubmissionFailed(format!("paper state poisoned: {}", e)))
    }
}

/// Price a resting order executes at, given the latest quote.
fn crossing_price(params: &OrderParams, quote: &BookQuote) -> Option<Decimal> {
    match params.side {
        Side::Buy if quote.best_ask <= params.price => Some(params.price),
        Side::Sell if quote.best_bid >= params.price => Some(params.price),
        _ => None,
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    #[instrument(skip(self, params), fields(token = %params.token_id, side = %params.side))]
    async fn place_limit_order(&self, params: &OrderParams) -> Result<OrderResult, TradingError> {
        params.validate().map_err(TradingError::InvalidParams)?;

        let mut state = self.lock()?;
        let quote = state.quotes.get(&params.token_id).copied();

        if params.post_only {
            if let Some(quote) = quote {
                let crosses = match params.side {
                    Side::Buy => params.price >= quote.best_ask,
                    Side::Sell => params.price <= quote.best_bid,
                };
                if crosses {
                    debug!(price = %params.price, bid = %quote.best_bid, ask = %quote.best_ask, "Post-only order would cross");
                    return Ok(OrderResult::Rejected {
                        reason: "post-only order would cross the book".to_string(),
                    });
                }
            }
        }

        state.next_id += 1;
        let order_id = format!("paper-{}", state.next_id);
        let immediate = quote.and_then(|q| crossing_price(params, &q));

        let (status, fill_price) = match immediate {
            Some(price) => (OrderStatus::Filled, Some(price)),
            None => (OrderStatus::Live, None),
        };
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                params: params.clone(),
                status,
                fill_price,
            },
        );

        info!(
            order_id = %order_id,
            side = %params.side,
            price = %params.price,
            size = %params.size,
            filled = immediate.is_some(),
            "[PAPER] Order placed"
        );

        Ok(match fill_price {
            Some(price) => OrderResult::Filled {
                order_id,
                price,
                size: params.size,
            },
            None => OrderResult::Pending { order_id },
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError> {
        let mut state = self.lock()?;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TradingError::CancelFailed {
                order_id: order_id.to_string(),
                reason: "unknown order".to_string(),
            })?;

        if !order.status.is_terminal() {
            order.status = OrderStatus::Canceled;
            info!(order_id = %order_id, "[PAPER] Order cancelled");
        }
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderState, TradingError> {
        let state = self.lock()?;
        let order = state
            .orders
            .get(order_id)
            .ok_or_else(|| TradingError::StatusFailed {
                order_id: order_id.to_string(),
                reason: "unknown order".to_string(),
            })?;

        let filled_size = if order.status.is_filled() {
            order.params.size
        } else {
            Decimal::ZERO
        };

        Ok(OrderState {
            order_id: order_id.to_string(),
            status: order.status,
            filled_size,
            original_size: order.params.size,
            fill_price: order.fill_price,
        })
    }

    async fn window_status(&self, window: &MarketWindow) -> Result<WindowStatus, TradingError> {
        let manual = self.lock()?.settlements.get(window.id()).copied();
        if let Some(status) = manual {
            return Ok(status);
        }
        match &self.resolver {
            Some(resolver) => resolver.resolve(window).await,
            None => Ok(WindowStatus::Open),
        }
    }

    fn observe_book(&self, window: &MarketWindow, book: &BookSnapshot) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        let mut fresh = Vec::with_capacity(2);
        for outcome in [Outcome::Up, Outcome::Down] {
            let token = window.token_id(outcome);
            let quote = *book.quote(outcome);
            if let Some(last) = state.quotes.get(token) {
                if quote.observed_at <= last.observed_at {
                    debug!(token = %token, at = %quote.observed_at, "[PAPER] Ignoring stale quote");
                    continue;
                }
            }
            state.quotes.insert(token.to_string(), quote);
            state
                .closes_at
                .insert(token.to_string(), window.end_timestamp);
            fresh.push((token.to_string(), quote));
        }

        for (order_id, order) in state.orders.iter_mut() {
            if order.status.is_terminal() {
                continue;
            }
            let Some((_, quote)) = fresh.iter().find(|(t, _)| *t == order.params.token_id) else {
                continue;
            };
            if let Some(price) = crossing_price(&order.params, quote) {
                order.status = OrderStatus::Filled;
                order.fill_price = Some(price);
                info!(
                    order_id = %order_id,
                    side = %order.params.side,
                    price = %price,
                    size = %order.params.size,
                    "[PAPER] Resting order filled"
                );
            }
        }

        state.prune(book.observed_at().unix_timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    fn window() -> MarketWindow {
        MarketWindow {
            slug: "btc-updown-5m-1700000100".to_string(),
            condition_id: "0xcond".to_string(),
            up_token_id: "up".to_string(),
            down_token_id: "down".to_string(),
            start_timestamp: 1_700_000_100,
            end_timestamp: 1_700_000_400,
            question: None,
        }
    }

    fn book(up_bid: Decimal, up_ask: Decimal) -> BookSnapshot {
        book_at(0, up_bid, up_ask)
    }

    fn book_at(offset: i64, up_bid: Decimal, up_ask: Decimal) -> BookSnapshot {
        let at = datetime!(2023-11-14 22:16:00 UTC) + time::Duration::seconds(offset);
        BookSnapshot {
            window_id: window().slug,
            up: BookQuote {
                outcome: Outcome::Up,
                best_bid: up_bid,
                best_ask: up_ask,
                observed_at: at,
            },
            down: BookQuote {
                outcome: Outcome::Down,
                best_bid: Decimal::ONE - up_ask,
                best_ask: Decimal::ONE - up_bid,
                observed_at: at,
            },
        }
    }

    #[tokio::test]
    async fn maker_buy_rests_then_fills_when_ask_reaches_limit() {
        let gateway = PaperGateway::new();
        let w = window();
        gateway.observe_book(&w, &book(dec!(0.45), dec!(0.47)));

        let result = gateway
            .place_limit_order(&OrderParams::maker_buy("up", dec!(0.451), dec!(11.08)))
            .await
            .unwrap();
        let OrderResult::Pending { order_id } = result else {
            panic!("expected pending, got {:?}", result);
        };
        assert_eq!(gateway.resting_orders(), 1);

        gateway.observe_book(&w, &book_at(1, dec!(0.44), dec!(0.451)));
        let state = gateway.order_status(&order_id).await.unwrap();
        assert!(state.is_filled());
        assert_eq!(state.fill_price, Some(dec!(0.451)));
        assert_eq!(state.filled_size, dec!(11.08));
        assert_eq!(gateway.resting_orders(), 0);
    }

    #[tokio::test]
    async fn post_only_buy_that_crosses_is_rejected() {
        let gateway = PaperGateway::new();
        gateway.observe_book(&window(), &book(dec!(0.45), dec!(0.46)));

        let result = gateway
            .place_limit_order(&OrderParams::maker_buy("up", dec!(0.46), dec!(10)))
            .await
            .unwrap();
        assert!(matches!(result, OrderResult::Rejected { .. }));
        assert_eq!(gateway.resting_orders(), 0);
    }

    #[tokio::test]
    async fn sell_at_bid_fills_immediately() {
        let gateway = PaperGateway::new();
        gateway.observe_book(&window(), &book(dec!(0.80), dec!(0.82)));

        let result = gateway
            .place_limit_order(&OrderParams::sell("up", dec!(0.80), dec!(11.08)))
            .await
            .unwrap();
        assert_eq!(
            result,
            OrderResult::Filled {
                order_id: "paper-1".to_string(),
                price: dec!(0.80),
                size: dec!(11.08),
            }
        );
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_unknown_ids_fail() {
        let gateway = PaperGateway::new();
        gateway.observe_book(&window(), &book(dec!(0.45), dec!(0.47)));
        let OrderResult::Pending { order_id } = gateway
            .place_limit_order(&OrderParams::maker_buy("up", dec!(0.451), dec!(10)))
            .await
            .unwrap()
        else {
            panic!("expected pending");
        };

        assert!(gateway.cancel_order(&order_id).await.is_ok());
        assert!(gateway.cancel_order(&order_id).await.is_ok());
        let state = gateway.order_status(&order_id).await.unwrap();
        assert_eq!(state.status, OrderStatus::Canceled);

        assert!(gateway.cancel_order("missing").await.is_err());
    }

    #[tokio::test]
    async fn manual_settlement_overrides_default_open() {
        let gateway = PaperGateway::new();
        let w = window();
        assert_eq!(gateway.window_status(&w).await.unwrap(), WindowStatus::Open);

        gateway.settle(
            w.id(),
            WindowStatus::Closed {
                winner: Some(Outcome::Up),
            },
        );
        assert_eq!(
            gateway.window_status(&w).await.unwrap(),
            WindowStatus::Closed {
                winner: Some(Outcome::Up)
            }
        );
    }

    #[tokio::test]
    async fn stale_quote_does_not_fill() {
        let gateway = PaperGateway::new();
        let w = window();
        gateway.observe_book(&w, &book_at(5, dec!(0.45), dec!(0.47)));
        let OrderResult::Pending { order_id } = gateway
            .place_limit_order(&OrderParams::maker_buy("up", dec!(0.451), dec!(10)))
            .await
            .unwrap()
        else {
            panic!("expected pending");
        };

        gateway.observe_book(&w, &book_at(5, dec!(0.44), dec!(0.451)));
        gateway.observe_book(&w, &book_at(3, dec!(0.44), dec!(0.451)));
        assert_eq!(gateway.resting_orders(), 1);

        gateway.observe_book(&w, &book_at(6, dec!(0.44), dec!(0.451)));
        assert!(gateway.order_status(&order_id).await.unwrap().is_filled());
    }

    #[tokio::test]
    async fn expired_window_state_is_pruned() {
        let gateway = PaperGateway::new();
        let old = window();
        gateway.observe_book(&old, &book(dec!(0.80), dec!(0.82)));
        let OrderResult::Filled { order_id, .. } = gateway
            .place_limit_order(&OrderParams::sell("up", dec!(0.80), dec!(5)))
            .await
            .unwrap()
        else {
            panic!("expected fill");
        };

        let next = MarketWindow {
            slug: "btc-updown-5m-1700000400".to_string(),
            up_token_id: "up-next".to_string(),
            down_token_id: "down-next".to_string(),
            start_timestamp: 1_700_000_400,
            end_timestamp: 1_700_000_700,
            ..window()
        };
        // 2023-11-14 22:16:00 is 1_700_000_160; the old window closed at 1_700_000_400.
        gateway.observe_book(&next, &book_at(290, dec!(0.45), dec!(0.47)));
        assert!(gateway.order_status(&order_id).await.is_ok());

        gateway.observe_book(&next, &book_at(300, dec!(0.45), dec!(0.47)));
        assert!(gateway.order_status(&order_id).await.is_err());
        let state = gateway.state.lock().unwrap();
        assert!(!state.quotes.contains_key("up"));
        assert!(state.quotes.contains_key("up-next"));
    }
}
