//! Per-window state machine.

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use super::pricing::{self, StrategyRules};
use super::{EngineEvent, Phase, SkipReason, Tick, TickReport};
use crate::config::Config;
use crate::error::{EngineError, LedgerError};
use crate::ledger::{ExitReason, PortfolioLedger};
use crate::market::{BookSnapshot, MarketWindow, Outcome, PriceSample};
use crate::trading::{ExchangeGateway, OrderParams, OrderResult, OrderState, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Entry,
    Exit(ExitReason),
}

/// Order the engine placed that has not reached a terminal state.
#[derive(Debug, Clone)]
struct RestingOrder {
    order_id: String,
    purpose: Purpose,
    outcome: Outcome,
    price: Decimal,
    size: Decimal,
}

impl RestingOrder {
    fn side(&self) -> Side {
        match self.purpose {
            Purpose::Entry => Side::Buy,
            Purpose::Exit(_) => Side::Sell,
        }
    }
}

fn holds(ledger: &PortfolioLedger, window_id: &str) -> bool {
    ledger
        .open_position()
        .is_some_and(|p| p.window_id == window_id)
}

/// Drives one window at a time from observation to exit or settlement.
///
/// The engine never touches cash directly: fills are booked through the
/// [`PortfolioLedger`] lent to it on each tick, and orders go through the
/// [`ExchangeGateway`]. Time comes from the tick, never the system clock.
#[derive(Debug)]
pub struct StrategyEngine {
    rules: StrategyRules,
    phase: Phase,
    window: Option<MarketWindow>,
    baseline: Option<PriceSample>,
    latest: Option<PriceSample>,
    last_sample_at: Option<OffsetDateTime>,
    last_book_at: Option<OffsetDateTime>,
    resting: Option<RestingOrder>,
}

impl StrategyEngine {
    /// Create an idle engine.
    pub fn new(config: &Config) -> Self {
        Self::with_rules(StrategyRules::from(config))
    }

    /// Create an idle engine with explicit rules.
    pub fn with_rules(rules: StrategyRules) -> Self {
        Self {
            rules,
            phase: Phase::Idle,
            window: None,
            baseline: None,
            latest: None,
            last_sample_at: None,
            last_book_at: None,
            resting: None,
        }
    }

    /// Trading rules.
    pub fn rules(&self) -> &StrategyRules {
        &self.rules
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Window the engine is working on.
    pub fn focus_window(&self) -> Option<&MarketWindow> {
        self.window.as_ref()
    }

    /// First sample of the focused window.
    pub fn baseline(&self) -> Option<&PriceSample> {
        self.baseline.as_ref()
    }

    /// Id of the order resting on the book, if any.
    pub fn resting_order_id(&self) -> Option<&str> {
        self.resting.as_ref().map(|o| o.order_id.as_str())
    }

    /// Whether the kill switch has taken effect.
    pub fn is_halted(&self) -> bool {
        self.phase == Phase::Halted
    }

    /// Window whose book the next tick should carry.
    ///
    /// This is the focused window while a position from it is still held and
    /// it has not expired, otherwise `current`.
    pub fn book_window<'a>(
        &'a self,
        current: &'a MarketWindow,
        now: OffsetDateTime,
        ledger: &PortfolioLedger,
    ) -> &'a MarketWindow {
        match &self.window {
            Some(focus) if !focus.is_expired_at(now) && holds(ledger, focus.id()) => focus,
            _ => current,
        }
    }

    /// Advance the state machine by one tick.
    pub async fn on_tick(
        &mut self,
        tick: Tick,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
    ) -> TickReport {
        let mut events = Vec::new();

        if self.phase == Phase::Halted {
            debug!("Engine halted, ignoring tick");
            return self.report(events);
        }
        if tick.halt {
            if let Err(e) = self.halt_into(tick.now, ledger, gateway, &mut events).await {
                events.push(EngineEvent::Error(e));
            }
            return self.report(events);
        }

        let now = tick.now;
        let focus_expired = self.window.as_ref().is_some_and(|w| w.is_expired_at(now));
        if focus_expired && !self.phase.is_terminal() {
            self.release_focus(now, ledger, gateway, &mut events).await;
        }
        self.roll_window(tick.window, now, ledger, gateway, &mut events)
            .await;

        let Some(window) = self.window.clone() else {
            return self.report(events);
        };
        self.accept_sample(tick.sample, &window, &mut events);
        let book = self.accept_book(tick.book, &window, &mut events);

        if window.is_expired_at(now) {
            return self.report(events);
        }

        if self.phase == Phase::Observing {
            self.observe(&window, now, &mut events);
        }
        if let Phase::Decided(side) = self.phase {
            self.work_entry(&window, side, book.as_ref(), now, ledger, gateway, &mut events)
                .await;
        }
        if self.phase == Phase::Entered {
            self.phase = Phase::Monitoring;
        }
        if self.phase == Phase::Monitoring {
            self.work_exit(&window, book.as_ref(), now, ledger, gateway, &mut events)
                .await;
        }

        self.report(events)
    }

    /// Cancel any resting order and stop trading.
    ///
    /// If the cancel fails the engine stays live so the halt can be retried.
    pub async fn halt(
        &mut self,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
    ) -> Result<Vec<EngineEvent>, EngineError> {
        let mut events = Vec::new();
        self.halt_into(now, ledger, gateway, &mut events).await?;
        Ok(events)
    }

    async fn halt_into(
        &mut self,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
        events: &mut Vec<EngineEvent>,
    ) -> Result<(), EngineError> {
        if self.phase == Phase::Halted {
            return Ok(());
        }
        if let Some(order) = self.resting.clone() {
            self.cancel_resting(&order, now, ledger, gateway, events)
                .await?;
        }

        if let Some(position) = ledger.open_position() {
            warn!(
                window = %position.window_id,
                side = %position.side,
                shares = %position.shares,
                "Halting with an open position"
            );
        }
        warn!(phase = %self.phase, "Trading halted");
        self.phase = Phase::Halted;
        events.push(EngineEvent::Halted);
        Ok(())
    }

    fn report(&self, events: Vec<EngineEvent>) -> TickReport {
        TickReport {
            phase: self.phase,
            window_id: self.window.as_ref().map(|w| w.id().to_string()),
            events,
        }
    }

    // === Window tracking ===

    async fn roll_window(
        &mut self,
        current: MarketWindow,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
        events: &mut Vec<EngineEvent>,
    ) {
        let focus = self.window.as_ref().map(|f| {
            (
                f.id() == current.id(),
                !f.is_expired_at(now) && holds(ledger, f.id()),
            )
        });
        let Some((same, holding_previous)) = focus else {
            self.adopt(current, events);
            return;
        };

        if same {
            return;
        }
        if holding_previous {
            debug!(current = %current.id(), "Still holding previous window, deferring rollover");
            return;
        }
        if self.phase.is_terminal() || self.release_focus(now, ledger, gateway, events).await {
            self.adopt(current, events);
        }
    }

    fn adopt(&mut self, window: MarketWindow, events: &mut Vec<EngineEvent>) {
        info!(
            window = %window.id(),
            start = window.start_timestamp,
            end = window.end_timestamp,
            "Tracking new window"
        );
        events.push(EngineEvent::WindowStarted {
            window_id: window.id().to_string(),
        });
        self.window = Some(window);
        self.phase = Phase::Observing;
        self.baseline = None;
        self.latest = None;
        self.last_book_at = None;
        self.resting = None;
    }

    /// Wind down the focused window. Returns `false` while it must stay in
    /// focus: a cancel failed, or a late entry fill left a live position.
    async fn release_focus(
        &mut self,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
        events: &mut Vec<EngineEvent>,
    ) -> bool {
        if let Some(order) = self.resting.clone() {
            if let Err(e) = self.cancel_resting(&order, now, ledger, gateway, events).await {
                events.push(EngineEvent::Error(e));
                return false;
            }
        }

        let Some(window) = self.window.clone() else {
            return true;
        };
        let holding = holds(ledger, window.id());
        if holding && !window.is_expired_at(now) {
            self.phase = Phase::Monitoring;
            return false;
        }
        if self.phase.is_terminal() {
            return true;
        }

        if holding {
            info!(window = %window.id(), "Window closed while holding, awaiting settlement");
            self.phase = Phase::Settled;
            events.push(EngineEvent::AwaitingSettlement(window));
            return true;
        }
        match self.phase {
            Phase::Decided(_) => self.skip(&window, SkipReason::EntryExpired, events),
            Phase::Entered | Phase::Monitoring => self.phase = Phase::Exited,
            _ => self.skip(&window, SkipReason::NoSignal, events),
        }
        true
    }

    fn skip(&mut self, window: &MarketWindow, reason: SkipReason, events: &mut Vec<EngineEvent>) {
        info!(window = %window.id(), reason = %reason, "Window skipped");
        self.phase = Phase::Skipped(reason);
        events.push(EngineEvent::Skipped {
            window_id: window.id().to_string(),
            reason,
        });
    }

    fn past_entry_deadline(&self, window: &MarketWindow, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= window.end_timestamp - self.rules.entry_safety_margin_seconds
    }

    // === Input filtering ===

    fn accept_sample(
        &mut self,
        sample: Option<PriceSample>,
        window: &MarketWindow,
        events: &mut Vec<EngineEvent>,
    ) {
        let Some(sample) = sample else {
            return;
        };
        if let Some(last) = self.last_sample_at {
            if sample.timestamp <= last {
                warn!(at = %sample.timestamp, last = %last, "Discarding stale price sample");
                events.push(EngineEvent::Error(EngineError::StaleData(format!(
                    "price sample at {} is not after {}",
                    sample.timestamp, last
                ))));
                return;
            }
        }

        self.last_sample_at = Some(sample.timestamp);
        if !window.has_started_at(sample.timestamp) {
            debug!(at = %sample.timestamp, start = window.start_timestamp, "Sample precedes window open");
            return;
        }
        self.latest = Some(sample);
        if self.baseline.is_none() && self.phase == Phase::Observing {
            debug!(price = %sample.price, at = %sample.timestamp, "Baseline set");
            self.baseline = Some(sample);
        }
    }

    fn accept_book(
        &mut self,
        book: Option<BookSnapshot>,
        window: &MarketWindow,
        events: &mut Vec<EngineEvent>,
    ) -> Option<BookSnapshot> {
        let book = book?;
        if book.window_id != window.id() {
            debug!(book = %book.window_id, focus = %window.id(), "Ignoring book for another window");
            return None;
        }

        let observed = book.observed_at();
        if let Some(last) = self.last_book_at {
            if observed <= last {
                warn!(at = %observed, last = %last, "Discarding stale book");
                events.push(EngineEvent::Error(EngineError::StaleData(format!(
                    "book at {} is not after {}",
                    observed, last
                ))));
                return None;
            }
        }
        self.last_book_at = Some(observed);
        Some(book)
    }

    // === Observing ===

    fn observe(&mut self, window: &MarketWindow, now: OffsetDateTime, events: &mut Vec<EngineEvent>) {
        if !window.has_started_at(now) {
            return;
        }
        if self.past_entry_deadline(window, now) {
            self.skip(window, SkipReason::NoSignal, events);
            return;
        }

        let (Some(baseline), Some(latest)) = (self.baseline, self.latest) else {
            return;
        };
        if !pricing::trend_window_elapsed(&baseline, &latest, self.rules.trend_window_seconds) {
            return;
        }

        let delta = latest.price - baseline.price;
        match pricing::trend_direction(&baseline, &latest) {
            Some(side) => {
                info!(
                    window = %window.id(),
                    side = %side,
                    baseline = %baseline.price,
                    latest = %latest.price,
                    delta = %delta,
                    "Trend decided"
                );
                self.phase = Phase::Decided(side);
                events.push(EngineEvent::Decided {
                    window_id: window.id().to_string(),
                    side,
                    delta,
                });
            }
            None => debug!(window = %window.id(), "Flat trend, still observing"),
        }
    }

    // === Entry ===

    #[allow(clippy::too_many_arguments)]
    async fn work_entry(
        &mut self,
        window: &MarketWindow,
        side: Outcome,
        book: Option<&BookSnapshot>,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
        events: &mut Vec<EngineEvent>,
    ) {
        let deadline_passed = self.past_entry_deadline(window, now);

        if let Some(order) = self.resting.clone() {
            match gateway.order_status(&order.order_id).await {
                Ok(state) if state.is_terminal() => {
                    self.resting = None;
                    self.book_final_fill(&order, &state, now, ledger, events);
                    if self.phase != Phase::Decided(side) {
                        return;
                    }
                    warn!(order_id = %order.order_id, status = %state.status, "Entry order ended unfilled");
                    events.push(EngineEvent::Error(EngineError::OrderRejected {
                        reason: format!("entry order {} ended {}", order.order_id, state.status),
                    }));
                }
                Ok(_) => {
                    let chase = book.is_some_and(|b| {
                        b.quote(side).best_bid > order.price + self.rules.entry_chase_threshold
                    });
                    if !deadline_passed && !chase {
                        return;
                    }
                    if chase && !deadline_passed {
                        info!(order_id = %order.order_id, price = %order.price, "Market ran away from entry, re-pricing");
                    }
                    if let Err(e) = self.cancel_resting(&order, now, ledger, gateway, events).await {
                        events.push(EngineEvent::Error(e));
                        return;
                    }
                    if self.phase != Phase::Decided(side) {
                        return;
                    }
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "Entry status check failed");
                    return;
                }
            }
        }

        if deadline_passed {
            self.skip(window, SkipReason::EntryExpired, events);
            return;
        }
        if let Some(position) = ledger.open_position() {
            debug!(held = %position.window_id, "Position still open, waiting to enter");
            return;
        }
        if ledger.cash() < self.rules.trade_size {
            warn!(cash = %ledger.cash(), size = %self.rules.trade_size, "Insufficient cash for entry");
            events.push(EngineEvent::Error(EngineError::InsufficientFunds {
                required: self.rules.trade_size,
                available: ledger.cash(),
            }));
            self.skip(window, SkipReason::InsufficientFunds, events);
            return;
        }

        let Some(book) = book else {
            return;
        };
        let quote = book.quote(side);
        if !pricing::spread_acceptable(quote, &self.rules) {
            debug!(bid = %quote.best_bid, ask = %quote.best_ask, limit = %self.rules.max_entry_spread, "Spread too wide to enter");
            return;
        }
        let Some(price) = pricing::maker_entry_price(quote, self.rules.price_tick) else {
            debug!(bid = %quote.best_bid, ask = %quote.best_ask, "Spread too tight for a maker entry");
            return;
        };
        if !pricing::in_entry_band(price, &self.rules) {
            debug!(price = %price, "Entry price outside band");
            return;
        }
        let shares = pricing::shares_for(self.rules.trade_size, price, self.rules.share_increment);
        if shares <= Decimal::ZERO {
            return;
        }

        let params = OrderParams::maker_buy(window.token_id(side), price, shares);
        match gateway.place_limit_order(&params).await {
            Ok(OrderResult::Filled {
                order_id,
                price,
                size,
            }) => {
                events.push(EngineEvent::OrderPlaced {
                    order_id,
                    side: Side::Buy,
                    outcome: side,
                    price,
                    size,
                });
                self.book_entry(side, size, price, now, ledger, events);
            }
            Ok(OrderResult::Pending { order_id }) => {
                info!(order_id = %order_id, side = %side, price = %price, shares = %shares, "Entry order resting");
                events.push(EngineEvent::OrderPlaced {
                    order_id: order_id.clone(),
                    side: Side::Buy,
                    outcome: side,
                    price,
                    size: shares,
                });
                self.resting = Some(RestingOrder {
                    order_id,
                    purpose: Purpose::Entry,
                    outcome: side,
                    price,
                    size: shares,
                });
            }
            Ok(OrderResult::Rejected { reason }) => {
                warn!(price = %price, reason = %reason, "Entry order rejected");
                events.push(EngineEvent::Error(EngineError::OrderRejected { reason }));
            }
            Err(e) => {
                warn!(price = %price, error = %e, "Entry order failed");
                events.push(EngineEvent::Error(EngineError::OrderRejected {
                    reason: e.to_string(),
                }));
            }
        }
    }

    fn book_entry(
        &mut self,
        side: Outcome,
        shares: Decimal,
        price: Decimal,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        events: &mut Vec<EngineEvent>,
    ) {
        let Some(window) = self.window.clone() else {
            return;
        };
        match ledger.debit_for_entry(window.id(), side, shares, price, now) {
            Ok(_) => {
                events.push(EngineEvent::Entered {
                    window_id: window.id().to_string(),
                    side,
                    shares,
                    price,
                });
                self.phase = Phase::Entered;
            }
            Err(e) => {
                error!(window = %window.id(), error = %e, "Ledger refused entry fill");
                let reason = match e {
                    LedgerError::InsufficientFunds { .. } => SkipReason::InsufficientFunds,
                    _ => SkipReason::LedgerRejected,
                };
                events.push(EngineEvent::Error(e.into()));
                self.skip(&window, reason, events);
            }
        }
    }

    // === Exit ===

    async fn work_exit(
        &mut self,
        window: &MarketWindow,
        book: Option<&BookSnapshot>,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
        events: &mut Vec<EngineEvent>,
    ) {
        let Some(position) = ledger
            .open_position()
            .filter(|p| p.window_id == window.id())
            .cloned()
        else {
            self.phase = Phase::Exited;
            return;
        };

        if let Some(order) = self.resting.clone() {
            match gateway.order_status(&order.order_id).await {
                Ok(state) if state.is_terminal() => {
                    self.resting = None;
                    self.book_final_fill(&order, &state, now, ledger, events);
                    if self.phase != Phase::Monitoring {
                        return;
                    }
                    warn!(order_id = %order.order_id, status = %state.status, "Exit order ended unfilled");
                    events.push(EngineEvent::Error(EngineError::OrderRejected {
                        reason: format!("exit order {} ended {}", order.order_id, state.status),
                    }));
                }
                Ok(_) => {
                    let chase = book.is_some_and(|b| b.quote(position.side).best_bid < order.price);
                    if !chase {
                        return;
                    }
                    if let Err(e) = self.cancel_resting(&order, now, ledger, gateway, events).await {
                        events.push(EngineEvent::Error(e));
                        return;
                    }
                    if self.phase != Phase::Monitoring {
                        return;
                    }
                }
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "Exit status check failed");
                    return;
                }
            }
        }

        let Some(book) = book else {
            return;
        };
        let own_bid = book.quote(position.side).best_bid;
        let opposing_bid = book.quote(position.side.opposite()).best_bid;
        let Some(reason) = pricing::exit_signal(&position, own_bid, opposing_bid, &self.rules) else {
            return;
        };
        if own_bid <= Decimal::ZERO {
            warn!(reason = %reason, "No bid to sell into");
            return;
        }

        info!(
            window = %window.id(),
            reason = %reason,
            cost = %position.cost_basis,
            bid = %own_bid,
            opposing_bid = %opposing_bid,
            "Exit signal"
        );
        let params = OrderParams::sell(window.token_id(position.side), own_bid, position.shares);
        match gateway.place_limit_order(&params).await {
            Ok(OrderResult::Filled {
                order_id,
                price,
                size,
            }) => {
                events.push(EngineEvent::OrderPlaced {
                    order_id,
                    side: Side::Sell,
                    outcome: position.side,
                    price,
                    size,
                });
                self.book_exit(reason, price, now, ledger, events);
            }
            Ok(OrderResult::Pending { order_id }) => {
                events.push(EngineEvent::OrderPlaced {
                    order_id: order_id.clone(),
                    side: Side::Sell,
                    outcome: position.side,
                    price: own_bid,
                    size: position.shares,
                });
                self.resting = Some(RestingOrder {
                    order_id,
                    purpose: Purpose::Exit(reason),
                    outcome: position.side,
                    price: own_bid,
                    size: position.shares,
                });
            }
            Ok(OrderResult::Rejected { reason }) => {
                warn!(reason = %reason, "Exit order rejected");
                events.push(EngineEvent::Error(EngineError::OrderRejected { reason }));
            }
            Err(e) => {
                warn!(error = %e, "Exit order failed");
                events.push(EngineEvent::Error(EngineError::OrderRejected {
                    reason: e.to_string(),
                }));
            }
        }
    }

    fn book_exit(
        &mut self,
        reason: ExitReason,
        price: Decimal,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        events: &mut Vec<EngineEvent>,
    ) {
        match ledger.credit_for_exit(price, reason, now) {
            Ok(entry) => {
                events.push(EngineEvent::Exited {
                    window_id: entry.window_id,
                    reason,
                    price,
                    pnl: entry.realized_pnl,
                });
                self.phase = Phase::Exited;
            }
            Err(e) => {
                error!(error = %e, "Ledger refused exit fill");
                events.push(EngineEvent::Error(e.into()));
            }
        }
    }

    // === Order plumbing ===

    async fn cancel_resting(
        &mut self,
        order: &RestingOrder,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        gateway: &dyn ExchangeGateway,
        events: &mut Vec<EngineEvent>,
    ) -> Result<(), EngineError> {
        if let Err(e) = gateway.cancel_order(&order.order_id).await {
            error!(order_id = %order.order_id, side = %order.side(), error = %e, "Failed to cancel order");
            return Err(EngineError::CancelFailed {
                order_id: order.order_id.clone(),
                reason: e.to_string(),
            });
        }
        self.resting = None;
        info!(order_id = %order.order_id, side = %order.side(), "Order cancelled");
        events.push(EngineEvent::OrderCancelled {
            order_id: order.order_id.clone(),
        });

        // The order may have filled before the cancel landed.
        match gateway.order_status(&order.order_id).await {
            Ok(state) => self.book_final_fill(order, &state, now, ledger, events),
            Err(e) => {
                warn!(order_id = %order.order_id, error = %e, "Could not confirm final order status")
            }
        }
        Ok(())
    }

    /// Book whatever a finished order filled. Entries may book a partial
    /// fill; exits only count when the whole position sold.
    fn book_final_fill(
        &mut self,
        order: &RestingOrder,
        state: &OrderState,
        now: OffsetDateTime,
        ledger: &mut PortfolioLedger,
        events: &mut Vec<EngineEvent>,
    ) {
        let price = state.fill_price.unwrap_or(order.price);
        match order.purpose {
            Purpose::Entry => {
                let filled = if state.is_filled() && state.filled_size <= Decimal::ZERO {
                    order.size
                } else {
                    state.filled_size
                };
                if filled > Decimal::ZERO {
                    if filled < order.size {
                        info!(order_id = %order.order_id, filled = %filled, size = %order.size, "Entry partially filled");
                    }
                    self.book_entry(order.outcome, filled, price, now, ledger, events);
                }
            }
            Purpose::Exit(reason) => {
                if state.is_filled() {
                    self.book_exit(reason, price, now, ledger, events);
                } else if state.filled_size > Decimal::ZERO {
                    warn!(
                        order_id = %order.order_id,
                        filled = %state.filled_size,
                        "Exit partially filled, position left for settlement"
                    );
                }
            }
        }
    }
}
