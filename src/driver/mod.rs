//! Fixed-interval tick loop.
//!
//! The driver owns the ledger and the engine, gathers inputs from the
//! collaborators each tick, and reconciles windows that ended while a
//! position was held.

pub mod kill_switch;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::api::{AppState, PositionView, StatusSnapshot};
use crate::config::{Config, Mode};
use crate::error::LedgerError;
use crate::ledger::{ExitReason, PortfolioLedger};
use crate::market::{BookSnapshot, MarketWindow, Outcome, WindowStatus};
use crate::metrics;
use crate::strategy::{Phase, StrategyEngine, Tick, TickReport};
use crate::trading::{BookSource, ExchangeGateway, PriceSource, WindowSource};
use crate::utils::shutdown_signal;

pub use kill_switch::KillSwitch;

/// Market data collaborators.
#[derive(Clone)]
pub struct Sources {
    /// Spot prices.
    pub prices: Arc<dyn PriceSource>,
    /// Order books.
    pub books: Arc<dyn BookSource>,
    /// Current window lookup.
    pub windows: Arc<dyn WindowSource>,
}

/// Runs the engine once per tick and settles finished windows.
pub struct Driver {
    mode: Mode,
    engine: StrategyEngine,
    ledger: PortfolioLedger,
    sources: Sources,
    gateway: Arc<dyn ExchangeGateway>,
    kill_switch: KillSwitch,
    tick_interval: Duration,
    settlement_poll_seconds: i64,
    circuit_breaker_usd: Decimal,
    current: Option<MarketWindow>,
    pending: Vec<MarketWindow>,
    last_settlement_poll: Option<OffsetDateTime>,
    ticks: u64,
    state: Option<AppState>,
}

impl Driver {
    /// Create a driver from validated config.
    pub fn new(
        config: &Config,
        ledger: PortfolioLedger,
        sources: Sources,
        gateway: Arc<dyn ExchangeGateway>,
    ) -> Self {
        Self {
            mode: config.mode,
            engine: StrategyEngine::new(config),
            ledger,
            sources,
            gateway,
            kill_switch: KillSwitch::new(&config.kill_switch_path),
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            settlement_poll_seconds: config.settlement_poll_seconds as i64,
            circuit_breaker_usd: config.circuit_breaker_usd,
            current: None,
            pending: Vec::new(),
            last_settlement_poll: None,
            ticks: 0,
            state: None,
        }
    }

    /// Publish status to the HTTP surface.
    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = Some(state);
        self
    }

    /// Strategy engine.
    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    /// Portfolio ledger.
    pub fn ledger(&self) -> &PortfolioLedger {
        &self.ledger
    }

    /// Windows waiting on resolution.
    pub fn pending_settlements(&self) -> &[MarketWindow] {
        &self.pending
    }

    /// Kill switch.
    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    /// Tick until halted or a shutdown signal arrives.
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        info!(
            mode = %self.mode,
            tick_ms = self.tick_interval.as_millis() as u64,
            kill_switch = %self.kill_switch.path().display(),
            cash = %self.ledger.cash(),
            "Driver started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick_once(OffsetDateTime::now_utc()).await;
                    if report.phase == Phase::Halted {
                        info!("Engine halted, stopping driver");
                        break;
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, cancelling resting orders");
                    let now = OffsetDateTime::now_utc();
                    match self.engine.halt(now, &mut self.ledger, self.gateway.as_ref()).await {
                        Ok(events) => metrics::record_events(&events),
                        Err(e) => error!(error = %e, "Could not cancel resting order on shutdown"),
                    }
                    break;
                }
            }
        }

        self.log_summary();
    }

    /// Run one tick at `now`.
    pub async fn tick_once(&mut self, now: OffsetDateTime) -> TickReport {
        let _timer = metrics::timer_tick();
        metrics::inc_ticks();
        self.ticks += 1;

        let mut halt = self.kill_switch.is_engaged();
        if halt {
            warn!(path = %self.kill_switch.path().display(), "Kill switch file present");
        }

        let current = self.current_window(now).await;
        let Some(window) = current.or_else(|| self.engine.focus_window().cloned()) else {
            let report = self.halt_without_window(halt, now).await;
            self.publish(&report, now).await;
            return report;
        };

        let mut tick = Tick::new(now, window);

        if !halt && !self.engine.is_halted() {
            let start = Instant::now();
            match self.sources.prices.latest_sample().await {
                Ok(sample) => tick.sample = Some(sample),
                Err(e) => {
                    warn!(error = %e, "Price sample unavailable");
                    metrics::inc_source_errors("oracle");
                }
            }
            metrics::record_oracle_latency(start);

            let book_window = self
                .engine
                .book_window(&tick.window, now, &self.ledger)
                .clone();
            let start = Instant::now();
            match self.sources.books.snapshot(&book_window).await {
                Ok(book) => tick.book = Some(book),
                Err(e) => {
                    warn!(window = %book_window.id(), error = %e, "Order book unavailable");
                    metrics::inc_source_errors("orderbook");
                }
            }
            metrics::record_orderbook_fetch_latency(start);

            halt = self.circuit_breaker_tripped(tick.book.as_ref()).await;
            if !halt {
                if let Some(book) = &tick.book {
                    self.gateway.observe_book(&book_window, book);
                }
            }
        }
        tick.halt = halt;

        let report = self
            .engine
            .on_tick(tick, &mut self.ledger, self.gateway.as_ref())
            .await;

        for window in report.awaiting_settlement() {
            if !self.pending.iter().any(|w| w.id() == window.id()) {
                info!(window = %window.id(), "Queued for settlement");
                self.pending.push(window.clone());
            }
        }
        self.reconcile_pending(now).await;

        metrics::record_events(&report.events);
        self.publish(&report, now).await;
        debug!(phase = %report.phase, events = report.events.len(), "Tick complete");
        report
    }

    /// Current window, looked up again only once the cached one has closed
    /// or while it has not opened yet.
    async fn current_window(&mut self, now: OffsetDateTime) -> Option<MarketWindow> {
        if let Some(window) = &self.current {
            if window.has_started_at(now) && !window.is_expired_at(now) {
                return Some(window.clone());
            }
        }

        match self.sources.windows.current_window(now).await {
            Ok(window) => {
                self.current = Some(window.clone());
                Some(window)
            }
            Err(e) => {
                warn!(error = %e, "Window lookup failed");
                metrics::inc_source_errors("window");
                self.current = None;
                None
            }
        }
    }

    /// Mark the open position at its bid and compare equity with the
    /// starting cash. A position that cannot be marked counts as worthless.
    async fn circuit_breaker_tripped(&self, book: Option<&BookSnapshot>) -> bool {
        let mark = match self.ledger.open_position() {
            None => None,
            Some(position) => {
                let from_book = book
                    .filter(|b| b.window_id == position.window_id)
                    .map(|b| b.quote(position.side).best_bid);
                match from_book {
                    Some(bid) => Some(bid),
                    None => Some(self.fetch_mark(&position.window_id, position.side).await),
                }
            }
        };

        let drawdown = self.ledger.equity(mark) - self.ledger.initial_cash();
        metrics::set_drawdown(drawdown);
        if drawdown > -self.circuit_breaker_usd {
            return false;
        }

        error!(
            drawdown = %drawdown,
            limit = %self.circuit_breaker_usd,
            "Circuit breaker: mark-to-market drawdown exceeds limit, halting"
        );
        metrics::inc_circuit_breaker_trips();
        true
    }

    async fn fetch_mark(&self, window_id: &str, side: Outcome) -> Decimal {
        let window = self
            .engine
            .focus_window()
            .into_iter()
            .chain(self.pending.iter())
            .find(|w| w.id() == window_id)
            .cloned();
        let Some(window) = window else {
            warn!(window = %window_id, "No window to mark position against, using 0");
            return Decimal::ZERO;
        };
        match self.sources.books.quote(&window, side).await {
            Ok(quote) => quote.best_bid,
            Err(e) => {
                warn!(window = %window_id, error = %e, "Mark price unavailable, using 0");
                metrics::inc_source_errors("orderbook");
                Decimal::ZERO
            }
        }
    }

    async fn halt_without_window(&mut self, halt: bool, now: OffsetDateTime) -> TickReport {
        let mut events = Vec::new();
        if halt {
            match self.engine.halt(now, &mut self.ledger, self.gateway.as_ref()).await {
                Ok(halted) => events = halted,
                Err(e) => error!(error = %e, "Halt failed"),
            }
            metrics::record_events(&events);
        }
        TickReport {
            phase: self.engine.phase(),
            window_id: self.engine.focus_window().map(|w| w.id().to_string()),
            events,
        }
    }

    /// Ask the gateway how queued windows resolved and settle the ledger.
    async fn reconcile_pending(&mut self, now: OffsetDateTime) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(last) = self.last_settlement_poll {
            if (now - last).whole_seconds() < self.settlement_poll_seconds {
                return;
            }
        }
        self.last_settlement_poll = Some(now);

        let mut unresolved = Vec::new();
        for window in std::mem::take(&mut self.pending) {
            let status = match self.gateway.window_status(&window).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(window = %window.id(), error = %e, "Settlement status unavailable");
                    metrics::inc_source_errors("settlement");
                    unresolved.push(window);
                    continue;
                }
            };

            match self.ledger.reconcile_if_settled(window.id(), status, now) {
                Ok(Some(entry)) => {
                    info!(
                        window = %entry.window_id,
                        reason = %entry.reason,
                        pnl = %entry.realized_pnl,
                        cash = %self.ledger.cash(),
                        "Window settled"
                    );
                    metrics::inc_settlements(entry.reason == ExitReason::SettlementWin);
                }
                Ok(None) if status == WindowStatus::Open => {
                    debug!(window = %window.id(), "Window not resolved yet");
                    unresolved.push(window);
                }
                Ok(None) => debug!(window = %window.id(), "Nothing held for settled window"),
                Err(LedgerError::SettlementAmbiguous { .. }) => unresolved.push(window),
                Err(e) => error!(window = %window.id(), error = %e, "Settlement failed"),
            }
        }
        self.pending = unresolved;
    }

    async fn publish(&self, report: &TickReport, now: OffsetDateTime) {
        let Some(state) = &self.state else {
            return;
        };
        state.set_ready(report.window_id.is_some());
        if report.phase == Phase::Halted {
            state.set_halted();
        }
        state.publish(self.snapshot(report.phase, now)).await;
    }

    /// Status view of the engine and ledger.
    pub fn snapshot(&self, phase: Phase, now: OffsetDateTime) -> StatusSnapshot {
        let focus = self.engine.focus_window();
        let summary = self.ledger.summary();
        StatusSnapshot {
            mode: self.mode.to_string(),
            phase: phase.to_string(),
            window: focus.map(|w| w.id().to_string()),
            seconds_remaining: focus.map(|w| w.seconds_remaining(now)),
            cash: self.ledger.cash().to_string(),
            equity: self.ledger.equity(None).to_string(),
            position: self.ledger.open_position().map(|p| PositionView {
                window_id: p.window_id.clone(),
                side: p.side.to_string(),
                shares: p.shares.to_string(),
                cost_basis: p.cost_basis.to_string(),
            }),
            realized_pnl: self.ledger.realized_pnl().to_string(),
            trades: summary.trades,
            wins: summary.wins,
            losses: summary.losses,
            pending_settlements: self.pending.len(),
            ticks: self.ticks,
        }
    }

    fn log_summary(&self) {
        let summary = self.ledger.summary();
        info!("========================================");
        info!("SESSION SUMMARY");
        info!("========================================");
        info!("Mode: {}", self.mode);
        info!("Trades: {} ({} won, {} lost)", summary.trades, summary.wins, summary.losses);
        info!("Win rate: {}", summary.win_rate);
        info!("Realized P&L: ${}", summary.total_pnl);
        info!("Cash: ${}", self.ledger.cash());
        if let Some(position) = self.ledger.open_position() {
            info!(
                "Open position: {} {} shares of {} at {}",
                position.window_id, position.shares, position.side, position.cost_basis
            );
        }
        if !self.pending.is_empty() {
            info!("Windows awaiting settlement: {}", self.pending.len());
        }
        info!("========================================");
    }
}
