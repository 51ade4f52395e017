//! End-to-end lifecycle tests: driver, engine, ledger and the paper gateway
//! against scripted market data.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::OffsetDateTime;

use polymarket_trend::config::Config;
use polymarket_trend::driver::{Driver, Sources};
use polymarket_trend::error::{MarketError, OracleError};
use polymarket_trend::ledger::{ExitReason, PortfolioLedger, TradeJournal};
use polymarket_trend::market::{window_slug, window_start, BookQuote, MarketWindow, Outcome, PriceSample, WindowStatus};
use polymarket_trend::strategy::{EngineEvent, Phase, SkipReason, TickReport};
use polymarket_trend::trading::{BookSource, PaperGateway, PriceSource, WindowSource};

const START: i64 = 1_700_000_100;
const PREFIX: &str = "btc-updown-5m";

fn at(ts: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(ts).unwrap()
}

fn window_at(start: i64) -> MarketWindow {
    MarketWindow {
        slug: window_slug(PREFIX, start),
        condition_id: format!("0xcond{}", start),
        up_token_id: format!("up-{}", start),
        down_token_id: format!("down-{}", start),
        start_timestamp: start,
        end_timestamp: start + 300,
        question: Some("Bitcoin Up or Down?".to_string()),
    }
}

struct MarketState {
    now: OffsetDateTime,
    price: Decimal,
    up: (Decimal, Decimal),
    down: (Decimal, Decimal),
    oracle_down: bool,
}

/// Scripted oracle, book and window source.
struct FakeMarket {
    state: Mutex<MarketState>,
    window_lookups: AtomicUsize,
}

impl FakeMarket {
    fn new() -> Self {
        Self {
            state: Mutex::new(MarketState {
                now: at(START),
                price: dec!(60000),
                up: (dec!(0.45), dec!(0.47)),
                down: (dec!(0.52), dec!(0.54)),
                oracle_down: false,
            }),
            window_lookups: AtomicUsize::new(0),
        }
    }

    fn set(&self, f: impl FnOnce(&mut MarketState)) {
        f(&mut self.state.lock().unwrap());
    }
}

#[async_trait]
impl PriceSource for FakeMarket {
    async fn latest_sample(&self) -> Result<PriceSample, OracleError> {
        let state = self.state.lock().unwrap();
        if state.oracle_down {
            return Err(OracleError::BadStatus { status: 503 });
        }
        Ok(PriceSample::new(state.now, state.price))
    }
}

#[async_trait]
impl BookSource for FakeMarket {
    async fn quote(&self, _window: &MarketWindow, outcome: Outcome) -> Result<BookQuote, MarketError> {
        let state = self.state.lock().unwrap();
        let (bid, ask) = match outcome {
            Outcome::Up => state.up,
            Outcome::Down => state.down,
        };
        Ok(BookQuote {
            outcome,
            best_bid: bid,
            best_ask: ask,
            observed_at: state.now,
        })
    }
}

#[async_trait]
impl WindowSource for FakeMarket {
    async fn current_window(&self, now: OffsetDateTime) -> Result<MarketWindow, MarketError> {
        self.window_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(window_at(window_start(now, 300)))
    }
}

fn temp_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "polymarket-trend-lifecycle-{}-{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

struct Harness {
    market: Arc<FakeMarket>,
    gateway: Arc<PaperGateway>,
    driver: Driver,
    kill_switch: PathBuf,
}

impl Harness {
    fn new(name: &str, trade_log: Option<PathBuf>) -> Self {
        Self::with_config(
            name,
            Config {
                trade_log_path: trade_log
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                ..Config::default()
            },
        )
    }

    fn with_config(name: &str, config: Config) -> Self {
        let kill_switch = temp_path(&format!("{}-stop", name));
        let config = Config {
            kill_switch_path: kill_switch.display().to_string(),
            ..config
        };

        let market = Arc::new(FakeMarket::new());
        let gateway = Arc::new(PaperGateway::new());
        let ledger = PortfolioLedger::from_config(&config, dec!(100));
        let sources = Sources {
            prices: market.clone(),
            books: market.clone(),
            windows: market.clone(),
        };
        let driver = Driver::new(&config, ledger, sources, gateway.clone());

        Self {
            market,
            gateway,
            driver,
            kill_switch,
        }
    }

    async fn tick(&mut self, ts: i64) -> TickReport {
        self.market.set(|s| s.now = at(ts));
        let report = self.driver.tick_once(at(ts)).await;
        assert!(self.driver.ledger().check_conservation());
        report
    }

    /// Up-trend decision with the maker entry resting at 0.451.
    async fn decide_up(&mut self) -> TickReport {
        self.tick(START + 1).await;
        self.market.set(|s| s.price = dec!(60050));
        self.tick(START + 61).await
    }

    /// Decide up and let the book trade through the resting entry.
    async fn enter_up(&mut self) -> TickReport {
        self.decide_up().await;
        self.market.set(|s| {
            s.up = (dec!(0.45), dec!(0.451));
            s.down = (dec!(0.53), dec!(0.55));
        });
        self.tick(START + 62).await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.kill_switch);
    }
}

#[tokio::test]
async fn trend_entry_then_take_profit() {
    let mut h = Harness::new("take-profit", None);

    let report = h.decide_up().await;
    assert_eq!(report.phase, Phase::Decided(Outcome::Up));
    assert!(report.events.iter().any(|e| matches!(
        e,
        EngineEvent::OrderPlaced { price, size, .. } if *price == dec!(0.451) && *size == dec!(11.08)
    )));
    assert_eq!(h.gateway.resting_orders(), 1);

    let report = h.enter_up().await;
    assert_eq!(report.phase, Phase::Monitoring);
    assert_eq!(h.driver.ledger().cash(), dec!(95.00292));

    h.market.set(|s| {
        s.up = (dec!(0.80), dec!(0.81));
        s.down = (dec!(0.18), dec!(0.20));
    });
    let report = h.tick(START + 120).await;

    assert_eq!(report.phase, Phase::Exited);
    let entry = &h.driver.ledger().entries()[0];
    assert_eq!(entry.reason, ExitReason::TakeProfit);
    assert_eq!(entry.exit_price, dec!(0.80));
    assert_eq!(entry.realized_pnl, dec!(11.08) * dec!(0.349));
    assert!(h.driver.ledger().open_position().is_none());
}

#[tokio::test]
async fn stop_loss_on_falling_bid() {
    let mut h = Harness::new("stop-loss", None);
    h.enter_up().await;

    h.market.set(|s| {
        s.up = (dec!(0.34), dec!(0.36));
        s.down = (dec!(0.62), dec!(0.64));
    });
    let report = h.tick(START + 150).await;

    assert!(report.events.iter().any(|e| matches!(
        e,
        EngineEvent::Exited { reason: ExitReason::StopLoss, price, .. } if *price == dec!(0.34)
    )));
    assert_eq!(h.driver.ledger().cash(), dec!(95.00292) + dec!(11.08) * dec!(0.34));
}

#[tokio::test]
async fn held_position_settles_after_expiry() {
    let journal_path = temp_path("settle.csv");
    let mut h = Harness::new("settle", Some(journal_path.clone()));
    h.enter_up().await;
    let first = window_at(START);

    let report = h.tick(START + 300).await;
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::AwaitingSettlement(w) if w.slug == first.slug)));
    assert_eq!(h.driver.pending_settlements().len(), 1);
    assert!(h.driver.ledger().open_position().is_some());

    h.gateway.settle(
        first.id(),
        WindowStatus::Closed {
            winner: Some(Outcome::Up),
        },
    );

    // Inside the poll interval: not asked yet.
    h.tick(START + 305).await;
    assert_eq!(h.driver.pending_settlements().len(), 1);

    h.tick(START + 311).await;
    assert!(h.driver.pending_settlements().is_empty());
    assert!(h.driver.ledger().open_position().is_none());
    assert_eq!(h.driver.ledger().cash(), dec!(106.08292));
    assert_eq!(h.driver.ledger().entries()[0].reason, ExitReason::SettlementWin);

    let rows = TradeJournal::new(&journal_path).load().unwrap();
    let actions: Vec<_> = rows.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(actions, vec!["BUY", "SETTLE"]);
    let _ = std::fs::remove_file(&journal_path);
}

#[tokio::test]
async fn ambiguous_resolution_is_retried() {
    let mut h = Harness::new("ambiguous", None);
    h.enter_up().await;
    let first = window_at(START);

    h.gateway
        .settle(first.id(), WindowStatus::Closed { winner: None });
    h.tick(START + 300).await;
    assert_eq!(h.driver.pending_settlements().len(), 1);
    assert_eq!(h.driver.ledger().cash(), dec!(95.00292));

    h.gateway.settle(
        first.id(),
        WindowStatus::Closed {
            winner: Some(Outcome::Down),
        },
    );
    h.tick(START + 320).await;
    assert!(h.driver.pending_settlements().is_empty());
    assert_eq!(h.driver.ledger().cash(), dec!(95.00292));
    assert_eq!(h.driver.ledger().realized_pnl(), dec!(-4.99708));
}

#[tokio::test]
async fn kill_switch_cancels_resting_entry_then_halts() {
    let mut h = Harness::new("kill", None);
    h.decide_up().await;
    assert_eq!(h.gateway.resting_orders(), 1);

    std::fs::write(&h.kill_switch, b"stop").unwrap();
    // A book that would fill the entry must not be seen once halted.
    h.market.set(|s| s.up = (dec!(0.45), dec!(0.451)));
    let report = h.tick(START + 62).await;

    assert_eq!(report.phase, Phase::Halted);
    assert!(matches!(
        report.events.as_slice(),
        [EngineEvent::OrderCancelled { .. }, EngineEvent::Halted]
    ));
    assert_eq!(h.gateway.resting_orders(), 0);
    assert_eq!(h.driver.ledger().cash(), dec!(100));

    let report = h.tick(START + 63).await;
    assert!(report.events.is_empty());
    assert_eq!(report.phase, Phase::Halted);
}

#[tokio::test]
async fn flat_market_skips_window() {
    let mut h = Harness::new("flat", None);

    for offset in [1, 61, 121, 181, 241, 271] {
        let report = h.tick(START + offset).await;
        assert!(!report
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::OrderPlaced { .. })));
    }

    assert_eq!(h.driver.engine().phase(), Phase::Skipped(SkipReason::NoSignal));
    assert_eq!(h.driver.ledger().cash(), dec!(100));
}

#[tokio::test]
async fn oracle_outage_is_not_fatal() {
    let mut h = Harness::new("oracle-outage", None);
    h.market.set(|s| s.oracle_down = true);

    let report = h.tick(START + 1).await;
    assert_eq!(report.phase, Phase::Observing);
    assert!(h.driver.engine().baseline().is_none());

    h.market.set(|s| s.oracle_down = false);
    h.tick(START + 2).await;
    assert_eq!(h.driver.engine().baseline().map(|s| s.price), Some(dec!(60000)));
}

#[tokio::test]
async fn one_position_across_windows() {
    let mut h = Harness::new("one-position", None);
    h.enter_up().await;

    // Next window trends down while the first is still unresolved.
    h.tick(START + 301).await;
    h.market.set(|s| {
        s.price = dec!(59990);
        s.up = (dec!(0.55), dec!(0.57));
        s.down = (dec!(0.40), dec!(0.45));
    });
    let report = h.tick(START + 361).await;

    assert_eq!(report.phase, Phase::Decided(Outcome::Down));
    assert!(!report
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::OrderPlaced { .. })));
    assert_eq!(h.driver.ledger().open_position().unwrap().window_id, window_at(START).slug);
}

#[tokio::test]
async fn drawdown_beyond_limit_halts_before_exit() {
    let mut h = Harness::with_config(
        "circuit-breaker",
        Config {
            circuit_breaker_usd: dec!(3),
            trade_log_path: String::new(),
            ..Config::default()
        },
    );
    h.enter_up().await;

    // 11.08 shares marked at 0.10: equity 96.11092, drawdown -3.88908.
    h.market.set(|s| {
        s.up = (dec!(0.10), dec!(0.12));
        s.down = (dec!(0.86), dec!(0.88));
    });
    let report = h.tick(START + 90).await;

    assert_eq!(report.phase, Phase::Halted);
    assert!(matches!(report.events.as_slice(), [EngineEvent::Halted]));
    assert!(h.driver.ledger().open_position().is_some());
    assert_eq!(h.driver.ledger().cash(), dec!(95.00292));
}

#[tokio::test]
async fn small_drawdown_keeps_trading() {
    let mut h = Harness::with_config(
        "circuit-breaker-ok",
        Config {
            circuit_breaker_usd: dec!(3),
            trade_log_path: String::new(),
            ..Config::default()
        },
    );
    h.enter_up().await;

    h.market.set(|s| {
        s.up = (dec!(0.40), dec!(0.42));
        s.down = (dec!(0.57), dec!(0.59));
    });
    let report = h.tick(START + 90).await;
    assert_eq!(report.phase, Phase::Monitoring);
}

#[tokio::test]
async fn window_is_looked_up_once_per_window() {
    let mut h = Harness::new("window-cache", None);

    for offset in [1, 2, 3, 150, 299] {
        h.tick(START + offset).await;
    }
    assert_eq!(h.market.window_lookups.load(Ordering::SeqCst), 1);

    let report = h.tick(START + 300).await;
    assert_eq!(h.market.window_lookups.load(Ordering::SeqCst), 2);
    assert_eq!(report.window_id, Some(window_at(START + 300).slug));
}
