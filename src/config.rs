//! Application configuration loaded from environment variables.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Trading mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Simulated fills against live market data.
    #[default]
    #[strum(serialize = "paper", serialize = "PAPER", serialize = "dry-run")]
    Paper,
    /// Real orders on the exchange.
    #[strum(serialize = "live", serialize = "LIVE")]
    Live,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Operation Mode ===
    /// Paper or live trading.
    #[serde(default)]
    pub mode: Mode,

    /// Starting cash for paper trading.
    #[serde(default = "default_starting_cash")]
    pub starting_cash: Decimal,

    // === Sizing ===
    /// Notional (USD) committed per entry.
    #[serde(default = "default_trade_size")]
    pub trade_size: Decimal,

    /// Minimum price increment of the market.
    #[serde(default = "default_price_tick")]
    pub price_tick: Decimal,

    /// Minimum share increment of the instrument.
    #[serde(default = "default_share_increment")]
    pub share_increment: Decimal,

    /// Lowest entry price worth buying (deep OTM below this).
    #[serde(default = "default_min_entry_price")]
    pub min_entry_price: Decimal,

    /// Highest entry price worth buying (too little upside above this).
    #[serde(default = "default_max_entry_price")]
    pub max_entry_price: Decimal,

    // === Strategy ===
    /// Seconds between baseline and decision sample.
    #[serde(default = "default_trend_window")]
    pub trend_window_seconds: i64,

    /// Minimum unrealized return that triggers a take-profit exit.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_min_pct: Decimal,

    /// Absolute drop below cost basis that triggers a stop-loss.
    #[serde(default = "default_stop_loss_abs")]
    pub stop_loss_abs: Decimal,

    /// Fractional drop below cost basis that triggers a hard stop.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,

    /// Fractional rise of the opposing side that counts as a trend reversal.
    #[serde(default = "default_reversal_pct")]
    pub reversal_pct: Decimal,

    /// Unfilled entries are cancelled this many seconds before window close.
    #[serde(default = "default_entry_safety_margin")]
    pub entry_safety_margin_seconds: i64,

    /// Re-price a resting entry once the bid runs this far above it.
    #[serde(default = "default_entry_chase_threshold")]
    pub entry_chase_threshold: Decimal,

    /// Widest bid/ask spread an entry is placed into.
    #[serde(default = "default_max_entry_spread")]
    pub max_entry_spread: Decimal,

    // === Risk ===
    /// Mark-to-market drawdown (USD) that halts trading.
    #[serde(default = "default_circuit_breaker_usd")]
    pub circuit_breaker_usd: Decimal,

    // === Market Windows ===
    /// Window duration in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,

    /// Slug prefix; the window start timestamp is appended.
    #[serde(default = "default_slug_prefix")]
    pub market_slug_prefix: String,

    // === Driver ===
    /// Milliseconds between ticks.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Seconds between settlement status polls.
    #[serde(default = "default_settlement_poll")]
    pub settlement_poll_seconds: u64,

    /// Presence of this file halts trading.
    #[serde(default = "default_kill_switch_path")]
    pub kill_switch_path: String,

    /// CSV trade journal; empty disables it.
    #[serde(default = "default_trade_log_path")]
    pub trade_log_path: String,

    // === Oracle ===
    /// Ticker endpoint; the symbol is appended.
    #[serde(default = "default_oracle_url")]
    pub oracle_url: String,

    /// Oracle symbol.
    #[serde(default = "default_oracle_symbol")]
    pub oracle_symbol: String,

    /// Attempts per oracle fetch.
    #[serde(default = "default_oracle_retries")]
    pub oracle_max_retries: u32,

    // === Polymarket ===
    /// Wallet private key (hex, starts with 0x). Required for live mode.
    #[serde(default)]
    pub polymarket_private_key: String,

    /// Signature type: 0=EOA, 1=Magic.link, 2=Gnosis Safe.
    #[serde(default)]
    pub polymarket_signature_type: u8,

    /// Proxy wallet address (required for Magic.link).
    #[serde(default)]
    pub polymarket_funder: Option<String>,

    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub polymarket_clob_url: String,

    /// Gamma API base URL.
    #[serde(default = "default_gamma_url")]
    pub polymarket_gamma_url: String,

    /// HTTP request timeout.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,

    // === Server Configuration ===
    /// HTTP server port for health/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_starting_cash() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_trade_size() -> Decimal {
    Decimal::new(5, 0) // $5
}

fn default_price_tick() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_share_increment() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_min_entry_price() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_max_entry_price() -> Decimal {
    Decimal::new(80, 2) // 0.80
}

fn default_trend_window() -> i64 {
    60
}

fn default_take_profit_pct() -> Decimal {
    Decimal::new(10, 2) // 10%
}

fn default_stop_loss_abs() -> Decimal {
    Decimal::new(10, 2) // $0.10
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(20, 2) // 20%
}

fn default_reversal_pct() -> Decimal {
    Decimal::new(15, 2) // 15%
}

fn default_entry_safety_margin() -> i64 {
    30
}

fn default_entry_chase_threshold() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_max_entry_spread() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

fn default_circuit_breaker_usd() -> Decimal {
    Decimal::new(15, 0) // $15
}

fn default_window_seconds() -> i64 {
    300
}

fn default_slug_prefix() -> String {
    "btc-updown-5m".to_string()
}

fn default_tick_interval() -> u64 {
    500
}

fn default_settlement_poll() -> u64 {
    10
}

fn default_kill_switch_path() -> String {
    "./STOP_TRADING".to_string()
}

fn default_trade_log_path() -> String {
    "trades.csv".to_string()
}

fn default_oracle_url() -> String {
    "https://api.binance.com/api/v3/ticker/price?symbol=".to_string()
}

fn default_oracle_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_oracle_retries() -> u32 {
    3
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_http_timeout() -> u64 {
    2000
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            starting_cash: default_starting_cash(),
            trade_size: default_trade_size(),
            price_tick: default_price_tick(),
            share_increment: default_share_increment(),
            min_entry_price: default_min_entry_price(),
            max_entry_price: default_max_entry_price(),
            trend_window_seconds: default_trend_window(),
            take_profit_min_pct: default_take_profit_pct(),
            stop_loss_abs: default_stop_loss_abs(),
            stop_loss_pct: default_stop_loss_pct(),
            reversal_pct: default_reversal_pct(),
            entry_safety_margin_seconds: default_entry_safety_margin(),
            entry_chase_threshold: default_entry_chase_threshold(),
            max_entry_spread: default_max_entry_spread(),
            circuit_breaker_usd: default_circuit_breaker_usd(),
            window_seconds: default_window_seconds(),
            market_slug_prefix: default_slug_prefix(),
            tick_interval_ms: default_tick_interval(),
            settlement_poll_seconds: default_settlement_poll(),
            kill_switch_path: default_kill_switch_path(),
            trade_log_path: default_trade_log_path(),
            oracle_url: default_oracle_url(),
            oracle_symbol: default_oracle_symbol(),
            oracle_max_retries: default_oracle_retries(),
            polymarket_private_key: String::new(),
            polymarket_signature_type: 0,
            polymarket_funder: None,
            polymarket_clob_url: default_clob_url(),
            polymarket_gamma_url: default_gamma_url(),
            http_timeout_ms: default_http_timeout(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.mode == Mode::Live {
            if self.polymarket_private_key.is_empty() {
                return Err("POLYMARKET_PRIVATE_KEY is required in live mode".to_string());
            }
            if !self.polymarket_private_key.starts_with("0x") {
                return Err("POLYMARKET_PRIVATE_KEY must start with 0x".to_string());
            }
        }

        if self.trade_size <= Decimal::ZERO {
            return Err("TRADE_SIZE must be positive".to_string());
        }

        if self.starting_cash < Decimal::ZERO {
            return Err("STARTING_CASH must not be negative".to_string());
        }

        if self.price_tick <= Decimal::ZERO || self.share_increment <= Decimal::ZERO {
            return Err("PRICE_TICK and SHARE_INCREMENT must be positive".to_string());
        }

        for (name, pct) in [
            ("TAKE_PROFIT_MIN_PCT", self.take_profit_min_pct),
            ("STOP_LOSS_PCT", self.stop_loss_pct),
            ("REVERSAL_PCT", self.reversal_pct),
        ] {
            if pct <= Decimal::ZERO || pct >= Decimal::ONE {
                return Err(format!("{} must be between 0 and 1", name));
            }
        }

        if self.stop_loss_abs <= Decimal::ZERO {
            return Err("STOP_LOSS_ABS must be positive".to_string());
        }

        if self.max_entry_spread <= self.price_tick {
            return Err("MAX_ENTRY_SPREAD must exceed PRICE_TICK".to_string());
        }

        if self.circuit_breaker_usd <= Decimal::ZERO {
            return Err("CIRCUIT_BREAKER_USD must be positive".to_string());
        }

        if self.min_entry_price >= self.max_entry_price {
            return Err("MIN_ENTRY_PRICE must be below MAX_ENTRY_PRICE".to_string());
        }

        if self.trend_window_seconds <= 0 || self.trend_window_seconds >= self.window_seconds {
            return Err("TREND_WINDOW_SECONDS must be positive and shorter than WINDOW_SECONDS".to_string());
        }

        if self.entry_safety_margin_seconds < 0 || self.entry_safety_margin_seconds >= self.window_seconds {
            return Err("ENTRY_SAFETY_MARGIN_SECONDS must fit inside the window".to_string());
        }

        if self.tick_interval_ms == 0 {
            return Err("TICK_INTERVAL_MS must be positive".to_string());
        }

        Ok(())
    }

    /// Whether real orders are sent.
    pub fn is_live(&self) -> bool {
        self.mode == Mode::Live
    }

    /// Trade journal path, if enabled.
    pub fn trade_log(&self) -> Option<&str> {
        if self.trade_log_path.trim().is_empty() {
            None
        } else {
            Some(self.trade_log_path.as_str())
        }
    }

    /// Check if using Magic.link (signature_type == 1).
    pub fn is_magic_link(&self) -> bool {
        self.polymarket_signature_type == 1
    }
}
