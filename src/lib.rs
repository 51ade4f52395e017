//! BTC up/down Polymarket trend bot.
//!
//! Trades fixed-duration "will BTC be up or down" windows. For each window the
//! bot watches the spot price for a short trend window, buys the side the
//! trend points to with a maker-only limit order, then either sells early on
//! a take-profit or stop-loss signal or holds the position to settlement.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Observing → Decided(side) → Entered → Monitoring → Exited
//!                                                        └→ Settled
//!          └──────────────┴→ Skipped(reason)       any → Halted
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Window discovery, order books and the Polymarket client
//! - [`oracle`]: Spot price oracle
//! - [`trading`]: Order types, gateway traits, live and paper gateways
//! - [`strategy`]: The per-window state machine
//! - [`ledger`]: Cash, the open position and the trade journal
//! - [`driver`]: Tick loop, kill switch and settlement queue
//! - [`api`]: HTTP API for health, status and metrics
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod ledger;
pub mod market;
pub mod metrics;
pub mod oracle;
pub mod signing;
pub mod strategy;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
