//! Market module for BTC up/down prediction windows.
//!
//! This module handles:
//! - Window, quote and price sample types
//! - Window discovery and resolution lookups
//! - Polymarket API client

pub mod book;
pub mod client;
pub mod discovery;
pub mod types;

pub use client::PolymarketClient;
pub use discovery::{discover_window, fetch_window, window_slug, window_start};
pub use types::{BookQuote, BookSnapshot, MarketWindow, Outcome, PriceSample, WindowStatus};
