//! Append-only CSV trade journal.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::{LedgerEntry, LedgerSummary, Position};
use crate::market::Outcome;

/// One journal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Unix timestamp of the event.
    pub timestamp: i64,
    /// Window traded.
    pub window_id: String,
    /// Outcome held.
    pub side: Outcome,
    /// BUY, SELL or SETTLE.
    pub action: String,
    /// Cost basis per share.
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    /// Exit or payout price; empty for entries.
    #[serde(with = "rust_decimal::serde::str_option")]
    pub exit_price: Option<Decimal>,
    /// Shares traded.
    #[serde(with = "rust_decimal::serde::str")]
    pub shares: Decimal,
    /// Cash moved by this event.
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_usd: Decimal,
    /// Realized P&L; empty for entries.
    #[serde(with = "rust_decimal::serde::str_option")]
    pub pnl: Option<Decimal>,
    /// Exit reason; empty for entries.
    pub exit_reason: Option<String>,
}

impl TradeRecord {
    /// Row for a filled entry.
    pub fn entry(position: &Position) -> Self {
        Self {
            timestamp: position.opened_at.unix_timestamp(),
            window_id: position.window_id.clone(),
            side: position.side,
            action: "BUY".to_string(),
            entry_price: position.cost_basis,
            exit_price: None,
            shares: position.shares,
            amount_usd: position.cost(),
            pnl: None,
            exit_reason: None,
        }
    }

    /// Row for a sale or settlement.
    pub fn close(entry: &LedgerEntry) -> Self {
        let action = if entry.reason.is_settlement() {
            "SETTLE"
        } else {
            "SELL"
        };
        Self {
            timestamp: entry.closed_at.unix_timestamp(),
            window_id: entry.window_id.clone(),
            side: entry.side,
            action: action.to_string(),
            entry_price: entry.entry_price,
            exit_price: Some(entry.exit_price),
            shares: entry.shares,
            amount_usd: entry.shares * entry.exit_price,
            pnl: Some(entry.realized_pnl),
            exit_reason: Some(entry.reason.to_string()),
        }
    }
}

/// CSV file the ledger appends every fill, exit and settlement to.
#[derive(Debug, Clone)]
pub struct TradeJournal {
    path: PathBuf,
}

impl TradeJournal {
    /// Journal at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header if the file is new or empty.
    pub fn append(&self, record: &TradeRecord) -> Result<(), csv::Error> {
        let file_has_data = fs::metadata(&self.path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    /// Read every row back.
    pub fn load(&self) -> Result<Vec<TradeRecord>, csv::Error> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        reader.deserialize().collect()
    }

    /// Win/loss statistics over the closing rows.
    pub fn summary(&self) -> Result<LedgerSummary, csv::Error> {
        let records = self.load()?;
        Ok(LedgerSummary::from_pnls(
            records.into_iter().filter_map(|r| r.pnl),
        ))
    }
}
