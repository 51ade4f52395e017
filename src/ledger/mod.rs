//! Portfolio ledger: cash, the single open position and completed trades.
//!
//! Every method either applies its whole effect or returns an error without
//! touching state. After each mutation
//! `cash + open cost == initial cash + Σ realized P&L`.

pub mod journal;
pub mod position;

use std::collections::HashSet;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::LedgerError;
use crate::market::{Outcome, WindowStatus};

pub use journal::{TradeJournal, TradeRecord};
pub use position::{ExitReason, LedgerEntry, LedgerSummary, Position};

/// Single writer of cash and position state.
#[derive(Debug)]
pub struct PortfolioLedger {
    initial_cash: Decimal,
    cash: Decimal,
    position: Option<Position>,
    entries: Vec<LedgerEntry>,
    settled_windows: HashSet<String>,
    journal: Option<TradeJournal>,
}

impl PortfolioLedger {
    /// Create a ledger holding `initial_cash` and nothing else.
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            position: None,
            entries: Vec::new(),
            settled_windows: HashSet::new(),
            journal: None,
        }
    }

    /// Ledger seeded from config, journaling if a trade log path is set.
    pub fn from_config(config: &Config, initial_cash: Decimal) -> Self {
        let ledger = Self::new(initial_cash);
        match config.trade_log() {
            Some(path) => ledger.with_journal(TradeJournal::new(path)),
            None => ledger,
        }
    }

    /// Attach a CSV journal.
    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Cash available.
    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Starting cash.
    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    /// The open position, if any.
    pub fn open_position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Completed trades, oldest first.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Cost of the open position, zero when flat.
    pub fn open_cost_basis(&self) -> Decimal {
        self.position.as_ref().map(Position::cost).unwrap_or_default()
    }

    /// Sum of realized P&L over completed trades.
    pub fn realized_pnl(&self) -> Decimal {
        self.entries.iter().map(|e| e.realized_pnl).sum()
    }

    /// Cash plus the open position marked at `mark`, or at cost without a mark.
    pub fn equity(&self, mark: Option<Decimal>) -> Decimal {
        let held = match (&self.position, mark) {
            (Some(p), Some(price)) => p.value_at(price),
            (Some(p), None) => p.cost(),
            (None, _) => Decimal::ZERO,
        };
        self.cash + held
    }

    /// Win/loss statistics over completed trades.
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary::from_pnls(self.entries.iter().map(|e| e.realized_pnl))
    }

    /// Whether the accounting identity holds.
    pub fn check_conservation(&self) -> bool {
        self.cash >= Decimal::ZERO
            && self.cash + self.open_cost_basis() == self.initial_cash + self.realized_pnl()
    }

    /// Open a position after an entry fill.
    pub fn debit_for_entry(
        &mut self,
        window_id: &str,
        side: Outcome,
        shares: Decimal,
        price: Decimal,
        at: OffsetDateTime,
    ) -> Result<&Position, LedgerError> {
        if shares <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(LedgerError::InvalidFill(format!(
                "{} shares at {}",
                shares, price
            )));
        }

        let cost = shares * price;
        if cost > self.cash {
            return Err(LedgerError::InsufficientFunds {
                required: cost,
                available: self.cash,
            });
        }
        if let Some(existing) = &self.position {
            return Err(LedgerError::PositionAlreadyOpen {
                window_id: existing.window_id.clone(),
            });
        }

        self.cash -= cost;
        let position = Position {
            window_id: window_id.to_string(),
            side,
            shares,
            cost_basis: price,
            opened_at: at,
        };

        info!(
            window = %window_id,
            side = %side,
            shares = %shares,
            price = %price,
            cost = %cost,
            cash = %self.cash,
            "Position opened"
        );
        self.journal(TradeRecord::entry(&position));
        debug_assert!(self.check_conservation());

        Ok(self.position.insert(position))
    }

    /// Close the open position after a sale fill.
    pub fn credit_for_exit(
        &mut self,
        fill_price: Decimal,
        reason: ExitReason,
        at: OffsetDateTime,
    ) -> Result<LedgerEntry, LedgerError> {
        if fill_price < Decimal::ZERO {
            return Err(LedgerError::InvalidFill(format!("exit price {}", fill_price)));
        }
        let position = self.position.take().ok_or(LedgerError::NoOpenPosition)?;
        Ok(self.close(position, fill_price, reason, at))
    }

    /// Settle the open position if its window has resolved.
    ///
    /// Returns the recorded entry when a settlement happened. An open window,
    /// a window with no position and an already settled window are no-ops.
    pub fn reconcile_if_settled(
        &mut self,
        window_id: &str,
        status: WindowStatus,
        at: OffsetDateTime,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let winner = match status {
            WindowStatus::Open => return Ok(None),
            WindowStatus::Closed { winner } => winner,
        };

        if self.settled_windows.contains(window_id) {
            return Ok(None);
        }
        let holds_window = self
            .position
            .as_ref()
            .is_some_and(|p| p.window_id == window_id);
        if !holds_window {
            return Ok(None);
        }

        let Some(winner) = winner else {
            warn!(window = %window_id, "Window closed without a clear winner, deferring settlement");
            return Err(LedgerError::SettlementAmbiguous {
                window_id: window_id.to_string(),
            });
        };

        let position = self.position.take().ok_or(LedgerError::NoOpenPosition)?;
        let (payout, reason) = if position.side == winner {
            (Decimal::ONE, ExitReason::SettlementWin)
        } else {
            (Decimal::ZERO, ExitReason::SettlementLoss)
        };
        self.settled_windows.insert(window_id.to_string());
        Ok(Some(self.close(position, payout, reason, at)))
    }

    fn close(
        &mut self,
        position: Position,
        exit_price: Decimal,
        reason: ExitReason,
        at: OffsetDateTime,
    ) -> LedgerEntry {
        self.cash += position.value_at(exit_price);
        let entry = LedgerEntry {
            realized_pnl: position.pnl_at(exit_price),
            window_id: position.window_id,
            side: position.side,
            shares: position.shares,
            entry_price: position.cost_basis,
            exit_price,
            reason,
            opened_at: position.opened_at,
            closed_at: at,
        };

        info!(
            window = %entry.window_id,
            side = %entry.side,
            reason = %reason,
            exit_price = %exit_price,
            pnl = %entry.realized_pnl,
            cash = %self.cash,
            "Position closed"
        );
        self.journal(TradeRecord::close(&entry));
        self.entries.push(entry.clone());
        debug_assert!(self.check_conservation());
        entry
    }

    fn journal(&self, record: TradeRecord) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&record) {
                error!(path = %journal.path().display(), error = %e, "Failed to write trade log");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    const WINDOW: &str = "btc-updown-5m-1700000100";

    fn at() -> OffsetDateTime {
        datetime!(2023-11-14 22:16:00 UTC)
    }

    fn opened() -> PortfolioLedger {
        let mut ledger = PortfolioLedger::new(dec!(100));
        ledger
            .debit_for_entry(WINDOW, Outcome::Up, dec!(11.08), dec!(0.451), at())
            .unwrap();
        ledger
    }

    #[test]
    fn entry_debits_cash() {
        let ledger = opened();
        assert_eq!(ledger.cash(), dec!(95.00292));
        let position = ledger.open_position().unwrap();
        assert_eq!(position.shares, dec!(11.08));
        assert_eq!(position.cost_basis, dec!(0.451));
        assert!(ledger.check_conservation());
    }

    #[test]
    fn entry_rejected_without_funds() {
        let mut ledger = PortfolioLedger::new(dec!(4));
        let err = ledger
            .debit_for_entry(WINDOW, Outcome::Up, dec!(10), dec!(0.45), at())
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                required: dec!(4.5),
                available: dec!(4)
            }
        );
        assert_eq!(ledger.cash(), dec!(4));
        assert!(ledger.open_position().is_none());
    }

    #[test]
    fn second_entry_rejected_while_position_open() {
        let mut ledger = opened();
        let err = ledger
            .debit_for_entry("other", Outcome::Down, dec!(1), dec!(0.5), at())
            .unwrap_err();
        assert!(matches!(err, LedgerError::PositionAlreadyOpen { .. }));
        assert_eq!(ledger.cash(), dec!(95.00292));
    }

    #[test]
    fn invalid_fill_is_rejected() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        assert!(matches!(
            ledger.debit_for_entry(WINDOW, Outcome::Up, dec!(0), dec!(0.5), at()),
            Err(LedgerError::InvalidFill(_))
        ));
    }

    #[test]
    fn exit_credits_cash_and_records_pnl() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        ledger
            .debit_for_entry(WINDOW, Outcome::Up, dec!(10), dec!(0.45), at())
            .unwrap();
        let entry = ledger
            .credit_for_exit(dec!(0.80), ExitReason::TakeProfit, at())
            .unwrap();

        assert_eq!(entry.realized_pnl, dec!(3.5));
        assert_eq!(entry.reason, ExitReason::TakeProfit);
        assert_eq!(ledger.cash(), dec!(103.5));
        assert_eq!(ledger.realized_pnl(), dec!(3.5));
        assert!(ledger.open_position().is_none());
        assert!(ledger.check_conservation());
    }

    #[test]
    fn exit_without_position_fails() {
        let mut ledger = PortfolioLedger::new(dec!(100));
        assert_eq!(
            ledger.credit_for_exit(dec!(0.5), ExitReason::StopLoss, at()),
            Err(LedgerError::NoOpenPosition)
        );
    }

    #[test]
    fn open_window_does_not_settle() {
        let mut ledger = opened();
        assert_eq!(
            ledger.reconcile_if_settled(WINDOW, WindowStatus::Open, at()),
            Ok(None)
        );
        assert!(ledger.open_position().is_some());
    }

    #[test]
    fn winning_settlement_pays_one_dollar_per_share() {
        let mut ledger = opened();
        let entry = ledger
            .reconcile_if_settled(
                WINDOW,
                WindowStatus::Closed {
                    winner: Some(Outcome::Up),
                },
                at(),
            )
            .unwrap()
            .unwrap();

        assert_eq!(entry.exit_price, dec!(1));
        assert_eq!(entry.reason, ExitReason::SettlementWin);
        assert_eq!(entry.realized_pnl, dec!(6.08292));
        assert_eq!(ledger.cash(), dec!(106.08292));
        assert!(ledger.check_conservation());
    }

    #[test]
    fn losing_settlement_pays_nothing() {
        let mut ledger = opened();
        let entry = ledger
            .reconcile_if_settled(
                WINDOW,
                WindowStatus::Closed {
                    winner: Some(Outcome::Down),
                },
                at(),
            )
            .unwrap()
            .unwrap();

        assert_eq!(entry.reason, ExitReason::SettlementLoss);
        assert_eq!(entry.realized_pnl, dec!(-4.99708));
        assert_eq!(ledger.cash(), dec!(95.00292));
        assert!(ledger.check_conservation());
    }

    #[test]
    fn ambiguous_settlement_is_deferred() {
        let mut ledger = opened();
        let err = ledger
            .reconcile_if_settled(WINDOW, WindowStatus::Closed { winner: None }, at())
            .unwrap_err();
        assert!(matches!(err, LedgerError::SettlementAmbiguous { .. }));
        assert!(ledger.open_position().is_some());
        assert_eq!(ledger.cash(), dec!(95.00292));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut ledger = opened();
        let closed = WindowStatus::Closed {
            winner: Some(Outcome::Up),
        };
        assert!(ledger.reconcile_if_settled(WINDOW, closed, at()).unwrap().is_some());
        let cash = ledger.cash();

        assert_eq!(ledger.reconcile_if_settled(WINDOW, closed, at()), Ok(None));
        assert_eq!(ledger.cash(), cash);
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn reconcile_ignores_other_windows() {
        let mut ledger = opened();
        let result = ledger.reconcile_if_settled(
            "btc-updown-5m-1699999800",
            WindowStatus::Closed {
                winner: Some(Outcome::Down),
            },
            at(),
        );
        assert_eq!(result, Ok(None));
        assert!(ledger.open_position().is_some());
    }

    #[test]
    fn equity_marks_open_position() {
        let ledger = opened();
        assert_eq!(ledger.equity(None), dec!(100));
        assert_eq!(ledger.equity(Some(dec!(0.5))), dec!(100.54292));
    }

    #[test]
    fn summary_reflects_entries() {
        let mut ledger = opened();
        ledger
            .credit_for_exit(dec!(0.351), ExitReason::StopLoss, at())
            .unwrap();
        let summary = ledger.summary();
        assert_eq!(summary.trades, 1);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.total_pnl, dec!(-1.108));
    }
}
