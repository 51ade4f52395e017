//! Position and trade record types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::market::Outcome;

/// The single open holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    /// Window the shares belong to.
    pub window_id: String,
    /// Outcome held.
    pub side: Outcome,
    /// Number of shares owned.
    pub shares: Decimal,
    /// Average price paid per share.
    pub cost_basis: Decimal,
    /// When the entry filled.
    pub opened_at: OffsetDateTime,
}

impl Position {
    /// Total cost of the position.
    pub fn cost(&self) -> Decimal {
        self.shares * self.cost_basis
    }

    /// Calculate current value at a given price.
    pub fn value_at(&self, price: Decimal) -> Decimal {
        self.shares * price
    }

    /// Calculate P&L at a given price.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.value_at(price) - self.cost()
    }

    /// Per-share return at `price`, as a fraction of cost basis.
    pub fn return_at(&self, price: Decimal) -> Decimal {
        if self.cost_basis.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.cost_basis) / self.cost_basis
    }
}

/// Why a position was closed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExitReason {
    /// Sold after the bid rose far enough above cost.
    TakeProfit,
    /// Sold after the bid fell or the trend reversed.
    StopLoss,
    /// Held to resolution and the side won.
    SettlementWin,
    /// Held to resolution and the side lost.
    SettlementLoss,
}

impl ExitReason {
    /// Whether the position was closed by resolution rather than a sale.
    pub fn is_settlement(&self) -> bool {
        matches!(self, ExitReason::SettlementWin | ExitReason::SettlementLoss)
    }
}

/// Completed trade. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Window traded.
    pub window_id: String,
    /// Outcome held.
    pub side: Outcome,
    /// Shares traded.
    pub shares: Decimal,
    /// Cost basis per share.
    pub entry_price: Decimal,
    /// Sale price, or the $1/$0 settlement payout.
    pub exit_price: Decimal,
    /// `shares × (exit − entry)`.
    pub realized_pnl: Decimal,
    /// Why the position closed.
    pub reason: ExitReason,
    /// When the entry filled.
    pub opened_at: OffsetDateTime,
    /// When the position closed.
    pub closed_at: OffsetDateTime,
}

/// Win/loss statistics over completed trades.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    /// Completed trades.
    pub trades: usize,
    /// Trades with positive P&L.
    pub wins: usize,
    /// Trades with negative P&L.
    pub losses: usize,
    /// `wins / (wins + losses)`, zero with no decided trades.
    pub win_rate: Decimal,
    /// Sum of realized P&L.
    pub total_pnl: Decimal,
    /// Mean winning P&L.
    pub avg_win: Decimal,
    /// Mean losing P&L.
    pub avg_loss: Decimal,
}

impl LedgerSummary {
    /// Summarize a series of realized P&L values.
    pub fn from_pnls(pnls: impl IntoIterator<Item = Decimal>) -> Self {
        let mut summary = LedgerSummary::default();
        let mut win_total = Decimal::ZERO;
        let mut loss_total = Decimal::ZERO;

        for pnl in pnls {
            summary.trades += 1;
            summary.total_pnl += pnl;
            if pnl > Decimal::ZERO {
                summary.wins += 1;
                win_total += pnl;
            } else if pnl < Decimal::ZERO {
                summary.losses += 1;
                loss_total += pnl;
            }
        }

        let decided = summary.wins + summary.losses;
        if decided > 0 {
            summary.win_rate = Decimal::from(summary.wins) / Decimal::from(decided);
        }
        if summary.wins > 0 {
            summary.avg_win = win_total / Decimal::from(summary.wins);
        }
        if summary.losses > 0 {
            summary.avg_loss = loss_total / Decimal::from(summary.losses);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    fn position() -> Position {
        Position {
            window_id: "w".to_string(),
            side: Outcome::Up,
            shares: dec!(10),
            cost_basis: dec!(0.45),
            opened_at: datetime!(2023-11-14 22:16:00 UTC),
        }
    }

    #[test]
    fn position_valuation() {
        let p = position();
        assert_eq!(p.cost(), dec!(4.5));
        assert_eq!(p.value_at(dec!(0.60)), dec!(6.0));
        assert_eq!(p.pnl_at(dec!(0.60)), dec!(1.5));
        assert_eq!(p.return_at(dec!(0.495)), dec!(0.1));
    }

    #[test]
    fn exit_reason_strings() {
        use std::str::FromStr;
        assert_eq!(ExitReason::TakeProfit.to_string(), "take_profit");
        assert_eq!(
            ExitReason::from_str("settlement_loss").unwrap(),
            ExitReason::SettlementLoss
        );
        assert!(ExitReason::SettlementWin.is_settlement());
        assert!(!ExitReason::StopLoss.is_settlement());
    }

    #[test]
    fn summary_counts_wins_and_losses() {
        let summary = LedgerSummary::from_pnls([dec!(3.8), dec!(-1.2), dec!(0), dec!(1.0)]);
        assert_eq!(summary.trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.total_pnl, dec!(3.6));
        assert_eq!(summary.avg_win, dec!(2.4));
        assert_eq!(summary.avg_loss, dec!(-1.2));
        assert_eq!(summary.win_rate.round_dp(4), dec!(0.6667));
    }

    #[test]
    fn empty_summary_is_zero() {
        assert_eq!(LedgerSummary::from_pnls(Vec::new()), LedgerSummary::default());
    }
}
