//! Pure pricing and decision rules.

use rust_decimal::Decimal;

use crate::config::Config;
use crate::ledger::{ExitReason, Position};
use crate::market::{BookQuote, Outcome, PriceSample};

/// Thresholds the engine trades by, taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyRules {
    /// Notional per entry.
    pub trade_size: Decimal,
    /// Seconds between baseline and decision sample.
    pub trend_window_seconds: i64,
    /// Take-profit return threshold.
    pub take_profit_min_pct: Decimal,
    /// Absolute stop distance below cost.
    pub stop_loss_abs: Decimal,
    /// Fractional stop distance below cost.
    pub stop_loss_pct: Decimal,
    /// Opposing-side reversal threshold.
    pub reversal_pct: Decimal,
    /// Minimum price increment.
    pub price_tick: Decimal,
    /// Minimum share increment.
    pub share_increment: Decimal,
    /// Lowest acceptable entry price.
    pub min_entry_price: Decimal,
    /// Highest acceptable entry price.
    pub max_entry_price: Decimal,
    /// Entry orders must fill this long before close.
    pub entry_safety_margin_seconds: i64,
    /// Re-price a resting entry once the bid runs this far above it.
    pub entry_chase_threshold: Decimal,
    /// Widest spread an entry is placed into.
    pub max_entry_spread: Decimal,
}

impl From<&Config> for StrategyRules {
    fn from(config: &Config) -> Self {
        Self {
            trade_size: config.trade_size,
            trend_window_seconds: config.trend_window_seconds,
            take_profit_min_pct: config.take_profit_min_pct,
            stop_loss_abs: config.stop_loss_abs,
            stop_loss_pct: config.stop_loss_pct,
            reversal_pct: config.reversal_pct,
            price_tick: config.price_tick,
            share_increment: config.share_increment,
            min_entry_price: config.min_entry_price,
            max_entry_price: config.max_entry_price,
            entry_safety_margin_seconds: config.entry_safety_margin_seconds,
            entry_chase_threshold: config.entry_chase_threshold,
            max_entry_spread: config.max_entry_spread,
        }
    }
}

/// Direction implied by two samples. A zero move is neutral.
pub fn trend_direction(baseline: &PriceSample, latest: &PriceSample) -> Option<Outcome> {
    let delta = latest.price - baseline.price;
    if delta > Decimal::ZERO {
        Some(Outcome::Up)
    } else if delta < Decimal::ZERO {
        Some(Outcome::Down)
    } else {
        None
    }
}

/// Whether enough time separates the samples to decide.
pub fn trend_window_elapsed(baseline: &PriceSample, latest: &PriceSample, seconds: i64) -> bool {
    (latest.timestamp - baseline.timestamp).whole_seconds() >= seconds
}

/// Maker entry price: one tick above the bid, if that stays below the ask.
pub fn maker_entry_price(quote: &BookQuote, tick: Decimal) -> Option<Decimal> {
    let price = quote.best_bid + tick;
    (price < quote.best_ask).then_some(price)
}

/// Shares affordable with `notional` at `price`, rounded down to `increment`.
pub fn shares_for(notional: Decimal, price: Decimal, increment: Decimal) -> Decimal {
    if price <= Decimal::ZERO || increment <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((notional / price) / increment).floor() * increment
}

/// Whether an entry price sits inside the tradable band.
pub fn in_entry_band(price: Decimal, rules: &StrategyRules) -> bool {
    price >= rules.min_entry_price && price <= rules.max_entry_price
}

/// Whether the book is tight enough to enter.
pub fn spread_acceptable(quote: &BookQuote, rules: &StrategyRules) -> bool {
    quote.spread() <= rules.max_entry_spread
}

/// Exit signal for an open position, take-profit first.
///
/// `own_bid` is the best bid of the held side, `opposing_bid` the best bid of
/// the other side.
pub fn exit_signal(
    position: &Position,
    own_bid: Decimal,
    opposing_bid: Decimal,
    rules: &StrategyRules,
) -> Option<ExitReason> {
    let cost = position.cost_basis;
    if cost <= Decimal::ZERO {
        return None;
    }

    if (own_bid - cost) / cost >= rules.take_profit_min_pct {
        return Some(ExitReason::TakeProfit);
    }

    let drop = cost - own_bid;
    if drop >= rules.stop_loss_abs || drop / cost >= rules.stop_loss_pct {
        return Some(ExitReason::StopLoss);
    }

    // Entry-implied price of the other side.
    let implied_opposing = Decimal::ONE - cost;
    if implied_opposing > Decimal::ZERO
        && opposing_bid - implied_opposing >= implied_opposing * rules.reversal_pct
    {
        return Some(ExitReason::StopLoss);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    fn rules() -> StrategyRules {
        StrategyRules::from(&Config::default())
    }

    fn quote(bid: Decimal, ask: Decimal) -> BookQuote {
        BookQuote {
            outcome: Outcome::Up,
            best_bid: bid,
            best_ask: ask,
            observed_at: datetime!(2023-11-14 22:16:00 UTC),
        }
    }

    fn position(cost: Decimal) -> Position {
        Position {
            window_id: "w".to_string(),
            side: Outcome::Up,
            shares: dec!(10),
            cost_basis: cost,
            opened_at: datetime!(2023-11-14 22:16:00 UTC),
        }
    }

    #[test]
    fn wide_spread_blocks_entry() {
        let rules = rules();
        assert!(spread_acceptable(&quote(dec!(0.45), dec!(0.47)), &rules));
        assert!(spread_acceptable(&quote(dec!(0.40), dec!(0.55)), &rules));
        assert!(!spread_acceptable(&quote(dec!(0.30), dec!(0.46)), &rules));
    }

    #[test]
    fn trend_sign_picks_side() {
        let base = PriceSample::new(datetime!(2023-11-14 22:15:00 UTC), dec!(60000));
        let up = PriceSample::new(datetime!(2023-11-14 22:16:00 UTC), dec!(60050));
        let down = PriceSample::new(datetime!(2023-11-14 22:16:00 UTC), dec!(59990));
        let flat = PriceSample::new(datetime!(2023-11-14 22:16:00 UTC), dec!(60000));

        assert_eq!(trend_direction(&base, &up), Some(Outcome::Up));
        assert_eq!(trend_direction(&base, &down), Some(Outcome::Down));
        assert_eq!(trend_direction(&base, &flat), None);
        assert!(trend_window_elapsed(&base, &up, 60));
        assert!(!trend_window_elapsed(&base, &up, 61));
    }

    #[test]
    fn entry_price_is_one_tick_inside_spread() {
        assert_eq!(
            maker_entry_price(&quote(dec!(0.45), dec!(0.47)), dec!(0.001)),
            Some(dec!(0.451))
        );
        assert_eq!(maker_entry_price(&quote(dec!(0.45), dec!(0.451)), dec!(0.001)), None);
        assert_eq!(maker_entry_price(&quote(dec!(0.45), dec!(0.45)), dec!(0.001)), None);
    }

    #[test]
    fn shares_round_down_to_increment() {
        assert_eq!(shares_for(dec!(5), dec!(0.451), dec!(0.01)), dec!(11.08));
        assert_eq!(shares_for(dec!(5), dec!(0.5), dec!(0.01)), dec!(10));
        assert_eq!(shares_for(dec!(5), dec!(0), dec!(0.01)), dec!(0));
    }

    #[test]
    fn entry_band_is_inclusive() {
        let r = rules();
        assert!(in_entry_band(dec!(0.10), &r));
        assert!(in_entry_band(dec!(0.80), &r));
        assert!(!in_entry_band(dec!(0.099), &r));
        assert!(!in_entry_band(dec!(0.801), &r));
    }

    #[test]
    fn take_profit_fires_at_threshold() {
        let r = rules();
        let p = position(dec!(0.45));
        assert_eq!(
            exit_signal(&p, dec!(0.80), dec!(0.18), &r),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(
            exit_signal(&p, dec!(0.495), dec!(0.50), &r),
            Some(ExitReason::TakeProfit)
        );
        assert_eq!(exit_signal(&p, dec!(0.49), dec!(0.50), &r), None);
    }

    #[test]
    fn stop_loss_on_absolute_drop() {
        let r = rules();
        let p = position(dec!(0.45));
        assert_eq!(
            exit_signal(&p, dec!(0.34), dec!(0.55), &r),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(
            exit_signal(&p, dec!(0.35), dec!(0.55), &r),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(exit_signal(&p, dec!(0.37), dec!(0.55), &r), None);
    }

    #[test]
    fn stop_loss_on_percentage_crash() {
        let r = rules();
        // 0.20 of 0.30 is 0.06, below the absolute stop.
        let p = position(dec!(0.30));
        assert_eq!(
            exit_signal(&p, dec!(0.24), dec!(0.70), &r),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(exit_signal(&p, dec!(0.25), dec!(0.70), &r), None);
    }

    #[test]
    fn stop_loss_on_reversal() {
        let r = rules();
        let p = position(dec!(0.45));
        // Implied opposing 0.55, 15% above is 0.6325.
        assert_eq!(
            exit_signal(&p, dec!(0.40), dec!(0.6325), &r),
            Some(ExitReason::StopLoss)
        );
        assert_eq!(exit_signal(&p, dec!(0.40), dec!(0.63), &r), None);
    }

    #[test]
    fn take_profit_wins_over_stop() {
        let r = rules();
        let p = position(dec!(0.45));
        // Both the own bid and the opposing bid are high, e.g. a crossed book.
        assert_eq!(
            exit_signal(&p, dec!(0.60), dec!(0.70), &r),
            Some(ExitReason::TakeProfit)
        );
    }
}
