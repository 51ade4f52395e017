//! Per-window position lifecycle.
//!
//! The [`StrategyEngine`] owns the state machine for the window it is
//! focused on. Each tick the driver hands it fresh inputs; the engine decides
//! a direction, works a maker entry, watches the position against its exit
//! rules, and reports when a window needs settlement.

pub mod engine;
pub mod pricing;

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::error::EngineError;
use crate::ledger::ExitReason;
use crate::market::{BookSnapshot, MarketWindow, Outcome, PriceSample};
use crate::trading::Side;

pub use engine::StrategyEngine;
pub use pricing::StrategyRules;

/// Why a window ended without a trade.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The trend stayed flat until the entry deadline.
    NoSignal,
    /// No entry filled before the entry deadline.
    EntryExpired,
    /// Cash did not cover the trade size.
    InsufficientFunds,
    /// The ledger refused to book an entry fill.
    LedgerRejected,
}

/// Lifecycle phase of the focused window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "detail", rename_all = "snake_case")]
pub enum Phase {
    /// No window yet.
    Idle,
    /// Collecting samples for the trend decision.
    Observing,
    /// Direction chosen, working the entry.
    Decided(Outcome),
    /// Entry filled. Transient: becomes `Monitoring` in the same tick.
    Entered,
    /// Holding, checking exit rules each tick.
    Monitoring,
    /// Position sold before window end.
    Exited,
    /// Window ended while holding; awaiting resolution.
    Settled,
    /// Window ended without a trade.
    Skipped(SkipReason),
    /// Kill switch engaged. Ticks are ignored.
    Halted,
}

impl Phase {
    /// Whether nothing more happens in this window.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Exited | Phase::Settled | Phase::Skipped(_) | Phase::Halted
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Observing => write!(f, "observing"),
            Phase::Decided(side) => write!(f, "decided({})", side),
            Phase::Entered => write!(f, "entered"),
            Phase::Monitoring => write!(f, "monitoring"),
            Phase::Exited => write!(f, "exited"),
            Phase::Settled => write!(f, "settled"),
            Phase::Skipped(reason) => write!(f, "skipped({})", reason),
            Phase::Halted => write!(f, "halted"),
        }
    }
}

/// Inputs for one engine step.
#[derive(Debug, Clone)]
pub struct Tick {
    /// Wall-clock time of the tick.
    pub now: OffsetDateTime,
    /// Window current at `now`.
    pub window: MarketWindow,
    /// Oracle sample, if one was fetched.
    pub sample: Option<PriceSample>,
    /// Book for the window the engine is focused on, if fetched.
    pub book: Option<BookSnapshot>,
    /// Kill switch engaged.
    pub halt: bool,
}

impl Tick {
    /// Tick with no market data.
    pub fn new(now: OffsetDateTime, window: MarketWindow) -> Self {
        Self {
            now,
            window,
            sample: None,
            book: None,
            halt: false,
        }
    }

    /// Attach an oracle sample.
    pub fn with_sample(mut self, sample: PriceSample) -> Self {
        self.sample = Some(sample);
        self
    }

    /// Attach a book snapshot.
    pub fn with_book(mut self, book: BookSnapshot) -> Self {
        self.book = Some(book);
        self
    }

    /// Mark the kill switch as engaged.
    pub fn halted(mut self) -> Self {
        self.halt = true;
        self
    }
}

/// Something the engine did or noticed during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A new window became the focus.
    WindowStarted {
        /// Window id.
        window_id: String,
    },
    /// The trend picked a side.
    Decided {
        /// Window id.
        window_id: String,
        /// Chosen side.
        side: Outcome,
        /// Latest minus baseline price.
        delta: Decimal,
    },
    /// An order was accepted by the gateway.
    OrderPlaced {
        /// Exchange order id.
        order_id: String,
        /// Buy or sell.
        side: Side,
        /// Outcome token traded.
        outcome: Outcome,
        /// Limit price.
        price: Decimal,
        /// Shares.
        size: Decimal,
    },
    /// A resting order was cancelled.
    OrderCancelled {
        /// Exchange order id.
        order_id: String,
    },
    /// An entry filled and the ledger opened the position.
    Entered {
        /// Window id.
        window_id: String,
        /// Side held.
        side: Outcome,
        /// Shares bought.
        shares: Decimal,
        /// Fill price.
        price: Decimal,
    },
    /// The position was sold.
    Exited {
        /// Window id.
        window_id: String,
        /// Exit rule that fired.
        reason: ExitReason,
        /// Fill price.
        price: Decimal,
        /// Realized P&L.
        pnl: Decimal,
    },
    /// The window ended without a trade.
    Skipped {
        /// Window id.
        window_id: String,
        /// Why.
        reason: SkipReason,
    },
    /// The window ended while holding and needs reconciliation.
    AwaitingSettlement(MarketWindow),
    /// The kill switch took effect.
    Halted,
    /// A recoverable problem; the engine keeps going.
    Error(EngineError),
}

/// What a tick produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Phase after the tick.
    pub phase: Phase,
    /// Focused window after the tick.
    pub window_id: Option<String>,
    /// Events in the order they happened.
    pub events: Vec<EngineEvent>,
}

impl TickReport {
    /// Windows that ended while holding a position.
    pub fn awaiting_settlement(&self) -> impl Iterator<Item = &MarketWindow> {
        self.events.iter().filter_map(|e| match e {
            EngineEvent::AwaitingSettlement(window) => Some(window),
            _ => None,
        })
    }

    /// Whether the tick halted the engine.
    pub fn halted(&self) -> bool {
        self.events.iter().any(|e| matches!(e, EngineEvent::Halted))
    }

    /// Whether any event matches `predicate`.
    pub fn any(&self, predicate: impl Fn(&EngineEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display() {
        assert_eq!(Phase::Decided(Outcome::Up).to_string(), "decided(up)");
        assert_eq!(
            Phase::Skipped(SkipReason::EntryExpired).to_string(),
            "skipped(entry_expired)"
        );
        assert_eq!(Phase::Monitoring.to_string(), "monitoring");
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Exited.is_terminal());
        assert!(Phase::Settled.is_terminal());
        assert!(Phase::Skipped(SkipReason::NoSignal).is_terminal());
        assert!(Phase::Halted.is_terminal());
        assert!(!Phase::Observing.is_terminal());
        assert!(!Phase::Decided(Outcome::Down).is_terminal());
        assert!(!Phase::Monitoring.is_terminal());
    }
}
