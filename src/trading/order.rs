//! Order types and creation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(serialize = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(serialize = "SELL", serialize = "sell")]
    Sell,
}

/// Order time-in-force.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good-till-cancelled: stays on book until filled or cancelled.
    #[default]
    #[strum(serialize = "GTC", serialize = "gtc")]
    GTC,
    /// Fill-or-kill: must fill entirely or cancel.
    #[strum(serialize = "FOK", serialize = "fok")]
    FOK,
}

/// Order parameters for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderParams {
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Order size in shares.
    pub size: Decimal,
    /// Time-in-force.
    pub tif: TimeInForce,
    /// Reject instead of crossing the spread.
    pub post_only: bool,
}

impl OrderParams {
    /// Create a resting maker buy that must not cross the book.
    pub fn maker_buy(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: Side::Buy,
            price,
            size,
            tif: TimeInForce::GTC,
            post_only: true,
        }
    }

    /// Create a sell limit.
    pub fn sell(token_id: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            token_id: token_id.into(),
            side: Side::Sell,
            price,
            size,
            tif: TimeInForce::GTC,
            post_only: false,
        }
    }

    /// Set time-in-force.
    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    /// Notional value of the order.
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.is_empty() {
            return Err("token_id is required".to_string());
        }
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            return Err("price must be between 0 and 1".to_string());
        }
        if self.size <= Decimal::ZERO {
            return Err("size must be positive".to_string());
        }
        if self.post_only && self.tif == TimeInForce::FOK {
            return Err("post-only orders cannot be fill-or-kill".to_string());
        }
        Ok(())
    }
}

/// Immediate outcome of placing an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderResult {
    /// Filled in full on placement.
    Filled {
        /// Exchange order id.
        order_id: String,
        /// Execution price.
        price: Decimal,
        /// Filled shares.
        size: Decimal,
    },
    /// Resting on the book.
    Pending {
        /// Exchange order id.
        order_id: String,
    },
    /// Refused by the exchange; nothing rests.
    Rejected {
        /// Rejection reason.
        reason: String,
    },
}

/// Order status from API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order is pending.
    #[strum(serialize = "pending", serialize = "PENDING", serialize = "delayed", serialize = "DELAYED")]
    Pending,
    /// Order is live on the book.
    #[strum(serialize = "live", serialize = "LIVE")]
    Live,
    /// Order is fully filled.
    #[strum(serialize = "filled", serialize = "FILLED", serialize = "matched", serialize = "MATCHED")]
    Filled,
    /// Order was cancelled.
    #[strum(
        serialize = "canceled",
        serialize = "cancelled",
        serialize = "CANCELED",
        serialize = "CANCELLED",
        serialize = "unmatched"
    )]
    Canceled,
    /// Order was rejected.
    #[strum(serialize = "rejected", serialize = "REJECTED")]
    Rejected,
    /// Order expired.
    #[strum(serialize = "expired", serialize = "EXPIRED")]
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Check if order was filled.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }
}

/// Order state summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderState {
    /// Order ID.
    pub order_id: String,
    /// Current status.
    pub status: OrderStatus,
    /// Shares filled so far.
    pub filled_size: Decimal,
    /// Original size.
    pub original_size: Decimal,
    /// Execution price, when reported.
    pub fill_price: Option<Decimal>,
}

impl OrderState {
    /// Whether the whole order has filled.
    pub fn is_filled(&self) -> bool {
        self.status.is_filled()
            || (self.original_size > Decimal::ZERO && self.filled_size >= self.original_size)
    }

    /// Whether the order can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.is_filled()
    }
}
