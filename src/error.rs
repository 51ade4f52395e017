//! Unified error types for the trend bot.

use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the trend bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Market-related error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Price oracle error.
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Trading/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// Ledger bookkeeping error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Strategy engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Market discovery and order book errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// No market exists for the computed window slug.
    #[error("no market found for slug {slug}")]
    WindowNotFound {
        /// The slug that was looked up.
        slug: String,
    },

    /// Failed to fetch market information.
    #[error("failed to fetch market {slug}: {reason}")]
    FetchFailed {
        /// The market slug that failed.
        slug: String,
        /// Reason for failure.
        reason: String,
    },

    /// The book has no usable bid or ask.
    #[error("empty order book for token {token_id}")]
    EmptyBook {
        /// The token whose book was empty.
        token_id: String,
    },

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Price oracle errors.
#[derive(Error, Debug)]
pub enum OracleError {
    /// Oracle returned a non-success status after all retries.
    #[error("oracle returned status {status}")]
    BadStatus {
        /// HTTP status code.
        status: u16,
    },

    /// Price field was missing or malformed.
    #[error("failed to parse oracle price: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Trading and order execution errors.
#[derive(Error, Debug)]
pub enum TradingError {
    /// Order submission failed.
    #[error("order submission failed: {0}")]
    SubmissionFailed(String),

    /// Failed to cancel order.
    #[error("failed to cancel order {order_id}: {reason}")]
    CancelFailed {
        /// Order ID that failed to cancel.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to get order status.
    #[error("failed to get order status for {order_id}: {reason}")]
    StatusFailed {
        /// Order ID.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to resolve a window's outcome.
    #[error("failed to resolve window {slug}: {reason}")]
    ResolutionFailed {
        /// Window slug.
        slug: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Signing error.
    #[error("signing error: {0}")]
    SigningError(String),

    /// CLOB authentication failed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Rate limited by the API.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Portfolio ledger errors. None of these mutate state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Cash does not cover the entry cost.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },

    /// An exit was requested with nothing held.
    #[error("no open position")]
    NoOpenPosition,

    /// An entry was requested while a position is held.
    #[error("position already open in window {window_id}")]
    PositionAlreadyOpen {
        /// Window of the position already held.
        window_id: String,
    },

    /// The window closed but no winner could be determined.
    #[error("settlement of window {window_id} is ambiguous")]
    SettlementAmbiguous {
        /// Window that could not be settled.
        window_id: String,
    },

    /// Entry size or price was not positive.
    #[error("invalid fill: {0}")]
    InvalidFill(String),
}

/// Strategy engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A sample or quote was not newer than the last one seen.
    #[error("stale data: {0}")]
    StaleData(String),

    /// The gateway rejected an order.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the gateway.
        reason: String,
    },

    /// Cash does not cover the trade size.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds {
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },

    /// Settlement could not be determined.
    #[error("settlement of window {window_id} is ambiguous")]
    SettlementAmbiguous {
        /// Window that could not be settled.
        window_id: String,
    },

    /// A resting order could not be cancelled.
    #[error("failed to cancel order {order_id}: {reason}")]
    CancelFailed {
        /// Order ID that failed to cancel.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                required,
                available,
            } => EngineError::InsufficientFunds {
                required,
                available,
            },
            LedgerError::SettlementAmbiguous { window_id } => {
                EngineError::SettlementAmbiguous { window_id }
            }
            other => EngineError::OrderRejected {
                reason: other.to_string(),
            },
        }
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ledger_funds_error_maps_to_engine_funds_error() {
        let err: EngineError = LedgerError::InsufficientFunds {
            required: dec!(5),
            available: dec!(1),
        }
        .into();
        assert_eq!(
            err,
            EngineError::InsufficientFunds {
                required: dec!(5),
                available: dec!(1)
            }
        );
    }

    #[test]
    fn error_messages_are_readable() {
        let err = LedgerError::PositionAlreadyOpen {
            window_id: "btc-updown-5m-1700000100".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "position already open in window btc-updown-5m-1700000100"
        );
    }
}
