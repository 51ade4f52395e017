//! Trading module for order management and execution.
//!
//! This module handles:
//! - Order types and creation
//! - The gateway traits the engine trades through
//! - Live CLOB execution and the paper simulator

pub mod execution;
pub mod gateway;
pub mod live;
pub mod order;
pub mod paper;

pub use gateway::{BookSource, ExchangeGateway, PriceSource, ResolutionSource, WindowSource};
pub use live::LiveGateway;
pub use order::{OrderParams, OrderResult, OrderState, OrderStatus, Side, TimeInForce};
pub use paper::PaperGateway;
