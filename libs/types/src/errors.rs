//! Error types for the matching engine
//!
//! Comprehensive error taxonomy using thiserror

use crate::ids::{BookKey, OrderId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Top-level engine error returned by intake and cancel calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown market: {key}")]
    UnknownMarket { key: BookKey },

    /// Unknown id, already terminal, or owned by another participant
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] OrderError),

    #[error("Market already open: {key}")]
    MarketAlreadyOpen { key: BookKey },

    /// The book's task stopped after a fatal invariant violation
    #[error("Book halted: {key}")]
    BookHalted { key: BookKey },
}

/// Reasons an order request fails validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("limit order requires a price")]
    MissingLimitPrice,

    #[error("market order must not carry a price")]
    UnexpectedPrice,

    #[error("price {price} is not a multiple of tick {tick}")]
    OffTick { price: Decimal, tick: Decimal },
}
