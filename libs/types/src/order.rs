//! Order lifecycle types
//!
//! `PlaceOrder` is what intake hands to the engine; `Order` is the engine's
//! live record, mutated only by the book that owns it.

use crate::errors::OrderError;
use crate::ids::{BookKey, ClientRequestId, OrderId, OwnerId};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Pricing behaviour of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    /// Executes at its limit or better; any remainder rests
    LIMIT,
    /// Executes against whatever is available; never rests
    MARKET,
}

/// Order status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum OrderStatus {
    /// Resting with no fills
    #[serde(rename = "OPEN")]
    Open,

    /// Resting with at least one fill
    #[serde(rename = "PARTIALLY_FILLED")]
    PartiallyFilled,

    /// Completely matched (terminal)
    #[serde(rename = "FILLED")]
    Filled,

    /// Removed from the book before filling (terminal)
    #[serde(rename = "CANCELLED")]
    Cancelled(CancelReason),

    /// Remainder discarded by the engine (terminal)
    #[serde(rename = "REJECTED")]
    Rejected(RejectReason),
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled(_) | OrderStatus::Rejected(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    UserRequested,
    MarketClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// A market order ran out of opposite liquidity
    InsufficientLiquidity,
}

/// A validated-at-intake request to place an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub key: BookKey,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub owner_id: OwnerId,
    pub client_request_id: ClientRequestId,
}

impl PlaceOrder {
    /// Build a limit order request with a fresh client request id
    pub fn limit(
        key: BookKey,
        side: Side,
        price: Price,
        quantity: Quantity,
        owner_id: OwnerId,
    ) -> Self {
        Self {
            key,
            side,
            kind: OrderKind::LIMIT,
            price: Some(price),
            quantity,
            owner_id,
            client_request_id: ClientRequestId::generate(),
        }
    }

    /// Build a market order request with a fresh client request id
    pub fn market(key: BookKey, side: Side, quantity: Quantity, owner_id: OwnerId) -> Self {
        Self {
            key,
            side,
            kind: OrderKind::MARKET,
            price: None,
            quantity,
            owner_id,
            client_request_id: ClientRequestId::generate(),
        }
    }

    pub fn with_client_request_id(mut self, id: ClientRequestId) -> Self {
        self.client_request_id = id;
        self
    }

    /// Check the request's shape.
    ///
    /// `tick`, when set, is the minimum price increment for limit prices.
    pub fn validate(&self, tick: Option<Decimal>) -> Result<(), OrderError> {
        if self.quantity.is_zero() {
            return Err(OrderError::NonPositiveQuantity(self.quantity.as_decimal()));
        }

        match (self.kind, self.price) {
            (OrderKind::LIMIT, None) => Err(OrderError::MissingLimitPrice),
            (OrderKind::MARKET, Some(_)) => Err(OrderError::UnexpectedPrice),
            (OrderKind::LIMIT, Some(price)) => match tick {
                Some(tick) if !price.is_multiple_of(tick) => Err(OrderError::OffTick {
                    price: price.as_decimal(),
                    tick,
                }),
                _ => Ok(()),
            },
            (OrderKind::MARKET, None) => Ok(()),
        }
    }
}

/// Live order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub key: BookKey,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Option<Price>,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub owner_id: OwnerId,
    pub client_request_id: ClientRequestId,
    /// Position in the book's event sequence at acceptance
    pub arrival_sequence: u64,
    pub status: OrderStatus,
    pub created_at: i64, // Unix nanos
    pub updated_at: i64, // Unix nanos
}

impl Order {
    /// Accept a request into a book as a new open order
    pub fn accept(
        order_id: OrderId,
        request: PlaceOrder,
        arrival_sequence: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id,
            key: request.key,
            side: request.side,
            kind: request.kind,
            price: request.price,
            quantity: request.quantity,
            filled_quantity: Quantity::zero(),
            remaining_quantity: request.quantity,
            owner_id: request.owner_id,
            client_request_id: request.client_request_id,
            arrival_sequence,
            status: OrderStatus::Open,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Check quantity invariants: filled + remaining = total, and
    /// remaining is zero exactly when the order is filled
    pub fn check_invariant(&self) -> bool {
        let conserved = self.filled_quantity + self.remaining_quantity == self.quantity;
        let filled_iff_empty =
            self.remaining_quantity.is_zero() == (self.status == OrderStatus::Filled);
        conserved && filled_iff_empty
    }

    /// Check if order is completely filled
    pub fn is_filled(&self) -> bool {
        self.filled_quantity == self.quantity
    }

    /// Check if order has any fills
    pub fn has_fills(&self) -> bool {
        !self.filled_quantity.is_zero()
    }

    /// A limit order still eligible to sit in the book
    pub fn is_resting(&self) -> bool {
        self.kind == OrderKind::LIMIT
            && matches!(self.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    /// Apply a fill and adjust status
    ///
    /// # Panics
    /// Panics if the fill would exceed the remaining quantity or the order
    /// is already terminal
    pub fn add_fill(&mut self, fill_quantity: Quantity, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot fill terminal order");

        let remaining = self
            .remaining_quantity
            .checked_sub(fill_quantity)
            .unwrap_or_else(|| panic!("Fill would exceed order quantity"));

        self.filled_quantity = self.filled_quantity + fill_quantity;
        self.remaining_quantity = remaining;

        self.status = if remaining.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = timestamp;

        assert!(self.check_invariant(), "Invariant violated after fill");
    }

    /// Cancel the order
    ///
    /// # Panics
    /// Panics if order is already in terminal state
    pub fn cancel(&mut self, reason: CancelReason, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot cancel terminal order");

        self.status = OrderStatus::Cancelled(reason);
        self.updated_at = timestamp;
    }

    /// Discard the unfilled remainder. Fills already made stand.
    ///
    /// # Panics
    /// Panics if order is already in terminal state
    pub fn reject_remainder(&mut self, reason: RejectReason, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot reject terminal order");

        self.status = OrderStatus::Rejected(reason);
        self.updated_at = timestamp;
    }
}
