//! Trade execution types

use crate::ids::{BookKey, OrderId, OwnerId, TradeId};
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single execution between a resting maker and an incoming taker
///
/// Always priced at the maker's resting price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub sequence: u64, // Per-book monotonic sequence
    pub key: BookKey,

    // Order references
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,

    // Owner references
    pub buy_owner_id: OwnerId,
    pub sell_owner_id: OwnerId,

    /// Side of the taker
    pub aggressor_side: Side,
    pub price: Price,
    pub quantity: Quantity,

    pub executed_at: i64, // Unix nanos
}

/// One side of a match, as seen by the trade builder
#[derive(Debug, Clone, Copy)]
pub struct Participant {
    pub order_id: OrderId,
    pub owner_id: OwnerId,
}

impl Trade {
    /// Create a trade between a taker on `aggressor_side` and a maker on
    /// the opposite side
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sequence: u64,
        key: BookKey,
        aggressor_side: Side,
        taker: Participant,
        maker: Participant,
        price: Price,
        quantity: Quantity,
        executed_at: i64,
    ) -> Self {
        let (buyer, seller) = match aggressor_side {
            Side::BUY => (taker, maker),
            Side::SELL => (maker, taker),
        };

        Self {
            trade_id: TradeId::new(),
            sequence,
            key,
            buy_order_id: buyer.order_id,
            sell_order_id: seller.order_id,
            maker_order_id: maker.order_id,
            taker_order_id: taker.order_id,
            buy_owner_id: buyer.owner_id,
            sell_owner_id: seller.owner_id,
            aggressor_side,
            price,
            quantity,
            executed_at,
        }
    }

    /// Calculate trade value (price × quantity)
    pub fn trade_value(&self) -> Decimal {
        self.quantity.as_decimal() * self.price.as_decimal()
    }

    pub fn maker_side(&self) -> Side {
        self.aggressor_side.opposite()
    }

    /// Whether `owner` was on either side of this trade
    pub fn involves(&self, owner: OwnerId) -> bool {
        self.buy_owner_id == owner || self.sell_owner_id == owner
    }
}
