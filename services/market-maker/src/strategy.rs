//! Quoting strategies
//!
//! A strategy turns a view of the external book plus the maker's
//! inventory into a two-sided quote. It never talks to the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::numeric::{Price, Quantity};

use crate::config::MarketMakerConfig;

/// The book as seen by the maker, its own quotes excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketView {
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    /// Net position: bought minus sold
    pub inventory: Decimal,
}

/// Prices to quote; `None` drops that side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub quantity: Quantity,
    /// Reference price the quote was built around
    pub reference: Decimal,
}

impl Quote {
    pub fn is_empty(&self) -> bool {
        self.bid.is_none() && self.ask.is_none()
    }
}

pub trait QuoteStrategy: Send + Sync {
    /// Price the quote is centred on
    fn reference_price(&self, view: &MarketView) -> Decimal;

    fn quote(&self, view: &MarketView) -> Quote;
}

/// Fixed-spread quoting with inventory skew.
///
/// Long inventory shifts both prices down (encourage sells), short
/// inventory shifts them up. At the inventory limit the skew is a full
/// half-spread and the side that would grow the position is dropped.
#[derive(Debug, Clone)]
pub struct SpreadStrategy {
    config: MarketMakerConfig,
}

impl SpreadStrategy {
    pub fn new(config: MarketMakerConfig) -> Self {
        Self { config }
    }

    pub fn half_spread(&self, reference: Decimal) -> Decimal {
        reference * Decimal::from(self.config.spread_bps) / Decimal::from(20_000)
    }

    pub fn inventory_skew(&self, reference: Decimal, inventory: Decimal) -> Decimal {
        if self.config.max_inventory <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let ratio = (inventory / self.config.max_inventory).clamp(Decimal::NEGATIVE_ONE, Decimal::ONE);
        ratio * self.half_spread(reference)
    }

    fn snap_down(&self, price: Decimal) -> Decimal {
        let tick = self.config.tick_size;
        if tick <= Decimal::ZERO {
            return price;
        }
        (price / tick).floor() * tick
    }

    fn snap_up(&self, price: Decimal) -> Decimal {
        let tick = self.config.tick_size;
        if tick <= Decimal::ZERO {
            return price;
        }
        (price / tick).ceil() * tick
    }
}

impl QuoteStrategy for SpreadStrategy {
    fn reference_price(&self, view: &MarketView) -> Decimal {
        match (view.best_bid, view.best_ask) {
            (Some(bid), Some(ask)) => (bid.as_decimal() + ask.as_decimal()) / Decimal::TWO,
            (Some(only), None) | (None, Some(only)) => only.as_decimal(),
            (None, None) => self.config.reference_price,
        }
    }

    fn quote(&self, view: &MarketView) -> Quote {
        let reference = self.reference_price(view);
        let half = self.half_spread(reference);
        let skew = self.inventory_skew(reference, view.inventory);

        let bid = self.snap_down(reference - half - skew);
        let mut ask = self.snap_up(reference + half - skew);
        if ask <= bid {
            // Zero spread after snapping; keep one tick between the sides
            ask = bid + self.config.tick_size.max(Decimal::new(1, 8));
        }

        let max = self.config.max_inventory;
        let bid = if view.inventory >= max {
            None
        } else {
            Price::try_new(bid)
        };
        let ask = if view.inventory <= -max {
            None
        } else {
            Price::try_new(ask)
        };

        Quote {
            bid,
            ask,
            quantity: self.config.order_size,
            reference,
        }
    }
}
