//! Market maker configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::numeric::Quantity;

/// Configuration for one market maker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketMakerConfig {
    /// Full quoted spread in basis points of the reference price
    pub spread_bps: u32,
    /// Size of each quote
    pub order_size: Quantity,
    /// Maximum absolute net inventory; the side that would grow it further
    /// is dropped once reached
    pub max_inventory: Decimal,
    /// Reference price used while the book is empty
    pub reference_price: Decimal,
    /// Quote price increment
    pub tick_size: Decimal,
    /// Periodic requote interval
    pub requote_interval_ms: u64,
    /// Reference move, in basis points, that triggers an immediate requote
    pub requote_threshold_bps: u32,
}

impl Default for MarketMakerConfig {
    fn default() -> Self {
        Self {
            spread_bps: 400,
            order_size: Quantity::from_u64(10),
            max_inventory: Decimal::from(100),
            reference_price: Decimal::new(50, 2),
            tick_size: Decimal::new(1, 2),
            requote_interval_ms: 250,
            requote_threshold_bps: 50,
        }
    }
}
