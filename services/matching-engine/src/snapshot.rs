//! Point-in-time view of a book
//!
//! Taken by the book's task at the end of each intent and shared through a
//! `watch` channel, so readers never observe a half-applied intent.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::BookKey;
use types::numeric::{Price, Quantity};

/// Aggregated state of one price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelView {
    pub price: Price,
    pub quantity: Quantity,
    pub order_count: usize,
}

/// Full-depth book snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub key: BookKey,
    /// Last event sequence applied to the book
    pub sequence: u64,
    /// Bid levels, highest price first
    pub bids: Vec<LevelView>,
    /// Ask levels, lowest price first
    pub asks: Vec<LevelView>,
    pub best_bid: Option<Price>,
    pub best_ask: Option<Price>,
    pub timestamp: i64,
}

impl BookSnapshot {
    /// Snapshot of a freshly opened book
    pub fn empty(key: BookKey, timestamp: i64) -> Self {
        Self {
            key,
            sequence: 0,
            bids: Vec::new(),
            asks: Vec::new(),
            best_bid: None,
            best_ask: None,
            timestamp,
        }
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid?.as_decimal();
        let ask = self.best_ask?.as_decimal();
        Some((bid + ask) / Decimal::TWO)
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask?.as_decimal() - self.best_bid?.as_decimal())
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}
