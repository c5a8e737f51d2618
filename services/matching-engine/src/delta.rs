//! Book deltas for incremental subscribers
//!
//! Every mutating intent on a book (submit, successful cancel, close)
//! produces exactly one `BookDelta` carrying that intent's event sequence.
//! Per-book delta sequences are therefore contiguous and a subscriber can
//! detect a gap by comparing consecutive sequences.
//!
//! Delta flow inside the book:
//! 1. Record the pre-intent quantity of each level the first time it is touched
//! 2. Apply the intent
//! 3. Emit one change per touched level whose aggregate actually moved,
//!    sorted by side (BUY first) then price ascending

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use types::ids::BookKey;
use types::numeric::{Price, Quantity};
use types::order::Side;

/// New aggregate quantity of one price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: Side,
    pub price: Price,
    /// New total quantity at this level (0 = level removed)
    pub quantity: Quantity,
}

impl LevelChange {
    pub fn is_removal(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// All level changes caused by one intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDelta {
    pub key: BookKey,
    /// Event sequence of the triggering intent
    pub sequence: u64,
    /// Timestamp (Unix nanos) of the triggering intent
    pub timestamp: i64,
    pub changes: Vec<LevelChange>,
}

impl BookDelta {
    /// Whether the intent left every level unchanged
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Collects touched levels while an intent is applied
#[derive(Debug, Default)]
pub struct DeltaBuilder {
    before: BTreeMap<(Side, Price), Quantity>,
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a level about to change; only the first call per level counts
    pub fn touch(&mut self, side: Side, price: Price, current: Quantity) {
        self.before.entry((side, price)).or_insert(current);
    }

    /// Emit the delta, reading each touched level's new aggregate through
    /// `level_quantity`
    pub fn finish<F>(self, key: &BookKey, sequence: u64, timestamp: i64, level_quantity: F) -> BookDelta
    where
        F: Fn(Side, Price) -> Quantity,
    {
        // BTreeMap keys are already (side, price) ordered
        let changes = self
            .before
            .into_iter()
            .filter_map(|((side, price), old)| {
                let quantity = level_quantity(side, price);
                (quantity != old).then_some(LevelChange {
                    side,
                    price,
                    quantity,
                })
            })
            .collect();

        BookDelta {
            key: key.clone(),
            sequence,
            timestamp,
            changes,
        }
    }
}
