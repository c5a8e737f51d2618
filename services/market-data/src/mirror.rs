//! Client-side book mirror
//!
//! Rebuilds aggregate depth for one book from a snapshot followed by
//! deltas. Every delta must carry the sequence right after the last one
//! applied; anything else is reported as a gap and the mirror is left
//! untouched, so the caller can resubscribe and start over.
//!
//! Levels are kept in `BTreeMap`s for sorted, deterministic iteration.

use std::collections::BTreeMap;

use matching_engine::{BookDelta, BookSnapshot};
use rust_decimal::Decimal;
use thiserror::Error;
use types::ids::BookKey;
use types::numeric::{Price, Quantity};
use types::order::Side;

use crate::snapshot::{verify_snapshot_integrity, DepthLevel, StreamSnapshot};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Sequence gap on {key}: expected {expected}, received {received}")]
    SequenceGap {
        key: BookKey,
        expected: u64,
        received: u64,
    },

    #[error("Delta for {received} applied to mirror of {expected}")]
    WrongBook { expected: BookKey, received: BookKey },

    #[error("Snapshot checksum mismatch for {key} at sequence {sequence}")]
    ChecksumMismatch { key: BookKey, sequence: u64 },
}

/// Aggregate depth of one book, kept in step with the engine
#[derive(Debug, Clone)]
pub struct BookMirror {
    key: BookKey,
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    sequence: u64,
    timestamp: i64,
}

impl BookMirror {
    /// Empty mirror, expecting sequence 1 next
    pub fn new(key: BookKey) -> Self {
        Self {
            key,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Seed from the engine's own snapshot
    pub fn from_book_snapshot(snapshot: &BookSnapshot) -> Self {
        Self {
            key: snapshot.key.clone(),
            bids: snapshot.bids.iter().map(|l| (l.price, l.quantity)).collect(),
            asks: snapshot.asks.iter().map(|l| (l.price, l.quantity)).collect(),
            sequence: snapshot.sequence,
            timestamp: snapshot.timestamp,
        }
    }

    /// Seed from a stream snapshot after checking its checksum
    pub fn from_stream_snapshot(snapshot: &StreamSnapshot) -> Result<Self, MirrorError> {
        if !verify_snapshot_integrity(snapshot) {
            return Err(MirrorError::ChecksumMismatch {
                key: snapshot.key.clone(),
                sequence: snapshot.sequence,
            });
        }

        Ok(Self {
            key: snapshot.key.clone(),
            bids: snapshot.bids.iter().map(|l| (l.price, l.quantity)).collect(),
            asks: snapshot.asks.iter().map(|l| (l.price, l.quantity)).collect(),
            sequence: snapshot.sequence,
            timestamp: snapshot.timestamp,
        })
    }

    /// Apply the next delta. On error nothing is changed.
    pub fn apply(&mut self, delta: &BookDelta) -> Result<(), MirrorError> {
        if delta.key != self.key {
            return Err(MirrorError::WrongBook {
                expected: self.key.clone(),
                received: delta.key.clone(),
            });
        }
        let expected = self.sequence + 1;
        if delta.sequence != expected {
            return Err(MirrorError::SequenceGap {
                key: self.key.clone(),
                expected,
                received: delta.sequence,
            });
        }

        for change in &delta.changes {
            let levels = match change.side {
                Side::BUY => &mut self.bids,
                Side::SELL => &mut self.asks,
            };
            if change.is_removal() {
                levels.remove(&change.price);
            } else {
                levels.insert(change.price, change.quantity);
            }
        }

        self.sequence = delta.sequence;
        self.timestamp = delta.timestamp;
        Ok(())
    }

    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// Sequence of the last applied delta
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.iter().next_back().map(|(p, q)| (*p, *q))
    }

    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.iter().next().map(|(p, q)| (*p, *q))
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some((bid.as_decimal() + ask.as_decimal()) / Decimal::TWO)
    }

    pub fn spread(&self) -> Option<Decimal> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some(ask.as_decimal() - bid.as_decimal())
    }

    pub fn level_quantity(&self, side: Side, price: Price) -> Quantity {
        let levels = match side {
            Side::BUY => &self.bids,
            Side::SELL => &self.asks,
        };
        levels.get(&price).copied().unwrap_or_else(Quantity::zero)
    }

    /// Bid levels, highest price first
    pub fn bid_levels(&self) -> Vec<DepthLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(price, quantity)| DepthLevel {
                price: *price,
                quantity: *quantity,
            })
            .collect()
    }

    /// Ask levels, lowest price first
    pub fn ask_levels(&self) -> Vec<DepthLevel> {
        self.asks
            .iter()
            .map(|(price, quantity)| DepthLevel {
                price: *price,
                quantity: *quantity,
            })
            .collect()
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Checksummed snapshot of the current state
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot::new(
            self.key.clone(),
            self.sequence,
            self.bid_levels(),
            self.ask_levels(),
            self.timestamp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matching_engine::LevelChange;

    const TS: i64 = 1708123456789000000;

    fn key() -> BookKey {
        BookKey::new("milestone-1", "yes")
    }

    fn change(side: Side, price: u64, quantity: u64) -> LevelChange {
        LevelChange {
            side,
            price: Price::from_u64(price),
            quantity: Quantity::from_u64(quantity),
        }
    }

    fn delta(sequence: u64, changes: Vec<LevelChange>) -> BookDelta {
        BookDelta {
            key: key(),
            sequence,
            timestamp: TS + sequence as i64,
            changes,
        }
    }

    #[test]
    fn test_apply_builds_both_sides() {
        let mut mirror = BookMirror::new(key());
        mirror
            .apply(&delta(1, vec![change(Side::BUY, 99, 10), change(Side::BUY, 98, 5)]))
            .unwrap();
        mirror.apply(&delta(2, vec![change(Side::SELL, 101, 7)])).unwrap();

        assert_eq!(mirror.sequence(), 2);
        assert_eq!(mirror.best_bid(), Some((Price::from_u64(99), Quantity::from_u64(10))));
        assert_eq!(mirror.best_ask(), Some((Price::from_u64(101), Quantity::from_u64(7))));
        assert_eq!(mirror.mid_price(), Some(Decimal::from(100)));
        assert_eq!(mirror.spread(), Some(Decimal::from(2)));
        assert_eq!(mirror.bid_levels()[0].price, Price::from_u64(99));
        assert_eq!(mirror.bid_depth(), 2);
    }

    #[test]
    fn test_zero_quantity_removes_level() {
        let mut mirror = BookMirror::new(key());
        mirror.apply(&delta(1, vec![change(Side::SELL, 101, 7)])).unwrap();
        mirror.apply(&delta(2, vec![change(Side::SELL, 101, 0)])).unwrap();

        assert!(mirror.is_empty());
        assert_eq!(mirror.level_quantity(Side::SELL, Price::from_u64(101)), Quantity::zero());
    }

    #[test]
    fn test_sequence_gap_rejected_without_change() {
        let mut mirror = BookMirror::new(key());
        mirror.apply(&delta(1, vec![change(Side::BUY, 99, 10)])).unwrap();

        let err = mirror.apply(&delta(3, vec![change(Side::BUY, 99, 0)])).unwrap_err();
        assert_eq!(
            err,
            MirrorError::SequenceGap {
                key: key(),
                expected: 2,
                received: 3,
            }
        );
        assert_eq!(mirror.sequence(), 1);
        assert_eq!(mirror.level_quantity(Side::BUY, Price::from_u64(99)), Quantity::from_u64(10));

        // Replayed delta is a gap too
        assert!(mirror.apply(&delta(1, vec![])).is_err());
    }

    #[test]
    fn test_delta_for_other_book_rejected() {
        let mut mirror = BookMirror::new(BookKey::new("milestone-1", "no"));
        let err = mirror.apply(&delta(1, vec![])).unwrap_err();
        assert!(matches!(err, MirrorError::WrongBook { .. }));
    }

    #[test]
    fn test_resume_from_stream_snapshot() {
        let mut source = BookMirror::new(key());
        source
            .apply(&delta(1, vec![change(Side::BUY, 99, 10), change(Side::SELL, 102, 3)]))
            .unwrap();

        let mut replica = BookMirror::from_stream_snapshot(&source.snapshot()).unwrap();
        assert_eq!(replica.sequence(), 1);
        replica.apply(&delta(2, vec![change(Side::SELL, 102, 1)])).unwrap();
        assert_eq!(replica.best_ask(), Some((Price::from_u64(102), Quantity::from_u64(1))));
    }

    #[test]
    fn test_tampered_snapshot_rejected() {
        let mut snapshot = BookMirror::new(key()).snapshot();
        snapshot.sequence = 9;
        assert!(matches!(
            BookMirror::from_stream_snapshot(&snapshot),
            Err(MirrorError::ChecksumMismatch { sequence: 9, .. })
        ));
    }
}
