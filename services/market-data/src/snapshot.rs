//! Stream snapshots
//!
//! The first message of every subscription: full aggregate depth of the
//! book as of the last delta the publisher applied, tagged with that
//! delta's sequence and a SHA-256 checksum of the content. The next delta
//! the subscriber sees carries `sequence + 1`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::BookKey;
use types::numeric::{Price, Quantity};

/// Aggregate quantity at one price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub quantity: Quantity,
}

/// A checksummed snapshot of the full book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub key: BookKey,
    /// Last delta sequence included in this snapshot.
    pub sequence: u64,
    /// Bid levels in descending price order (best first).
    pub bids: Vec<DepthLevel>,
    /// Ask levels in ascending price order (best first).
    pub asks: Vec<DepthLevel>,
    /// Unix nanoseconds of the last applied delta.
    pub timestamp: i64,
    /// SHA-256 checksum of levels and sequence.
    pub checksum: String,
}

impl StreamSnapshot {
    pub fn new(
        key: BookKey,
        sequence: u64,
        bids: Vec<DepthLevel>,
        asks: Vec<DepthLevel>,
        timestamp: i64,
    ) -> Self {
        let checksum = compute_checksum(&bids, &asks, sequence);
        Self {
            key,
            sequence,
            bids,
            asks,
            timestamp,
            checksum,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.as_decimal();
        let ask = self.best_ask()?.as_decimal();
        Some((bid + ask) / Decimal::TWO)
    }
}

/// Compute a SHA-256 checksum over the book levels and sequence.
fn compute_checksum(bids: &[DepthLevel], asks: &[DepthLevel], sequence: u64) -> String {
    let mut hasher = Sha256::new();

    for level in bids {
        hasher.update(level.price.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(level.quantity.to_string().as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");

    for level in asks {
        hasher.update(level.price.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(level.quantity.to_string().as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");

    hasher.update(sequence.to_le_bytes());

    format!("{:x}", hasher.finalize())
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &StreamSnapshot) -> bool {
    let expected = compute_checksum(&snapshot.bids, &snapshot.asks, snapshot.sequence);
    snapshot.checksum == expected
}

/// Whether `first_delta_sequence` continues directly from the snapshot.
pub fn validate_snapshot_delta_sync(snapshot: &StreamSnapshot, first_delta_sequence: u64) -> bool {
    first_delta_sequence == snapshot.sequence + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> StreamSnapshot {
        let bids = (1..=3)
            .map(|i| DepthLevel {
                price: Price::from_u64(100 - i),
                quantity: Quantity::from_str("1.5").unwrap(),
            })
            .collect();
        let asks = (1..=3)
            .map(|i| DepthLevel {
                price: Price::from_u64(100 + i),
                quantity: Quantity::from_u64(i),
            })
            .collect();
        StreamSnapshot::new(BookKey::new("milestone-1", "yes"), 10, bids, asks, 1708123456789000000)
    }

    #[test]
    fn test_snapshot_integrity() {
        let snap = populated();
        assert!(verify_snapshot_integrity(&snap));
        assert_eq!(snap.best_bid(), Some(Price::from_u64(99)));
        assert_eq!(snap.best_ask(), Some(Price::from_u64(101)));
        assert_eq!(snap.mid_price(), Some(Decimal::from(100)));

        let mut tampered = snap.clone();
        tampered.checksum = "corrupted".to_string();
        assert!(!verify_snapshot_integrity(&tampered));

        let mut tampered = snap;
        tampered.asks[0].quantity = Quantity::from_u64(9);
        assert!(!verify_snapshot_integrity(&tampered));
    }

    #[test]
    fn test_deterministic_checksum() {
        let s1 = populated();
        let mut s2 = populated();
        // Timestamp is not part of the checksum
        s2.timestamp += 1;
        assert_eq!(s1.checksum, s2.checksum);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snap = populated();
        let json = serde_json::to_string(&snap).unwrap();
        let deserialized: StreamSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, deserialized);
        assert!(verify_snapshot_integrity(&deserialized));
    }

    #[test]
    fn test_snapshot_delta_sync_validation() {
        let snap = populated();
        assert!(validate_snapshot_delta_sync(&snap, 11));
        assert!(!validate_snapshot_delta_sync(&snap, 10));
        assert!(!validate_snapshot_delta_sync(&snap, 12));
    }
}
