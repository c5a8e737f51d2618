//! Book listeners
//!
//! A listener observes every book's lifecycle and deltas. `on_book_opened`
//! runs inside `open_market`; everything after it comes from the per-book
//! dispatcher in event-sequence order, so calls for one book never overlap.
//! Implementations must not block: a slow listener holds back later
//! deltas for every listener of that book. Trade-sink delivery runs on a
//! dispatcher of its own and is unaffected.

use types::ids::BookKey;

use crate::delta::BookDelta;
use crate::snapshot::BookSnapshot;

pub trait BookListener: Send + Sync {
    /// A book was opened; `snapshot` is its state before any intent
    fn on_book_opened(&self, snapshot: &BookSnapshot);

    fn on_delta(&self, delta: &BookDelta);

    /// No further deltas will follow `sequence`
    fn on_book_closed(&self, key: &BookKey, sequence: u64);
}
