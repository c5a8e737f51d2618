//! Engine metrics
//!
//! Lock-free counters shared by the engine front, every book task and every
//! dispatcher.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Intake
    pub orders_submitted: AtomicU64,
    pub orders_invalid: AtomicU64,
    pub orders_rested: AtomicU64,
    pub orders_rejected: AtomicU64,

    // Matching
    pub trades_executed: AtomicU64,

    // Cancels
    pub cancels_accepted: AtomicU64,
    pub cancels_not_found: AtomicU64,

    // Dispatch
    pub deltas_published: AtomicU64,
    pub delivery_failures: AtomicU64,
    /// Records queued for the sink and not yet delivered or failed
    pub records_pending: AtomicU64,

    // Books
    /// Registered books still accepting intents
    pub markets_open: AtomicU64,
    /// Books whose task died on an invariant violation (cumulative)
    pub books_halted: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn decr(counter: &AtomicU64) {
        // Saturate at zero
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Sink records still in flight across all books
    pub fn records_pending(&self) -> u64 {
        self.records_pending.load(Ordering::Relaxed)
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("orders_submitted".to_string(), self.orders_submitted.load(Ordering::Relaxed));
        m.insert("orders_invalid".to_string(), self.orders_invalid.load(Ordering::Relaxed));
        m.insert("orders_rested".to_string(), self.orders_rested.load(Ordering::Relaxed));
        m.insert("orders_rejected".to_string(), self.orders_rejected.load(Ordering::Relaxed));
        m.insert("trades_executed".to_string(), self.trades_executed.load(Ordering::Relaxed));
        m.insert("cancels_accepted".to_string(), self.cancels_accepted.load(Ordering::Relaxed));
        m.insert("cancels_not_found".to_string(), self.cancels_not_found.load(Ordering::Relaxed));
        m.insert("deltas_published".to_string(), self.deltas_published.load(Ordering::Relaxed));
        m.insert("delivery_failures".to_string(), self.delivery_failures.load(Ordering::Relaxed));
        m.insert("records_pending".to_string(), self.records_pending.load(Ordering::Relaxed));
        m.insert("markets_open".to_string(), self.markets_open.load(Ordering::Relaxed));
        m.insert("books_halted".to_string(), self.books_halted.load(Ordering::Relaxed));
        m
    }
}
