//! Observability for the stream publisher
//!
//! Counters for fan-out, subscriptions and evictions, plus a rolling
//! latency window over per-delta fan-out time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the stream publisher.
pub struct PublisherMetrics {
    // Books
    pub books_tracked: AtomicU64,
    pub books_closed: AtomicU64,

    // Deltas
    pub deltas_received: AtomicU64,
    pub deltas_rejected: AtomicU64,
    pub messages_sent: AtomicU64,
    pub fanout_ns: Mutex<LatencyTracker>,

    // Subscribers
    pub subscriptions_opened: AtomicU64,
    pub subscriptions_unknown: AtomicU64,
    pub subscribers_active: AtomicU64,
    pub subscribers_evicted: AtomicU64,
    pub subscribers_disconnected: AtomicU64,
}

impl PublisherMetrics {
    pub fn new() -> Self {
        Self {
            books_tracked: AtomicU64::new(0),
            books_closed: AtomicU64::new(0),
            deltas_received: AtomicU64::new(0),
            deltas_rejected: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            fanout_ns: Mutex::new(LatencyTracker::new(1000)),
            subscriptions_opened: AtomicU64::new(0),
            subscriptions_unknown: AtomicU64::new(0),
            subscribers_active: AtomicU64::new(0),
            subscribers_evicted: AtomicU64::new(0),
            subscribers_disconnected: AtomicU64::new(0),
        }
    }

    /// Record one delta fanned out to `sent` subscribers.
    pub fn record_fanout(&self, sent: u64, latency_ns: u64) {
        self.deltas_received.fetch_add(1, Ordering::Relaxed);
        self.messages_sent.fetch_add(sent, Ordering::Relaxed);
        if let Ok(mut tracker) = self.fanout_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_rejected_delta(&self) {
        self.deltas_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_book_opened(&self) {
        self.books_tracked.fetch_add(1, Ordering::Relaxed);
    }

    /// A book closed, taking `subscribers` with it.
    pub fn record_book_closed(&self, subscribers: u64) {
        self.books_closed.fetch_add(1, Ordering::Relaxed);
        saturating_sub(&self.books_tracked, 1);
        saturating_sub(&self.subscribers_active, subscribers);
    }

    pub fn record_subscribe(&self) {
        self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
        self.subscribers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_subscribe(&self) {
        self.subscriptions_unknown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
        saturating_sub(&self.subscribers_active, 1);
    }

    pub fn record_disconnect(&self) {
        self.subscribers_disconnected.fetch_add(1, Ordering::Relaxed);
        saturating_sub(&self.subscribers_active, 1);
    }

    /// p99 fan-out latency over the rolling window.
    pub fn fanout_p99_ns(&self) -> Option<u64> {
        self.fanout_ns.lock().ok().and_then(|tracker| tracker.percentile(99))
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("books_tracked".to_string(), self.books_tracked.load(Ordering::Relaxed));
        m.insert("books_closed".to_string(), self.books_closed.load(Ordering::Relaxed));
        m.insert("deltas_received".to_string(), self.deltas_received.load(Ordering::Relaxed));
        m.insert("deltas_rejected".to_string(), self.deltas_rejected.load(Ordering::Relaxed));
        m.insert("messages_sent".to_string(), self.messages_sent.load(Ordering::Relaxed));
        m.insert("subscriptions_opened".to_string(), self.subscriptions_opened.load(Ordering::Relaxed));
        m.insert("subscriptions_unknown".to_string(), self.subscriptions_unknown.load(Ordering::Relaxed));
        m.insert("subscribers_active".to_string(), self.subscribers_active.load(Ordering::Relaxed));
        m.insert("subscribers_evicted".to_string(), self.subscribers_evicted.load(Ordering::Relaxed));
        m.insert("subscribers_disconnected".to_string(), self.subscribers_disconnected.load(Ordering::Relaxed));
        if let Some(p99) = self.fanout_p99_ns() {
            m.insert("fanout_p99_ns".to_string(), p99);
        }
        m
    }
}

impl Default for PublisherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_sub(counter: &AtomicU64, n: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
