//! Stream publisher
//!
//! Listens to every book through the engine's dispatcher and fans each
//! delta out to that book's subscribers. Per book it keeps a mirror of
//! the aggregate depth so a late subscriber can start from a snapshot.
//!
//! Subscribing and fan-out both run under the book's map entry lock: the
//! snapshot a new subscriber receives is exactly the state before the
//! next delta it is sent, so nothing is skipped or seen twice.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use matching_engine::{BookDelta, BookListener, BookSnapshot};
use tracing::{debug, info, warn};
use types::ids::BookKey;

use crate::backpressure::{BackpressureAction, BackpressureConfig, SubscriberQueue};
use crate::metrics::PublisherMetrics;
use crate::mirror::BookMirror;
use crate::snapshot::StreamSnapshot;
use crate::subscription::{StreamMessage, Subscription};

/// Per-book publishing state
struct BookChannel {
    mirror: BookMirror,
    subscribers: Vec<SubscriberQueue>,
}

pub struct StreamPublisher {
    books: DashMap<BookKey, BookChannel>,
    config: BackpressureConfig,
    metrics: Arc<PublisherMetrics>,
}

impl StreamPublisher {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            books: DashMap::new(),
            config,
            metrics: Arc::new(PublisherMetrics::new()),
        }
    }

    /// Subscribe to one book: snapshot first, then every later delta.
    ///
    /// An unknown (or already closed) book yields a single
    /// `StreamError::UnknownMarket`.
    pub fn subscribe(&self, key: &BookKey) -> Subscription {
        let Some(mut channel) = self.books.get_mut(key) else {
            self.metrics.record_unknown_subscribe();
            debug!(key = %key, "Subscribe to unknown market");
            return Subscription::unknown(key.clone());
        };

        let snapshot = channel.mirror.snapshot();
        let (queue, receiver, evicted) = SubscriberQueue::channel(&self.config);
        let id = queue.id();
        channel.subscribers.push(queue);
        self.metrics.record_subscribe();

        debug!(
            key = %key,
            subscriber = %id,
            sequence = snapshot.sequence,
            subscribers = channel.subscribers.len(),
            "Subscriber registered"
        );

        Subscription::new(key.clone(), id, snapshot, receiver, evicted)
    }

    /// Current mirrored state of a book, if it is open
    pub fn snapshot(&self, key: &BookKey) -> Option<StreamSnapshot> {
        self.books.get(key).map(|channel| channel.mirror.snapshot())
    }

    pub fn subscriber_count(&self, key: &BookKey) -> usize {
        self.books
            .get(key)
            .map(|channel| channel.subscribers.len())
            .unwrap_or(0)
    }

    /// Keys of every book currently published, sorted
    pub fn markets(&self) -> Vec<BookKey> {
        let mut keys: Vec<BookKey> = self.books.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn metrics(&self) -> &PublisherMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }
}

impl Default for StreamPublisher {
    fn default() -> Self {
        Self::new(BackpressureConfig::default())
    }
}

impl BookListener for StreamPublisher {
    fn on_book_opened(&self, snapshot: &BookSnapshot) {
        let channel = BookChannel {
            mirror: BookMirror::from_book_snapshot(snapshot),
            subscribers: Vec::new(),
        };
        if self.books.insert(snapshot.key.clone(), channel).is_some() {
            warn!(key = %snapshot.key, "Book reopened, previous subscribers dropped");
        }
        self.metrics.record_book_opened();
        info!(key = %snapshot.key, sequence = snapshot.sequence, "Publishing book");
    }

    fn on_delta(&self, delta: &BookDelta) {
        let started = Instant::now();
        let Some(mut channel) = self.books.get_mut(&delta.key) else {
            warn!(key = %delta.key, sequence = delta.sequence, "Delta for unpublished book");
            self.metrics.record_rejected_delta();
            return;
        };

        if let Err(err) = channel.mirror.apply(delta) {
            warn!(key = %delta.key, error = %err, "Delta rejected by mirror");
            self.metrics.record_rejected_delta();
            return;
        }

        let message = StreamMessage::Delta(delta.clone());
        let mut sent = 0u64;
        let metrics = &self.metrics;
        channel.subscribers.retain(|queue| match queue.offer(message.clone()) {
            Ok(()) => {
                sent += 1;
                true
            }
            Err(BackpressureAction::Evict) => {
                // Flag before the sender drops with the queue
                queue.evict();
                metrics.record_eviction();
                warn!(
                    key = %delta.key,
                    subscriber = %queue.id(),
                    sequence = delta.sequence,
                    delivered = queue.delivered(),
                    "Backpressure: evicting lagging subscriber"
                );
                false
            }
            Err(BackpressureAction::Disconnected) => {
                metrics.record_disconnect();
                debug!(key = %delta.key, subscriber = %queue.id(), "Subscriber went away");
                false
            }
        });

        metrics.record_fanout(sent, started.elapsed().as_nanos() as u64);
    }

    fn on_book_closed(&self, key: &BookKey, sequence: u64) {
        // Dropping the queues ends every stream after what was queued
        if let Some((_, channel)) = self.books.remove(key) {
            let subscribers = channel.subscribers.len() as u64;
            self.metrics.record_book_closed(subscribers);
            info!(key = %key, sequence, subscribers, "Book closed, streams ended");
        }
    }
}
