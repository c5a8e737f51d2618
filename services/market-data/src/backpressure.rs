//! Backpressure and flow control for book streams
//!
//! Every subscriber owns a bounded outbound queue. The publisher only ever
//! calls `try_send`, so a subscriber that stops reading can never stall the
//! book dispatcher (and through it, matching). A full queue evicts the
//! subscriber: what was already queued is still delivered, then its stream
//! reports `Lagged` and ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::subscription::StreamMessage;

/// Configuration for subscriber queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    /// Maximum queued messages per subscriber.
    pub queue_capacity: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
        }
    }
}

/// Unique subscriber identifier (UUID v7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Action to take when a message cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureAction {
    /// Queue full: the subscriber is too slow and must be dropped.
    Evict,
    /// The subscriber dropped its stream.
    Disconnected,
}

/// Publisher side of one subscriber's queue.
#[derive(Debug)]
pub struct SubscriberQueue {
    id: SubscriberId,
    sender: mpsc::Sender<StreamMessage>,
    evicted: Arc<AtomicBool>,
    delivered: AtomicU64,
}

impl SubscriberQueue {
    /// Create a queue and the receiving half handed to the subscription.
    pub fn channel(config: &BackpressureConfig) -> (Self, mpsc::Receiver<StreamMessage>, Arc<AtomicBool>) {
        // tokio panics on a zero-capacity channel
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let evicted = Arc::new(AtomicBool::new(false));
        let queue = Self {
            id: SubscriberId::new(),
            sender,
            evicted: evicted.clone(),
            delivered: AtomicU64::new(0),
        };
        (queue, receiver, evicted)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Queue a message without waiting.
    pub fn offer(&self, message: StreamMessage) -> Result<(), BackpressureAction> {
        match self.sender.try_send(message) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(BackpressureAction::Evict),
            Err(TrySendError::Closed(_)) => Err(BackpressureAction::Disconnected),
        }
    }

    /// Mark the subscriber as evicted. Must happen before the queue is
    /// dropped so the stream sees the flag once it drains.
    pub fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Messages queued for this subscriber so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages waiting to be read.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matching_engine::BookDelta;
    use types::ids::BookKey;

    fn message(sequence: u64) -> StreamMessage {
        StreamMessage::Delta(BookDelta {
            key: BookKey::new("milestone-1", "yes"),
            sequence,
            timestamp: 1708123456789000000,
            changes: Vec::new(),
        })
    }

    #[test]
    fn test_offer_until_full() {
        let config = BackpressureConfig { queue_capacity: 2 };
        let (queue, _receiver, _evicted) = SubscriberQueue::channel(&config);

        assert_eq!(queue.offer(message(1)), Ok(()));
        assert_eq!(queue.offer(message(2)), Ok(()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.offer(message(3)), Err(BackpressureAction::Evict));
        assert_eq!(queue.delivered(), 2);
    }

    #[test]
    fn test_dropped_receiver_reports_disconnect() {
        let (queue, receiver, _evicted) = SubscriberQueue::channel(&BackpressureConfig::default());
        drop(receiver);
        assert_eq!(queue.offer(message(1)), Err(BackpressureAction::Disconnected));
    }

    #[test]
    fn test_evict_flag_shared_with_subscription() {
        let (queue, _receiver, evicted) = SubscriberQueue::channel(&BackpressureConfig::default());
        assert!(!evicted.load(Ordering::Acquire));
        queue.evict();
        assert!(queue.is_evicted());
        assert!(evicted.load(Ordering::Acquire));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let config = BackpressureConfig { queue_capacity: 0 };
        let (queue, _receiver, _evicted) = SubscriberQueue::channel(&config);
        assert!(queue.is_empty());
        assert_eq!(queue.offer(message(1)), Ok(()));
        assert_eq!(queue.offer(message(2)), Err(BackpressureAction::Evict));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: BackpressureConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.queue_capacity, 1000);
    }
}
