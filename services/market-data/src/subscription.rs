//! Subscriber side of a book stream
//!
//! A `Subscription` yields the snapshot first, then every delta the
//! publisher queued for it. If the publisher evicted it, the stream
//! drains the queue, yields one `StreamError::Lagged` and ends. When the
//! book closes the stream simply ends.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use matching_engine::BookDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use types::ids::BookKey;

use crate::backpressure::SubscriberId;
use crate::snapshot::StreamSnapshot;

/// One item of a book stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StreamMessage {
    #[serde(rename = "snapshot")]
    Snapshot(StreamSnapshot),
    #[serde(rename = "delta")]
    Delta(BookDelta),
}

impl StreamMessage {
    pub fn sequence(&self) -> u64 {
        match self {
            StreamMessage::Snapshot(snapshot) => snapshot.sequence,
            StreamMessage::Delta(delta) => delta.sequence,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Unknown market: {key}")]
    UnknownMarket { key: BookKey },

    #[error("Subscriber to {key} fell behind and was dropped")]
    Lagged { key: BookKey },
}

/// Live stream of one book's snapshot and deltas.
#[derive(Debug)]
pub struct Subscription {
    key: BookKey,
    id: Option<SubscriberId>,
    snapshot: Option<StreamSnapshot>,
    receiver: Option<mpsc::Receiver<StreamMessage>>,
    evicted: Arc<AtomicBool>,
    terminal: Option<StreamError>,
}

impl Subscription {
    pub(crate) fn new(
        key: BookKey,
        id: SubscriberId,
        snapshot: StreamSnapshot,
        receiver: mpsc::Receiver<StreamMessage>,
        evicted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            key,
            id: Some(id),
            snapshot: Some(snapshot),
            receiver: Some(receiver),
            evicted,
            terminal: None,
        }
    }

    /// A stream that yields `UnknownMarket` once and ends
    pub(crate) fn unknown(key: BookKey) -> Self {
        Self {
            terminal: Some(StreamError::UnknownMarket { key: key.clone() }),
            key,
            id: None,
            snapshot: None,
            receiver: None,
            evicted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// `None` when the market was unknown at subscribe time
    pub fn id(&self) -> Option<SubscriberId> {
        self.id
    }

    /// Whether the publisher has dropped this subscriber for lagging
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }
}

impl Stream for Subscription {
    type Item = Result<StreamMessage, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(snapshot) = this.snapshot.take() {
            return Poll::Ready(Some(Ok(StreamMessage::Snapshot(snapshot))));
        }

        if let Some(receiver) = this.receiver.as_mut() {
            match receiver.poll_recv(cx) {
                Poll::Ready(Some(message)) => return Poll::Ready(Some(Ok(message))),
                Poll::Ready(None) => {
                    this.receiver = None;
                    if this.evicted.load(Ordering::Acquire) {
                        this.terminal = Some(StreamError::Lagged {
                            key: this.key.clone(),
                        });
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        Poll::Ready(this.terminal.take().map(Err))
    }
}
