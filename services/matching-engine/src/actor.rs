//! Per-book tasks
//!
//! Every open book runs three tasks:
//! - the book task owns the `OrderBook`, takes intents from a bounded
//!   command queue one at a time, publishes the post-intent snapshot and
//!   queues outbound work;
//! - the stream dispatcher drains deltas and close notices in order and
//!   hands them to the listeners;
//! - the sink dispatcher drains trades and retired orders in order and
//!   hands them to the trade sink.
//!
//! The two dispatchers never wait on each other, so a slow sink delays
//! neither matching nor subscribers. The sink queue is bounded: a record
//! that finds it full is reported as a `DeliveryFailure` instead.
//!
//! A panic inside the book task halts that book only. Its command receiver
//! is dropped, which callers observe as `EngineError::BookHalted`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::ids::{BookKey, OrderId, OwnerId};
use types::order::{Order, OrderStatus, PlaceOrder};
use types::time::now_nanos;

use crate::book::{CancelOutcome, OrderBook, SubmitOutcome};
use crate::engine::OrderAck;
use crate::events::BookEvent;
use crate::listener::BookListener;
use crate::metrics::EngineMetrics;
use crate::sink::{DeliveryFailure, SinkError, SinkRecord, TradeSink};
use crate::snapshot::BookSnapshot;

/// Intent sent to a book task, each with its reply channel
#[derive(Debug)]
pub(crate) enum BookCommand {
    Submit {
        order_id: OrderId,
        request: PlaceOrder,
        reply: oneshot::Sender<OrderAck>,
    },
    Cancel {
        order_id: OrderId,
        owner_id: OwnerId,
        reply: oneshot::Sender<CancelOutcome>,
    },
    Close {
        reply: oneshot::Sender<Vec<Order>>,
    },
    /// Cross the book behind the matcher's back and run the invariant check
    #[cfg(test)]
    Corrupt,
}

/// Single serialization domain for one book
pub(crate) struct BookTask {
    pub(crate) book: OrderBook,
    pub(crate) commands: mpsc::Receiver<BookCommand>,
    pub(crate) snapshots: watch::Sender<Arc<BookSnapshot>>,
    pub(crate) stream: mpsc::UnboundedSender<BookEvent>,
    pub(crate) records: mpsc::Sender<SinkRecord>,
    pub(crate) failures: FailureReporter,
    pub(crate) index: Arc<DashMap<OrderId, BookKey>>,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl BookTask {
    pub(crate) async fn run(mut self) {
        info!(key = %self.book.key(), "Book task started");

        while let Some(command) = self.commands.recv().await {
            match command {
                BookCommand::Submit {
                    order_id,
                    request,
                    reply,
                } => {
                    let ack = self.handle_submit(order_id, request);
                    let _ = reply.send(ack);
                }
                BookCommand::Cancel {
                    order_id,
                    owner_id,
                    reply,
                } => {
                    let outcome = self.handle_cancel(order_id, owner_id);
                    let _ = reply.send(outcome);
                }
                BookCommand::Close { reply } => {
                    let cancelled = self.handle_close();
                    let _ = reply.send(cancelled);
                    break;
                }
                #[cfg(test)]
                BookCommand::Corrupt => {
                    self.book.corrupt_crossed();
                    self.book.assert_uncrossed();
                }
            }
        }

        info!(key = %self.book.key(), sequence = self.book.sequence(), "Book task stopped");
    }

    fn handle_submit(&mut self, order_id: OrderId, request: PlaceOrder) -> OrderAck {
        let timestamp = now_nanos();
        let SubmitOutcome {
            order,
            trades,
            delta,
            retired,
        } = self.book.submit(order_id, request, timestamp);

        // Index before acknowledging so a cancel issued after the ack routes
        if order.is_resting() {
            self.index.insert(order.order_id, self.book.key().clone());
            EngineMetrics::incr(&self.metrics.orders_rested);
        }
        for maker in &retired {
            self.index.remove(&maker.order_id);
        }
        if matches!(order.status, OrderStatus::Rejected(_)) {
            EngineMetrics::incr(&self.metrics.orders_rejected);
        }
        EngineMetrics::add(&self.metrics.trades_executed, trades.len() as u64);

        self.publish_snapshot(timestamp);
        self.publish(BookEvent::Delta(delta));
        for trade in &trades {
            self.record(SinkRecord::Trade(trade.clone()));
        }
        for maker in retired {
            self.record(SinkRecord::Order(maker));
        }
        if order.status.is_terminal() {
            self.record(SinkRecord::Order(order.clone()));
        }

        OrderAck::new(&order, trades)
    }

    fn handle_cancel(&mut self, order_id: OrderId, owner_id: OwnerId) -> CancelOutcome {
        let timestamp = now_nanos();
        let mut outcome = self.book.cancel(&order_id, owner_id, timestamp);
        if !outcome.removed {
            return outcome;
        }

        self.index.remove(&order_id);
        self.publish_snapshot(timestamp);
        if let Some(delta) = outcome.delta.take() {
            self.publish(BookEvent::Delta(delta));
        }
        if let Some(order) = &outcome.order {
            self.record(SinkRecord::Order(order.clone()));
        }
        outcome
    }

    fn handle_close(&mut self) -> Vec<Order> {
        let timestamp = now_nanos();
        let (cancelled, delta) = self.book.close(timestamp);

        for order in &cancelled {
            self.index.remove(&order.order_id);
        }
        self.publish_snapshot(timestamp);

        let sequence = delta.sequence;
        self.publish(BookEvent::Delta(delta));
        for order in &cancelled {
            self.record(SinkRecord::Order(order.clone()));
        }
        self.publish(BookEvent::Closed {
            key: self.book.key().clone(),
            sequence,
        });

        cancelled
    }

    fn publish_snapshot(&self, timestamp: i64) {
        self.snapshots
            .send_replace(Arc::new(self.book.snapshot(timestamp)));
    }

    fn publish(&self, event: BookEvent) {
        if let Err(err) = self.stream.send(event) {
            warn!(key = %self.book.key(), event = err.0.kind(), "Stream dispatcher gone, event dropped");
        }
    }

    fn record(&self, record: SinkRecord) {
        EngineMetrics::incr(&self.metrics.records_pending);
        if let Err(err) = self.records.try_send(record) {
            EngineMetrics::decr(&self.metrics.records_pending);
            let (record, reason) = match err {
                TrySendError::Full(record) => (record, "sink queue full"),
                TrySendError::Closed(record) => (record, "sink dispatcher stopped"),
            };
            self.failures.report(record, SinkError::Unavailable(reason.to_string()));
        }
    }
}

/// Hands undeliverable records to the engine's failure channel
#[derive(Clone)]
pub(crate) struct FailureReporter {
    pub(crate) key: BookKey,
    pub(crate) failures: mpsc::UnboundedSender<DeliveryFailure>,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl FailureReporter {
    fn report(&self, record: SinkRecord, error: SinkError) {
        warn!(key = %self.key, record = record.kind(), error = %error, "Trade sink delivery failed");
        EngineMetrics::incr(&self.metrics.delivery_failures);

        let failure = DeliveryFailure {
            key: self.key.clone(),
            record,
            error,
        };
        // Nobody listening is fine; the failure was logged and counted
        let _ = self.failures.send(failure);
    }
}

/// Delivers one book's deltas and close notice to the listeners, in order
pub(crate) struct StreamDispatcher {
    pub(crate) key: BookKey,
    pub(crate) events: mpsc::UnboundedReceiver<BookEvent>,
    pub(crate) listeners: Arc<Vec<Arc<dyn BookListener>>>,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl StreamDispatcher {
    pub(crate) async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                BookEvent::Delta(delta) => {
                    for listener in self.listeners.iter() {
                        listener.on_delta(&delta);
                    }
                    EngineMetrics::incr(&self.metrics.deltas_published);
                }
                BookEvent::Closed { key, sequence } => {
                    for listener in self.listeners.iter() {
                        listener.on_book_closed(&key, sequence);
                    }
                }
            }
        }

        debug!(key = %self.key, "Stream dispatcher drained");
    }
}

/// Delivers one book's trades and retired orders to the sink, in order
pub(crate) struct SinkDispatcher {
    pub(crate) key: BookKey,
    pub(crate) records: mpsc::Receiver<SinkRecord>,
    pub(crate) sink: Arc<dyn TradeSink>,
    pub(crate) failures: FailureReporter,
    pub(crate) metrics: Arc<EngineMetrics>,
}

impl SinkDispatcher {
    pub(crate) async fn run(mut self) {
        while let Some(record) = self.records.recv().await {
            let delivered = match &record {
                SinkRecord::Trade(trade) => self.sink.record_trade(trade).await,
                SinkRecord::Order(order) => self.sink.record_order(order).await,
            };
            if let Err(err) = delivered {
                self.failures.report(record, err);
            }
            EngineMetrics::decr(&self.metrics.records_pending);
        }

        debug!(key = %self.key, "Sink dispatcher drained");
    }
}

/// Log a book task that ended by panicking and take it out of the open count
pub(crate) async fn supervise(key: BookKey, task: JoinHandle<()>, metrics: Arc<EngineMetrics>) {
    match task.await {
        Ok(()) => {}
        Err(err) if err.is_panic() => {
            error!(key = %key, "Book task panicked, book halted");
            EngineMetrics::incr(&metrics.books_halted);
            EngineMetrics::decr(&metrics.markets_open);
        }
        Err(err) => {
            warn!(key = %key, error = %err, "Book task aborted");
            EngineMetrics::decr(&metrics.markets_open);
        }
    }
}
