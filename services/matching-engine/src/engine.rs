//! Matching engine front
//!
//! Routes intents to per-book tasks. Books live in a concurrent registry,
//! one task each, so different books match in parallel while intents for
//! the same book are totally ordered by its command queue.

use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};
use types::errors::EngineError;
use types::ids::{BookKey, ClientRequestId, OrderId, OwnerId};
use types::numeric::Quantity;
use types::order::{Order, OrderStatus, PlaceOrder};
use types::time::now_nanos;
use types::trade::Trade;

use crate::actor::{supervise, BookCommand, BookTask, FailureReporter, SinkDispatcher, StreamDispatcher};
use crate::book::{CancelOutcome, OrderBook};
use crate::config::EngineConfig;
use crate::listener::BookListener;
use crate::metrics::EngineMetrics;
use crate::sink::{DeliveryFailure, TradeSink};
use crate::snapshot::BookSnapshot;

/// Acknowledgement of a processed submit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub client_request_id: ClientRequestId,
    pub status: OrderStatus,
    pub filled_quantity: Quantity,
    pub remaining_quantity: Quantity,
    /// Trades this order took part in as taker
    pub trades: Vec<Trade>,
    /// Event sequence (arrival sequence) assigned by the book
    pub sequence: u64,
}

impl OrderAck {
    pub(crate) fn new(order: &Order, trades: Vec<Trade>) -> Self {
        Self {
            order_id: order.order_id,
            client_request_id: order.client_request_id.clone(),
            status: order.status.clone(),
            filled_quantity: order.filled_quantity,
            remaining_quantity: order.remaining_quantity,
            trades,
            sequence: order.arrival_sequence,
        }
    }

    /// Whether the remainder now rests in the book
    pub fn is_resting(&self) -> bool {
        matches!(self.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

/// Acknowledgement of a successful cancel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    pub order_id: OrderId,
    /// Always `true`: a cancel that removes nothing is `OrderNotFound`.
    /// Carried so the ack keeps the `{order_id, removed}` wire shape
    /// clients of the cancel intake expect.
    pub removed: bool,
    /// Final state of the cancelled order
    pub order: Order,
}

struct BookHandle {
    commands: mpsc::Sender<BookCommand>,
    snapshots: watch::Receiver<Arc<BookSnapshot>>,
}

/// Main matching engine
pub struct MatchingEngine {
    config: EngineConfig,
    books: DashMap<BookKey, BookHandle>,
    /// Resting order id -> owning book, for cancel routing
    index: Arc<DashMap<OrderId, BookKey>>,
    listeners: Arc<Vec<Arc<dyn BookListener>>>,
    sink: Arc<dyn TradeSink>,
    failures_tx: mpsc::UnboundedSender<DeliveryFailure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<DeliveryFailure>>>,
    metrics: Arc<EngineMetrics>,
}

impl MatchingEngine {
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn TradeSink>,
        listeners: Vec<Arc<dyn BookListener>>,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        info!(
            command_queue_capacity = config.command_queue_capacity,
            price_tick = ?config.price_tick,
            listeners = listeners.len(),
            "Matching engine initialized"
        );

        Self {
            config,
            books: DashMap::new(),
            index: Arc::new(DashMap::new()),
            listeners: Arc::new(listeners),
            sink,
            failures_tx,
            failures_rx: Mutex::new(Some(failures_rx)),
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Register a book and start its tasks
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open_market(&self, key: BookKey) -> Result<(), EngineError> {
        let slot = match self.books.entry(key.clone()) {
            Entry::Occupied(_) => return Err(EngineError::MarketAlreadyOpen { key }),
            Entry::Vacant(slot) => slot,
        };

        let book = OrderBook::with_trade_sequence(key.clone(), self.config.trade_sequence_start);
        let initial = Arc::new(book.snapshot(now_nanos()));

        // Listeners know the book before open_market returns and before any
        // delta can reach them
        for listener in self.listeners.iter() {
            listener.on_book_opened(&initial);
        }

        let (commands_tx, commands_rx) = mpsc::channel(self.config.command_queue_capacity.max(1));
        let (snapshots_tx, snapshots_rx) = watch::channel(Arc::clone(&initial));
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (records_tx, records_rx) = mpsc::channel(self.config.sink_queue_capacity.max(1));
        let failures = FailureReporter {
            key: key.clone(),
            failures: self.failures_tx.clone(),
            metrics: Arc::clone(&self.metrics),
        };

        let stream = StreamDispatcher {
            key: key.clone(),
            events: stream_rx,
            listeners: Arc::clone(&self.listeners),
            metrics: Arc::clone(&self.metrics),
        };
        let sink = SinkDispatcher {
            key: key.clone(),
            records: records_rx,
            sink: Arc::clone(&self.sink),
            failures: failures.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let task = BookTask {
            book,
            commands: commands_rx,
            snapshots: snapshots_tx,
            stream: stream_tx,
            records: records_tx,
            failures,
            index: Arc::clone(&self.index),
            metrics: Arc::clone(&self.metrics),
        };

        tokio::spawn(stream.run());
        tokio::spawn(sink.run());
        let handle = tokio::spawn(task.run());
        tokio::spawn(supervise(key.clone(), handle, Arc::clone(&self.metrics)));

        slot.insert(BookHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        });
        EngineMetrics::incr(&self.metrics.markets_open);
        info!(key = %key, "Market opened");

        Ok(())
    }

    /// Validate, route and match an order
    pub async fn submit_order(&self, request: PlaceOrder) -> Result<OrderAck, EngineError> {
        if let Err(reason) = request.validate(self.config.price_tick) {
            EngineMetrics::incr(&self.metrics.orders_invalid);
            debug!(key = %request.key, reason = %reason, "Order failed validation");
            return Err(reason.into());
        }

        let key = request.key.clone();
        let commands = self.commands_for(&key)?;
        let order_id = OrderId::new();
        let (reply, response) = oneshot::channel();

        EngineMetrics::incr(&self.metrics.orders_submitted);
        if commands
            .send(BookCommand::Submit {
                order_id,
                request,
                reply,
            })
            .await
            .is_err()
        {
            return Err(self.unavailable(key));
        }

        response.await.map_err(|_| self.unavailable(key))
    }

    /// Cancel a resting order owned by `owner_id`
    ///
    /// Unknown, already terminal and foreign-owned ids all yield
    /// `OrderNotFound`.
    pub async fn cancel_order(&self, order_id: OrderId, owner_id: OwnerId) -> Result<CancelAck, EngineError> {
        let not_found = || {
            EngineMetrics::incr(&self.metrics.cancels_not_found);
            EngineError::OrderNotFound { order_id }
        };

        let Some(key) = self.index.get(&order_id).map(|entry| entry.value().clone()) else {
            return Err(not_found());
        };
        let commands = self.commands_for(&key).map_err(|_| not_found())?;

        let (reply, response) = oneshot::channel();
        if commands
            .send(BookCommand::Cancel {
                order_id,
                owner_id,
                reply,
            })
            .await
            .is_err()
        {
            return Err(self.unavailable(key));
        }
        let outcome = response.await.map_err(|_| self.unavailable(key))?;

        match outcome {
            CancelOutcome {
                removed: true,
                order: Some(order),
                ..
            } => {
                EngineMetrics::incr(&self.metrics.cancels_accepted);
                Ok(CancelAck {
                    order_id,
                    removed: true,
                    order,
                })
            }
            _ => Err(not_found()),
        }
    }

    /// Latest published snapshot of a book
    pub fn get_snapshot(&self, key: &BookKey) -> Result<Arc<BookSnapshot>, EngineError> {
        self.books
            .get(key)
            .map(|handle| Arc::clone(&handle.snapshots.borrow()))
            .ok_or_else(|| EngineError::UnknownMarket { key: key.clone() })
    }

    /// Cancel every resting order, publish the final delta and stop the book
    pub async fn close_market(&self, key: &BookKey) -> Result<Vec<Order>, EngineError> {
        let Some((_, handle)) = self.books.remove(key) else {
            return Err(EngineError::UnknownMarket { key: key.clone() });
        };

        let (reply, response) = oneshot::channel();
        let closed = match handle.commands.send(BookCommand::Close { reply }).await {
            Ok(()) => response.await.ok(),
            Err(_) => None,
        };

        match closed {
            Some(cancelled) => {
                // A halted book already left the open count in `supervise`
                EngineMetrics::decr(&self.metrics.markets_open);
                info!(key = %key, cancelled = cancelled.len(), "Market closed");
                Ok(cancelled)
            }
            None => {
                // Halted book: drop routes to orders that can never be cancelled
                self.index.retain(|_, owner| *owner != *key);
                Err(EngineError::BookHalted { key: key.clone() })
            }
        }
    }

    /// Open books, sorted
    pub fn markets(&self) -> Vec<BookKey> {
        let mut keys: Vec<BookKey> = self.books.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Receiver of sink delivery failures; handed out once
    pub fn take_delivery_failures(&self) -> Option<mpsc::UnboundedReceiver<DeliveryFailure>> {
        self.failures_rx.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Make the book's task hit a fatal invariant violation
    #[cfg(test)]
    pub(crate) async fn corrupt_book(&self, key: &BookKey) {
        if let Ok(commands) = self.commands_for(key) {
            let _ = commands.send(BookCommand::Corrupt).await;
        }
    }

    fn commands_for(&self, key: &BookKey) -> Result<mpsc::Sender<BookCommand>, EngineError> {
        self.books
            .get(key)
            .map(|handle| handle.commands.clone())
            .ok_or_else(|| EngineError::UnknownMarket { key: key.clone() })
    }

    /// A book task stopped answering: closed meanwhile, or halted
    fn unavailable(&self, key: BookKey) -> EngineError {
        if self.books.contains_key(&key) {
            EngineError::BookHalted { key }
        } else {
            EngineError::UnknownMarket { key }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use types::numeric::Price;
    use types::order::Side;

    fn key() -> BookKey {
        BookKey::new("milestone-1", "yes")
    }

    fn engine() -> MatchingEngine {
        MatchingEngine::new(EngineConfig::default(), Arc::new(MemorySink::new()), Vec::new())
    }

    #[tokio::test]
    async fn test_engine_resting_order() {
        let engine = engine();
        engine.open_market(key()).unwrap();

        let ack = engine
            .submit_order(PlaceOrder::limit(
                key(),
                Side::BUY,
                Price::from_u64(100),
                Quantity::from_u64(10),
                OwnerId::new(),
            ))
            .await
            .unwrap();

        assert_eq!(ack.status, OrderStatus::Open);
        assert!(ack.is_resting());
        assert!(ack.trades.is_empty());
        assert_eq!(ack.sequence, 1);

        let snapshot = engine.get_snapshot(&key()).unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.best_bid, Some(Price::from_u64(100)));
    }

    #[tokio::test]
    async fn test_engine_full_match() {
        let engine = engine();
        engine.open_market(key()).unwrap();

        engine
            .submit_order(PlaceOrder::limit(key(), Side::SELL, Price::from_u64(100), Quantity::from_u64(5), OwnerId::new()))
            .await
            .unwrap();
        let ack = engine
            .submit_order(PlaceOrder::limit(key(), Side::BUY, Price::from_u64(100), Quantity::from_u64(5), OwnerId::new()))
            .await
            .unwrap();

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.trades.len(), 1);
        assert!(ack.remaining_quantity.is_zero());
        assert!(engine.get_snapshot(&key()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_twice() {
        let engine = engine();
        engine.open_market(key()).unwrap();
        assert_eq!(
            engine.open_market(key()),
            Err(EngineError::MarketAlreadyOpen { key: key() })
        );
    }

    #[tokio::test]
    async fn test_ack_echoes_client_request_id() {
        let engine = engine();
        engine.open_market(key()).unwrap();

        let request_id = ClientRequestId::new("req-42");
        let ack = engine
            .submit_order(
                PlaceOrder::market(key(), Side::BUY, Quantity::from_u64(1), OwnerId::new())
                    .with_client_request_id(request_id.clone()),
            )
            .await
            .unwrap();

        assert_eq!(ack.client_request_id, request_id);
    }

    /// Poll until `check` holds or a second passes
    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_halted_book_refuses_intents_and_spares_others() {
        let engine = engine();
        let halted = BookKey::new("milestone-1", "no");
        engine.open_market(key()).unwrap();
        engine.open_market(halted.clone()).unwrap();
        let owner = OwnerId::new();

        let resting = engine
            .submit_order(PlaceOrder::limit(halted.clone(), Side::BUY, Price::from_u64(90), Quantity::from_u64(1), owner))
            .await
            .unwrap();

        engine.corrupt_book(&halted).await;
        let metrics = engine.metrics();
        assert!(eventually(|| {
            let counters = metrics.export();
            counters["books_halted"] == 1 && counters["markets_open"] == 1
        })
        .await);

        assert_eq!(
            engine
                .submit_order(PlaceOrder::limit(halted.clone(), Side::SELL, Price::from_u64(95), Quantity::from_u64(1), owner))
                .await
                .unwrap_err(),
            EngineError::BookHalted { key: halted.clone() }
        );
        assert_eq!(
            engine.cancel_order(resting.order_id, owner).await.unwrap_err(),
            EngineError::BookHalted { key: halted.clone() }
        );

        // The other book still matches
        engine
            .submit_order(PlaceOrder::limit(key(), Side::SELL, Price::from_u64(100), Quantity::from_u64(1), owner))
            .await
            .unwrap();
        let ack = engine
            .submit_order(PlaceOrder::limit(key(), Side::BUY, Price::from_u64(100), Quantity::from_u64(1), OwnerId::new()))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);

        // Closing a halted book unregisters it without touching the open count
        assert_eq!(
            engine.close_market(&halted).await.unwrap_err(),
            EngineError::BookHalted { key: halted.clone() }
        );
        assert_eq!(metrics.export()["markets_open"], 1);
        assert_eq!(engine.markets(), vec![key()]);
        assert!(matches!(
            engine.cancel_order(resting.order_id, owner).await,
            Err(EngineError::OrderNotFound { .. })
        ));
        assert_eq!(
            engine.get_snapshot(&halted).unwrap_err(),
            EngineError::UnknownMarket { key: halted }
        );

        engine.close_market(&key()).await.unwrap();
        assert_eq!(metrics.export()["markets_open"], 0);
    }

    #[tokio::test]
    async fn test_take_delivery_failures_once() {
        let engine = engine();
        assert!(engine.take_delivery_failures().is_some());
        assert!(engine.take_delivery_failures().is_none());
    }
}
