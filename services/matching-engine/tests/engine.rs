//! Engine integration tests
//!
//! Exercise the concurrency shell: routing, validation, cancel races,
//! parallel books, listener ordering, trade-sink outages and the
//! isolation of sink delivery from the delta stream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use matching_engine::{
    BookDelta, BookListener, BookSnapshot, EngineConfig, MatchingEngine, MemorySink, SinkError, SinkRecord,
    TradeSink,
};
use rust_decimal::Decimal;
use types::errors::{EngineError, OrderError};
use types::ids::{BookKey, OrderId, OwnerId};
use types::numeric::{Price, Quantity};
use types::order::{CancelReason, Order, OrderStatus, PlaceOrder, Side};
use types::trade::Trade;

fn key(option: &str) -> BookKey {
    BookKey::new("milestone-42", option)
}

fn limit(key: BookKey, side: Side, price: u64, qty: u64, owner: OwnerId) -> PlaceOrder {
    PlaceOrder::limit(key, side, Price::from_u64(price), Quantity::from_u64(qty), owner)
}

fn engine_with(sink: Arc<MemorySink>, listeners: Vec<Arc<dyn BookListener>>) -> MatchingEngine {
    MatchingEngine::new(EngineConfig::default(), sink, listeners)
}

#[derive(Default)]
struct RecordingListener {
    opened: Mutex<Vec<BookSnapshot>>,
    deltas: Mutex<Vec<BookDelta>>,
    closed: Mutex<Vec<(BookKey, u64)>>,
}

impl BookListener for RecordingListener {
    fn on_book_opened(&self, snapshot: &BookSnapshot) {
        self.opened.lock().unwrap().push(snapshot.clone());
    }

    fn on_delta(&self, delta: &BookDelta) {
        self.deltas.lock().unwrap().push(delta.clone());
    }

    fn on_book_closed(&self, key: &BookKey, sequence: u64) {
        self.closed.lock().unwrap().push((key.clone(), sequence));
    }
}

/// Sink whose writes never complete
struct HangingSink;

#[async_trait]
impl TradeSink for HangingSink {
    async fn record_trade(&self, _trade: &Trade) -> Result<(), SinkError> {
        std::future::pending().await
    }

    async fn record_order(&self, _order: &Order) -> Result<(), SinkError> {
        std::future::pending().await
    }
}

/// Listener that blows up on the first delta
struct PanickingListener;

impl BookListener for PanickingListener {
    fn on_book_opened(&self, _snapshot: &BookSnapshot) {}

    fn on_delta(&self, delta: &BookDelta) {
        panic!("listener failed at sequence {}", delta.sequence);
    }

    fn on_book_closed(&self, _key: &BookKey, _sequence: u64) {}
}

/// Poll until `check` holds or a second passes
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_unknown_market() {
    let engine = engine_with(Arc::new(MemorySink::new()), Vec::new());

    let err = engine
        .submit_order(limit(key("yes"), Side::BUY, 100, 1, OwnerId::new()))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::UnknownMarket { key: key("yes") });
    assert!(engine.get_snapshot(&key("yes")).is_err());
}

#[tokio::test]
async fn test_invalid_orders_rejected_without_state() {
    let config = EngineConfig {
        price_tick: Some(Decimal::new(5, 0)),
        ..EngineConfig::default()
    };
    let engine = MatchingEngine::new(config, Arc::new(MemorySink::new()), Vec::new());
    engine.open_market(key("yes")).unwrap();
    let owner = OwnerId::new();

    let zero = limit(key("yes"), Side::BUY, 100, 0, owner);
    assert!(matches!(
        engine.submit_order(zero).await,
        Err(EngineError::InvalidOrder(OrderError::NonPositiveQuantity(_)))
    ));

    let off_tick = limit(key("yes"), Side::BUY, 101, 1, owner);
    assert!(matches!(
        engine.submit_order(off_tick).await,
        Err(EngineError::InvalidOrder(OrderError::OffTick { .. }))
    ));

    let mut priced_market = PlaceOrder::market(key("yes"), Side::SELL, Quantity::from_u64(1), owner);
    priced_market.price = Some(Price::from_u64(100));
    assert!(matches!(
        engine.submit_order(priced_market).await,
        Err(EngineError::InvalidOrder(OrderError::UnexpectedPrice))
    ));

    // Nothing reached the book
    assert_eq!(engine.get_snapshot(&key("yes")).unwrap().sequence, 0);
    assert_eq!(engine.metrics().export()["orders_invalid"], 3);
}

#[tokio::test]
async fn test_cancel_not_found_cases() {
    let engine = engine_with(Arc::new(MemorySink::new()), Vec::new());
    engine.open_market(key("yes")).unwrap();
    let owner = OwnerId::new();

    // Unknown id
    let unknown = OrderId::new();
    assert_eq!(
        engine.cancel_order(unknown, owner).await.unwrap_err(),
        EngineError::OrderNotFound { order_id: unknown }
    );

    // Foreign owner
    let ack = engine
        .submit_order(limit(key("yes"), Side::SELL, 100, 5, owner))
        .await
        .unwrap();
    assert!(matches!(
        engine.cancel_order(ack.order_id, OwnerId::new()).await,
        Err(EngineError::OrderNotFound { .. })
    ));

    // Owner succeeds once, then the order is terminal
    let cancelled = engine.cancel_order(ack.order_id, owner).await.unwrap();
    assert!(cancelled.removed);
    assert_eq!(
        cancelled.order.status,
        OrderStatus::Cancelled(CancelReason::UserRequested)
    );
    assert!(matches!(
        engine.cancel_order(ack.order_id, owner).await,
        Err(EngineError::OrderNotFound { .. })
    ));

    // Fully filled orders are gone too
    let filled = engine
        .submit_order(limit(key("yes"), Side::SELL, 100, 1, owner))
        .await
        .unwrap();
    engine
        .submit_order(limit(key("yes"), Side::BUY, 100, 1, OwnerId::new()))
        .await
        .unwrap();
    assert!(matches!(
        engine.cancel_order(filled.order_id, owner).await,
        Err(EngineError::OrderNotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_fill_has_one_winner() {
    for _ in 0..50 {
        let engine = Arc::new(engine_with(Arc::new(MemorySink::new()), Vec::new()));
        engine.open_market(key("yes")).unwrap();
        let maker = OwnerId::new();

        let resting = engine
            .submit_order(limit(key("yes"), Side::SELL, 100, 5, maker))
            .await
            .unwrap();

        let cancel = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.cancel_order(resting.order_id, maker).await })
        };
        let take = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .submit_order(limit(key("yes"), Side::BUY, 100, 5, OwnerId::new()))
                    .await
            })
        };

        let cancel = cancel.await.unwrap();
        let take = take.await.unwrap().unwrap();

        match cancel {
            Ok(ack) => {
                assert!(ack.removed);
                assert!(take.trades.is_empty());
                assert_eq!(take.status, OrderStatus::Open);
            }
            Err(EngineError::OrderNotFound { .. }) => {
                assert_eq!(take.trades.len(), 1);
                assert_eq!(take.status, OrderStatus::Filled);
            }
            Err(other) => panic!("unexpected cancel result: {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_books_process_independently() {
    let engine = Arc::new(engine_with(Arc::new(MemorySink::new()), Vec::new()));
    let options = ["a", "b", "c", "d"];
    for option in options {
        engine.open_market(key(option)).unwrap();
    }

    let handles: Vec<_> = options
        .into_iter()
        .map(|option| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let seller = OwnerId::new();
                let buyer = OwnerId::new();
                let mut trades = 0;
                for _ in 0..200 {
                    engine
                        .submit_order(limit(key(option), Side::SELL, 100, 1, seller))
                        .await
                        .unwrap();
                    let ack = engine
                        .submit_order(limit(key(option), Side::BUY, 100, 1, buyer))
                        .await
                        .unwrap();
                    trades += ack.trades.len();
                }
                trades
            })
        })
        .collect();

    let mut total_trades = 0;
    for handle in handles {
        total_trades += handle.await.unwrap();
    }

    assert_eq!(total_trades, 800); // 200 trades x 4 books
    for option in options {
        let snapshot = engine.get_snapshot(&key(option)).unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.sequence, 400);
    }
    assert_eq!(engine.metrics().export()["trades_executed"], 800);
}

#[tokio::test]
async fn test_listener_sees_contiguous_deltas() {
    let listener = Arc::new(RecordingListener::default());
    let as_listener: Arc<dyn BookListener> = listener.clone();
    let engine = engine_with(Arc::new(MemorySink::new()), vec![as_listener]);
    engine.open_market(key("yes")).unwrap();
    let owner = OwnerId::new();

    let resting = engine
        .submit_order(limit(key("yes"), Side::BUY, 99, 3, owner))
        .await
        .unwrap();
    engine
        .submit_order(limit(key("yes"), Side::SELL, 101, 3, owner))
        .await
        .unwrap();
    engine.cancel_order(resting.order_id, owner).await.unwrap();
    // Failed cancel consumes no sequence
    let _ = engine.cancel_order(resting.order_id, owner).await;
    engine.close_market(&key("yes")).await.unwrap();

    assert!(eventually(|| !listener.closed.lock().unwrap().is_empty()).await);

    let opened = listener.opened.lock().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].sequence, 0);

    let sequences: Vec<u64> = listener.deltas.lock().unwrap().iter().map(|d| d.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert_eq!(listener.closed.lock().unwrap()[0], (key("yes"), 4));
}

#[tokio::test]
async fn test_sink_outage_surfaces_failures_and_acks_succeed() {
    let sink = Arc::new(MemorySink::new());
    let engine = engine_with(sink.clone(), Vec::new());
    let mut failures = engine.take_delivery_failures().unwrap();
    engine.open_market(key("yes")).unwrap();

    sink.set_failing(true);
    engine
        .submit_order(limit(key("yes"), Side::SELL, 100, 2, OwnerId::new()))
        .await
        .unwrap();
    let ack = engine
        .submit_order(limit(key("yes"), Side::BUY, 100, 2, OwnerId::new()))
        .await
        .unwrap();
    assert_eq!(ack.status, OrderStatus::Filled);

    // One trade and two retired orders could not be delivered
    let mut trades = 0;
    let mut orders = 0;
    for _ in 0..3 {
        let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.key, key("yes"));
        match failure.record {
            SinkRecord::Trade(trade) => {
                assert_eq!(trade.quantity, Quantity::from_u64(2));
                trades += 1;
            }
            SinkRecord::Order(_) => orders += 1,
        }
    }
    assert_eq!((trades, orders), (1, 2));
    assert!(sink.trades().await.is_empty());

    // Book state is unaffected by the outage
    assert!(engine.get_snapshot(&key("yes")).unwrap().is_empty());
}

#[tokio::test]
async fn test_sink_receives_trades_and_retired_orders() {
    let sink = Arc::new(MemorySink::new());
    let engine = engine_with(sink.clone(), Vec::new());
    engine.open_market(key("yes")).unwrap();

    engine
        .submit_order(limit(key("yes"), Side::SELL, 100, 5, OwnerId::new()))
        .await
        .unwrap();
    engine
        .submit_order(limit(key("yes"), Side::SELL, 102, 5, OwnerId::new()))
        .await
        .unwrap();
    let ack = engine
        .submit_order(PlaceOrder::market(key("yes"), Side::BUY, Quantity::from_u64(20), OwnerId::new()))
        .await
        .unwrap();
    assert_eq!(ack.filled_quantity, Quantity::from_u64(10));

    let mut delivered = false;
    for _ in 0..100 {
        if sink.orders().await.len() == 3 {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered);
    assert_eq!(sink.trades().await.len(), 2);

    let taker = sink
        .orders()
        .await
        .into_iter()
        .find(|o| o.order_id == ack.order_id)
        .unwrap();
    assert!(matches!(taker.status, OrderStatus::Rejected(_)));
}

#[tokio::test]
async fn test_close_market_cancels_and_unregisters() {
    let engine = engine_with(Arc::new(MemorySink::new()), Vec::new());
    engine.open_market(key("yes")).unwrap();
    engine.open_market(key("no")).unwrap();
    let owner = OwnerId::new();

    let resting = engine
        .submit_order(limit(key("yes"), Side::BUY, 99, 3, owner))
        .await
        .unwrap();

    let cancelled = engine.close_market(&key("yes")).await.unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(
        cancelled[0].status,
        OrderStatus::Cancelled(CancelReason::MarketClosed)
    );

    assert_eq!(engine.markets(), vec![key("no")]);
    assert!(matches!(
        engine.submit_order(limit(key("yes"), Side::BUY, 99, 3, owner)).await,
        Err(EngineError::UnknownMarket { .. })
    ));
    assert!(matches!(
        engine.cancel_order(resting.order_id, owner).await,
        Err(EngineError::OrderNotFound { .. })
    ));
    assert!(matches!(
        engine.close_market(&key("yes")).await,
        Err(EngineError::UnknownMarket { .. })
    ));

    // Reopening starts a fresh book
    engine.open_market(key("yes")).unwrap();
    assert_eq!(engine.get_snapshot(&key("yes")).unwrap().sequence, 0);
}

#[tokio::test]
async fn test_hung_sink_does_not_stall_deltas() {
    let listener = Arc::new(RecordingListener::default());
    let engine = MatchingEngine::new(
        EngineConfig::default(),
        Arc::new(HangingSink),
        vec![listener.clone() as Arc<dyn BookListener>],
    );
    engine.open_market(key("yes")).unwrap();

    engine
        .submit_order(limit(key("yes"), Side::SELL, 100, 1, OwnerId::new()))
        .await
        .unwrap();
    engine
        .submit_order(limit(key("yes"), Side::BUY, 100, 1, OwnerId::new()))
        .await
        .unwrap();
    engine
        .submit_order(limit(key("yes"), Side::BUY, 90, 1, OwnerId::new()))
        .await
        .unwrap();

    let delivered = || listener.deltas.lock().unwrap().iter().map(|d| d.sequence).collect::<Vec<u64>>();
    assert!(eventually(|| delivered() == vec![1, 2, 3]).await, "{:?}", delivered());
    assert!(engine.metrics().records_pending() > 0);
}

#[tokio::test]
async fn test_full_sink_queue_reports_failures() {
    let config = EngineConfig {
        sink_queue_capacity: 1,
        ..EngineConfig::default()
    };
    let engine = MatchingEngine::new(config, Arc::new(HangingSink), Vec::new());
    let mut failures = engine.take_delivery_failures().unwrap();
    engine.open_market(key("yes")).unwrap();

    // Three crossing pairs: three trades and six retired orders
    for _ in 0..3 {
        engine
            .submit_order(limit(key("yes"), Side::SELL, 100, 1, OwnerId::new()))
            .await
            .unwrap();
        let ack = engine
            .submit_order(limit(key("yes"), Side::BUY, 100, 1, OwnerId::new()))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
    }

    // One record is stuck in the sink and one waits in the queue
    let mut overflowed = 0;
    while let Ok(Some(failure)) = tokio::time::timeout(Duration::from_millis(200), failures.recv()).await {
        assert_eq!(failure.key, key("yes"));
        assert_eq!(failure.error, SinkError::Unavailable("sink queue full".to_string()));
        overflowed += 1;
    }
    assert!(overflowed >= 7, "{overflowed}");
    assert_eq!(engine.metrics().export()["delivery_failures"], overflowed);
    assert!(engine.metrics().records_pending() <= 2);
}

#[tokio::test]
async fn test_panicking_listener_keeps_sink_delivery() {
    let sink = Arc::new(MemorySink::new());
    let engine = engine_with(sink.clone(), vec![Arc::new(PanickingListener) as Arc<dyn BookListener>]);
    let mut failures = engine.take_delivery_failures().unwrap();
    engine.open_market(key("yes")).unwrap();

    engine
        .submit_order(limit(key("yes"), Side::SELL, 100, 1, OwnerId::new()))
        .await
        .unwrap();
    let ack = engine
        .submit_order(limit(key("yes"), Side::BUY, 100, 1, OwnerId::new()))
        .await
        .unwrap();
    assert_eq!(ack.trades.len(), 1);

    let mut delivered = false;
    for _ in 0..100 {
        if sink.trades().await.len() == 1 && sink.orders().await.len() == 2 {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered);
    assert!(failures.try_recv().is_err());

    // Matching carries on with the stream dispatcher gone
    engine
        .submit_order(limit(key("yes"), Side::SELL, 101, 1, OwnerId::new()))
        .await
        .unwrap();
    assert_eq!(engine.get_snapshot(&key("yes")).unwrap().best_ask, Some(Price::from_u64(101)));
}
