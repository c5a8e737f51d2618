//! Trade sink boundary
//!
//! Durable storage of trades and final order states lives outside the
//! engine. Each book queues its trades and retired orders on a bounded
//! queue drained by a sink dispatcher of its own, which hands every record
//! to the sink exactly once. A failed delivery, or a record that finds the
//! queue full, never unwinds the match; it is reported on the engine's
//! delivery-failure channel instead.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use types::ids::BookKey;
use types::order::Order;
use types::trade::Trade;

/// Errors reported by a trade sink
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Durable store for executions and final order states
#[async_trait]
pub trait TradeSink: Send + Sync {
    async fn record_trade(&self, trade: &Trade) -> Result<(), SinkError>;

    async fn record_order(&self, order: &Order) -> Result<(), SinkError>;
}

/// One unit of durable delivery
#[derive(Debug, Clone)]
pub enum SinkRecord {
    Trade(Trade),
    Order(Order),
}

impl SinkRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkRecord::Trade(_) => "trade",
            SinkRecord::Order(_) => "order",
        }
    }
}

/// A record that never reached the sink, handed back for out-of-band retry
///
/// Either the sink refused it, or the book's sink queue was full or gone.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub key: BookKey,
    pub record: SinkRecord,
    pub error: SinkError,
}

/// In-memory sink, with a switch to simulate an outage
#[derive(Debug, Default)]
pub struct MemorySink {
    trades: Mutex<Vec<Trade>>,
    orders: Mutex<Vec<Order>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `SinkError::Unavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.trades.lock().await.clone()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.orders.lock().await.clone()
    }

    fn check_available(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SinkError::Unavailable("memory sink switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TradeSink for MemorySink {
    async fn record_trade(&self, trade: &Trade) -> Result<(), SinkError> {
        self.check_available()?;
        self.trades.lock().await.push(trade.clone());
        Ok(())
    }

    async fn record_order(&self, order: &Order) -> Result<(), SinkError> {
        self.check_available()?;
        self.orders.lock().await.push(order.clone());
        Ok(())
    }
}
