//! Matching Engine Service
//!
//! Price-time priority matching for milestone option markets. One order
//! book exists per `(market, option)` pair; each book is driven by its own
//! task, so books match in parallel while every intent on a single book is
//! applied atomically and in arrival order.
//!
//! **Key Invariants:**
//! - Price-time priority strictly enforced (better price, then FIFO)
//! - A book is never crossed once an intent completes
//! - Conservation of quantity on both sides of every trade
//! - One delta per mutating intent, with contiguous per-book sequences
//!
//! ```text
//!          submit / cancel / close
//!                    │
//!             ┌──────▼──────┐   bounded mpsc, one per book
//!             │  Book task  │── watch ──► get_snapshot
//!             └──┬───────┬──┘
//!    unbounded   │       │   bounded, overflow => DeliveryFailure
//!   ┌────────────▼──┐ ┌──▼────────────┐
//!   │ Stream        │ │ Sink          │
//!   │ dispatcher    │ │ dispatcher    │
//!   └──────┬────────┘ └──────┬────────┘
//!          ▼                 ▼
//!    BookListener        TradeSink
//!   (stream publisher)  (durable storage)
//! ```

pub mod book;
pub mod matching;
pub mod delta;
pub mod snapshot;
pub mod events;
pub mod sink;
pub mod listener;
pub mod config;
pub mod metrics;
pub mod engine;

mod actor;

pub use config::EngineConfig;
pub use delta::{BookDelta, LevelChange};
pub use engine::{CancelAck, MatchingEngine, OrderAck};
pub use listener::BookListener;
pub use metrics::EngineMetrics;
pub use sink::{DeliveryFailure, MemorySink, SinkError, SinkRecord, TradeSink};
pub use snapshot::{BookSnapshot, LevelView};
