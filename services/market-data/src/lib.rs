//! Market Data Service
//!
//! Turns the matching engine's per-book deltas into live subscriber
//! streams:
//! - `StreamPublisher` plugs into the engine as a `BookListener`
//! - each subscription starts with a checksummed snapshot, then deltas
//!   with contiguous sequences
//! - bounded per-subscriber queues; a slow subscriber is evicted rather
//!   than allowed to push back into matching
//! - `BookMirror` rebuilds aggregate depth on the client side
//!
//! ```text
//!  Engine dispatcher (one per book)
//!        │ on_delta
//!   ┌────▼──────┐
//!   │ Publisher │── mirror ──► snapshot for new subscribers
//!   └────┬──────┘
//!        │ try_send
//!   ┌────▼────┬─────────┐
//!   │ queue   │ queue   │ ...   full queue ⇒ evict
//!   └────┬────┴────┬────┘
//!   Subscription  Subscription
//! ```

pub mod backpressure;
pub mod metrics;
pub mod mirror;
pub mod publisher;
pub mod snapshot;
pub mod subscription;

pub use backpressure::{BackpressureConfig, SubscriberId};
pub use metrics::PublisherMetrics;
pub use mirror::{BookMirror, MirrorError};
pub use publisher::StreamPublisher;
pub use snapshot::{verify_snapshot_integrity, DepthLevel, StreamSnapshot};
pub use subscription::{StreamError, StreamMessage, Subscription};

pub const SERVICE_VERSION: &str = "0.1.0";
