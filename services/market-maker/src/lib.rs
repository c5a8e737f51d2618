//! Market Maker
//!
//! An automated participant that keeps a book two-sided. It goes through
//! the same intake as any client (`MatchingEngine::submit_order` and
//! `cancel_order`) and reads the book the way any subscriber does.
//!
//! - `SpreadStrategy`: fixed spread around the external mid, skewed by
//!   inventory, snapped outward to the tick
//! - `MarketMaker`: cancel/learn/resubmit cycle driven by a timer and by
//!   reference moves seen on the book stream

pub mod config;
pub mod error;
pub mod maker;
pub mod strategy;

pub use config::MarketMakerConfig;
pub use error::MakerError;
pub use maker::{MakerStats, MakerSummary, MarketMaker};
pub use strategy::{MarketView, Quote, QuoteStrategy, SpreadStrategy};
