//! Matching logic module
//!
//! Crossing rules and trade generation for price-time priority matching

pub mod crossing;
pub mod executor;

pub use crossing::{can_match, incoming_can_match};
pub use executor::MatchExecutor;
