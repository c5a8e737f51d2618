//! Order book infrastructure module
//!
//! Contains price levels, bid book, ask book and the single-book matching
//! core built on top of them.

pub mod price_level;
pub mod bid_book;
pub mod ask_book;
pub mod order_book;

pub use price_level::PriceLevel;
pub use bid_book::BidBook;
pub use ask_book::AskBook;
pub use order_book::{CancelOutcome, OrderBook, SubmitOutcome};
