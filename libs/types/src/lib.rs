//! Types library for the milestone market matching engine
//!
//! Shared vocabulary used by the matching engine, the stream publisher and
//! the market maker. Nothing in here performs I/O.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, TradeId, OwnerId, BookKey)
//! - `numeric`: Fixed-point decimal types (Price, Quantity)
//! - `order`: Order lifecycle and intake types
//! - `trade`: Trade execution types
//! - `errors`: Error taxonomy
//! - `time`: Exchange clock helpers

pub mod ids;
pub mod numeric;
pub mod order;
pub mod trade;
pub mod errors;
pub mod time;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::trade::*;
    pub use crate::errors::*;
}
