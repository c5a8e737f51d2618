//! Engine configuration

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Matching engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound of each book's command queue; submitters wait when it is full
    pub command_queue_capacity: usize,
    /// Bound of each book's sink queue; records that find it full are
    /// reported as delivery failures
    pub sink_queue_capacity: usize,
    /// Sequence carried by the first trade of every book
    pub trade_sequence_start: u64,
    /// Minimum limit-price increment; `None` accepts any positive price
    pub price_tick: Option<Decimal>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 1024,
            sink_queue_capacity: 4096,
            trade_sequence_start: 1,
            price_tick: None,
        }
    }
}
