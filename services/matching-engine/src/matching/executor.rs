//! Trade execution logic
//!
//! Turns a single fill between a taker and a maker into a `Trade` stamped
//! with the book's trade sequence.

use types::ids::BookKey;
use types::numeric::{Price, Quantity};
use types::order::Order;
use types::trade::{Participant, Trade};

/// Match executor for handling trade generation
#[derive(Debug, Clone)]
pub struct MatchExecutor {
    sequence_counter: u64,
}

impl MatchExecutor {
    /// Create a new match executor with starting sequence number
    pub fn new(starting_sequence: u64) -> Self {
        Self {
            sequence_counter: starting_sequence,
        }
    }

    /// Get next sequence number (monotonically increasing)
    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence_counter;
        self.sequence_counter += 1;
        seq
    }

    /// Sequence the next trade will carry
    pub fn peek_sequence(&self) -> u64 {
        self.sequence_counter
    }

    /// Execute a trade between a maker and a taker
    ///
    /// `price` is the maker's resting price.
    pub fn execute_trade(
        &mut self,
        key: &BookKey,
        taker: &Order,
        maker: &Order,
        price: Price,
        quantity: Quantity,
        timestamp: i64,
    ) -> Trade {
        let sequence = self.next_sequence();

        Trade::new(
            sequence,
            key.clone(),
            taker.side,
            Participant {
                order_id: taker.order_id,
                owner_id: taker.owner_id,
            },
            Participant {
                order_id: maker.order_id,
                owner_id: maker.owner_id,
            },
            price,
            quantity,
            timestamp,
        )
    }
}
