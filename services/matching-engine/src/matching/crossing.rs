//! Crossing detection logic
//!
//! Determines when a bid and ask can match based on price compatibility

use types::numeric::Price;
use types::order::Side;

/// Check if a bid and ask can match at given prices
///
/// For a buy order to match with a sell order the buy price must be >= the
/// sell price. A resting book for which this holds is crossed.
pub fn can_match(bid_price: Price, ask_price: Price) -> bool {
    bid_price >= ask_price
}

/// Check if an incoming order can match against a resting price
///
/// A market order (`limit == None`) accepts any resting price.
pub fn incoming_can_match(incoming_side: Side, limit: Option<Price>, resting_price: Price) -> bool {
    let Some(limit) = limit else {
        return true;
    };

    match incoming_side {
        Side::BUY => limit >= resting_price,  // Buy crosses sell if bid >= ask
        Side::SELL => limit <= resting_price, // Sell crosses buy if ask <= bid
    }
}
