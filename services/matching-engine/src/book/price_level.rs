//! Price level implementation with FIFO queue
//!
//! A price level contains all resting orders at a specific price point.
//! Orders are kept in arrival order to enforce time priority.

use std::collections::VecDeque;
use types::ids::OrderId;
use types::numeric::Quantity;

/// A price level containing orders at a specific price
///
/// Maintains strict FIFO ordering for time-priority matching, plus a cached
/// aggregate of the remaining quantity of every order in the queue.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    /// Queue of orders at this price level (FIFO order)
    orders: VecDeque<LevelEntry>,
    /// Total remaining quantity available at this level
    total_quantity: Quantity,
}

/// Entry in the price level queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelEntry {
    pub order_id: OrderId,
    pub arrival_sequence: u64,
    pub remaining_quantity: Quantity,
}

impl PriceLevel {
    /// Create a new empty price level
    pub fn new() -> Self {
        Self {
            orders: VecDeque::new(),
            total_quantity: Quantity::zero(),
        }
    }

    /// Append an order at the back of the queue (time priority)
    ///
    /// # Panics
    /// Panics if `arrival_sequence` is not greater than the current tail's
    pub fn push_back(&mut self, order_id: OrderId, arrival_sequence: u64, quantity: Quantity) {
        if let Some(tail) = self.orders.back() {
            assert!(
                arrival_sequence > tail.arrival_sequence,
                "FIFO order broken: arrival {} after {}",
                arrival_sequence,
                tail.arrival_sequence
            );
        }

        self.orders.push_back(LevelEntry {
            order_id,
            arrival_sequence,
            remaining_quantity: quantity,
        });
        self.total_quantity = self.total_quantity + quantity;
    }

    /// Remove an order from the queue by OrderId
    ///
    /// Returns the remaining quantity of the removed order, or None if not found
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Quantity> {
        let position = self.orders.iter().position(|entry| &entry.order_id == order_id)?;
        let entry = self.orders.remove(position)?;

        self.total_quantity = self.total_quantity.saturating_sub(entry.remaining_quantity);

        Some(entry.remaining_quantity)
    }

    /// Peek at the front order without removing it
    pub fn peek_front(&self) -> Option<&LevelEntry> {
        self.orders.front()
    }

    /// Pop the front order from the queue
    pub fn pop_front(&mut self) -> Option<LevelEntry> {
        let entry = self.orders.pop_front()?;
        self.total_quantity = self.total_quantity.saturating_sub(entry.remaining_quantity);
        Some(entry)
    }

    /// Reduce the front order by a fill
    ///
    /// The front order is popped once fully consumed. Returns the filled
    /// entry's id and what remains of it, or None on an empty level.
    ///
    /// # Panics
    /// Panics if `fill` exceeds the front order's remaining quantity
    pub fn fill_front(&mut self, fill: Quantity) -> Option<(OrderId, Quantity)> {
        let entry = self.orders.front_mut()?;
        let remaining = entry
            .remaining_quantity
            .checked_sub(fill)
            .unwrap_or_else(|| panic!("Fill would exceed resting quantity"));
        let order_id = entry.order_id;

        if remaining.is_zero() {
            self.orders.pop_front();
        } else {
            entry.remaining_quantity = remaining;
        }

        self.total_quantity = self.total_quantity.saturating_sub(fill);
        Some((order_id, remaining))
    }

    /// Iterate entries front to back
    pub fn iter(&self) -> impl Iterator<Item = &LevelEntry> {
        self.orders.iter()
    }

    /// Check if the price level is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Get the total quantity at this price level
    pub fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    /// Get the number of orders at this level
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Whether arrival sequences ascend strictly and the cached total
    /// matches the sum of entries
    pub fn is_consistent(&self) -> bool {
        let ascending = self
            .orders
            .iter()
            .zip(self.orders.iter().skip(1))
            .all(|(a, b)| a.arrival_sequence < b.arrival_sequence);
        let sum = self
            .orders
            .iter()
            .fold(Quantity::zero(), |acc, e| acc + e.remaining_quantity);
        ascending && sum == self.total_quantity
    }
}

impl Default for PriceLevel {
    fn default() -> Self {
        Self::new()
    }
}
