//! Single-book matching core
//!
//! `OrderBook` owns both sides of one market option and applies intents one
//! at a time: submit (match, then rest or discard the remainder), cancel
//! and close. It performs no I/O and is driven exclusively by the book's
//! task, which gives every intent exclusive access for its whole duration.
//!
//! Each intent consumes one event sequence. A submit's event sequence is
//! also its arrival sequence, so FIFO order inside a level and delta order
//! on the stream share one counter.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, error};
use types::ids::{BookKey, OrderId, OwnerId};
use types::numeric::{Price, Quantity};
use types::order::{CancelReason, Order, OrderKind, PlaceOrder, RejectReason, Side};
use types::trade::Trade;

use super::ask_book::AskBook;
use super::bid_book::BidBook;
use super::price_level::PriceLevel;
use crate::delta::{BookDelta, DeltaBuilder};
use crate::matching::{can_match, incoming_can_match, MatchExecutor};
use crate::snapshot::BookSnapshot;

/// Result of a submit
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The taker after matching; resting iff `order.is_resting()`
    pub order: Order,
    /// Trades in execution order
    pub trades: Vec<Trade>,
    pub delta: BookDelta,
    /// Makers fully filled by this intent
    pub retired: Vec<Order>,
}

/// Result of a cancel
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    /// False for unknown, terminal or foreign-owned ids; nothing changed
    pub removed: bool,
    /// The cancelled order's final state
    pub order: Option<Order>,
    pub delta: Option<BookDelta>,
}

impl CancelOutcome {
    fn not_removed() -> Self {
        Self {
            removed: false,
            order: None,
            delta: None,
        }
    }
}

/// One fill against the front of the best opposite level
struct MatchStep {
    price: Price,
    level_before: Quantity,
    maker_id: OrderId,
    maker_remaining: Quantity,
    fill: Quantity,
    level_empty: bool,
}

/// Order book for one market option
#[derive(Debug, Clone)]
pub struct OrderBook {
    key: BookKey,
    bids: BidBook,
    asks: AskBook,
    /// Resting orders only; retired orders leave immediately
    orders: HashMap<OrderId, Order>,
    event_sequence: u64,
    executor: MatchExecutor,
}

impl OrderBook {
    pub fn new(key: BookKey) -> Self {
        Self::with_trade_sequence(key, 1)
    }

    /// Create a book whose first trade carries `trade_sequence_start`
    pub fn with_trade_sequence(key: BookKey, trade_sequence_start: u64) -> Self {
        Self {
            key,
            bids: BidBook::new(),
            asks: AskBook::new(),
            orders: HashMap::new(),
            event_sequence: 0,
            executor: MatchExecutor::new(trade_sequence_start),
        }
    }

    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// Last event sequence consumed
    pub fn sequence(&self) -> u64 {
        self.event_sequence
    }

    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.best_bid()
    }

    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.best_ask()
    }

    /// Look up a resting order
    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn resting_count(&self) -> usize {
        self.orders.len()
    }

    fn next_sequence(&mut self) -> u64 {
        self.event_sequence += 1;
        self.event_sequence
    }

    fn level_quantity(&self, side: Side, price: Price) -> Quantity {
        match side {
            Side::BUY => self.bids.level_quantity(price),
            Side::SELL => self.asks.level_quantity(price),
        }
    }

    /// Match an incoming order, then rest or discard its remainder
    pub fn submit(&mut self, order_id: OrderId, request: PlaceOrder, timestamp: i64) -> SubmitOutcome {
        let arrival_sequence = self.next_sequence();
        let mut taker = Order::accept(order_id, request, arrival_sequence, timestamp);
        let maker_side = taker.side.opposite();

        let mut delta = DeltaBuilder::new();
        let mut trades = Vec::new();
        let mut retired = Vec::new();

        while !taker.remaining_quantity.is_zero() {
            let step = match best_level_mut(&mut self.bids, &mut self.asks, maker_side) {
                Some((price, level)) if incoming_can_match(taker.side, taker.price, price) => {
                    let level_before = level.total_quantity();
                    let Some(front) = level.peek_front().copied() else {
                        invariant_violation(&self.key, arrival_sequence, "empty price level left in book")
                    };
                    let fill = front.remaining_quantity.min(taker.remaining_quantity);
                    let maker_remaining = match level.fill_front(fill) {
                        Some((_, remaining)) => remaining,
                        None => invariant_violation(&self.key, arrival_sequence, "front order vanished"),
                    };

                    MatchStep {
                        price,
                        level_before,
                        maker_id: front.order_id,
                        maker_remaining,
                        fill,
                        level_empty: level.is_empty(),
                    }
                }
                _ => break,
            };

            delta.touch(maker_side, step.price, step.level_before);

            let Some(maker) = self.orders.get_mut(&step.maker_id) else {
                invariant_violation(&self.key, arrival_sequence, format!("resting order {} not indexed", step.maker_id))
            };
            maker.add_fill(step.fill, timestamp);
            taker.add_fill(step.fill, timestamp);

            if maker.remaining_quantity != step.maker_remaining {
                invariant_violation(
                    &self.key,
                    arrival_sequence,
                    format!("order {} diverged from its level entry", step.maker_id),
                );
            }

            trades.push(self.executor.execute_trade(
                &self.key,
                &taker,
                maker,
                step.price,
                step.fill,
                timestamp,
            ));

            if maker.is_filled() {
                if let Some(filled) = self.orders.remove(&step.maker_id) {
                    retired.push(filled);
                }
            }
            if step.level_empty {
                remove_level(&mut self.bids, &mut self.asks, maker_side, step.price);
            }
        }

        if !taker.remaining_quantity.is_zero() {
            match (taker.kind, taker.price) {
                (OrderKind::LIMIT, Some(price)) => {
                    delta.touch(taker.side, price, self.level_quantity(taker.side, price));
                    match taker.side {
                        Side::BUY => self.bids.insert(taker.order_id, arrival_sequence, price, taker.remaining_quantity),
                        Side::SELL => self.asks.insert(taker.order_id, arrival_sequence, price, taker.remaining_quantity),
                    }
                    self.orders.insert(taker.order_id, taker.clone());
                }
                _ => taker.reject_remainder(RejectReason::InsufficientLiquidity, timestamp),
            }
        }

        let traded = trades
            .iter()
            .fold(Quantity::zero(), |acc, t: &Trade| acc + t.quantity);
        if traded != taker.filled_quantity || !taker.check_invariant() {
            invariant_violation(&self.key, arrival_sequence, "taker quantity not conserved");
        }
        self.assert_uncrossed();

        let delta = delta.finish(&self.key, arrival_sequence, timestamp, |side, price| {
            self.level_quantity(side, price)
        });

        debug!(
            key = %self.key,
            order_id = %taker.order_id,
            sequence = arrival_sequence,
            trades = trades.len(),
            status = ?taker.status,
            "Order processed"
        );

        SubmitOutcome {
            order: taker,
            trades,
            delta,
            retired,
        }
    }

    /// Remove a resting order owned by `owner_id`
    pub fn cancel(&mut self, order_id: &OrderId, owner_id: OwnerId, timestamp: i64) -> CancelOutcome {
        match self.orders.get(order_id) {
            Some(order) if order.owner_id == owner_id => {}
            _ => return CancelOutcome::not_removed(),
        }
        let Some(mut order) = self.orders.remove(order_id) else {
            return CancelOutcome::not_removed();
        };

        let sequence = self.next_sequence();
        let Some(price) = order.price else {
            invariant_violation(&self.key, sequence, format!("resting order {} has no price", order_id))
        };

        let mut delta = DeltaBuilder::new();
        delta.touch(order.side, price, self.level_quantity(order.side, price));

        let removed = match order.side {
            Side::BUY => self.bids.remove(order_id, price),
            Side::SELL => self.asks.remove(order_id, price),
        };
        if removed != Some(order.remaining_quantity) {
            invariant_violation(&self.key, sequence, format!("order {} missing from its level", order_id));
        }

        order.cancel(CancelReason::UserRequested, timestamp);

        let delta = delta.finish(&self.key, sequence, timestamp, |side, price| {
            self.level_quantity(side, price)
        });

        debug!(key = %self.key, order_id = %order_id, sequence, "Order cancelled");

        CancelOutcome {
            removed: true,
            order: Some(order),
            delta: Some(delta),
        }
    }

    /// Cancel every resting order with reason `MarketClosed`
    ///
    /// Returns the cancelled orders in book order (bids best first, then
    /// asks best first, FIFO within a level) and the final delta.
    pub fn close(&mut self, timestamp: i64) -> (Vec<Order>, BookDelta) {
        let sequence = self.next_sequence();
        let mut delta = DeltaBuilder::new();
        let mut cancelled = Vec::with_capacity(self.orders.len());

        let bid_levels = self.bids.levels().map(|(price, level)| (Side::BUY, *price, level));
        let ask_levels = self.asks.levels().map(|(price, level)| (Side::SELL, *price, level));
        for (side, price, level) in bid_levels.chain(ask_levels) {
            delta.touch(side, price, level.total_quantity());
            for entry in level.iter() {
                if let Some(mut order) = self.orders.remove(&entry.order_id) {
                    order.cancel(CancelReason::MarketClosed, timestamp);
                    cancelled.push(order);
                }
            }
        }

        self.bids.clear();
        self.asks.clear();
        if !self.orders.is_empty() {
            invariant_violation(&self.key, sequence, "orders left outside any price level");
        }

        let delta = delta.finish(&self.key, sequence, timestamp, |_, _| Quantity::zero());

        debug!(key = %self.key, sequence, cancelled = cancelled.len(), "Book closed");

        (cancelled, delta)
    }

    /// Full-depth snapshot at the current sequence
    pub fn snapshot(&self, timestamp: i64) -> BookSnapshot {
        BookSnapshot {
            key: self.key.clone(),
            sequence: self.event_sequence,
            bids: self.bids.depth(),
            asks: self.asks.depth(),
            best_bid: self.bids.best_bid_price(),
            best_ask: self.asks.best_ask_price(),
            timestamp,
        }
    }

    /// Rest a bid above every ask without matching, as a corrupted book would
    #[cfg(test)]
    pub(crate) fn corrupt_crossed(&mut self) {
        let sequence = self.event_sequence;
        self.bids.insert(OrderId::new(), sequence, Price::from_u64(1_000_000), Quantity::from_u64(1));
        self.asks.insert(OrderId::new(), sequence, Price::from_u64(1), Quantity::from_u64(1));
    }

    /// Abort if best bid >= best ask
    pub fn assert_uncrossed(&self) {
        if let (Some(bid), Some(ask)) = (self.bids.best_bid_price(), self.asks.best_ask_price()) {
            if can_match(bid, ask) {
                invariant_violation(
                    &self.key,
                    self.event_sequence,
                    format!("book crossed: bid {} >= ask {}", bid, ask),
                );
            }
        }
    }
}

fn best_level_mut<'a>(
    bids: &'a mut BidBook,
    asks: &'a mut AskBook,
    side: Side,
) -> Option<(Price, &'a mut PriceLevel)> {
    match side {
        Side::BUY => bids.best_bid_level_mut(),
        Side::SELL => asks.best_ask_level_mut(),
    }
}

fn remove_level(bids: &mut BidBook, asks: &mut AskBook, side: Side, price: Price) {
    match side {
        Side::BUY => bids.remove_level(price),
        Side::SELL => asks.remove_level(price),
    };
}

/// Log and abort. The book's state can no longer be trusted.
fn invariant_violation(key: &BookKey, sequence: u64, what: impl fmt::Display) -> ! {
    error!(key = %key, sequence, violation = %what, "Book invariant violated");
    panic!("book {} invariant violated at sequence {}: {}", key, sequence, what);
}
