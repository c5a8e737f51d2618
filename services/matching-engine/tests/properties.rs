//! Property tests for the single-book matching core
//!
//! Random streams of limit, market and cancel intents are applied to an
//! `OrderBook`; after every intent the book must be uncrossed, quantity
//! must be conserved and deltas must be contiguous.

use std::collections::HashMap;

use matching_engine::book::OrderBook;
use matching_engine::snapshot::BookSnapshot;
use proptest::prelude::*;
use types::ids::{BookKey, OrderId, OwnerId};
use types::numeric::{Price, Quantity};
use types::order::{OrderStatus, PlaceOrder, Side};

const TS: i64 = 1708123456789000000;

#[derive(Debug, Clone)]
enum Intent {
    Limit { buy: bool, price: u64, qty: u64 },
    Market { buy: bool, qty: u64 },
    /// Cancel the n-th order placed so far (modulo count)
    Cancel { nth: usize },
}

fn intent_strategy() -> impl Strategy<Value = Intent> {
    prop_oneof![
        6 => (any::<bool>(), 90u64..=110, 1u64..=20)
            .prop_map(|(buy, price, qty)| Intent::Limit { buy, price, qty }),
        1 => (any::<bool>(), 1u64..=30).prop_map(|(buy, qty)| Intent::Market { buy, qty }),
        2 => any::<usize>().prop_map(|nth| Intent::Cancel { nth }),
    ]
}

fn side(buy: bool) -> Side {
    if buy {
        Side::BUY
    } else {
        Side::SELL
    }
}

fn resting_total(snapshot: &BookSnapshot) -> Quantity {
    snapshot
        .bids
        .iter()
        .chain(snapshot.asks.iter())
        .fold(Quantity::zero(), |acc, level| acc + level.quantity)
}

fn key() -> BookKey {
    BookKey::new("milestone-prop", "yes")
}

proptest! {
    #[test]
    fn prop_book_never_crossed(intents in prop::collection::vec(intent_strategy(), 1..200)) {
        let mut book = OrderBook::new(key());
        let owner = OwnerId::new();
        let mut placed: Vec<OrderId> = Vec::new();

        for intent in intents {
            match intent {
                Intent::Limit { buy, price, qty } => {
                    let id = OrderId::new();
                    book.submit(id, PlaceOrder::limit(key(), side(buy), Price::from_u64(price), Quantity::from_u64(qty), owner), TS);
                    placed.push(id);
                }
                Intent::Market { buy, qty } => {
                    book.submit(OrderId::new(), PlaceOrder::market(key(), side(buy), Quantity::from_u64(qty), owner), TS);
                }
                Intent::Cancel { nth } => {
                    if !placed.is_empty() {
                        let id = placed[nth % placed.len()];
                        book.cancel(&id, owner, TS);
                    }
                }
            }

            if let (Some((bid, _)), Some((ask, _))) = (book.best_bid(), book.best_ask()) {
                prop_assert!(bid < ask, "crossed book: bid {} ask {}", bid, ask);
            }
        }
    }

    #[test]
    fn prop_quantity_conserved(intents in prop::collection::vec(intent_strategy(), 1..150)) {
        let mut book = OrderBook::new(key());
        let owner = OwnerId::new();
        let mut placed: Vec<OrderId> = Vec::new();
        let mut last_sequence = 0u64;

        for intent in intents {
            let before = book.snapshot(TS);
            let request = match intent {
                Intent::Limit { buy, price, qty } => {
                    PlaceOrder::limit(key(), side(buy), Price::from_u64(price), Quantity::from_u64(qty), owner)
                }
                Intent::Market { buy, qty } => PlaceOrder::market(key(), side(buy), Quantity::from_u64(qty), owner),
                Intent::Cancel { nth } => {
                    if placed.is_empty() {
                        continue;
                    }
                    let id = placed[nth % placed.len()];
                    let outcome = book.cancel(&id, owner, TS);
                    if let Some(delta) = outcome.delta {
                        prop_assert_eq!(delta.sequence, last_sequence + 1);
                        last_sequence = delta.sequence;
                        let order = outcome.order.unwrap();
                        let after = book.snapshot(TS);
                        prop_assert_eq!(resting_total(&before), resting_total(&after) + order.remaining_quantity);
                    }
                    continue;
                }
            };

            // Remaining of every maker before the intent
            let makers_before: HashMap<OrderId, Quantity> = placed
                .iter()
                .filter_map(|id| book.order(id).map(|o| (*id, o.remaining_quantity)))
                .collect();

            let id = OrderId::new();
            let taker_quantity = request.quantity;
            let outcome = book.submit(id, request, TS);
            placed.push(id);

            prop_assert_eq!(outcome.delta.sequence, last_sequence + 1);
            last_sequence = outcome.delta.sequence;

            // Per trade: both sides shrink by the trade quantity
            let mut per_maker: HashMap<OrderId, Quantity> = HashMap::new();
            let mut traded = Quantity::zero();
            for trade in &outcome.trades {
                prop_assert_eq!(trade.taker_order_id, id);
                traded = traded + trade.quantity;
                let entry = per_maker.entry(trade.maker_order_id).or_insert_with(Quantity::zero);
                *entry = *entry + trade.quantity;
            }
            prop_assert_eq!(traded, outcome.order.filled_quantity);
            for (maker, filled) in &per_maker {
                let before_remaining = makers_before[maker];
                let after_remaining = book
                    .order(maker)
                    .map(|o| o.remaining_quantity)
                    .unwrap_or_else(Quantity::zero);
                prop_assert_eq!(before_remaining, after_remaining + *filled);
            }

            // Book-wide: resting + incoming = resting' + 2 * traded + discarded
            let discarded = match outcome.order.status {
                OrderStatus::Rejected(_) => outcome.order.remaining_quantity,
                _ => Quantity::zero(),
            };
            let after = book.snapshot(TS);
            prop_assert_eq!(
                resting_total(&before) + taker_quantity,
                resting_total(&after) + traded + traded + discarded
            );
            prop_assert!(outcome.order.check_invariant());
        }
    }
}
