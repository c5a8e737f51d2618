//! Retail random trader bot
//!
//! Generates random orders with a deterministic seeded RNG. Produces a mix
//! of market orders and passive limit orders around the mirrored mid of a
//! randomly chosen book, and now and then cancels its oldest resting order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use market_data::StreamPublisher;
use matching_engine::MatchingEngine;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};
use types::errors::EngineError;
use types::ids::{BookKey, OrderId, OwnerId};
use types::numeric::{Price, Quantity};
use types::order::{OrderKind, PlaceOrder, Side};

/// Resting orders a trader keeps before it cancels the oldest
const MAX_RESTING: usize = 32;

/// Configuration for the retail random trader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetailTraderConfig {
    /// Minimum order size (whole units)
    pub min_size: u64,
    /// Maximum order size (whole units)
    pub max_size: u64,
    /// Probability of a market order (0.0 to 1.0)
    pub market_order_ratio: f64,
    /// Probability of cancelling the oldest resting order before a submit
    pub cancel_ratio: f64,
    /// Maximum distance from mid for limit orders (in bps)
    pub max_limit_distance_bps: u32,
    /// Price used while a book has no two-sided mid
    pub reference_price: Decimal,
    /// Limit price increment
    pub tick_size: Decimal,
}

impl Default for RetailTraderConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 20,
            market_order_ratio: 0.3,
            cancel_ratio: 0.1,
            max_limit_distance_bps: 500,
            reference_price: Decimal::new(50, 2),
            tick_size: Decimal::new(1, 2),
        }
    }
}

/// What one trader did over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraderStats {
    pub owner_id: Option<OwnerId>,
    pub orders_submitted: u64,
    pub market_orders: u64,
    pub limit_orders: u64,
    pub rejected: u64,
    /// Intents refused because the book was closed or halted
    pub unavailable: u64,
    pub cancels_sent: u64,
    /// Cancels that found the order already filled
    pub cancels_missed: u64,
    pub filled_quantity: Decimal,
}

/// Retail random trader with deterministic seeded RNG.
pub struct RetailTrader {
    pub owner_id: OwnerId,
    pub config: RetailTraderConfig,
    rng: ChaCha8Rng,
    /// Resting orders with the fill already credited from their ack
    resting: VecDeque<(OrderId, Quantity)>,
    stats: TraderStats,
}

impl RetailTrader {
    /// Create a new retail trader with a deterministic seed.
    pub fn new(owner_id: OwnerId, config: RetailTraderConfig, seed: u64) -> Self {
        Self {
            owner_id,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            resting: VecDeque::new(),
            stats: TraderStats {
                owner_id: Some(owner_id),
                ..TraderStats::default()
            },
        }
    }

    pub fn stats(&self) -> &TraderStats {
        &self.stats
    }

    /// Generate a random order for `key` around `reference`.
    ///
    /// Returns None if the reference is not a usable price.
    pub fn generate_order(&mut self, reference: Decimal, key: &BookKey) -> Option<PlaceOrder> {
        if reference <= Decimal::ZERO {
            return None;
        }

        let side = if self.rng.gen_bool(0.5) { Side::BUY } else { Side::SELL };

        let min = self.config.min_size.max(1);
        let max = self.config.max_size.max(min);
        let quantity = Quantity::from_u64(self.rng.gen_range(min..=max));

        if self.rng.gen_bool(self.config.market_order_ratio.clamp(0.0, 1.0)) {
            return Some(PlaceOrder::market(key.clone(), side, quantity, self.owner_id));
        }

        let bps = self.rng.gen_range(1..=self.config.max_limit_distance_bps.max(1));
        let distance = reference * Decimal::from(bps) / Decimal::from(10_000);
        let tick = self.config.tick_size;
        let raw = match side {
            Side::BUY => snap_down(reference - distance, tick),
            Side::SELL => snap_up(reference + distance, tick),
        };
        // A bid far below a small mid ends at the lowest tick
        let price = Price::try_new(raw).or_else(|| Price::try_new(tick))?;

        Some(PlaceOrder::limit(key.clone(), side, price, quantity, self.owner_id))
    }

    /// Trade on `markets` every `interval` until shutdown.
    pub async fn run(
        mut self,
        engine: Arc<MatchingEngine>,
        publisher: Arc<StreamPublisher>,
        markets: Vec<BookKey>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> TraderStats {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.step(&engine, &publisher, &markets).await;
                }
            }
        }

        info!(
            owner_id = %self.owner_id,
            orders_submitted = self.stats.orders_submitted,
            filled = %self.stats.filled_quantity,
            "Retail trader stopped"
        );
        self.stats
    }

    async fn step(&mut self, engine: &MatchingEngine, publisher: &StreamPublisher, markets: &[BookKey]) {
        if markets.is_empty() {
            return;
        }
        let key = &markets[self.rng.gen_range(0..markets.len())];

        if !self.resting.is_empty() && self.rng.gen_bool(self.config.cancel_ratio.clamp(0.0, 1.0)) {
            self.cancel_oldest(engine).await;
        }

        let reference = publisher
            .snapshot(key)
            .and_then(|snapshot| snapshot.mid_price())
            .unwrap_or(self.config.reference_price);

        let Some(request) = self.generate_order(reference, key) else {
            return;
        };
        let kind = request.kind;

        match engine.submit_order(request).await {
            Ok(ack) => {
                self.stats.orders_submitted += 1;
                match kind {
                    OrderKind::MARKET => self.stats.market_orders += 1,
                    OrderKind::LIMIT => self.stats.limit_orders += 1,
                }
                self.stats.filled_quantity += ack.filled_quantity.as_decimal();
                if ack.is_resting() {
                    self.resting.push_back((ack.order_id, ack.filled_quantity));
                    if self.resting.len() > MAX_RESTING {
                        self.cancel_oldest(engine).await;
                    }
                }
            }
            Err(EngineError::InvalidOrder(reason)) => {
                self.stats.rejected += 1;
                debug!(owner_id = %self.owner_id, key = %key, %reason, "Order rejected");
            }
            Err(e) => {
                self.stats.unavailable += 1;
                debug!(owner_id = %self.owner_id, key = %key, error = %e, "Book unavailable");
            }
        }
    }

    async fn cancel_oldest(&mut self, engine: &MatchingEngine) {
        let Some((order_id, filled_known)) = self.resting.pop_front() else {
            return;
        };

        match engine.cancel_order(order_id, self.owner_id).await {
            Ok(ack) => {
                self.stats.cancels_sent += 1;
                // Fills that happened while the order rested
                let rested_fill = ack.order.filled_quantity.saturating_sub(filled_known);
                self.stats.filled_quantity += rested_fill.as_decimal();
            }
            Err(EngineError::OrderNotFound { .. }) => {
                self.stats.cancels_missed += 1;
            }
            Err(e) => {
                self.stats.unavailable += 1;
                debug!(owner_id = %self.owner_id, %order_id, error = %e, "Cancel refused");
            }
        }
    }
}

fn snap_down(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).floor() * tick
}

fn snap_up(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).ceil() * tick
}
