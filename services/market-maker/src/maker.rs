//! Market maker participant
//!
//! Quotes one book through the engine's public intake, exactly like any
//! other client. It never sees fills directly: a quote's fills are learned
//! from the submit ack and, later, from the outcome of cancelling it.
//! A cancel answered with `OrderNotFound` means the quote already left the
//! book, i.e. it was fully filled.
//!
//! The run loop requotes on a timer and whenever the stream shows the
//! external reference price moving by more than the configured threshold.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use market_data::{BookMirror, StreamError, StreamMessage, StreamPublisher};
use matching_engine::MatchingEngine;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use types::errors::EngineError;
use types::ids::{BookKey, ClientRequestId, OrderId, OwnerId};
use types::numeric::{Price, Quantity};
use types::order::{PlaceOrder, Side};

use crate::config::MarketMakerConfig;
use crate::error::MakerError;
use crate::strategy::{MarketView, Quote, QuoteStrategy, SpreadStrategy};

/// A quote believed to be resting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveQuote {
    order_id: OrderId,
    side: Side,
    price: Price,
    quantity: Quantity,
    /// Fills already accounted for in inventory
    filled_known: Quantity,
}

impl LiveQuote {
    fn believed_remaining(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled_known)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MakerStats {
    pub requotes: u64,
    pub quotes_submitted: u64,
    pub quotes_rejected: u64,
    pub quotes_cancelled: u64,
    /// Cancels that found the quote already gone
    pub stale_quotes: u64,
    pub fills: u64,
    pub bought: Decimal,
    pub sold: Decimal,
    pub resubscriptions: u64,
}

/// Final state of a maker, for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakerSummary {
    pub key: BookKey,
    pub owner_id: OwnerId,
    pub inventory: Decimal,
    pub live_quotes: usize,
    pub stats: MakerStats,
}

pub struct MarketMaker<S: QuoteStrategy = SpreadStrategy> {
    key: BookKey,
    owner_id: OwnerId,
    engine: Arc<MatchingEngine>,
    publisher: Arc<StreamPublisher>,
    config: MarketMakerConfig,
    strategy: S,
    bid: Option<LiveQuote>,
    ask: Option<LiveQuote>,
    inventory: Decimal,
    mirror: Option<BookMirror>,
    last_reference: Option<Decimal>,
    /// Book sequence after the last requote; deltas up to it were caused
    /// by (or seen before) that requote
    watermark: u64,
    stats: MakerStats,
}

impl MarketMaker<SpreadStrategy> {
    pub fn new(
        key: BookKey,
        engine: Arc<MatchingEngine>,
        publisher: Arc<StreamPublisher>,
        config: MarketMakerConfig,
    ) -> Self {
        let strategy = SpreadStrategy::new(config.clone());
        Self::with_strategy(key, engine, publisher, config, strategy)
    }
}

impl<S: QuoteStrategy> MarketMaker<S> {
    pub fn with_strategy(
        key: BookKey,
        engine: Arc<MatchingEngine>,
        publisher: Arc<StreamPublisher>,
        config: MarketMakerConfig,
        strategy: S,
    ) -> Self {
        Self {
            key,
            owner_id: OwnerId::new(),
            engine,
            publisher,
            config,
            strategy,
            bid: None,
            ask: None,
            inventory: Decimal::ZERO,
            mirror: None,
            last_reference: None,
            watermark: 0,
            stats: MakerStats::default(),
        }
    }

    pub fn key(&self) -> &BookKey {
        &self.key
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// Net position learned so far: bought minus sold
    pub fn inventory(&self) -> Decimal {
        self.inventory
    }

    pub fn stats(&self) -> &MakerStats {
        &self.stats
    }

    /// Order ids of the quotes believed to be resting, bid first
    pub fn live_quotes(&self) -> Vec<OrderId> {
        self.bid.iter().chain(self.ask.iter()).map(|q| q.order_id).collect()
    }

    pub fn summary(&self) -> MakerSummary {
        MakerSummary {
            key: self.key.clone(),
            owner_id: self.owner_id,
            inventory: self.inventory,
            live_quotes: self.live_quotes().len(),
            stats: self.stats.clone(),
        }
    }

    /// Pull the live quotes, learn their fills, and quote again around
    /// the current external book
    pub async fn requote(&mut self) -> Result<Quote, MakerError> {
        self.stats.requotes += 1;
        self.withdraw_quotes().await?;

        // Own quotes are out of the book, so this is the external book
        let snapshot = self.engine.get_snapshot(&self.key)?;
        let view = MarketView {
            best_bid: snapshot.best_bid,
            best_ask: snapshot.best_ask,
            inventory: self.inventory,
        };
        let quote = self.strategy.quote(&view);

        if let Some(price) = quote.bid {
            self.bid = self.place(Side::BUY, price, quote.quantity).await?;
        }
        if let Some(price) = quote.ask {
            self.ask = self.place(Side::SELL, price, quote.quantity).await?;
        }

        self.last_reference = Some(quote.reference);
        self.watermark = self.engine.get_snapshot(&self.key)?.sequence;

        debug!(
            key = %self.key,
            reference = %quote.reference,
            bid = ?quote.bid,
            ask = ?quote.ask,
            inventory = %self.inventory,
            "Requoted"
        );
        Ok(quote)
    }

    /// Cancel every live quote, learning any fills they took
    pub async fn withdraw_quotes(&mut self) -> Result<(), MakerError> {
        if let Some(quote) = self.bid.take() {
            self.cancel_quote(quote).await?;
        }
        if let Some(quote) = self.ask.take() {
            self.cancel_quote(quote).await?;
        }
        Ok(())
    }

    /// Quote until `shutdown` flips to true (or its sender goes away),
    /// then withdraw. Ends early without withdrawing if the book closes,
    /// since closing already cancelled the quotes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<MakerSummary, MakerError> {
        info!(key = %self.key, owner = %self.owner_id, "Market maker started");

        let mut subscription = self.publisher.subscribe(&self.key);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.requote_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resubscribe = false;

        while !*shutdown.borrow() {
            if resubscribe {
                subscription = self.publisher.subscribe(&self.key);
                self.mirror = None;
                self.stats.resubscriptions += 1;
                resubscribe = false;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.requote().await?;
                }
                item = subscription.next() => match item {
                    Some(Ok(StreamMessage::Snapshot(snapshot))) => {
                        match BookMirror::from_stream_snapshot(&snapshot) {
                            Ok(mirror) => self.mirror = Some(mirror),
                            Err(err) => {
                                warn!(key = %self.key, error = %err, "Bad snapshot, resubscribing");
                                resubscribe = true;
                            }
                        }
                    }
                    Some(Ok(StreamMessage::Delta(delta))) => {
                        let applied = match self.mirror.as_mut() {
                            Some(mirror) => mirror.apply(&delta),
                            None => Ok(()),
                        };
                        match applied {
                            Ok(()) if delta.sequence > self.watermark && self.reference_moved() => {
                                self.requote().await?;
                            }
                            Ok(()) => {}
                            Err(err) => {
                                warn!(key = %self.key, error = %err, "Mirror out of step, resubscribing");
                                resubscribe = true;
                            }
                        }
                    }
                    Some(Err(StreamError::Lagged { .. })) => {
                        warn!(key = %self.key, "Book stream lagged, resubscribing");
                        resubscribe = true;
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        // Closing the book cancelled the quotes for us
                        self.bid = None;
                        self.ask = None;
                        info!(key = %self.key, inventory = %self.inventory, "Book closed, market maker stopped");
                        return Ok(self.summary());
                    }
                }
            }
        }

        self.withdraw_quotes().await?;
        info!(
            key = %self.key,
            inventory = %self.inventory,
            requotes = self.stats.requotes,
            fills = self.stats.fills,
            "Market maker stopped"
        );
        Ok(self.summary())
    }

    async fn place(&mut self, side: Side, price: Price, quantity: Quantity) -> Result<Option<LiveQuote>, MakerError> {
        let request = PlaceOrder::limit(self.key.clone(), side, price, quantity, self.owner_id)
            .with_client_request_id(ClientRequestId::generate());

        match self.engine.submit_order(request).await {
            Ok(ack) => {
                self.stats.quotes_submitted += 1;
                self.record_fill(side, ack.filled_quantity);
                if ack.is_resting() {
                    Ok(Some(LiveQuote {
                        order_id: ack.order_id,
                        side,
                        price,
                        quantity,
                        filled_known: ack.filled_quantity,
                    }))
                } else {
                    Ok(None)
                }
            }
            Err(EngineError::InvalidOrder(reason)) => {
                self.stats.quotes_rejected += 1;
                warn!(key = %self.key, side = ?side, price = %price, reason = %reason, "Quote rejected");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn cancel_quote(&mut self, quote: LiveQuote) -> Result<(), MakerError> {
        match self.engine.cancel_order(quote.order_id, self.owner_id).await {
            Ok(ack) => {
                self.stats.quotes_cancelled += 1;
                self.record_fill(quote.side, ack.order.filled_quantity.saturating_sub(quote.filled_known));
                Ok(())
            }
            Err(EngineError::OrderNotFound { .. }) => {
                self.stats.stale_quotes += 1;
                debug!(key = %self.key, order_id = %quote.order_id, "Quote gone before cancel, counting as filled");
                self.record_fill(quote.side, quote.believed_remaining());
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn record_fill(&mut self, side: Side, quantity: Quantity) {
        if quantity.is_zero() {
            return;
        }
        let amount = quantity.as_decimal();
        match side {
            Side::BUY => {
                self.inventory += amount;
                self.stats.bought += amount;
            }
            Side::SELL => {
                self.inventory -= amount;
                self.stats.sold += amount;
            }
        }
        self.stats.fills += 1;
        debug!(key = %self.key, side = ?side, quantity = %quantity, inventory = %self.inventory, "Fill learned");
    }

    /// External view from the mirror, own quotes subtracted
    fn mirrored_view(&self) -> Option<MarketView> {
        let mirror = self.mirror.as_ref()?;
        let bids = mirror.bid_levels().into_iter().map(|l| (l.price, l.quantity));
        let asks = mirror.ask_levels().into_iter().map(|l| (l.price, l.quantity));
        Some(MarketView {
            best_bid: external_best(bids, self.bid.as_ref()),
            best_ask: external_best(asks, self.ask.as_ref()),
            inventory: self.inventory,
        })
    }

    fn reference_moved(&self) -> bool {
        let Some(view) = self.mirrored_view() else {
            return false;
        };
        let reference = self.strategy.reference_price(&view);
        match self.last_reference {
            Some(last) if !last.is_zero() => {
                let moved_bps = (reference - last).abs() / last * Decimal::from(10_000);
                moved_bps >= Decimal::from(self.config.requote_threshold_bps)
            }
            _ => true,
        }
    }
}

/// Best price on one side once our own resting quantity is taken out
fn external_best(levels: impl IntoIterator<Item = (Price, Quantity)>, own: Option<&LiveQuote>) -> Option<Price> {
    levels
        .into_iter()
        .find(|(price, quantity)| {
            let external = match own {
                Some(quote) if quote.price == *price => quantity.saturating_sub(quote.believed_remaining()),
                _ => *quantity,
            };
            !external.is_zero()
        })
        .map(|(price, _)| price)
}
