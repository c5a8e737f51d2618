//! Simulation report
//!
//! Per-book trade statistics and final books, plus engine and publisher
//! counters, serialized to JSON at the end of a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use market_maker::MakerSummary;
use matching_engine::BookSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::BookKey;
use types::numeric::Price;
use types::trade::Trade;

use crate::bots::retail_trader::TraderStats;

/// Outcome of one book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    pub key: BookKey,
    pub trades: usize,
    pub volume: Decimal,
    pub notional: Decimal,
    pub last_price: Option<Price>,
    /// Book as it stood just before close
    pub final_book: BookSnapshot,
    /// Orders still resting when the book closed
    pub cancelled_on_close: usize,
}

impl MarketReport {
    /// Aggregate `trades` that belong to `final_book.key`.
    pub fn build(final_book: BookSnapshot, trades: &[Trade], cancelled_on_close: usize) -> Self {
        let mut report = Self {
            key: final_book.key.clone(),
            trades: 0,
            volume: Decimal::ZERO,
            notional: Decimal::ZERO,
            last_price: None,
            final_book,
            cancelled_on_close,
        };

        let mut last_sequence = 0;
        for trade in trades.iter().filter(|t| t.key == report.key) {
            report.trades += 1;
            report.volume += trade.quantity.as_decimal();
            report.notional += trade.trade_value();
            if trade.sequence >= last_sequence {
                last_sequence = trade.sequence;
                report.last_price = Some(trade.price);
            }
        }
        report
    }

    /// Whether the final book was crossed
    pub fn crossed(&self) -> bool {
        matches!(
            (self.final_book.best_bid, self.final_book.best_ask),
            (Some(bid), Some(ask)) if bid >= ask
        )
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub markets: Vec<MarketReport>,
    pub engine_metrics: BTreeMap<String, u64>,
    pub publisher_metrics: BTreeMap<String, u64>,
    pub makers: Vec<MakerSummary>,
    pub traders: Vec<TraderStats>,
    /// Trades and retired orders the sink refused
    pub delivery_failures: usize,
}

impl SimulationReport {
    pub fn total_trades(&self) -> usize {
        self.markets.iter().map(|m| m.trades).sum()
    }

    pub fn total_volume(&self) -> Decimal {
        self.markets.iter().map(|m| m.volume).sum()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
