//! Simulation configuration
//!
//! Every section falls back to its defaults, so a config file only needs
//! the fields it changes.

use market_data::BackpressureConfig;
use market_maker::MarketMakerConfig;
use matching_engine::EngineConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::ids::BookKey;

use crate::bots::retail_trader::RetailTraderConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid simulation config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("simulation needs at least one market")]
    NoMarkets,
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Books to open; one market maker runs on each
    pub markets: Vec<BookKey>,
    /// Wall-clock length of the trading phase
    pub duration_ms: u64,
    /// Number of retail traders
    pub retail_traders: usize,
    /// Base RNG seed; trader `i` uses `seed + i`
    pub seed: u64,
    /// Pause between two orders of one trader
    pub order_interval_ms: u64,
    pub engine: EngineConfig,
    pub backpressure: BackpressureConfig,
    pub market_maker: MarketMakerConfig,
    pub retail: RetailTraderConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            markets: vec![
                BookKey::new("milestone-1", "yes"),
                BookKey::new("milestone-1", "no"),
                BookKey::new("milestone-2", "yes"),
                BookKey::new("milestone-2", "no"),
            ],
            duration_ms: 2_000,
            retail_traders: 8,
            seed: 42,
            order_interval_ms: 5,
            engine: EngineConfig {
                price_tick: Some(Decimal::new(1, 2)),
                ..EngineConfig::default()
            },
            backpressure: BackpressureConfig::default(),
            market_maker: MarketMakerConfig::default(),
            retail: RetailTraderConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markets.is_empty() {
            return Err(ConfigError::NoMarkets);
        }
        Ok(())
    }
}
