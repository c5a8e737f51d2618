//! Simulation & Liquidity Testing Framework
//!
//! Drives the matching engine, the stream publisher and the market makers
//! together under seeded retail flow, then reports what happened.
//!
//! # Modules
//! - `config`: JSON-loadable simulation configuration
//! - `bots`: Retail trader bot
//! - `runner`: Wiring, run phase, close and drain
//! - `report`: Per-book statistics and JSON export

pub mod bots;
pub mod config;
pub mod report;
pub mod runner;

pub use bots::retail_trader::{RetailTrader, RetailTraderConfig, TraderStats};
pub use config::{ConfigError, SimulationConfig};
pub use report::{MarketReport, SimulationReport};
pub use runner::{run_simulation, SimError};

/// Crate version constant
pub const VERSION: &str = "1.0.0";
