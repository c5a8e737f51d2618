//! Simulated participants

pub mod retail_trader;
