//! Simulation runner
//!
//! Wires one engine, one stream publisher and an in-memory trade sink,
//! runs a market maker per book and the retail traders for the configured
//! duration, then closes every book and assembles the report.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use market_data::StreamPublisher;
use market_maker::{MakerError, MakerSummary, MarketMaker};
use matching_engine::{BookListener, MatchingEngine, MemorySink};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::errors::EngineError;
use types::ids::OwnerId;

use crate::bots::retail_trader::{RetailTrader, TraderStats};
use crate::config::{ConfigError, SimulationConfig};
use crate::report::{MarketReport, SimulationReport};

/// How long to wait for the dispatchers to finish after close
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("market maker failed: {0}")]
    Maker(#[from] MakerError),

    #[error("simulation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Run one simulation to completion.
pub async fn run_simulation(config: SimulationConfig) -> Result<SimulationReport, SimError> {
    config.validate()?;

    let publisher = Arc::new(StreamPublisher::new(config.backpressure.clone()));
    let sink = Arc::new(MemorySink::new());
    let listener: Arc<dyn BookListener> = publisher.clone();
    let engine = Arc::new(MatchingEngine::new(config.engine.clone(), sink.clone(), vec![listener]));
    let mut failures = engine.take_delivery_failures();

    for key in &config.markets {
        engine.open_market(key.clone())?;
    }
    info!(
        markets = config.markets.len(),
        retail_traders = config.retail_traders,
        duration_ms = config.duration_ms,
        seed = config.seed,
        "Simulation started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let makers: Vec<JoinHandle<Result<MakerSummary, MakerError>>> = config
        .markets
        .iter()
        .map(|key| {
            let maker = MarketMaker::new(
                key.clone(),
                engine.clone(),
                publisher.clone(),
                config.market_maker.clone(),
            );
            tokio::spawn(maker.run(shutdown_rx.clone()))
        })
        .collect();

    let interval = Duration::from_millis(config.order_interval_ms.max(1));
    let traders: Vec<JoinHandle<TraderStats>> = (0..config.retail_traders)
        .map(|i| {
            let trader = RetailTrader::new(
                OwnerId::new(),
                config.retail.clone(),
                config.seed.wrapping_add(i as u64),
            );
            tokio::spawn(trader.run(
                engine.clone(),
                publisher.clone(),
                config.markets.clone(),
                interval,
                shutdown_rx.clone(),
            ))
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(config.duration_ms)).await;
    let _ = shutdown_tx.send(true);

    let mut trader_stats = Vec::with_capacity(traders.len());
    for handle in traders {
        trader_stats.push(handle.await?);
    }
    let mut maker_summaries = Vec::with_capacity(makers.len());
    for handle in makers {
        maker_summaries.push(handle.await??);
    }

    let mut closed = Vec::with_capacity(config.markets.len());
    for key in &config.markets {
        let final_book = engine.get_snapshot(key)?;
        let cancelled = engine.close_market(key).await?;
        closed.push(((*final_book).clone(), cancelled.len()));
    }

    // The publisher forgets a book once its stream dispatcher reaches the
    // close; the sink queue drains on its own dispatcher
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !publisher.markets().is_empty() || engine.metrics().records_pending() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            streams = publisher.markets().len(),
            records_pending = engine.metrics().records_pending(),
            "Dispatchers did not drain before the report"
        );
    }

    let mut delivery_failures = 0;
    if let Some(rx) = failures.as_mut() {
        while let Ok(failure) = rx.try_recv() {
            warn!(key = %failure.key, error = %failure.error, "Sink delivery failed");
            delivery_failures += 1;
        }
    }

    let trades = sink.trades().await;
    let markets: Vec<MarketReport> = closed
        .into_iter()
        .map(|(final_book, cancelled)| MarketReport::build(final_book, &trades, cancelled))
        .collect();

    let report = SimulationReport {
        version: crate::VERSION.to_string(),
        generated_at: Utc::now(),
        duration_ms: config.duration_ms,
        markets,
        engine_metrics: engine.metrics().export(),
        publisher_metrics: publisher.metrics().export(),
        makers: maker_summaries,
        traders: trader_stats,
        delivery_failures,
    };

    info!(
        trades = report.total_trades(),
        volume = %report.total_volume(),
        delivery_failures,
        "Simulation finished"
    );
    Ok(report)
}
