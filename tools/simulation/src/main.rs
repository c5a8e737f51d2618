//! exchange-sim
//!
//! Usage: `exchange-sim [config.json]`. Without a path the default
//! configuration runs. The report is printed to stdout as JSON; logs go to
//! stderr and follow `RUST_LOG`.

use anyhow::Context;
use simulation::{run_simulation, SimulationConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            SimulationConfig::from_json(&json).with_context(|| format!("parsing config {path}"))?
        }
        None => SimulationConfig::default(),
    };

    tracing::info!(version = simulation::VERSION, "Starting exchange simulation");

    let report = run_simulation(config).await?;
    println!("{}", report.to_json());

    Ok(())
}
