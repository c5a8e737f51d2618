use market_data::StreamError;
use thiserror::Error;
use types::errors::EngineError;

/// Conditions that stop a market maker
///
/// Rejected quotes and stale cancels are not errors; they are logged and
/// counted in `MakerStats`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MakerError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}
