use std::time::Duration;

use thiserror::Error;

/// Error type produced by a value factory.
pub type FactoryError = Box<dyn std::error::Error + Send + Sync>;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// A value factory failed while producing a value for a key.
    #[error("value factory failed")]
    Factory(#[source] FactoryError),

    /// A refresh cache had to produce a value but no factory was available for the key.
    #[error("no factory available to produce a missing value")]
    NoFactory,

    /// A cleanup frequency of zero would make the janitor spin.
    #[error("cleanup frequency must be greater than zero, got {0:?}")]
    InvalidFrequency(Duration),

    /// The janitor was shut down, so a new registration would never run.
    #[error("janitor has been shut down")]
    ShutDown,

    #[error("invalid cache configuration")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("failed to start background thread")]
    Thread(#[from] std::io::Error),
}
