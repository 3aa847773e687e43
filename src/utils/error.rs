use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create connection to {uri}: {reason}")]
    ConnectionCreation { uri: String, reason: String },

    #[error("Connection to {uri} not established within {budget:?}")]
    ConnectionCreationTimeout { uri: String, budget: Duration },

    #[error("Pool for {uri} exhausted ({pool_size} live connections, none borrowable)")]
    PoolExhausted { uri: String, pool_size: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Connection to {uri} closed")]
    ConnectionClosed { uri: String },

    #[error("Failed to reuse connection: {0}")]
    RuntimeReuse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Whether the caller may reasonably retry the same borrow after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::PoolExhausted { .. }
                | PoolError::ConnectionClosed { .. }
                | PoolError::ConnectionCreationTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
