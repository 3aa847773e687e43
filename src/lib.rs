// uripool - Per-destination connection pool for outbound network clients

pub mod config;
pub mod net;
pub mod pool;
pub mod utils;

// Re-export commonly used types
pub use pool::{
    BorrowToken, ConnectionFactory, ConnectionHandle, HealthChecker, MetricsSnapshot,
    PoolMetrics, PoolRegistry, UriPool,
};
pub use utils::error::{PoolError, Result};
