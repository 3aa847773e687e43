//! Per-destination connection pooling.
//!
//! A [`PoolRegistry`] maps each destination to a [`UriPool`], which owns the
//! [`ConnectionRecord`]s for that destination and decides, for every borrow,
//! whether to reuse a connection, open a new one, or report exhaustion.
//! A [`HealthChecker`] sweeps idle expired connections in the background.

#[cfg(feature = "metrics")]
pub mod exporter;
pub mod handle;
pub mod health;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod token;
pub mod uri_pool;

#[cfg(test)]
pub(crate) mod test_support;

pub use handle::{ConnectionFactory, ConnectionHandle};
pub use health::HealthChecker;
pub use metrics::{DestinationCounters, MetricsSnapshot, PoolMetrics};
pub use record::{ConnectionRecord, RecordContext, RecordState};
pub use registry::PoolRegistry;
pub use token::BorrowToken;
pub use uri_pool::{PoolStatus, UriPool};
