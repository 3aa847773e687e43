use super::handle::ConnectionFactory;
use super::metrics::PoolMetrics;
use super::record::RecordContext;
use super::token::BorrowToken;
use super::uri_pool::{PoolStatus, UriPool};
use crate::config::PoolSettings;
use crate::utils::error::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Destination → pool map shared by every outbound client.
///
/// Pools are created lazily on first borrow and live as long as the registry.
pub struct PoolRegistry<F: ConnectionFactory> {
    factory: Arc<F>,
    settings: PoolSettings,
    pools: DashMap<String, Arc<UriPool<F>>>,
    metrics: Arc<PoolMetrics>,
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    pub fn new(factory: Arc<F>, settings: PoolSettings) -> Self {
        Self::with_metrics(factory, settings, Arc::new(PoolMetrics::new()))
    }

    pub fn with_metrics(
        factory: Arc<F>,
        settings: PoolSettings,
        metrics: Arc<PoolMetrics>,
    ) -> Self {
        Self {
            factory,
            settings,
            pools: DashMap::new(),
            metrics,
        }
    }

    /// Lease a connection to `uri`.
    pub async fn borrow(
        &self,
        uri: &str,
        create_timeout: Duration,
        want_multiplexed: bool,
    ) -> Result<BorrowToken<F::Handle>> {
        let pool = self.pool_for(uri);
        pool.borrow_now(create_timeout, want_multiplexed).await
    }

    /// Lease a connection using the configured timeout and multiplexing preference.
    pub async fn borrow_default(&self, uri: &str) -> Result<BorrowToken<F::Handle>> {
        self.borrow(uri, self.settings.connect_timeout(), self.settings.multiplexed)
            .await
    }

    /// Return a lease. Tokens for destinations this registry never served are ignored.
    pub async fn restore(&self, token: BorrowToken<F::Handle>) -> Result<()> {
        let pool = self.pools.get(token.uri()).map(|entry| Arc::clone(entry.value()));
        match pool {
            Some(pool) => pool.restore_now(token).await,
            None => {
                trace!(uri = %token.uri(), "Ignoring restore for untracked destination");
                Ok(())
            }
        }
    }

    /// The pool for `uri`, creating it exactly once.
    pub fn pool_for(&self, uri: &str) -> Arc<UriPool<F>> {
        if let Some(pool) = self.pools.get(uri) {
            return Arc::clone(pool.value());
        }

        self.pools
            .entry(uri.to_string())
            .or_insert_with(|| {
                let (pool_size, expire_after) = self.settings.for_uri(uri);
                debug!(
                    uri = %uri,
                    pool_size,
                    expire_after_ms = expire_after.as_millis() as u64,
                    "Created destination pool"
                );
                let ctx = RecordContext {
                    factory: Arc::clone(&self.factory),
                    uri: Arc::from(uri),
                    expire_after,
                    counters: self.metrics.counters(uri),
                };
                Arc::new(UriPool::new(ctx, pool_size))
            })
            .value()
            .clone()
    }

    /// Snapshot of every pool currently known.
    pub fn pools(&self) -> Vec<Arc<UriPool<F>>> {
        self.pools
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Per-destination status, sorted by URI.
    pub async fn status(&self) -> Vec<(String, PoolStatus)> {
        let mut out = Vec::new();
        for pool in self.pools() {
            out.push((pool.uri().to_string(), pool.status_now().await));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}
