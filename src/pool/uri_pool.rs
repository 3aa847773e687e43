use super::handle::{label_port, ConnectionFactory, ConnectionHandle};
use super::record::{ConnectionRecord, RecordContext, RecordState};
use super::token::BorrowToken;
use crate::utils::error::{PoolError, Result};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Point-in-time view of one destination's pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Non-closed connections.
    pub live: usize,
    /// Connections with at least one outstanding lease.
    pub borrowed: usize,
    /// Connections that could serve a borrow right now.
    pub borrowable: usize,
    /// Outstanding leases across all connections.
    pub outstanding: usize,
}

/// Result of classifying every record against one clock reading.
struct Classification {
    borrowable: Vec<usize>,
    evicted: usize,
}

/// All connections for a single destination.
///
/// Every operation runs under one async mutex, so "nothing borrowable and
/// below `pool_size`" is checked and acted on atomically. Connection
/// creation is awaited while that lock is held.
pub struct UriPool<F: ConnectionFactory> {
    ctx: RecordContext<F>,
    pool_size: usize,
    records: Mutex<Vec<ConnectionRecord<F>>>,
}

impl<F: ConnectionFactory> UriPool<F> {
    pub fn new(ctx: RecordContext<F>, pool_size: usize) -> Self {
        Self {
            ctx,
            pool_size,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Lease a connection, reusing a borrowable one when possible.
    ///
    /// Among several borrowable connections one is picked uniformly at random.
    /// Every decision is made against the supplied `now`.
    pub async fn borrow(
        &self,
        create_timeout: Duration,
        want_multiplexed: bool,
        now: Instant,
    ) -> Result<BorrowToken<F::Handle>> {
        self.borrow_at(create_timeout, want_multiplexed, Some(now)).await
    }

    /// Like [`borrow`](Self::borrow), reading the clock once the pool lock is held.
    pub async fn borrow_now(
        &self,
        create_timeout: Duration,
        want_multiplexed: bool,
    ) -> Result<BorrowToken<F::Handle>> {
        self.borrow_at(create_timeout, want_multiplexed, None).await
    }

    async fn borrow_at(
        &self,
        create_timeout: Duration,
        want_multiplexed: bool,
        now: Option<Instant>,
    ) -> Result<BorrowToken<F::Handle>> {
        let result = self.borrow_locked(create_timeout, want_multiplexed, now).await;
        if let Err(e) = &result {
            self.ctx.counters.record_borrow_failure();
            debug!(uri = %self.ctx.uri, error = %e, "Borrow failed");
        }
        result
    }

    async fn borrow_locked(
        &self,
        create_timeout: Duration,
        want_multiplexed: bool,
        now: Option<Instant>,
    ) -> Result<BorrowToken<F::Handle>> {
        let mut records = self.records.lock().await;
        // Queued callers may have waited out a slow creation.
        let now = now.unwrap_or_else(Instant::now);
        let classification = self.sweep_locked(&mut records, now)?;

        let picked = classification
            .borrowable
            .choose(&mut rand::thread_rng())
            .copied();

        let index = match picked {
            Some(index) => {
                trace!(
                    uri = %self.ctx.uri,
                    record = records[index].id(),
                    "Reusing pooled connection"
                );
                index
            }
            // The sweep evicted every closed record, so all remaining ones are live.
            None if records.len() < self.pool_size => {
                debug!(
                    uri = %self.ctx.uri,
                    live = records.len(),
                    pool_size = self.pool_size,
                    "Pool miss, creating new connection"
                );
                let existing: Vec<Arc<F::Handle>> =
                    records.iter().map(|r| Arc::clone(r.handle())).collect();
                let record = ConnectionRecord::open(
                    self.ctx.clone(),
                    create_timeout,
                    want_multiplexed,
                    &existing,
                    now,
                )
                .await?;
                records.push(record);
                records.len() - 1
            }
            None => {
                return Err(PoolError::PoolExhausted {
                    uri: self.ctx.uri.to_string(),
                    pool_size: self.pool_size,
                });
            }
        };

        records[index].borrow(create_timeout, now).await
    }

    /// Release a lease, then sweep.
    ///
    /// Tokens whose connection is no longer tracked are ignored.
    pub async fn restore(&self, token: BorrowToken<F::Handle>, now: Instant) -> Result<()> {
        self.restore_at(token, Some(now)).await
    }

    /// Like [`restore`](Self::restore), reading the clock once the pool lock is held.
    pub async fn restore_now(&self, token: BorrowToken<F::Handle>) -> Result<()> {
        self.restore_at(token, None).await
    }

    async fn restore_at(&self, token: BorrowToken<F::Handle>, now: Option<Instant>) -> Result<()> {
        let mut records = self.records.lock().await;
        let now = now.unwrap_or_else(Instant::now);

        match records.iter().find(|r| r.id() == token.record_id) {
            Some(record) => {
                record.restore(&token);
            }
            None => {
                trace!(
                    uri = %self.ctx.uri,
                    record = token.record_id,
                    "Ignoring restore for a connection no longer in the pool"
                );
            }
        }

        self.sweep_locked(&mut records, now).map(|_| ())
    }

    /// Close and evict idle expired connections and drop closed ones.
    ///
    /// Returns how many connections were evicted.
    pub async fn sweep(&self, now: Instant) -> Result<usize> {
        let mut records = self.records.lock().await;
        self.sweep_locked(&mut records, now).map(|c| c.evicted)
    }

    /// Like [`sweep`](Self::sweep), reading the clock once the pool lock is held.
    pub async fn sweep_now(&self) -> Result<usize> {
        let mut records = self.records.lock().await;
        let now = Instant::now();
        self.sweep_locked(&mut records, now).map(|c| c.evicted)
    }

    pub async fn status(&self, now: Instant) -> PoolStatus {
        let records = self.records.lock().await;
        Self::status_locked(&records, now)
    }

    pub async fn status_now(&self) -> PoolStatus {
        let records = self.records.lock().await;
        Self::status_locked(&records, Instant::now())
    }

    pub fn uri(&self) -> &str {
        &self.ctx.uri
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn expire_after(&self) -> Duration {
        self.ctx.expire_after
    }

    fn status_locked(records: &[ConnectionRecord<F>], now: Instant) -> PoolStatus {
        let mut status = PoolStatus::default();
        for record in records {
            let state = record.state(now);
            if state == RecordState::Closed {
                continue;
            }
            status.live += 1;
            let outstanding = record.outstanding();
            status.outstanding += outstanding;
            if outstanding > 0 {
                status.borrowed += 1;
            }
            if record.borrowable(now) {
                status.borrowable += 1;
            }
        }
        status
    }

    /// Reclassify every record from scratch against `now`.
    fn sweep_locked(
        &self,
        records: &mut Vec<ConnectionRecord<F>>,
        now: Instant,
    ) -> Result<Classification> {
        let mut kept = Vec::with_capacity(records.len());
        let mut evicted = 0;
        let mut failure = None;

        for record in records.drain(..) {
            match record.state(now) {
                RecordState::Closed => {
                    let abandoned = record.outstanding();
                    self.ctx.counters.record_abandoned(abandoned);
                    self.ctx.counters.record_closed();
                    evicted += 1;
                    let label = record.handle().local_address_label();
                    debug!(
                        uri = %self.ctx.uri,
                        port = label_port(&label),
                        abandoned,
                        "Evicted closed connection"
                    );
                }
                RecordState::NotBorrowedExpired => match record.close(now) {
                    Ok(()) => {
                        self.ctx.counters.record_closed();
                        evicted += 1;
                    }
                    Err(e) => {
                        kept.push(record);
                        failure.get_or_insert(e);
                    }
                },
                RecordState::NotBorrowedValid
                | RecordState::BorrowedValid
                | RecordState::BorrowedExpired => kept.push(record),
            }
        }
        *records = kept;

        if let Some(e) = failure {
            return Err(e);
        }

        let borrowable = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.borrowable(now))
            .map(|(i, _)| i)
            .collect();

        Ok(Classification {
            borrowable,
            evicted,
        })
    }
}
