use super::handle::{label_port, ConnectionFactory, ConnectionHandle};
use super::metrics::DestinationCounters;
use super::token::BorrowToken;
use crate::utils::error::{PoolError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, trace};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Derived lifecycle state of a pooled connection at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    NotBorrowedValid,
    BorrowedValid,
    NotBorrowedExpired,
    BorrowedExpired,
    Closed,
}

/// Everything a pool shares with the records it creates.
pub struct RecordContext<F: ConnectionFactory> {
    pub factory: Arc<F>,
    pub uri: Arc<str>,
    pub expire_after: Duration,
    pub counters: Arc<DestinationCounters>,
}

impl<F: ConnectionFactory> Clone for RecordContext<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            uri: Arc::clone(&self.uri),
            expire_after: self.expire_after,
            counters: Arc::clone(&self.counters),
        }
    }
}

/// One pooled connection together with its lease bookkeeping.
///
/// The record exclusively owns its handle and is the only thing that ever
/// closes it. All derived queries take an explicit `now` so a single
/// decision is evaluated against one clock reading.
pub struct ConnectionRecord<F: ConnectionFactory> {
    id: u64,
    ctx: RecordContext<F>,
    handle: Arc<F::Handle>,
    created_at: Instant,
    max_borrows: usize,
    closed: AtomicBool,
    outstanding: Mutex<HashSet<u64>>,
    next_token: AtomicU64,
}

impl<F: ConnectionFactory> ConnectionRecord<F> {
    /// Create a connection through the factory and wrap it.
    ///
    /// Nothing is registered anywhere unless this returns `Ok`.
    pub async fn open(
        ctx: RecordContext<F>,
        create_timeout: Duration,
        want_multiplexed: bool,
        existing: &[Arc<F::Handle>],
        now: Instant,
    ) -> Result<Self> {
        let creation = ctx
            .factory
            .create(create_timeout, want_multiplexed, &ctx.uri, existing);
        let handle = timeout(create_timeout, creation).await.map_err(|_| {
            PoolError::ConnectionCreationTimeout {
                uri: ctx.uri.to_string(),
                budget: create_timeout,
            }
        })??;

        if !handle.is_open() {
            handle.close();
            return Err(PoolError::ConnectionCreation {
                uri: ctx.uri.to_string(),
                reason: "handle was not open after creation".to_string(),
            });
        }

        let max_borrows = if handle.is_multiplexing_supported() {
            usize::MAX
        } else {
            1
        };

        let label = handle.local_address_label();
        debug!(
            uri = %ctx.uri,
            port = label_port(&label),
            multiplexed = max_borrows > 1,
            "Created pooled connection"
        );
        ctx.counters.record_created();

        Ok(Self {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            ctx,
            handle: Arc::new(handle),
            created_at: now,
            max_borrows,
            closed: AtomicBool::new(false),
            outstanding: Mutex::new(HashSet::new()),
            next_token: AtomicU64::new(1),
        })
    }

    /// Lease this connection.
    ///
    /// The first outstanding lease wraps the original handle; further leases
    /// on a multiplexed connection get a fresh logical handle from the factory.
    pub async fn borrow(
        &self,
        create_timeout: Duration,
        now: Instant,
    ) -> Result<BorrowToken<F::Handle>> {
        let mint_new = {
            let outstanding = self.outstanding.lock();
            if !self.borrowable_with(outstanding.len(), now) {
                if self.closed() {
                    return Err(PoolError::ConnectionClosed {
                        uri: self.ctx.uri.to_string(),
                    });
                }
                return Err(PoolError::InvalidState(format!(
                    "borrow of connection {} to {} in state {:?}",
                    self.id,
                    self.ctx.uri,
                    self.state_with(outstanding.len(), now)
                )));
            }
            !outstanding.is_empty()
        };

        let handle = if mint_new {
            let minted = timeout(
                create_timeout,
                self.ctx.factory.reuse(create_timeout, &self.handle),
            )
            .await
            .map_err(|_| {
                PoolError::RuntimeReuse(format!(
                    "reuse of connection to {} timed out after {:?}",
                    self.ctx.uri, create_timeout
                ))
            })??;
            Arc::new(minted)
        } else {
            Arc::clone(&self.handle)
        };

        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut outstanding = self.outstanding.lock();
            outstanding.insert(id);
            outstanding.len()
        };
        self.ctx.counters.record_borrow();
        trace!(
            uri = %self.ctx.uri,
            record = self.id,
            token = id,
            outstanding = count,
            "Borrowed pooled connection"
        );

        Ok(BorrowToken {
            id,
            record_id: self.id,
            handle,
            uri: Arc::clone(&self.ctx.uri),
        })
    }

    /// Release a lease. Returns `false` if the token was not outstanding here.
    pub fn restore(&self, token: &BorrowToken<F::Handle>) -> bool {
        if token.record_id != self.id {
            return false;
        }

        let (removed, count) = {
            let mut outstanding = self.outstanding.lock();
            let removed = outstanding.remove(&token.id);
            (removed, outstanding.len())
        };

        if removed {
            self.ctx.counters.record_restore();
            trace!(
                uri = %self.ctx.uri,
                record = self.id,
                token = token.id,
                outstanding = count,
                "Restored pooled connection"
            );
        }
        removed
    }

    /// Close an idle, expired connection.
    pub fn close(&self, now: Instant) -> Result<()> {
        {
            let outstanding = self.outstanding.lock();
            if !outstanding.is_empty() || !self.expired(now) {
                return Err(PoolError::InvalidState(format!(
                    "close of connection {} to {} in state {:?}",
                    self.id,
                    self.ctx.uri,
                    self.state_with(outstanding.len(), now)
                )));
            }
            self.closed.store(true, Ordering::SeqCst);
        }

        self.handle.close();
        let label = self.handle.local_address_label();
        debug!(
            uri = %self.ctx.uri,
            port = label_port(&label),
            age_ms = now.saturating_duration_since(self.created_at).as_millis() as u64,
            "Closed expired pooled connection"
        );
        Ok(())
    }

    /// Whether the connection is closed, adopting an OS-side close lazily.
    pub fn closed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return true;
        }
        if !self.handle.is_open() {
            self.closed.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    pub fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ctx.expire_after
    }

    pub fn borrowed(&self) -> bool {
        !self.outstanding.lock().is_empty()
    }

    pub fn max_borrowed(&self) -> bool {
        self.outstanding.lock().len() >= self.max_borrows
    }

    pub fn borrowable(&self, now: Instant) -> bool {
        let count = self.outstanding.lock().len();
        self.borrowable_with(count, now)
    }

    pub fn state(&self, now: Instant) -> RecordState {
        let count = self.outstanding.lock().len();
        self.state_with(count, now)
    }

    /// Number of leases currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().len()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> &Arc<F::Handle> {
        &self.handle
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn max_borrows(&self) -> usize {
        self.max_borrows
    }

    fn borrowable_with(&self, outstanding: usize, now: Instant) -> bool {
        !self.closed() && !self.expired(now) && outstanding < self.max_borrows
    }

    fn state_with(&self, outstanding: usize, now: Instant) -> RecordState {
        if self.closed() {
            return RecordState::Closed;
        }
        match (outstanding > 0, self.expired(now)) {
            (false, false) => RecordState::NotBorrowedValid,
            (true, false) => RecordState::BorrowedValid,
            (false, true) => RecordState::NotBorrowedExpired,
            (true, true) => RecordState::BorrowedExpired,
        }
    }
}
