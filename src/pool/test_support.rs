use super::handle::{ConnectionFactory, ConnectionHandle};
use crate::utils::error::{PoolError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared transport state; every logical handle minted over one
/// transport points at the same `Transport`.
#[derive(Debug)]
pub struct Transport {
    pub id: u64,
    pub open: AtomicBool,
    pub closes: AtomicUsize,
}

impl Transport {
    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockHandle {
    pub transport: Arc<Transport>,
    pub logical: u64,
    multiplexed: bool,
}

impl ConnectionHandle for MockHandle {
    fn is_open(&self) -> bool {
        self.transport.open.load(Ordering::SeqCst)
    }

    fn is_multiplexing_supported(&self) -> bool {
        self.multiplexed
    }

    fn local_address_label(&self) -> String {
        format!("127.0.0.1:{}", 40000 + self.transport.id)
    }

    fn close(&self) {
        self.transport.open.store(false, Ordering::SeqCst);
        self.transport.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockFactory {
    pub multiplexed: bool,
    pub create_delay: Option<Duration>,
    pub reuse_delay: Option<Duration>,
    pub fail_create: AtomicBool,
    pub fail_reuse: AtomicBool,
    pub dead_on_arrival: AtomicBool,
    pub created: AtomicUsize,
    pub reused: AtomicUsize,
    pub transports: Mutex<Vec<Arc<Transport>>>,
    pub(crate) next_id: AtomicU64,
}

impl MockFactory {
    pub fn exclusive() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn multiplexed() -> Arc<Self> {
        Arc::new(Self {
            multiplexed: true,
            ..Default::default()
        })
    }

    pub fn transport(&self, index: usize) -> Arc<Transport> {
        Arc::clone(&self.transports.lock()[index])
    }
}

impl ConnectionFactory for MockFactory {
    type Handle = MockHandle;

    async fn create(
        &self,
        _timeout: Duration,
        _want_multiplexed: bool,
        uri: &str,
        _existing: &[Arc<MockHandle>],
    ) -> Result<MockHandle> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionCreation {
                uri: uri.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let transport = Arc::new(Transport {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            open: AtomicBool::new(!self.dead_on_arrival.load(Ordering::SeqCst)),
            closes: AtomicUsize::new(0),
        });
        self.transports.lock().push(Arc::clone(&transport));
        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(MockHandle {
            transport,
            logical: 0,
            multiplexed: self.multiplexed,
        })
    }

    async fn reuse(&self, _timeout: Duration, existing: &Arc<MockHandle>) -> Result<MockHandle> {
        if let Some(delay) = self.reuse_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_reuse.load(Ordering::SeqCst) {
            return Err(PoolError::RuntimeReuse("stream limit reached".to_string()));
        }
        let logical = self.reused.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        Ok(MockHandle {
            transport: Arc::clone(&existing.transport),
            logical,
            multiplexed: existing.multiplexed,
        })
    }
}
