#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uripool::config::PoolSettings;
use uripool::{ConnectionFactory, ConnectionHandle, PoolError, PoolRegistry, Result};

/// State of one simulated transport, shared by every logical handle over it.
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

    /// Simulate the peer or the OS tearing the connection down.
    pub fn drop_from_remote(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    pub transport: Arc<Transport>,
    multiplexed: bool,
}

impl ConnectionHandle for FakeConnection {
    fn is_open(&self) -> bool {
        self.transport.open.load(Ordering::SeqCst)
    }

    fn is_multiplexing_supported(&self) -> bool {
        self.multiplexed
    }

    fn local_address_label(&self) -> String {
        format!("10.0.0.1:{}", 50000 + self.transport.id)
    }

    fn close(&self) {
        self.transport.open.store(false, Ordering::SeqCst);
        self.transport.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct FakeFactory {
    pub multiplexed: bool,
    pub create_delay: Option<Duration>,
    pub fail_reuse: AtomicBool,
    pub created: AtomicUsize,
    pub reused: AtomicUsize,
    pub transports: Mutex<Vec<Arc<Transport>>>,
    next_id: AtomicU64,
}

impl FakeFactory {
    pub fn exclusive() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn multiplexed() -> Arc<Self> {
        Arc::new(Self {
            multiplexed: true,
            ..Default::default()
        })
    }

    pub fn slow(multiplexed: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            multiplexed,
            create_delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn transport(&self, index: usize) -> Arc<Transport> {
        Arc::clone(&self.transports.lock()[index])
    }
}

impl ConnectionFactory for FakeFactory {
    type Handle = FakeConnection;

    async fn create(
        &self,
        _timeout: Duration,
        _want_multiplexed: bool,
        uri: &str,
        _existing: &[Arc<FakeConnection>],
    ) -> Result<FakeConnection> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if uri.contains("unreachable") {
            return Err(PoolError::ConnectionCreation {
                uri: uri.to_string(),
                reason: "no route to host".to_string(),
            });
        }

        let transport = Arc::new(Transport {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            open: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
        });
        self.transports.lock().push(Arc::clone(&transport));
        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(FakeConnection {
            transport,
            multiplexed: self.multiplexed,
        })
    }

    async fn reuse(
        &self,
        _timeout: Duration,
        existing: &Arc<FakeConnection>,
    ) -> Result<FakeConnection> {
        if self.fail_reuse.load(Ordering::SeqCst) {
            return Err(PoolError::RuntimeReuse(format!(
                "no free stream on transport {}",
                existing.transport.id
            )));
        }
        self.reused.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            transport: Arc::clone(&existing.transport),
            multiplexed: existing.multiplexed,
        })
    }
}

pub fn settings(pool_size: usize, expire_after_ms: u64) -> PoolSettings {
    PoolSettings {
        pool_size,
        expire_after_ms,
        ..Default::default()
    }
}

pub fn registry(
    factory: &Arc<FakeFactory>,
    pool_size: usize,
    expire_after_ms: u64,
) -> Arc<PoolRegistry<FakeFactory>> {
    Arc::new(PoolRegistry::new(
        Arc::clone(factory),
        settings(pool_size, expire_after_ms),
    ))
}
