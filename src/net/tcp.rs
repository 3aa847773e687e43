use crate::pool::{ConnectionFactory, ConnectionHandle};
use crate::utils::error::{PoolError, Result};
use socket2::SockRef;
use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::trace;

/// A plain TCP connection handed out by the pool.
///
/// Callers lock [`TcpConnection::stream`] for the duration of their I/O.
#[derive(Debug)]
pub struct TcpConnection {
    stream: Mutex<TcpStream>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpConnection {
    fn new(stream: TcpStream) -> std::io::Result<Self> {
        Ok(Self {
            local_addr: stream.local_addr()?,
            peer_addr: stream.peer_addr()?,
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        })
    }

    pub fn stream(&self) -> &Mutex<TcpStream> {
        &self.stream
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-consuming probe: `Ok(0)` from a peek means the peer hung up.
    fn peer_hung_up(stream: &TcpStream) -> bool {
        let mut buf = [MaybeUninit::<u8>::uninit(); 1];
        match SockRef::from(stream).peek(&mut buf) {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }
}

impl ConnectionHandle for TcpConnection {
    fn is_open(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        // A caller mid-I/O holds the lock; it will see errors itself.
        match self.stream.try_lock() {
            Ok(stream) if Self::peer_hung_up(&stream) => {
                self.closed.store(true, Ordering::SeqCst);
                false
            }
            _ => true,
        }
    }

    fn is_multiplexing_supported(&self) -> bool {
        false
    }

    fn local_address_label(&self) -> String {
        self.local_addr.to_string()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The socket itself is released when the last reference drops.
        if let Ok(stream) = self.stream.try_lock() {
            let _ = SockRef::from(&*stream).shutdown(Shutdown::Both);
        }
    }
}

/// Opens one TCP connection per pooled record.
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    nodelay: bool,
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

impl TcpConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    async fn connect(&self, uri: &str) -> Result<TcpStream> {
        let target = uri.strip_prefix("tcp://").unwrap_or(uri);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target)
            .await
            .map_err(|e| creation_error(uri, e.to_string()))?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream
                        .set_nodelay(self.nodelay)
                        .map_err(|e| creation_error(uri, e.to_string()))?;
                    return Ok(stream);
                }
                Err(e) => {
                    trace!(uri = %uri, addr = %addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(creation_error(
            uri,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses found for destination".to_string()),
        ))
    }
}

fn creation_error(uri: &str, reason: String) -> PoolError {
    PoolError::ConnectionCreation {
        uri: uri.to_string(),
        reason,
    }
}

impl ConnectionFactory for TcpConnectionFactory {
    type Handle = TcpConnection;

    async fn create(
        &self,
        budget: Duration,
        want_multiplexed: bool,
        uri: &str,
        existing: &[Arc<TcpConnection>],
    ) -> Result<TcpConnection> {
        if want_multiplexed {
            trace!(uri = %uri, "TCP connections are never multiplexed");
        }
        trace!(uri = %uri, existing = existing.len(), "Opening TCP connection");

        let stream = timeout(budget, self.connect(uri))
            .await
            .map_err(|_| PoolError::ConnectionCreationTimeout {
                uri: uri.to_string(),
                budget,
            })??;

        TcpConnection::new(stream).map_err(|e| creation_error(uri, e.to_string()))
    }

    async fn reuse(
        &self,
        _budget: Duration,
        existing: &Arc<TcpConnection>,
    ) -> Result<TcpConnection> {
        Err(PoolError::RuntimeReuse(format!(
            "TCP connection {} cannot carry concurrent borrows",
            existing.local_addr
        )))
    }
}
