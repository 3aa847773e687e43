#[cfg(feature = "metrics")]
use super::exporter::PoolExporter;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for a single destination.
///
/// Every update is a single relaxed atomic, so recording never blocks or
/// fails a pool operation.
#[derive(Debug)]
pub struct DestinationCounters {
    uri: Arc<str>,
    created: AtomicU64,
    closed: AtomicU64,
    borrows: AtomicU64,
    restores: AtomicU64,
    borrow_failures: AtomicU64,
    active: AtomicI64,
}

impl DestinationCounters {
    fn new(uri: Arc<str>) -> Self {
        Self {
            uri,
            created: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            borrows: AtomicU64::new(0),
            restores: AtomicU64::new(0),
            borrow_failures: AtomicU64::new(0),
            active: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolExporter::connection_created(&self.uri);
    }

    #[inline]
    pub fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolExporter::connection_closed(&self.uri);
    }

    #[inline]
    pub fn record_borrow(&self) {
        self.borrows.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolExporter::borrowed(&self.uri);
    }

    #[inline]
    pub fn record_restore(&self) {
        self.restores.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolExporter::restored(&self.uri);
    }

    #[inline]
    pub fn record_borrow_failure(&self) {
        self.borrow_failures.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolExporter::borrow_failed(&self.uri);
    }

    /// Leases dropped along with a record that was evicted while still borrowed.
    #[inline]
    pub fn record_abandoned(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.active.fetch_sub(count as i64, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        PoolExporter::abandoned(&self.uri, count);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uri: self.uri.to_string(),
            created: self.created.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            borrows: self.borrows.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
            borrow_failures: self.borrow_failures.load(Ordering::Relaxed),
            active_count: self.active.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}

/// Immutable view of one destination's counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uri: String,
    pub created: u64,
    pub closed: u64,
    pub borrows: u64,
    pub restores: u64,
    pub borrow_failures: u64,
    pub active_count: u64,
}

/// Passive per-destination pool statistics.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    destinations: DashMap<String, Arc<DestinationCounters>>,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `uri`, registering them on first use.
    pub fn counters(&self, uri: &str) -> Arc<DestinationCounters> {
        if let Some(existing) = self.destinations.get(uri) {
            return Arc::clone(existing.value());
        }
        self.destinations
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(DestinationCounters::new(Arc::from(uri))))
            .value()
            .clone()
    }

    pub fn snapshot(&self, uri: &str) -> Option<MetricsSnapshot> {
        self.destinations.get(uri).map(|counters| counters.snapshot())
    }

    /// Snapshots for every known destination, sorted by URI.
    pub fn snapshots(&self) -> Vec<MetricsSnapshot> {
        let mut all: Vec<MetricsSnapshot> = self
            .destinations
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        all.sort_by(|a, b| a.uri.cmp(&b.uri));
        all
    }

    /// One line per destination, suitable for a log record.
    pub fn summary(&self) -> String {
        let snapshots = self.snapshots();
        if snapshots.is_empty() {
            return "no destinations".to_string();
        }

        let mut out = String::new();
        for s in snapshots {
            let _ = writeln!(
                out,
                "{}: created={} closed={} borrows={} restores={} failures={} active={}",
                s.uri, s.created, s.closed, s.borrows, s.restores, s.borrow_failures, s.active_count
            );
        }
        out.truncate(out.trim_end().len());
        out
    }
}
