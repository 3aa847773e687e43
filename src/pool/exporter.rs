use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec};

lazy_static! {
    pub static ref CONNECTIONS_CREATED: IntCounterVec = register_int_counter_vec!(
        "uripool_connections_created_total",
        "Total pooled connections created per destination",
        &["uri"]
    )
    .expect("register uripool_connections_created_total counter vec");
    pub static ref CONNECTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        "uripool_connections_closed_total",
        "Total pooled connections closed or evicted per destination",
        &["uri"]
    )
    .expect("register uripool_connections_closed_total counter vec");
    pub static ref BORROWS: IntCounterVec = register_int_counter_vec!(
        "uripool_borrows_total",
        "Total successful borrows per destination",
        &["uri"]
    )
    .expect("register uripool_borrows_total counter vec");
    pub static ref RESTORES: IntCounterVec = register_int_counter_vec!(
        "uripool_restores_total",
        "Total restores of outstanding leases per destination",
        &["uri"]
    )
    .expect("register uripool_restores_total counter vec");
    pub static ref BORROW_FAILURES: IntCounterVec = register_int_counter_vec!(
        "uripool_borrow_failures_total",
        "Total failed borrow attempts per destination",
        &["uri"]
    )
    .expect("register uripool_borrow_failures_total counter vec");
    pub static ref ACTIVE_LEASES: IntGaugeVec = register_int_gauge_vec!(
        "uripool_active_leases",
        "Currently outstanding leases per destination",
        &["uri"]
    )
    .expect("register uripool_active_leases gauge vec");
}

/// Mirrors the in-process counters into the default Prometheus registry.
#[derive(Debug, Clone, Copy)]
pub struct PoolExporter;

impl PoolExporter {
    #[inline]
    pub fn connection_created(uri: &str) {
        CONNECTIONS_CREATED.with_label_values(&[uri]).inc();
    }

    #[inline]
    pub fn connection_closed(uri: &str) {
        CONNECTIONS_CLOSED.with_label_values(&[uri]).inc();
    }

    #[inline]
    pub fn borrowed(uri: &str) {
        BORROWS.with_label_values(&[uri]).inc();
        ACTIVE_LEASES.with_label_values(&[uri]).inc();
    }

    #[inline]
    pub fn restored(uri: &str) {
        RESTORES.with_label_values(&[uri]).inc();
        ACTIVE_LEASES.with_label_values(&[uri]).dec();
    }

    #[inline]
    pub fn borrow_failed(uri: &str) {
        BORROW_FAILURES.with_label_values(&[uri]).inc();
    }

    #[inline]
    pub fn abandoned(uri: &str, count: usize) {
        ACTIVE_LEASES.with_label_values(&[uri]).sub(count as i64);
    }
}

#[inline]
pub fn init() {
    lazy_static::initialize(&CONNECTIONS_CREATED);
    lazy_static::initialize(&CONNECTIONS_CLOSED);
    lazy_static::initialize(&BORROWS);
    lazy_static::initialize(&RESTORES);
    lazy_static::initialize(&BORROW_FAILURES);
    lazy_static::initialize(&ACTIVE_LEASES);
}

/// Render the default registry in the Prometheus text exposition format.
pub fn render() -> String {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
