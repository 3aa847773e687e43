use crate::utils::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A raw transport connection managed (but not implemented) by the pool.
///
/// The pool never performs I/O through a handle; it only asks whether the
/// connection is still usable and closes it once it is idle and expired.
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Whether the underlying transport is still usable.
    fn is_open(&self) -> bool;

    /// Whether many logical borrows may share this transport concurrently.
    fn is_multiplexing_supported(&self) -> bool;

    /// Diagnostic label for the local end, usually `ip:port`.
    fn local_address_label(&self) -> String;

    /// Close the transport. Must be idempotent and must not fail.
    fn close(&self);
}

/// Creates new handles and mints additional logical borrows on multiplexed ones.
///
/// Injected into the registry at construction time.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Handle: ConnectionHandle;

    /// Establish a new connection to `uri`.
    ///
    /// `existing` holds every live handle the pool currently owns for `uri`.
    fn create(
        &self,
        timeout: Duration,
        want_multiplexed: bool,
        uri: &str,
        existing: &[Arc<Self::Handle>],
    ) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Produce another logical handle over the transport of `existing`.
    fn reuse(
        &self,
        timeout: Duration,
        existing: &Arc<Self::Handle>,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// Port segment of a local address label, used in log fields.
pub(crate) fn label_port(label: &str) -> &str {
    label.rsplit(':').next().unwrap_or(label)
}
