use std::fmt;
use std::sync::Arc;

/// A lease on one pooled connection.
///
/// Returned by `borrow` and consumed by `restore`. Dropping a token without
/// restoring it keeps its slot outstanding until the record is evicted.
pub struct BorrowToken<H> {
    pub(crate) id: u64,
    pub(crate) record_id: u64,
    pub(crate) handle: Arc<H>,
    pub(crate) uri: Arc<str>,
}

impl<H> BorrowToken<H> {
    /// The connection handle this lease grants access to.
    pub fn handle(&self) -> &Arc<H> {
        &self.handle
    }

    /// Destination the owning pool serves.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn record_id(&self) -> u64 {
        self.record_id
    }
}

impl<H> fmt::Debug for BorrowToken<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowToken")
            .field("id", &self.id)
            .field("record_id", &self.record_id)
            .field("uri", &self.uri)
            .finish()
    }
}
