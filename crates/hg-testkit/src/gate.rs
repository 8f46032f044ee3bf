use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hg_runtime::{OutboundCall, OutboundGate, Unmetered};

/// Counts admissions per call kind, then defers to an inner gate.
pub struct CountingGate {
    inner: Arc<dyn OutboundGate>,
    ownership: AtomicUsize,
    grants: AtomicUsize,
    revokes: AtomicUsize,
}

impl Default for CountingGate {
    fn default() -> Self {
        Self::wrapping(Arc::new(Unmetered))
    }
}

impl CountingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wrapping(inner: Arc<dyn OutboundGate>) -> Self {
        Self {
            inner,
            ownership: AtomicUsize::new(0),
            grants: AtomicUsize::new(0),
            revokes: AtomicUsize::new(0),
        }
    }

    pub fn count(&self, call: OutboundCall) -> usize {
        match call {
            OutboundCall::OwnershipFetch => self.ownership.load(Ordering::SeqCst),
            OutboundCall::DirectoryGrant => self.grants.load(Ordering::SeqCst),
            OutboundCall::DirectoryRevoke => self.revokes.load(Ordering::SeqCst),
        }
    }

    pub fn total(&self) -> usize {
        self.count(OutboundCall::OwnershipFetch)
            + self.count(OutboundCall::DirectoryGrant)
            + self.count(OutboundCall::DirectoryRevoke)
    }
}

#[async_trait::async_trait]
impl OutboundGate for CountingGate {
    async fn admit(&self, call: OutboundCall) {
        let counter = match call {
            OutboundCall::OwnershipFetch => &self.ownership,
            OutboundCall::DirectoryGrant => &self.grants,
            OutboundCall::DirectoryRevoke => &self.revokes,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.inner.admit(call).await;
    }
}
