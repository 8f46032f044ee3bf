//! hg-runtime
//!
//! Verification pipeline: Snapshot → Evaluate → Diff → Reconcile → Persist
//! for one principal, with a process-wide outbound rate gate.
//!
//! Collaborators are injected as trait objects:
//! - [`VerificationStore`]: ownership facts, granted records, audit rows
//! - [`hg_directory::DirectoryService`]: group grant/revoke
//! - [`OutboundGate`]: admission control for every external call
//!
//! Nothing in here is a global: the binaries build one [`RateLimiter`] at
//! startup and hand the same `Arc` to every component.

mod gate;
mod orchestrator;
mod reconciler;
mod resync;
mod store;

pub use gate::{OutboundCall, OutboundGate, RateLimiter, RateLimiterStats, Unmetered};
pub use orchestrator::{
    OrchestratorConfig, Outcome, PersistStatus, Stage, Verification, VerificationOrchestrator,
    VerificationReport, VerifyError,
};
pub use reconciler::{CallFailure, DirectoryOp, DirectoryReconciler, ReconciliationOutcome};
pub use resync::{resync_all, ResyncSummary};
pub use store::{GrantedEntitlementRecord, PutOutcome, StoreError, VerificationStore, VerificationView};
