//! DirectoryReconciler: applies one diff to the directory and records it.
//!
//! # Invariants
//!
//! - Every grant and revoke is an independent call. A failure (error or
//!   timeout) is captured in [`ReconciliationOutcome`] and never blocks,
//!   cancels, or rolls back a sibling call.
//! - Every call passes the [`OutboundGate`] before it is issued.
//! - At most one attempt per group per batch.
//! - Exactly one audit entry per non-empty batch, carrying the full intended
//!   add/remove sets; `success` is true only if every call succeeded.
//! - The state to persist is `previous − applied_removes ∪ applied_adds`, so a
//!   failed grant is still pending on the next run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use hg_audit::{AuditWriter, ReconciliationAuditEntry};
use hg_directory::{DirectoryError, DirectoryService};
use hg_entitlements::{EntitlementDiff, EntitlementSet, GroupId, PrincipalId};
use tracing::{debug, warn};

use crate::gate::{OutboundCall, OutboundGate};
use crate::store::{StoreError, VerificationStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectoryOp {
    Grant,
    Revoke,
}

impl DirectoryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectoryOp::Grant => "grant",
            DirectoryOp::Revoke => "revoke",
        }
    }

    fn call(&self) -> OutboundCall {
        match self {
            DirectoryOp::Grant => OutboundCall::DirectoryGrant,
            DirectoryOp::Revoke => OutboundCall::DirectoryRevoke,
        }
    }
}

/// One failed directory call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallFailure {
    pub group: GroupId,
    pub op: DirectoryOp,
    pub error: DirectoryError,
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.op.as_str(), self.group, self.error)
    }
}

/// Per-item result of one batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    pub applied_adds: EntitlementSet,
    pub applied_removes: EntitlementSet,
    /// Sorted by group.
    pub failed_adds: Vec<CallFailure>,
    /// Sorted by group.
    pub failed_removes: Vec<CallFailure>,
}

impl ReconciliationOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_adds.is_empty() && self.failed_removes.is_empty()
    }

    /// First failure in batch order: adds, then removes.
    pub fn first_error(&self) -> Option<&CallFailure> {
        self.failed_adds.first().or_else(|| self.failed_removes.first())
    }

    pub fn pending_adds(&self) -> EntitlementSet {
        self.failed_adds.iter().map(|f| f.group.clone()).collect()
    }

    pub fn pending_removes(&self) -> EntitlementSet {
        self.failed_removes.iter().map(|f| f.group.clone()).collect()
    }

    /// `previous − applied_removes ∪ applied_adds`.
    pub fn apply_to(&self, previous: &EntitlementSet) -> EntitlementSet {
        previous
            .difference(&self.applied_removes)
            .union(&self.applied_adds)
    }
}

pub struct DirectoryReconciler {
    directory: Arc<dyn DirectoryService>,
    gate: Arc<dyn OutboundGate>,
    store: Arc<dyn VerificationStore>,
    call_timeout: Duration,
    mirror: Option<Arc<Mutex<AuditWriter>>>,
}

impl DirectoryReconciler {
    pub fn new(
        directory: Arc<dyn DirectoryService>,
        gate: Arc<dyn OutboundGate>,
        store: Arc<dyn VerificationStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            gate,
            store,
            call_timeout,
            mirror: None,
        }
    }

    /// Also append every audit entry to a local hash-chained JSONL file.
    pub fn with_mirror(mut self, writer: AuditWriter) -> Self {
        self.mirror = Some(Arc::new(Mutex::new(writer)));
        self
    }

    /// Apply `diff` and write its audit entry.
    ///
    /// Per-call failures are in the returned outcome. `Err` means the audit
    /// entry could not be stored; the directory calls already issued stand.
    pub async fn reconcile(
        &self,
        principal: &PrincipalId,
        diff: &EntitlementDiff,
        at: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome, StoreError> {
        let outcome = self.apply(principal, diff).await;
        let entry = ReconciliationAuditEntry::new(
            principal.clone(),
            diff.to_add.clone(),
            diff.to_remove.clone(),
            outcome.first_error().map(|f| f.to_string()),
            at,
        );
        self.record(&entry).await?;
        Ok(outcome)
    }

    /// Issue every call in the batch concurrently. No audit, no persistence.
    pub async fn apply(&self, principal: &PrincipalId, diff: &EntitlementDiff) -> ReconciliationOutcome {
        let adds = join_all(
            diff.to_add
                .iter()
                .map(|g| self.call(DirectoryOp::Grant, principal, g)),
        );
        let removes = join_all(
            diff.to_remove
                .iter()
                .map(|g| self.call(DirectoryOp::Revoke, principal, g)),
        );
        let (adds, removes) = futures_util::future::join(adds, removes).await;

        let mut outcome = ReconciliationOutcome::default();
        for (group, result) in diff.to_add.iter().zip(adds) {
            match result {
                Ok(()) => {
                    outcome.applied_adds.insert(group.clone());
                }
                Err(error) => outcome.failed_adds.push(CallFailure {
                    group: group.clone(),
                    op: DirectoryOp::Grant,
                    error,
                }),
            }
        }
        for (group, result) in diff.to_remove.iter().zip(removes) {
            match result {
                Ok(()) => {
                    outcome.applied_removes.insert(group.clone());
                }
                Err(error) => outcome.failed_removes.push(CallFailure {
                    group: group.clone(),
                    op: DirectoryOp::Revoke,
                    error,
                }),
            }
        }

        if !outcome.is_complete() {
            warn!(
                principal_id = %principal,
                directory = self.directory.name(),
                failed_adds = outcome.failed_adds.len(),
                failed_removes = outcome.failed_removes.len(),
                "reconciliation batch partially failed"
            );
        }
        outcome
    }

    async fn call(
        &self,
        op: DirectoryOp,
        principal: &PrincipalId,
        group: &GroupId,
    ) -> Result<(), DirectoryError> {
        self.gate.admit(op.call()).await;

        let fut = async {
            match op {
                DirectoryOp::Grant => self.directory.grant_group(principal, group).await,
                DirectoryOp::Revoke => self.directory.revoke_group(principal, group).await,
            }
        };
        let result = match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(r) => r,
            Err(_) => Err(DirectoryError::Timeout {
                after_ms: self.call_timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(()) => debug!(principal_id = %principal, group_id = %group, op = op.as_str(), "directory call ok"),
            Err(e) => warn!(
                principal_id = %principal,
                group_id = %group,
                op = op.as_str(),
                error = %e,
                "directory call failed"
            ),
        }
        result
    }

    /// Store first; the mirror is best effort.
    async fn record(&self, entry: &ReconciliationAuditEntry) -> Result<(), StoreError> {
        self.store.append_audit_entry(entry).await?;

        if let Some(mirror) = &self.mirror {
            let mirror = Arc::clone(mirror);
            let line = entry.clone();
            // File I/O and the writer lock stay off the async workers.
            let appended = tokio::task::spawn_blocking(move || {
                let mut writer = mirror.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                writer.append(&line).map_err(|e| e.to_string())
            })
            .await
            .unwrap_or_else(|join| Err(join.to_string()));
            if let Err(e) = appended {
                warn!(principal_id = %entry.principal_id, error = %e, "audit mirror append failed");
            }
        }
        Ok(())
    }
}
