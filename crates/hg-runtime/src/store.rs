//! Storage collaborator contract.
//!
//! # Invariants
//!
//! - `load_view` returns the ownership snapshot and the granted record from
//!   one consistent read (a single transaction in the Postgres store).
//! - `put_granted_entitlements` is a compare-and-set on `version`:
//!   `expected_version = None` means "create; fail if a record exists".
//!   A lost race is [`PutOutcome::Conflict`], never an error.
//! - Audit entries are append-only and listed in insertion order.
//! - The last verification is kept per principal and never moves backwards:
//!   a put older than the stored `verified_at` is ignored.

use chrono::{DateTime, Utc};
use hg_audit::ReconciliationAuditEntry;
use hg_entitlements::{EntitlementSet, OwnershipSnapshot, PrincipalId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::orchestrator::VerificationReport;

/// Entitlements last applied for a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedEntitlementRecord {
    pub principal_id: PrincipalId,
    pub groups: EntitlementSet,
    /// Monotonic write counter; the compare-and-set key.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// Inputs for one verification run, read together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationView {
    pub snapshot: OwnershipSnapshot,
    pub granted: Option<GrantedEntitlementRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written { version: i64 },
    /// The stored version was not the expected one.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or the query failed.
    Unavailable(String),
    /// Operation exceeded its bound.
    Timeout { after_ms: u64 },
    /// Stored data could not be decoded.
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Timeout { after_ms } => write!(f, "store timed out after {after_ms}ms"),
            StoreError::Corrupt(msg) => write!(f, "store data corrupt: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait::async_trait]
pub trait VerificationStore: Send + Sync {
    /// `None` when the principal is unknown.
    async fn get_ownership_snapshot(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<OwnershipSnapshot>, StoreError>;

    async fn get_granted_entitlements(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<GrantedEntitlementRecord>, StoreError>;

    /// Snapshot and granted record from one consistent read. `None` when the
    /// principal is unknown.
    ///
    /// The default issues two reads and is only consistent for stores whose
    /// individual reads are already serialized (in-memory fakes).
    async fn load_view(&self, principal: &PrincipalId) -> Result<Option<VerificationView>, StoreError> {
        let Some(snapshot) = self.get_ownership_snapshot(principal).await? else {
            return Ok(None);
        };
        let granted = self.get_granted_entitlements(principal).await?;
        Ok(Some(VerificationView { snapshot, granted }))
    }

    async fn put_granted_entitlements(
        &self,
        principal: &PrincipalId,
        groups: &EntitlementSet,
        expected_version: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<PutOutcome, StoreError>;

    async fn append_audit_entry(&self, entry: &ReconciliationAuditEntry) -> Result<(), StoreError>;

    /// Insertion order.
    async fn list_audit_entries(
        &self,
        principal: &PrincipalId,
    ) -> Result<Vec<ReconciliationAuditEntry>, StoreError>;

    async fn list_principals(&self) -> Result<Vec<PrincipalId>, StoreError>;

    /// Report of the principal's last completed run, the throttle clock.
    async fn get_last_verification(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<VerificationReport>, StoreError>;

    async fn put_last_verification(&self, report: &VerificationReport) -> Result<(), StoreError>;
}
