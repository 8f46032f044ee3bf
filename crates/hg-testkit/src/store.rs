use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use hg_audit::ReconciliationAuditEntry;
use hg_entitlements::{EntitlementSet, OwnershipSnapshot, PrincipalId};
use hg_runtime::{
    GrantedEntitlementRecord, PutOutcome, StoreError, VerificationReport, VerificationStore,
};

#[derive(Default)]
struct Inner {
    snapshots: HashMap<PrincipalId, OwnershipSnapshot>,
    granted: HashMap<PrincipalId, GrantedEntitlementRecord>,
    audit: Vec<ReconciliationAuditEntry>,
    last_verifications: HashMap<PrincipalId, VerificationReport>,
    /// Writes another process "commits" just before our next put.
    concurrent_writes: VecDeque<(PrincipalId, EntitlementSet)>,
}

/// Storage collaborator held in memory, with fault injection.
///
/// Reads and writes are serialized by one mutex, so the default
/// `load_view` is a consistent read here.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    snapshot_reads: AtomicUsize,
    puts: AtomicUsize,
    last_verification_reads: AtomicUsize,
    fail_snapshots: AtomicBool,
    fail_audit: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register (or replace) the ownership facts of a principal.
    pub fn set_snapshot(&self, principal: impl Into<PrincipalId>, snapshot: OwnershipSnapshot) {
        self.lock().snapshots.insert(principal.into(), snapshot);
    }

    /// Pretend a previous run granted `groups` (version 1).
    pub fn seed_granted(&self, principal: impl Into<PrincipalId>, groups: EntitlementSet) {
        let principal = principal.into();
        self.lock().granted.insert(
            principal.clone(),
            GrantedEntitlementRecord {
                principal_id: principal,
                groups,
                version: 1,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn granted(&self, principal: &PrincipalId) -> Option<GrantedEntitlementRecord> {
        self.lock().granted.get(principal).cloned()
    }

    pub fn audit_entries(&self) -> Vec<ReconciliationAuditEntry> {
        self.lock().audit.clone()
    }

    pub fn last_verification(&self, principal: &PrincipalId) -> Option<VerificationReport> {
        self.lock().last_verifications.get(principal).cloned()
    }

    /// Pretend another process completed a run for the report's principal.
    pub fn seed_last_verification(&self, report: VerificationReport) {
        self.lock()
            .last_verifications
            .insert(report.principal_id.clone(), report);
    }

    pub fn last_verification_reads(&self) -> usize {
        self.last_verification_reads.load(Ordering::SeqCst)
    }

    pub fn snapshot_reads(&self) -> usize {
        self.snapshot_reads.load(Ordering::SeqCst)
    }

    pub fn put_attempts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn fail_snapshot_reads(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    pub fn fail_audit_appends(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Queue a write by a concurrent run. It lands immediately before the
    /// next `put_granted_entitlements`, bumping the version.
    pub fn inject_concurrent_write(&self, principal: impl Into<PrincipalId>, groups: EntitlementSet) {
        self.lock()
            .concurrent_writes
            .push_back((principal.into(), groups));
    }
}

fn write(inner: &mut Inner, principal: &PrincipalId, groups: EntitlementSet, at: DateTime<Utc>) -> i64 {
    let version = inner.granted.get(principal).map(|r| r.version + 1).unwrap_or(1);
    inner.granted.insert(
        principal.clone(),
        GrantedEntitlementRecord {
            principal_id: principal.clone(),
            groups,
            version,
            updated_at: at,
        },
    );
    version
}

#[async_trait::async_trait]
impl VerificationStore for InMemoryStore {
    async fn get_ownership_snapshot(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<OwnershipSnapshot>, StoreError> {
        self.snapshot_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected snapshot failure".to_string()));
        }
        Ok(self.lock().snapshots.get(principal).cloned())
    }

    async fn get_granted_entitlements(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<GrantedEntitlementRecord>, StoreError> {
        Ok(self.granted(principal))
    }

    async fn put_granted_entitlements(
        &self,
        principal: &PrincipalId,
        groups: &EntitlementSet,
        expected_version: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<PutOutcome, StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();

        if let Some((p, g)) = inner.concurrent_writes.pop_front() {
            write(&mut inner, &p, g, at);
        }

        let current = inner.granted.get(principal).map(|r| r.version);
        if current != expected_version {
            return Ok(PutOutcome::Conflict);
        }
        let version = write(&mut inner, principal, groups.clone(), at);
        Ok(PutOutcome::Written { version })
    }

    async fn append_audit_entry(&self, entry: &ReconciliationAuditEntry) -> Result<(), StoreError> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected audit failure".to_string()));
        }
        self.lock().audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        principal: &PrincipalId,
    ) -> Result<Vec<ReconciliationAuditEntry>, StoreError> {
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|e| &e.principal_id == principal)
            .cloned()
            .collect())
    }

    async fn list_principals(&self) -> Result<Vec<PrincipalId>, StoreError> {
        let mut all: Vec<_> = self.lock().snapshots.keys().cloned().collect();
        all.sort();
        Ok(all)
    }

    async fn get_last_verification(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<VerificationReport>, StoreError> {
        self.last_verification_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.last_verification(principal))
    }

    async fn put_last_verification(&self, report: &VerificationReport) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let newer = inner
            .last_verifications
            .get(&report.principal_id)
            .map_or(true, |prev| prev.verified_at <= report.verified_at);
        if newer {
            inner
                .last_verifications
                .insert(report.principal_id.clone(), report.clone());
        }
        Ok(())
    }
}
