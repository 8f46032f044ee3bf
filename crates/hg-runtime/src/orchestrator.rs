//! VerificationOrchestrator: one principal, Snapshot → Evaluate → Diff →
//! Reconcile → Persist.
//!
//! # Invariants
//!
//! - **Throttle first**: a principal verified less than `min_interval` ago
//!   gets the last report back before any ownership read, gate admission or
//!   directory call. The last run is persisted through the store, so the
//!   throttle holds across processes; a hit in this process's cache does no
//!   I/O at all.
//! - **One run per principal per process**: a second request while a run is
//!   in flight waits for it and receives its result as `Throttled`. If the
//!   running future is dropped, a waiter takes over and runs itself.
//! - **Stage failures abort**: snapshot, audit and persist errors end the run
//!   as `Failed` and nothing later runs. Per-call directory failures do not
//!   abort; they make the run `PartiallyFailed`.
//! - **Applied state only**: the persisted record is
//!   `previous − applied_removes ∪ applied_adds`, written by compare-and-set.
//!   A conflict re-reads, merges this run's applied changes into the fresh
//!   record, retries once, then abandons.
//! - **Only completed runs are cached**: `Failed` leaves the throttle clock
//!   untouched so the caller may retry at once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hg_entitlements::{diff, evaluate, EntitlementRuleSet, EntitlementSet, PrincipalId, ProtectedGroupSet};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::gate::{OutboundCall, OutboundGate};
use crate::reconciler::{DirectoryReconciler, ReconciliationOutcome};
use crate::store::{GrantedEntitlementRecord, PutOutcome, StoreError, VerificationStore};

// ---------------------------------------------------------------------------
// Config / results
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Throttle interval per principal.
    pub min_interval: Duration,
    /// Bound on each store round trip (ownership read, record write).
    pub ownership_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(300),
            ownership_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    PartiallyFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::PartiallyFailed => "partially_failed",
        }
    }
}

/// What happened to the granted record at the end of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStatus {
    Written,
    /// Applied state equals the stored record.
    Unchanged,
    /// Lost the compare-and-set twice, or a concurrent run already stored
    /// the same state.
    Abandoned,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub principal_id: PrincipalId,
    pub outcome: Outcome,
    /// Groups the snapshot qualifies for.
    pub earned: EntitlementSet,
    /// Grants that succeeded in this run.
    pub added: EntitlementSet,
    /// Revokes that succeeded in this run.
    pub removed: EntitlementSet,
    /// Grants that failed and will be re-attempted next run.
    pub pending_add: EntitlementSet,
    /// Revokes that failed and will be re-attempted next run.
    pub pending_remove: EntitlementSet,
    pub persist: PersistStatus,
    pub verified_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Completed(VerificationReport),
    /// Report of the last completed run, or of the run this call waited on.
    Throttled {
        report: VerificationReport,
        retry_after: Duration,
    },
}

impl Verification {
    pub fn report(&self) -> &VerificationReport {
        match self {
            Verification::Completed(r) => r,
            Verification::Throttled { report, .. } => report,
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Verification::Throttled { .. })
    }

    /// `succeeded`, `partially_failed` or `throttled`.
    pub fn outcome_str(&self) -> &'static str {
        match self {
            Verification::Completed(r) => r.outcome.as_str(),
            Verification::Throttled { .. } => "throttled",
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Snapshot,
    Audit,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Snapshot => "snapshot",
            Stage::Audit => "audit",
            Stage::Persist => "persist",
        }
    }
}

/// A run that ended `Failed`, or was refused before starting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyError {
    NotFound(PrincipalId),
    /// Caller may not verify this principal (raised by the HTTP surface).
    Unauthorized(String),
    Store { stage: Stage, error: StoreError },
}

impl VerifyError {
    /// Caller-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::NotFound(_) => "not_found",
            VerifyError::Unauthorized(_) => "unauthenticated",
            VerifyError::Store { .. } => "internal",
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::NotFound(p) => write!(f, "principal {p} not found"),
            VerifyError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            VerifyError::Store { stage, error } => {
                write!(f, "{} stage failed: {error}", stage.as_str())
            }
        }
    }
}

impl std::error::Error for VerifyError {}

// ---------------------------------------------------------------------------
// In-flight guard
// ---------------------------------------------------------------------------

type RunResult = Result<VerificationReport, VerifyError>;
type Running = Arc<Mutex<HashMap<PrincipalId, watch::Receiver<Option<RunResult>>>>>;

enum Slot {
    Leader(InFlight),
    Follower(watch::Receiver<Option<RunResult>>),
}

/// Marks a principal's run as in flight; waiters subscribe to `tx`.
struct InFlight {
    running: Running,
    principal: PrincipalId,
    tx: watch::Sender<Option<RunResult>>,
}

impl InFlight {
    fn join(running: &Running, principal: &PrincipalId) -> Slot {
        let mut map = running.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(rx) = map.get(principal) {
            return Slot::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        map.insert(principal.clone(), rx);
        Slot::Leader(Self {
            running: Arc::clone(running),
            principal: principal.clone(),
            tx,
        })
    }

    fn publish(&self, result: RunResult) {
        self.tx.send_replace(Some(result));
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut map = self.running.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(&self.principal);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct VerificationOrchestrator {
    rules: EntitlementRuleSet,
    protected: ProtectedGroupSet,
    store: Arc<dyn VerificationStore>,
    reconciler: DirectoryReconciler,
    gate: Arc<dyn OutboundGate>,
    config: OrchestratorConfig,
    last_runs: Mutex<HashMap<PrincipalId, VerificationReport>>,
    in_flight: Running,
    /// Wall time read through tokio's clock, so paused-time tests move it.
    clock: (DateTime<Utc>, Instant),
}

impl VerificationOrchestrator {
    pub fn new(
        rules: EntitlementRuleSet,
        protected: ProtectedGroupSet,
        store: Arc<dyn VerificationStore>,
        reconciler: DirectoryReconciler,
        gate: Arc<dyn OutboundGate>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            rules,
            protected,
            store,
            reconciler,
            gate,
            config,
            last_runs: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            clock: (Utc::now(), Instant::now()),
        }
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    pub fn store(&self) -> &Arc<dyn VerificationStore> {
        &self.store
    }

    /// Run (or throttle) one verification.
    pub async fn verify(&self, principal: &PrincipalId) -> Result<Verification, VerifyError> {
        loop {
            if let Some(throttled) = self.cached(principal) {
                debug!(principal_id = %principal, "verification throttled");
                return Ok(throttled);
            }

            match InFlight::join(&self.in_flight, principal) {
                Slot::Leader(guard) => {
                    let result = self.lead(principal).await;
                    guard.publish(result.as_ref().map(|v| v.report().clone()).map_err(Clone::clone));
                    return result;
                }
                Slot::Follower(mut rx) => {
                    let published = match rx.wait_for(Option::is_some).await {
                        Ok(value) => (*value).clone(),
                        Err(_) => None,
                    };
                    match published {
                        Some(Ok(report)) => {
                            debug!(principal_id = %principal, "joined in-flight verification");
                            let retry_after = self.retry_after(&report).unwrap_or(Duration::ZERO);
                            return Ok(Verification::Throttled { report, retry_after });
                        }
                        Some(Err(e)) => return Err(e),
                        // The running future was dropped before finishing.
                        None => continue,
                    }
                }
            }
        }
    }

    /// Holder of the in-flight slot: consult the stored last run, then run.
    async fn lead(&self, principal: &PrincipalId) -> Result<Verification, VerifyError> {
        let last = self
            .bounded(Stage::Snapshot, self.store.get_last_verification(principal))
            .await?;
        if let Some(report) = last {
            if let Some(retry_after) = self.retry_after(&report) {
                debug!(principal_id = %principal, "verification throttled by stored run");
                self.remember(&report);
                return Ok(Verification::Throttled { report, retry_after });
            }
        }

        let report = self.run(principal).await?;
        self.remember(&report);
        let recorded = self
            .bounded(Stage::Persist, self.store.put_last_verification(&report))
            .await;
        if let Err(e) = recorded {
            warn!(principal_id = %principal, error = %e, "last verification not stored; throttle is local to this process");
        }
        Ok(Verification::Completed(report))
    }

    fn cached(&self, principal: &PrincipalId) -> Option<Verification> {
        let cache = self.last_runs.lock().unwrap_or_else(|p| p.into_inner());
        let report = cache.get(principal)?;
        let retry_after = self.retry_after(report)?;
        Some(Verification::Throttled {
            report: report.clone(),
            retry_after,
        })
    }

    fn remember(&self, report: &VerificationReport) {
        let mut cache = self.last_runs.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(report.principal_id.clone(), report.clone());
    }

    /// Time left in the throttle interval; `None` once it has elapsed.
    fn retry_after(&self, report: &VerificationReport) -> Option<Duration> {
        let elapsed = (self.now() - report.verified_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.config.min_interval.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    fn now(&self) -> DateTime<Utc> {
        let (wall, mono) = self.clock;
        wall + chrono::Duration::from_std(mono.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
    }

    async fn run(&self, principal: &PrincipalId) -> Result<VerificationReport, VerifyError> {
        // Snapshot
        self.gate.admit(OutboundCall::OwnershipFetch).await;
        let view = self
            .bounded(Stage::Snapshot, self.store.load_view(principal))
            .await?
            .ok_or_else(|| VerifyError::NotFound(principal.clone()))?;

        // Evaluate + Diff
        let earned = evaluate(&view.snapshot, &self.rules);
        let previous = view
            .granted
            .as_ref()
            .map(|r| r.groups.clone())
            .unwrap_or_default();
        let batch = diff(&previous, &earned, &self.protected);

        // Reconcile
        let outcome = if batch.is_empty() {
            ReconciliationOutcome::default()
        } else {
            self.reconciler
                .reconcile(principal, &batch, self.now())
                .await
                .map_err(|error| VerifyError::Store {
                    stage: Stage::Audit,
                    error,
                })?
        };

        // Persist
        let next = outcome.apply_to(&previous);
        let persist = if view.granted.is_some() && next == previous {
            PersistStatus::Unchanged
        } else {
            self.persist(principal, view.granted.as_ref(), &next, &outcome)
                .await?
        };

        let report = VerificationReport {
            principal_id: principal.clone(),
            outcome: if outcome.is_complete() {
                Outcome::Succeeded
            } else {
                Outcome::PartiallyFailed
            },
            pending_add: outcome.pending_adds(),
            pending_remove: outcome.pending_removes(),
            earned,
            added: outcome.applied_adds,
            removed: outcome.applied_removes,
            persist,
            verified_at: self.now(),
        };

        info!(
            principal_id = %principal,
            outcome = report.outcome.as_str(),
            added = ?report.added.to_strings(),
            removed = ?report.removed.to_strings(),
            pending_add = report.pending_add.len(),
            pending_remove = report.pending_remove.len(),
            "verification complete"
        );
        Ok(report)
    }

    async fn persist(
        &self,
        principal: &PrincipalId,
        prior: Option<&GrantedEntitlementRecord>,
        next: &EntitlementSet,
        outcome: &ReconciliationOutcome,
    ) -> Result<PersistStatus, VerifyError> {
        let expected = prior.map(|r| r.version);
        if let PutOutcome::Written { .. } = self.put(principal, next, expected).await? {
            return Ok(PersistStatus::Written);
        }

        // Lost the race: fold this run's applied changes into the winner's
        // record. Failed calls are left for the next run.
        let fresh = self
            .bounded(Stage::Persist, self.store.get_granted_entitlements(principal))
            .await?;
        let fresh_groups = fresh.as_ref().map(|r| r.groups.clone()).unwrap_or_default();
        let merged = outcome.apply_to(&fresh_groups);
        if fresh.is_some() && merged == fresh_groups {
            info!(principal_id = %principal, "granted record already current; persist abandoned as redundant");
            return Ok(PersistStatus::Abandoned);
        }

        match self
            .put(principal, &merged, fresh.as_ref().map(|r| r.version))
            .await?
        {
            PutOutcome::Written { .. } => Ok(PersistStatus::Written),
            PutOutcome::Conflict => {
                info!(principal_id = %principal, "granted record conflict after retry; persist abandoned");
                Ok(PersistStatus::Abandoned)
            }
        }
    }

    async fn put(
        &self,
        principal: &PrincipalId,
        groups: &EntitlementSet,
        expected: Option<i64>,
    ) -> Result<PutOutcome, VerifyError> {
        let put = self
            .store
            .put_granted_entitlements(principal, groups, expected, self.now());
        let result = self.bounded(Stage::Persist, put).await?;
        if result == PutOutcome::Conflict {
            warn!(principal_id = %principal, expected_version = ?expected, "granted record version conflict");
        }
        Ok(result)
    }

    async fn bounded<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, VerifyError> {
        let limit = self.config.ownership_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(error)) => Err(VerifyError::Store { stage, error }),
            Err(_) => Err(VerifyError::Store {
                stage,
                error: StoreError::Timeout {
                    after_ms: limit.as_millis() as u64,
                },
            }),
        }
    }
}
