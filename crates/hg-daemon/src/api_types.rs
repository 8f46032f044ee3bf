//! Request and response types for hg-daemon HTTP endpoints.
//!
//! `Serialize + Deserialize` so tests can decode them. No logic here beyond
//! conversions from runtime types.

use chrono::{DateTime, Utc};
use hg_audit::ReconciliationAuditEntry;
use hg_runtime::Verification;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// `unauthenticated` | `not_found` | `internal`
    pub code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// POST /v1/verify/{principal_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub principal_id: String,
    /// `succeeded` | `partially_failed` | `throttled`
    pub outcome: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub pending_add: Vec<String>,
    pub pending_remove: Vec<String>,
    pub earned: Vec<String>,
    pub verified_at: DateTime<Utc>,
    /// Set only when throttled.
    pub retry_after_secs: Option<u64>,
}

impl From<&Verification> for VerifyResponse {
    fn from(v: &Verification) -> Self {
        let r = v.report();
        let retry_after_secs = match v {
            // Round up so a client waiting this long is never throttled again.
            Verification::Throttled { retry_after, .. } => {
                Some(retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0))
            }
            Verification::Completed(_) => None,
        };
        Self {
            principal_id: r.principal_id.to_string(),
            outcome: v.outcome_str().to_string(),
            added: r.added.to_strings(),
            removed: r.removed.to_strings(),
            pending_add: r.pending_add.to_strings(),
            pending_remove: r.pending_remove.to_strings(),
            earned: r.earned.to_strings(),
            verified_at: r.verified_at,
            retry_after_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/audit/{principal_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub entry_id: Uuid,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<ReconciliationAuditEntry> for AuditRow {
    fn from(e: ReconciliationAuditEntry) -> Self {
        Self {
            entry_id: e.entry_id,
            added: e.added.to_strings(),
            removed: e.removed.to_strings(),
            success: e.success,
            error: e.error,
            timestamp: e.ts_utc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResponse {
    pub principal_id: String,
    /// Insertion order.
    pub entries: Vec<AuditRow>,
}
