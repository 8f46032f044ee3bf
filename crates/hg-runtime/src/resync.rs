//! Bulk resync: verify many principals with bounded concurrency.
//!
//! Each principal goes through [`VerificationOrchestrator::verify`] unchanged,
//! so throttling, the shared rate gate and compare-and-set all still apply.

use futures_util::stream::{self, StreamExt};
use hg_entitlements::PrincipalId;
use serde::Serialize;
use tracing::{info, warn};

use crate::orchestrator::{Outcome, Verification, VerificationOrchestrator};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
    pub succeeded: usize,
    pub partially_failed: usize,
    pub throttled: usize,
    /// `(principal, error code, message)`.
    pub failed: Vec<(PrincipalId, String, String)>,
}

impl ResyncSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.partially_failed + self.throttled + self.failed.len()
    }
}

pub async fn resync_all(
    orchestrator: &VerificationOrchestrator,
    principals: Vec<PrincipalId>,
    concurrency: usize,
) -> ResyncSummary {
    let total = principals.len();
    info!(principals = total, concurrency, "bulk resync starting");

    let results: Vec<_> = stream::iter(principals)
        .map(|p| async move {
            let r = orchestrator.verify(&p).await;
            (p, r)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut summary = ResyncSummary::default();
    for (principal, result) in results {
        match result {
            Ok(Verification::Throttled { .. }) => summary.throttled += 1,
            Ok(Verification::Completed(r)) => match r.outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::PartiallyFailed => summary.partially_failed += 1,
            },
            Err(e) => {
                warn!(principal_id = %principal, code = e.code(), error = %e, "resync verification failed");
                summary.failed.push((principal, e.code().to_string(), e.to_string()));
            }
        }
    }
    summary.failed.sort();

    info!(
        succeeded = summary.succeeded,
        partially_failed = summary.partially_failed,
        throttled = summary.throttled,
        failed = summary.failed.len(),
        "bulk resync finished"
    );
    summary
}
