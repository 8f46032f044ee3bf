//! Scenario: one rate limiter shared by every run; bulk resync
//!
//! # Invariants under test
//!
//! 1. Ownership fetches and directory calls all pass the same limiter.
//! 2. When the window is full, calls wait instead of failing: every run still
//!    completes `Succeeded`, only later.
//! 3. Bulk resync verifies every principal exactly once and reports
//!    per-outcome counts; unknown principals are listed as failures.
//! 4. Resync honors the throttle: a principal verified moments earlier is
//!    counted as throttled and costs no outbound calls, also when the resync
//!    runs in a separate process over the same store.
//!
//! Uses tokio's paused clock; no DB or network required.

use std::sync::Arc;
use std::time::Duration;

use hg_directory::DirectoryError;
use hg_entitlements::{OwnershipSnapshot, PrincipalId};
use hg_runtime::{resync_all, OutboundCall, Outcome, RateLimiter, VerificationStore};
use hg_testkit::Harness;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn burst_waits_for_window_instead_of_failing() {
    let limiter = Arc::new(RateLimiter::new(4, Duration::from_secs(1)));
    let h = Harness::builder().gate(limiter.clone()).build();

    let principals: Vec<PrincipalId> = (0..4).map(|i| PrincipalId::new(format!("p{i}"))).collect();
    for p in &principals {
        // One ownership fetch + two grants per principal: 12 calls total.
        h.store.set_snapshot(
            p.clone(),
            OwnershipSnapshot::empty().with_holding("alpha", 1).with_balance(2_500),
        );
    }

    let start = Instant::now();
    let summary = resync_all(&h.orchestrator, principals.clone(), 4).await;

    assert_eq!(summary.succeeded, 4);
    assert!(summary.failed.is_empty());
    assert_eq!(h.gate.count(OutboundCall::OwnershipFetch), 4);
    assert_eq!(h.gate.count(OutboundCall::DirectoryGrant), 8);
    assert_eq!(limiter.stats().admitted, 12);
    // 12 calls at 4 per second: the last batch cannot start before t = 2s.
    assert!(Instant::now().duration_since(start) >= Duration::from_secs(2));
}

#[tokio::test]
async fn resync_reports_each_outcome() {
    let h = Harness::builder().build();
    let ok = PrincipalId::from("ok");
    let partial = PrincipalId::from("partial");
    h.store
        .set_snapshot(ok.clone(), OwnershipSnapshot::empty().with_holding("alpha", 1));
    h.store
        .set_snapshot(partial.clone(), OwnershipSnapshot::empty().with_holding("beta", 1));
    h.directory
        .fail_grant("beta_holder", DirectoryError::Transport("reset".into()));

    let mut principals = h.store.list_principals().await.unwrap();
    principals.push(PrincipalId::from("ghost"));

    let summary = resync_all(&h.orchestrator, principals, 2).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.partially_failed, 1);
    assert_eq!(summary.throttled, 0);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, PrincipalId::from("ghost"));
    assert_eq!(summary.failed[0].1, "not_found");
    assert_eq!(summary.total(), 3);
}

#[tokio::test(start_paused = true)]
async fn resync_honors_throttle() {
    let h = Harness::builder()
        .min_interval(Duration::from_secs(300))
        .build();
    let p = PrincipalId::from("p1");
    h.store
        .set_snapshot(p.clone(), OwnershipSnapshot::empty().with_holding("alpha", 1));

    let first = h.orchestrator.verify(&p).await.unwrap();
    assert_eq!(first.report().outcome, Outcome::Succeeded);
    let admitted = h.gate.total();

    let summary = resync_all(&h.orchestrator, vec![p], 4).await;
    assert_eq!(summary.throttled, 1);
    assert_eq!(h.gate.total(), admitted);
}

#[tokio::test(start_paused = true)]
async fn resync_in_another_process_honors_daemon_throttle() {
    let daemon = Harness::builder()
        .min_interval(Duration::from_secs(300))
        .build();
    let cli = Harness::builder()
        .min_interval(Duration::from_secs(300))
        .store(daemon.store.clone())
        .build();
    let p = PrincipalId::from("p1");
    daemon
        .store
        .set_snapshot(p.clone(), OwnershipSnapshot::empty().with_holding("alpha", 1));
    daemon.orchestrator.verify(&p).await.unwrap();

    let summary = resync_all(&cli.orchestrator, vec![p], 4).await;
    assert_eq!(summary.throttled, 1);
    assert_eq!(cli.gate.total(), 0);
    assert_eq!(cli.directory.call_count(), 0);
}
