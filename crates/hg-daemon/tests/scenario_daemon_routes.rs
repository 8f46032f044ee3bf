//! In-process scenario tests for hg-daemon HTTP endpoints.
//!
//! # Invariants under test
//!
//! 1. `POST /v1/verify/{id}` answers `{outcome, added, removed, ...}` for
//!    succeeded, partially failed and throttled runs.
//! 2. Errors answer `{code, message}` with the mapped status:
//!    unauthenticated 401, not_found 404, internal 500.
//! 3. A caller may only act on its own principal unless it is the operator.
//! 4. `GET /v1/audit/{id}` lists entries in insertion order.
//! 5. Completed runs are broadcast on the event bus; throttled ones are not.
//! 6. A verification keeps running to its audit entry and granted record
//!    when the client disconnects mid-request.
//!
//! The router is driven with `tower::ServiceExt::oneshot`; no socket, no DB.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use hg_daemon::{routes, state};
use hg_directory::DirectoryError;
use hg_entitlements::{OwnershipSnapshot, PrincipalId};
use hg_testkit::{set, Harness};
use http_body_util::BodyExt;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const OPERATOR: &str = "ops-admin";

fn app(h: &Harness) -> Arc<state::AppState> {
    Arc::new(state::AppState::new(
        h.orchestrator.clone(),
        Some(PrincipalId::from(OPERATOR)),
    ))
}

fn request(method: &str, uri: &str, caller: Option<&str>) -> Request<axum::body::Body> {
    let mut b = Request::builder().method(method).uri(uri);
    if let Some(c) = caller {
        b = b.header(routes::PRINCIPAL_HEADER, c);
    }
    b.body(axum::body::Body::empty()).unwrap()
}

async fn call(st: &Arc<state::AppState>, req: Request<axum::body::Body>) -> (StatusCode, serde_json::Value) {
    let router = routes::build_router(Arc::clone(st));
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, serde_json::from_slice(&body).expect("body is not valid JSON"))
}

fn holder(h: &Harness, principal: &str) {
    h.store.set_snapshot(
        principal,
        OwnershipSnapshot::empty().with_holding("alpha", 1).with_balance(2_500),
    );
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let h = Harness::builder().build();
    let (status, json) = call(&app(&h), request("GET", "/v1/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "hg-daemon");
}

// ---------------------------------------------------------------------------
// POST /v1/verify/{principal_id}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn verify_own_principal_succeeds() {
    let h = Harness::builder().build();
    holder(&h, "u1");
    let st = app(&h);

    let (status, json) = call(&st, request("POST", "/v1/verify/u1", Some("u1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "succeeded");
    assert_eq!(json["added"], serde_json::json!(["alpha_holder", "beginner"]));
    assert_eq!(json["removed"], serde_json::json!([]));
    assert_eq!(json["retry_after_secs"], serde_json::Value::Null);
}

#[tokio::test]
async fn verify_without_caller_header_is_unauthenticated() {
    let h = Harness::builder().build();
    holder(&h, "u1");

    let (status, json) = call(&app(&h), request("POST", "/v1/verify/u1", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "unauthenticated");
    assert_eq!(h.directory.call_count(), 0);
}

#[tokio::test]
async fn verify_other_principal_is_refused_unless_operator() {
    let h = Harness::builder().build();
    holder(&h, "u1");
    let st = app(&h);

    let (status, json) = call(&st, request("POST", "/v1/verify/u1", Some("u2"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "unauthenticated");
    assert_eq!(h.store.snapshot_reads(), 0);

    let (status, json) = call(&st, request("POST", "/v1/verify/u1", Some(OPERATOR))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["principal_id"], "u1");
}

#[tokio::test]
async fn verify_unknown_principal_is_404() {
    let h = Harness::builder().build();
    let (status, json) = call(&app(&h), request("POST", "/v1/verify/ghost", Some("ghost"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "not_found");
}

#[tokio::test]
async fn verify_store_failure_is_500_without_details() {
    let h = Harness::builder().build();
    holder(&h, "u1");
    h.store.fail_snapshot_reads(true);

    let (status, json) = call(&app(&h), request("POST", "/v1/verify/u1", Some("u1"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "internal");
    assert_eq!(json["message"], "verification failed at snapshot stage");
}

#[tokio::test]
async fn partial_failure_reports_pending_groups() {
    let h = Harness::builder().build();
    holder(&h, "u1");
    h.directory
        .fail_grant("beginner", DirectoryError::Timeout { after_ms: 5000 });

    let (status, json) = call(&app(&h), request("POST", "/v1/verify/u1", Some("u1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "partially_failed");
    assert_eq!(json["added"], serde_json::json!(["alpha_holder"]));
    assert_eq!(json["pending_add"], serde_json::json!(["beginner"]));
}

#[tokio::test]
async fn second_call_inside_interval_is_throttled() {
    let h = Harness::builder()
        .min_interval(Duration::from_secs(300))
        .build();
    holder(&h, "u1");
    let st = app(&h);

    let (_, first) = call(&st, request("POST", "/v1/verify/u1", Some("u1"))).await;
    let (status, second) = call(&st, request("POST", "/v1/verify/u1", Some("u1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "throttled");
    assert_eq!(second["added"], first["added"]);
    assert_eq!(second["verified_at"], first["verified_at"]);
    assert!(second["retry_after_secs"].as_u64().unwrap() <= 300);
    assert_eq!(h.directory.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn verify_run_survives_client_disconnect() {
    let h = Harness::builder().build();
    holder(&h, "u1");
    h.directory.set_delay(Some(Duration::from_millis(200)));
    let st = app(&h);

    let router = routes::build_router(Arc::clone(&st));
    let req = request("POST", "/v1/verify/u1", Some("u1"));
    let client = tokio::spawn(async move { router.oneshot(req).await });
    while h.directory.call_count() == 0 {
        tokio::task::yield_now().await;
    }
    client.abort();
    assert!(client.await.unwrap_err().is_cancelled());

    let p = PrincipalId::from("u1");
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.store.granted(&p).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("detached run did not finish");

    assert_eq!(h.store.audit_entries().len(), 1);
    assert_eq!(h.store.granted(&p).unwrap().groups, set(&["alpha_holder", "beginner"]));
    assert_eq!(h.directory.members(&p), set(&["alpha_holder", "beginner"]));
}

// ---------------------------------------------------------------------------
// GET /v1/audit/{principal_id}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_lists_entries_in_insertion_order() {
    let h = Harness::builder().build();
    holder(&h, "u1");
    let st = app(&h);

    call(&st, request("POST", "/v1/verify/u1", Some("u1"))).await;
    h.store.set_snapshot("u1", OwnershipSnapshot::empty());
    call(&st, request("POST", "/v1/verify/u1", Some("u1"))).await;

    let (status, json) = call(&st, request("GET", "/v1/audit/u1", Some("u1"))).await;
    assert_eq!(status, StatusCode::OK);
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["added"], serde_json::json!(["alpha_holder", "beginner"]));
    assert_eq!(entries[1]["removed"], serde_json::json!(["alpha_holder", "beginner"]));
    assert_eq!(entries[1]["success"], true);
    assert_eq!(entries[1]["error"], serde_json::Value::Null);

    let (status, _) = call(&st, request("GET", "/v1/audit/u1", Some("u2"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_runs_are_broadcast_and_throttled_runs_are_not() {
    let h = Harness::builder()
        .min_interval(Duration::from_secs(300))
        .build();
    holder(&h, "u1");
    let st = app(&h);
    let mut rx = st.bus.subscribe();

    call(&st, request("POST", "/v1/verify/u1", Some("u1"))).await;
    call(&st, request("POST", "/v1/verify/u1", Some("u1"))).await;

    match rx.try_recv().unwrap() {
        state::BusMsg::Verified {
            principal_id,
            outcome,
            added,
            ..
        } => {
            assert_eq!(principal_id, "u1");
            assert_eq!(outcome, "succeeded");
            assert_eq!(added, vec!["alpha_holder", "beginner"]);
        }
        other => panic!("unexpected bus message: {other:?}"),
    }
    assert!(rx.try_recv().is_err());
}
