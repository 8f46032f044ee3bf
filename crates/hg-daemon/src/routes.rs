//! Axum router and HTTP handlers for hg-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests compose the bare router directly.
//!
//! # Caller identity
//!
//! Session issuance happens upstream. The proxy in front of the daemon sets
//! `x-hg-principal` to the signed-in principal. A request may only act on
//! its own principal, unless it carries the configured operator id.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use hg_entitlements::PrincipalId;
use hg_runtime::{Stage, Verification, VerificationStore, VerifyError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{AuditResponse, ErrorResponse, HealthResponse, VerifyResponse},
    state::{uptime_secs, AppState, BusMsg},
};

pub const PRINCIPAL_HEADER: &str = "x-hg-principal";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/verify/:principal_id", post(verify))
        .route("/v1/audit/:principal_id", get(audit))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

fn status_for(err: &VerifyError) -> StatusCode {
    match err {
        VerifyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        VerifyError::NotFound(_) => StatusCode::NOT_FOUND,
        VerifyError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &VerifyError) -> Response {
    // Internal details stay in the log.
    let message = match err {
        VerifyError::Store { stage, .. } => format!("verification failed at {} stage", stage.as_str()),
        other => other.to_string(),
    };
    (
        status_for(err),
        Json(ErrorResponse {
            code: err.code().to_string(),
            message,
        }),
    )
        .into_response()
}

/// The caller named in `x-hg-principal` may act on `target`.
fn authorize(st: &AppState, headers: &HeaderMap, target: &PrincipalId) -> Result<(), VerifyError> {
    let caller = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PrincipalId::from)
        .ok_or_else(|| VerifyError::Unauthorized(format!("missing {PRINCIPAL_HEADER} header")))?;

    if &caller == target || st.operator.as_ref() == Some(&caller) {
        return Ok(());
    }
    Err(VerifyError::Unauthorized(format!(
        "caller {caller} may not act on principal {target}"
    )))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/verify/{principal_id}
// ---------------------------------------------------------------------------

pub(crate) async fn verify(
    State(st): State<Arc<AppState>>,
    Path(principal_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = PrincipalId::from(principal_id);
    if let Err(e) = authorize(&st, &headers, &principal) {
        warn!(principal_id = %principal, "verify refused: {e}");
        return error_response(&e);
    }

    // Detached from the request: a client disconnect must not cancel a run
    // between its directory calls and its audit entry.
    let task = tokio::spawn({
        let st = Arc::clone(&st);
        let principal = principal.clone();
        async move {
            let result = st.orchestrator.verify(&principal).await;
            if let Ok(Verification::Completed(r)) = &result {
                let _ = st.bus.send(BusMsg::Verified {
                    principal_id: r.principal_id.to_string(),
                    outcome: r.outcome.as_str().to_string(),
                    added: r.added.to_strings(),
                    removed: r.removed.to_strings(),
                    pending_add: r.pending_add.to_strings(),
                    pending_remove: r.pending_remove.to_strings(),
                });
            }
            result
        }
    });

    let result = match task.await {
        Ok(result) => result,
        Err(join) => {
            warn!(principal_id = %principal, error = %join, "verification task did not finish");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    code: "internal".to_string(),
                    message: "verification task did not finish".to_string(),
                }),
            )
                .into_response();
        }
    };

    match result {
        Ok(v) => (StatusCode::OK, Json(VerifyResponse::from(&v))).into_response(),
        Err(e) => {
            match &e {
                VerifyError::Store { .. } => warn!(principal_id = %principal, error = %e, "verification failed"),
                _ => info!(principal_id = %principal, code = e.code(), "verification refused"),
            }
            error_response(&e)
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/audit/{principal_id}
// ---------------------------------------------------------------------------

pub(crate) async fn audit(
    State(st): State<Arc<AppState>>,
    Path(principal_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = PrincipalId::from(principal_id);
    if let Err(e) = authorize(&st, &headers, &principal) {
        return error_response(&e);
    }

    match st.orchestrator.store().list_audit_entries(&principal).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(AuditResponse {
                principal_id: principal.to_string(),
                entries: entries.into_iter().map(Into::into).collect(),
            }),
        )
            .into_response(),
        Err(error) => {
            warn!(principal_id = %principal, %error, "audit read failed");
            error_response(&VerifyError::Store {
                stage: Stage::Audit,
                error,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(rx: broadcast::Receiver<BusMsg>) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Verified { .. } => "verified",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
