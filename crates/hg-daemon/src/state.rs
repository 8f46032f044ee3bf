//! Shared runtime state for hg-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The orchestrator is
//! built once at startup and shared; so is the rate limiter inside it.

use std::sync::Arc;
use std::time::Duration;

use hg_entitlements::PrincipalId;
use hg_runtime::VerificationOrchestrator;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    /// A verification run finished (throttled calls are not broadcast).
    Verified {
        principal_id: String,
        outcome: String,
        added: Vec<String>,
        removed: Vec<String>,
        pending_add: Vec<String>,
        pending_remove: Vec<String>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub orchestrator: Arc<VerificationOrchestrator>,
    /// Caller allowed to act on any principal.
    pub operator: Option<PrincipalId>,
}

impl AppState {
    pub fn new(orchestrator: Arc<VerificationOrchestrator>, operator: Option<PrincipalId>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "hg-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            orchestrator,
            operator,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Emit a heartbeat on the bus every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
