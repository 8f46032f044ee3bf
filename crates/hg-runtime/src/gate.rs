//! Outbound call admission.
//!
//! # Invariants
//!
//! - **Shared**: one limiter instance per process, passed by `Arc` to every
//!   component that talks to the ownership provider or the directory.
//! - **Sliding window**: at most `max_calls` admissions in any trailing
//!   `window`.
//! - **Wait, never reject**: a call that does not fit blocks the caller until
//!   the oldest admission leaves the window. A burst of concurrent
//!   verifications self-serializes instead of failing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// What kind of external call is asking for admission (for logs and stats).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboundCall {
    OwnershipFetch,
    DirectoryGrant,
    DirectoryRevoke,
}

impl OutboundCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundCall::OwnershipFetch => "ownership_fetch",
            OutboundCall::DirectoryGrant => "directory_grant",
            OutboundCall::DirectoryRevoke => "directory_revoke",
        }
    }
}

/// Admission control for outbound calls. Returns once the call may proceed.
#[async_trait::async_trait]
pub trait OutboundGate: Send + Sync {
    async fn admit(&self, call: OutboundCall);
}

/// Gate that admits everything immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unmetered;

#[async_trait::async_trait]
impl OutboundGate for Unmetered {
    async fn admit(&self, _call: OutboundCall) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub admitted: u64,
    /// Number of times a caller had to sleep before being admitted.
    pub waits: u64,
}

/// Sliding-window limiter shared by every outbound call in the process.
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    admitted_at: Mutex<VecDeque<Instant>>,
    admitted: AtomicU64,
    waits: AtomicU64,
}

impl RateLimiter {
    /// `max_calls` is clamped to at least 1.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        let max_calls = max_calls.max(1) as usize;
        Self {
            max_calls,
            window,
            admitted_at: Mutex::new(VecDeque::with_capacity(max_calls)),
            admitted: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
        }
    }

    /// Admit now, or report how long until the oldest admission expires.
    async fn try_admit(&self) -> Option<Duration> {
        let mut q = self.admitted_at.lock().await;
        let now = Instant::now();

        while let Some(&oldest) = q.front() {
            if now.duration_since(oldest) >= self.window {
                q.pop_front();
            } else {
                break;
            }
        }

        if q.len() < self.max_calls {
            q.push_back(now);
            self.admitted.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let wait = q
            .front()
            .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
            .unwrap_or_default();
        Some(wait.max(Duration::from_millis(1)))
    }
}

#[async_trait::async_trait]
impl OutboundGate for RateLimiter {
    async fn admit(&self, call: OutboundCall) {
        // The lock is released before sleeping; waiters race fairly on wake.
        while let Some(wait) = self.try_admit().await {
            self.waits.fetch_add(1, Ordering::Relaxed);
            debug!(
                call = call.as_str(),
                wait_ms = wait.as_millis() as u64,
                "rate window full; waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }
}
