//! hg-directory
//!
//! Directory service boundary: the [`DirectoryService`] contract the
//! reconciler calls, its error type, and the HTTP client for the guild-role
//! REST API.
//!
//! Every call is a single attempt. There is no retry in here; a failed grant
//! or revoke is retried by the next verification run.

mod http;

pub use http::HttpDirectoryClient;

use hg_entitlements::{GroupId, PrincipalId};
use std::fmt;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`DirectoryService`] call may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Network or transport failure.
    Transport(String),
    /// The directory answered with a non-success status.
    Api { status: u16, message: String },
    /// The directory refused the call for rate reasons (HTTP 429).
    RateLimited { retry_after_ms: Option<u64> },
    /// The call did not complete within the configured bound.
    Timeout { after_ms: u64 },
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Transport(msg) => write!(f, "transport error: {msg}"),
            DirectoryError::Api { status, message } => {
                write!(f, "directory api error status={status}: {message}")
            }
            DirectoryError::RateLimited {
                retry_after_ms: Some(ms),
            } => write!(f, "directory rate limited; retry after {ms}ms"),
            DirectoryError::RateLimited {
                retry_after_ms: None,
            } => write!(f, "directory rate limited"),
            DirectoryError::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
        }
    }
}

impl std::error::Error for DirectoryError {}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// Group-membership mutations on the external directory.
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// concurrent verification run.
#[async_trait::async_trait]
pub trait DirectoryService: Send + Sync {
    /// Human-readable name for logs (e.g. `"http"`).
    fn name(&self) -> &'static str;

    /// Add `principal` to `group`. Granting a group already held is a success.
    async fn grant_group(&self, principal: &PrincipalId, group: &GroupId)
        -> Result<(), DirectoryError>;

    /// Remove `principal` from `group`. Revoking a group not held is a success.
    async fn revoke_group(
        &self,
        principal: &PrincipalId,
        group: &GroupId,
    ) -> Result<(), DirectoryError>;
}
