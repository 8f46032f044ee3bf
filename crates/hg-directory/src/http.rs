use hg_entitlements::{GroupId, PrincipalId};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::{DirectoryError, DirectoryService};

/// Guild-role REST client.
///
/// `PUT    {base}/guilds/{guild}/members/{principal}/roles/{group}` grants,
/// `DELETE` on the same path revokes. Both answer 204 on success and are
/// idempotent on the directory side.
///
/// The token is resolved by the caller and passed in; it is never logged.
#[derive(Clone)]
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    base_url: String,
    guild_id: String,
    token: String,
}

impl std::fmt::Debug for HttpDirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDirectoryClient")
            .field("base_url", &self.base_url)
            .field("guild_id", &self.guild_id)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl HttpDirectoryClient {
    pub fn new(base_url: String, guild_id: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            guild_id,
            token,
        }
    }

    /// Ids are pushed as single path segments, percent-encoded.
    fn member_role_url(&self, principal: &PrincipalId, group: &GroupId) -> Result<Url, DirectoryError> {
        let invalid = || DirectoryError::Transport(format!("invalid directory base url {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend([
                "guilds",
                self.guild_id.as_str(),
                "members",
                principal.as_str(),
                "roles",
                group.as_str(),
            ]);
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        principal: &PrincipalId,
        group: &GroupId,
    ) -> Result<(), DirectoryError> {
        let url = self.member_role_url(principal, group)?;
        debug!(%method, principal_id = %principal, group_id = %group, "directory call");

        let resp = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.token))
            .header("X-Audit-Log-Reason", "holdgate entitlement reconcile")
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let body: Option<RateLimitBody> = resp.json().await.ok();
            return Err(DirectoryError::RateLimited {
                retry_after_ms: body
                    .and_then(|b| b.retry_after)
                    .map(|secs| (secs * 1000.0).round() as u64),
            });
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    text
                }
            });

        Err(DirectoryError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait::async_trait]
impl DirectoryService for HttpDirectoryClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn grant_group(
        &self,
        principal: &PrincipalId,
        group: &GroupId,
    ) -> Result<(), DirectoryError> {
        self.send(Method::PUT, principal, group).await
    }

    async fn revoke_group(
        &self,
        principal: &PrincipalId,
        group: &GroupId,
    ) -> Result<(), DirectoryError> {
        self.send(Method::DELETE, principal, group).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    /// Seconds, possibly fractional.
    retry_after: Option<f64>,
}
