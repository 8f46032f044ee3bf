use anyhow::{anyhow, bail, Context, Result};
use hg_entitlements::{EntitlementRuleSet, GroupId, PrincipalId, ProtectedGroupSet};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MIN_INTERVAL_SECS: u64 = 300;
const DEFAULT_RESYNC_CONCURRENCY: usize = 4;
const DEFAULT_RATE_LIMIT_MAX_CALLS: u32 = 40;
const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 1_000;
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Where and how the directory service is reached. The token itself is
/// resolved from `token_env` by [`crate::secrets::resolve_secrets`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySettings {
    pub base_url: String,
    pub guild_id: String,
    pub token_env: String,
}

/// Typed view of everything the verification pipeline reads from config.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub min_interval: Duration,
    pub resync_concurrency: usize,
    /// Caller allowed to verify any principal (support tooling).
    pub operator_principal: Option<PrincipalId>,
    pub rate_limit_max_calls: u32,
    pub rate_limit_window: Duration,
    pub ownership_timeout: Duration,
    pub directory_timeout: Duration,
    pub directory: DirectorySettings,
    pub rules: EntitlementRuleSet,
    pub protected: ProtectedGroupSet,
    pub audit_jsonl_path: Option<PathBuf>,
}

/// `entitlements.protected_groups`; the rest of the section is the rule set.
#[derive(Deserialize)]
struct ProtectedSection {
    #[serde(default)]
    protected_groups: Vec<GroupId>,
}

fn u64_at(cfg: &Value, pointer: &str, default: u64) -> Result<u64> {
    match cfg.pointer(pointer) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| anyhow!("CONFIG_INVALID_VALUE {pointer}: expected non-negative integer")),
    }
}

fn str_at(cfg: &Value, pointer: &str) -> Option<String> {
    cfg.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required_str_at(cfg: &Value, pointer: &str) -> Result<String> {
    str_at(cfg, pointer).ok_or_else(|| anyhow!("CONFIG_MISSING_KEY {pointer}"))
}

impl VerifierConfig {
    /// Extract and validate. Any failure here is a configuration error: the
    /// process must not start verifying until it is fixed.
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let min_interval_secs = u64_at(cfg, "/verification/min_interval_secs", DEFAULT_MIN_INTERVAL_SECS)?;
        let resync_concurrency = u64_at(
            cfg,
            "/verification/resync_concurrency",
            DEFAULT_RESYNC_CONCURRENCY as u64,
        )? as usize;
        if resync_concurrency == 0 {
            bail!("CONFIG_INVALID_VALUE /verification/resync_concurrency: must be >= 1");
        }

        let max_calls = u64_at(cfg, "/rate_limit/max_calls", DEFAULT_RATE_LIMIT_MAX_CALLS as u64)?;
        let max_calls = u32::try_from(max_calls)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| anyhow!("CONFIG_INVALID_VALUE /rate_limit/max_calls: must be in 1..=u32::MAX"))?;
        let window_ms = u64_at(cfg, "/rate_limit/window_ms", DEFAULT_RATE_LIMIT_WINDOW_MS)?;
        if window_ms == 0 {
            bail!("CONFIG_INVALID_VALUE /rate_limit/window_ms: must be >= 1");
        }

        let ownership_ms = u64_at(cfg, "/timeouts/ownership_ms", DEFAULT_TIMEOUT_MS)?;
        let directory_ms = u64_at(cfg, "/timeouts/directory_ms", DEFAULT_TIMEOUT_MS)?;
        if ownership_ms == 0 || directory_ms == 0 {
            bail!("CONFIG_INVALID_VALUE /timeouts: every outbound timeout must be >= 1ms");
        }

        let directory = DirectorySettings {
            base_url: required_str_at(cfg, "/directory/base_url")?,
            guild_id: required_str_at(cfg, "/directory/guild_id")?,
            token_env: required_str_at(cfg, "/directory/token_env")?,
        };

        let section = cfg
            .pointer("/entitlements")
            .cloned()
            .ok_or_else(|| anyhow!("CONFIG_MISSING_KEY /entitlements"))?;
        let protected: ProtectedSection = serde_json::from_value(section.clone())
            .context("CONFIG_INVALID_RULES /entitlements/protected_groups")?;
        let rules: EntitlementRuleSet = serde_json::from_value(section)
            .map_err(|e| anyhow!("CONFIG_INVALID_RULES /entitlements: {e}"))?;
        let protected: ProtectedGroupSet = protected.protected_groups.into_iter().collect();
        // A protected group is never revoked, so no rule may manage it.
        if let Some(clash) = rules.managed_groups().iter().find(|g| protected.contains(g)) {
            bail!("CONFIG_INVALID_RULES /entitlements: group {clash} is both rule-managed and protected");
        }

        Ok(Self {
            min_interval: Duration::from_secs(min_interval_secs),
            resync_concurrency,
            operator_principal: str_at(cfg, "/verification/operator_principal").map(PrincipalId::from),
            rate_limit_max_calls: max_calls,
            rate_limit_window: Duration::from_millis(window_ms),
            ownership_timeout: Duration::from_millis(ownership_ms),
            directory_timeout: Duration::from_millis(directory_ms),
            directory,
            rules,
            protected,
            audit_jsonl_path: str_at(cfg, "/audit/jsonl_path").map(PathBuf::from),
        })
    }
}
