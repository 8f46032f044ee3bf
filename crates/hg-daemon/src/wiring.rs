//! Startup wiring shared by the daemon and the operator CLI.
//!
//! Order matters: config (fatal on any rule error) → secrets → DB with a
//! bounded number of attempts → one rate limiter → orchestrator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hg_audit::AuditWriter;
use hg_config::secrets::{resolve_secrets, ResolvedSecrets};
use hg_config::{load_layered_yaml, report_unused_keys, LoadedConfig, UnusedKeyPolicy, VerifierConfig};
use hg_db::PgVerificationStore;
use hg_directory::{DirectoryService, HttpDirectoryClient};
use hg_runtime::{
    DirectoryReconciler, OrchestratorConfig, RateLimiter, VerificationOrchestrator, VerificationStore,
};
use sqlx::PgPool;
use tracing::{info, warn};

pub const ENV_CONFIG_PATHS: &str = "HG_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/holdgate.yaml";

const DB_CONNECT_ATTEMPTS: u32 = 5;
const DB_CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Comma-separated YAML layers from `HG_CONFIG`, base first.
pub fn config_paths_from_env() -> Vec<String> {
    std::env::var(ENV_CONFIG_PATHS)
        .ok()
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_CONFIG_PATH.to_string()])
}

/// Load layered YAML and extract the typed config. Unused keys are logged.
pub fn load_verifier_config(paths: &[String]) -> Result<(LoadedConfig, VerifierConfig)> {
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&refs)?;

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(unused = ?report.unused_leaf_pointers, "CONFIG_UNUSED_KEYS");
    }

    let cfg = VerifierConfig::from_config_json(&loaded.config_json)?;
    info!(
        config_hash = %loaded.config_hash,
        rules = cfg.rules.rules().len(),
        protected = cfg.protected.len(),
        "configuration loaded"
    );
    Ok((loaded, cfg))
}

/// Connect, then refuse to continue on an unmigrated schema.
pub async fn connect_db(secrets: &ResolvedSecrets) -> Result<PgPool> {
    let pool =
        hg_db::connect_with_retry(&secrets.database_url, DB_CONNECT_ATTEMPTS, DB_CONNECT_BACKOFF)
            .await?;
    let st = hg_db::status(&pool).await?;
    if !st.has_granted_table {
        pool.close().await;
        bail!("DB_NOT_MIGRATED: run `hg db migrate` first");
    }
    Ok(pool)
}

pub fn build_orchestrator(
    cfg: &VerifierConfig,
    store: Arc<dyn VerificationStore>,
    directory: Arc<dyn DirectoryService>,
) -> Result<VerificationOrchestrator> {
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit_max_calls, cfg.rate_limit_window));

    let mut reconciler = DirectoryReconciler::new(
        directory,
        limiter.clone(),
        store.clone(),
        cfg.directory_timeout,
    );
    if let Some(path) = &cfg.audit_jsonl_path {
        let writer = AuditWriter::resume(path, true)
            .with_context(|| format!("open audit mirror {}", path.display()))?;
        info!(path = %path.display(), next_seq = writer.seq(), "audit mirror enabled");
        reconciler = reconciler.with_mirror(writer);
    }

    Ok(VerificationOrchestrator::new(
        cfg.rules.clone(),
        cfg.protected.clone(),
        store,
        reconciler,
        limiter,
        OrchestratorConfig {
            min_interval: cfg.min_interval,
            ownership_timeout: cfg.ownership_timeout,
        },
    ))
}

/// Everything a process needs to run verifications against Postgres and the
/// live directory.
pub struct Services {
    pub config: VerifierConfig,
    pub pool: PgPool,
    pub orchestrator: Arc<VerificationOrchestrator>,
}

pub async fn bootstrap(config_paths: &[String]) -> Result<Services> {
    let (_, config) = load_verifier_config(config_paths)?;
    let secrets = resolve_secrets(&config)?;
    let pool = connect_db(&secrets).await?;

    let store: Arc<dyn VerificationStore> = Arc::new(PgVerificationStore::new(pool.clone()));
    let directory: Arc<dyn DirectoryService> = Arc::new(HttpDirectoryClient::new(
        config.directory.base_url.clone(),
        config.directory.guild_id.clone(),
        secrets.directory_token.clone(),
    ));
    let orchestrator = Arc::new(build_orchestrator(&config, store, directory)?);

    Ok(Services {
        config,
        pool,
        orchestrator,
    })
}
