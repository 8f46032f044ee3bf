//! Command handler modules for hg-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod audit;
pub mod config;
pub mod verify;
pub mod wallet;

use hg_entitlements::EntitlementSet;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Logs go to stderr so stdout stays `key=value` for scripts.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
}

/// `$HG_CONFIG` / default path when no `--config` was given.
pub fn resolve_config_paths(paths: &[String]) -> Vec<String> {
    if paths.is_empty() {
        hg_daemon::wiring::config_paths_from_env()
    } else {
        paths.to_vec()
    }
}

/// Comma-joined group list; `-` when empty.
pub fn fmt_groups(groups: &EntitlementSet) -> String {
    if groups.is_empty() {
        "-".to_string()
    } else {
        groups.to_strings().join(",")
    }
}
