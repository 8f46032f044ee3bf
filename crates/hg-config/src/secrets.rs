//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"HG_DIRECTORY_TOKEN"`).
//! - At startup, binaries call [`resolve_secrets`] once and pass the result
//!   into constructors; no other module reads secrets from the environment.
//! - `Debug` redacts values. Error messages name the env var, never the value.

use anyhow::{bail, Result};

use crate::VerifierConfig;

/// Env var holding the Postgres URL.
pub const ENV_DATABASE_URL: &str = "HG_DATABASE_URL";

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Directory bot token, sent as `Authorization: Bot <token>`.
    pub directory_token: String,
    pub database_url: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("directory_token", &"<REDACTED>")
            .field("database_url", &"<REDACTED>")
            .finish()
    }
}

/// Returns `None` if the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve every secret the verifier needs. Both are required.
pub fn resolve_secrets(cfg: &VerifierConfig) -> Result<ResolvedSecrets> {
    let token_env = &cfg.directory.token_env;
    let Some(directory_token) = resolve_env(token_env) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (directory token) is not set or empty",
            token_env
        );
    };
    let Some(database_url) = resolve_env(ENV_DATABASE_URL) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            ENV_DATABASE_URL
        );
    };

    Ok(ResolvedSecrets {
        directory_token,
        database_url,
    })
}
