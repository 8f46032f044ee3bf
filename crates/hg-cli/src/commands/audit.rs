use anyhow::{anyhow, bail, Result};
use hg_audit::{read_entries_for_principal, verify_hash_chain, ReconciliationAuditEntry, VerifyResult};
use hg_db::PgVerificationStore;
use hg_entitlements::PrincipalId;
use hg_runtime::VerificationStore;

use super::fmt_groups;

/// From the database, or from a JSONL mirror when `jsonl` is given.
pub async fn show(principal: &str, jsonl: Option<&str>) -> Result<()> {
    let principal = PrincipalId::from(principal);

    let entries = match jsonl {
        Some(path) => read_entries_for_principal(path, &principal)?,
        None => {
            let pool = hg_db::connect_from_env().await?;
            let store = PgVerificationStore::new(pool.clone());
            let listed = store.list_audit_entries(&principal).await;
            pool.close().await;
            listed.map_err(|e| anyhow!("AUDIT_READ_FAILED {e}"))?
        }
    };

    println!("principal_id={} entries={}", principal, entries.len());
    for e in &entries {
        print_entry(e);
    }
    Ok(())
}

fn print_entry(e: &ReconciliationAuditEntry) {
    println!(
        "ts_utc={} entry_id={} success={} added={} removed={} error={}",
        e.ts_utc.to_rfc3339(),
        e.entry_id,
        e.success,
        fmt_groups(&e.added),
        fmt_groups(&e.removed),
        e.error.as_deref().unwrap_or("-"),
    );
}

/// Non-zero exit on a broken chain.
pub fn verify_chain(path: &str) -> Result<()> {
    match verify_hash_chain(path)? {
        VerifyResult::Valid { lines } => {
            println!("chain_valid=true lines={lines}");
            Ok(())
        }
        VerifyResult::Broken { line, reason } => {
            println!("chain_valid=false line={line}");
            bail!("AUDIT_CHAIN_BROKEN line={line}: {reason}")
        }
    }
}
