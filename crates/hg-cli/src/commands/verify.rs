use anyhow::{anyhow, Result};
use hg_daemon::wiring;
use hg_entitlements::PrincipalId;
use hg_runtime::{resync_all, Verification};
use tracing::info;

use super::{fmt_groups, resolve_config_paths};

pub async fn verify_one(config_paths: &[String], principal: &str) -> Result<()> {
    let services = wiring::bootstrap(&resolve_config_paths(config_paths)).await?;
    let principal = PrincipalId::from(principal);
    info!(principal_id = %principal, "cli verification requested");

    let result = services.orchestrator.verify(&principal).await;
    services.pool.close().await;

    let v = result.map_err(|e| anyhow!("VERIFY_FAILED code={} {e}", e.code()))?;
    print_verification(&v);
    Ok(())
}

pub async fn resync(config_paths: &[String], concurrency: Option<usize>) -> Result<()> {
    let services = wiring::bootstrap(&resolve_config_paths(config_paths)).await?;
    let concurrency = concurrency
        .unwrap_or(services.config.resync_concurrency)
        .max(1);

    info!(concurrency, "cli resync requested");
    let principals = match services.orchestrator.store().list_principals().await {
        Ok(p) => p,
        Err(e) => {
            services.pool.close().await;
            return Err(anyhow!("RESYNC_LIST_FAILED {e}"));
        }
    };
    let summary = resync_all(&services.orchestrator, principals, concurrency).await;
    services.pool.close().await;

    println!("total={}", summary.total());
    println!("succeeded={}", summary.succeeded);
    println!("partially_failed={}", summary.partially_failed);
    println!("throttled={}", summary.throttled);
    println!("failed={}", summary.failed.len());
    for (principal, code, message) in &summary.failed {
        println!("failed_principal={principal} code={code} message={message}");
    }
    Ok(())
}

fn print_verification(v: &Verification) {
    let r = v.report();
    println!("principal_id={}", r.principal_id);
    println!("outcome={}", v.outcome_str());
    println!("earned={}", fmt_groups(&r.earned));
    println!("added={}", fmt_groups(&r.added));
    println!("removed={}", fmt_groups(&r.removed));
    println!("pending_add={}", fmt_groups(&r.pending_add));
    println!("pending_remove={}", fmt_groups(&r.pending_remove));
    println!("verified_at_utc={}", r.verified_at.to_rfc3339());
    if let Verification::Throttled { retry_after, .. } = v {
        println!("retry_after_secs={}", retry_after.as_secs());
    }
}
