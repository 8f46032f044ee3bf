use anyhow::Result;
use hg_db::LinkOutcome;
use hg_entitlements::PrincipalId;
use sqlx::PgPool;

pub async fn link(pool: &PgPool, principal: &str, wallet: &str) -> Result<()> {
    let principal = PrincipalId::from(principal);
    let outcome = hg_db::link_wallet(pool, &principal, wallet).await?;
    let status = match outcome {
        LinkOutcome::Linked => "linked",
        LinkOutcome::AlreadyLinked => "already_linked",
    };
    println!("wallet={} principal_id={} status={}", wallet.trim(), principal, status);
    Ok(())
}

pub async fn unlink(pool: &PgPool, wallet: &str) -> Result<()> {
    match hg_db::unlink_wallet(pool, wallet).await? {
        Some(principal) => println!("wallet={} unlinked_from={}", wallet.trim(), principal),
        None => println!("wallet={} linked=false", wallet.trim()),
    }
    Ok(())
}

pub async fn list(pool: &PgPool, principal: &str) -> Result<()> {
    let principal = PrincipalId::from(principal);
    let wallets = hg_db::list_wallets(pool, &principal).await?;
    println!("principal_id={} wallets={}", principal, wallets.len());
    for w in wallets {
        println!("wallet={w}");
    }
    Ok(())
}
