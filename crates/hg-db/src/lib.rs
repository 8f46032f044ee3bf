use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use hg_entitlements::{CollectionId, PrincipalId};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

mod store;

pub use store::PgVerificationStore;

pub const ENV_DB_URL: &str = "HG_DATABASE_URL";

/// Connect to Postgres using HG_DATABASE_URL (single attempt).
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Startup connection with a bounded number of attempts and linear backoff.
///
/// Either returns a live pool or a fatal error once `attempts` are used up;
/// it never retries in the background.
pub async fn connect_with_retry(url: &str, attempts: u32, backoff: Duration) -> Result<PgPool> {
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match connect(url).await {
            Ok(pool) => {
                info!(attempt, "connected to Postgres");
                return Ok(pool);
            }
            Err(e) => {
                warn!(attempt, attempts, error = %format!("{e:#}"), "Postgres connect failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| anyhow!("no connection attempt made"))
        .context(format!("DB_CONNECT_FAILED after {attempts} attempts")))
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_granted_table: bool,
}

/// Connectivity + schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='granted_entitlements'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_granted_table: exists,
    })
}

// ---------------------------------------------------------------------------
// Principals and linked wallets
// ---------------------------------------------------------------------------

/// Insert the principal if it is not known yet.
pub async fn ensure_principal(pool: &PgPool, principal: &PrincipalId) -> Result<()> {
    sqlx::query("insert into principals (principal_id) values ($1) on conflict do nothing")
        .bind(principal.as_str())
        .execute(pool)
        .await
        .context("ensure_principal failed")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
}

/// Link `wallet` to `principal`. A wallet linked to another principal is
/// refused; relinking to the same principal is a no-op.
pub async fn link_wallet(pool: &PgPool, principal: &PrincipalId, wallet: &str) -> Result<LinkOutcome> {
    let wallet = wallet.trim();
    if wallet.is_empty() {
        bail!("WALLET_INVALID: empty wallet public key");
    }
    ensure_principal(pool, principal).await?;

    let inserted: Option<(String,)> = sqlx::query_as(
        r#"
        insert into linked_wallets (wallet_pubkey, principal_id)
        values ($1, $2)
        on conflict (wallet_pubkey) do nothing
        returning principal_id
        "#,
    )
    .bind(wallet)
    .bind(principal.as_str())
    .fetch_optional(pool)
    .await
    .context("link_wallet insert failed")?;

    if inserted.is_some() {
        return Ok(LinkOutcome::Linked);
    }

    let (owner,): (String,) =
        sqlx::query_as("select principal_id from linked_wallets where wallet_pubkey = $1")
            .bind(wallet)
            .fetch_one(pool)
            .await
            .context("link_wallet owner lookup failed")?;

    if owner == principal.as_str() {
        Ok(LinkOutcome::AlreadyLinked)
    } else {
        Err(anyhow!("WALLET_LINKED_ELSEWHERE: wallet {wallet} belongs to another principal"))
    }
}

/// Remove a wallet link. Returns the principal it belonged to, if any.
pub async fn unlink_wallet(pool: &PgPool, wallet: &str) -> Result<Option<PrincipalId>> {
    let row: Option<(String,)> =
        sqlx::query_as("delete from linked_wallets where wallet_pubkey = $1 returning principal_id")
            .bind(wallet.trim())
            .fetch_optional(pool)
            .await
            .context("unlink_wallet failed")?;
    Ok(row.map(|(p,)| PrincipalId::from(p)))
}

pub async fn list_wallets(pool: &PgPool, principal: &PrincipalId) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "select wallet_pubkey from linked_wallets where principal_id = $1 order by wallet_pubkey",
    )
    .bind(principal.as_str())
    .fetch_all(pool)
    .await
    .context("list_wallets failed")?;
    Ok(rows.into_iter().map(|(w,)| w).collect())
}

// ---------------------------------------------------------------------------
// Ownership facts (indexer writes)
// ---------------------------------------------------------------------------

pub async fn upsert_holding(
    pool: &PgPool,
    wallet: &str,
    collection: &CollectionId,
    item_count: u64,
) -> Result<()> {
    let item_count = i64::try_from(item_count).context("item_count exceeds bigint")?;
    sqlx::query(
        r#"
        insert into wallet_holdings (wallet_pubkey, collection_id, item_count, refreshed_at_utc)
        values ($1, $2, $3, now())
        on conflict (wallet_pubkey, collection_id)
        do update set item_count = excluded.item_count, refreshed_at_utc = now()
        "#,
    )
    .bind(wallet)
    .bind(collection.as_str())
    .bind(item_count)
    .execute(pool)
    .await
    .context("upsert_holding failed")?;
    Ok(())
}

pub async fn upsert_token_balance(pool: &PgPool, wallet: &str, balance: u64) -> Result<()> {
    let balance = i64::try_from(balance).context("balance exceeds bigint")?;
    sqlx::query(
        r#"
        insert into wallet_token_balances (wallet_pubkey, balance, refreshed_at_utc)
        values ($1, $2, now())
        on conflict (wallet_pubkey)
        do update set balance = excluded.balance, refreshed_at_utc = now()
        "#,
    )
    .bind(wallet)
    .bind(balance)
    .execute(pool)
    .await
    .context("upsert_token_balance failed")?;
    Ok(())
}
