//! Postgres implementation of the storage collaborator.
//!
//! # Invariants
//!
//! - `load_view` reads principal, aggregated holdings, balance and granted
//!   record inside one REPEATABLE READ transaction.
//! - The granted-record write is a single conditional statement: insert when
//!   no row exists (`expected_version = None`), otherwise update only where
//!   `version` still matches. Zero affected rows is a conflict.
//! - Audit rows are inserted, never updated; list order is the `id` sequence.
//! - `verification_runs` is an upsert guarded by `verified_at_utc`, so a slow
//!   writer cannot roll the throttle clock back.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hg_audit::ReconciliationAuditEntry;
use hg_entitlements::{CollectionId, EntitlementSet, OwnershipSnapshot, PrincipalId};
use hg_runtime::{
    GrantedEntitlementRecord, PutOutcome, StoreError, VerificationReport, VerificationStore,
    VerificationView,
};
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

fn db_err(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Unavailable(format!("{what}: {e}"))
}

fn to_u64(v: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("{what} is negative: {v}")))
}

fn groups_to_json(groups: &EntitlementSet) -> Result<Value, StoreError> {
    serde_json::to_value(groups).map_err(|e| StoreError::Corrupt(format!("encode groups: {e}")))
}

fn groups_from_json(v: Value, what: &str) -> Result<EntitlementSet, StoreError> {
    serde_json::from_value(v).map_err(|e| StoreError::Corrupt(format!("decode {what}: {e}")))
}

#[derive(Clone)]
pub struct PgVerificationStore {
    pool: PgPool,
}

impl PgVerificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn principal_exists(conn: &mut PgConnection, principal: &PrincipalId) -> Result<bool, StoreError> {
    let (exists,): (bool,) =
        sqlx::query_as("select exists (select 1 from principals where principal_id = $1)")
            .bind(principal.as_str())
            .fetch_one(conn)
            .await
            .map_err(db_err("principal lookup"))?;
    Ok(exists)
}

async fn read_snapshot(conn: &mut PgConnection, principal: &PrincipalId) -> Result<OwnershipSnapshot, StoreError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        select h.collection_id, sum(h.item_count)::bigint
        from wallet_holdings h
        join linked_wallets w on w.wallet_pubkey = h.wallet_pubkey
        where w.principal_id = $1
        group by h.collection_id
        "#,
    )
    .bind(principal.as_str())
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err("holdings query"))?;

    let mut holdings = BTreeMap::new();
    for (collection, count) in rows {
        holdings.insert(CollectionId::from(collection), to_u64(count, "item_count")?);
    }

    let (balance,): (i64,) = sqlx::query_as(
        r#"
        select coalesce(sum(b.balance), 0)::bigint
        from wallet_token_balances b
        join linked_wallets w on w.wallet_pubkey = b.wallet_pubkey
        where w.principal_id = $1
        "#,
    )
    .bind(principal.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err("balance query"))?;

    Ok(OwnershipSnapshot {
        holdings,
        balance: to_u64(balance, "balance")?,
    })
}

async fn read_granted(
    conn: &mut PgConnection,
    principal: &PrincipalId,
) -> Result<Option<GrantedEntitlementRecord>, StoreError> {
    let row = sqlx::query(
        r#"
        select groups, version, updated_at_utc
        from granted_entitlements
        where principal_id = $1
        "#,
    )
    .bind(principal.as_str())
    .fetch_optional(conn)
    .await
    .map_err(db_err("granted record query"))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let groups: Value = row.try_get("groups").map_err(db_err("granted.groups"))?;
    Ok(Some(GrantedEntitlementRecord {
        principal_id: principal.clone(),
        groups: groups_from_json(groups, "granted.groups")?,
        version: row.try_get("version").map_err(db_err("granted.version"))?,
        updated_at: row.try_get("updated_at_utc").map_err(db_err("granted.updated_at_utc"))?,
    }))
}

#[async_trait::async_trait]
impl VerificationStore for PgVerificationStore {
    async fn get_ownership_snapshot(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<OwnershipSnapshot>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err("acquire"))?;
        if !principal_exists(&mut conn, principal).await? {
            return Ok(None);
        }
        Ok(Some(read_snapshot(&mut conn, principal).await?))
    }

    async fn get_granted_entitlements(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<GrantedEntitlementRecord>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err("acquire"))?;
        read_granted(&mut conn, principal).await
    }

    async fn load_view(&self, principal: &PrincipalId) -> Result<Option<VerificationView>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;
        sqlx::query("set transaction isolation level repeatable read, read only")
            .execute(&mut *tx)
            .await
            .map_err(db_err("set isolation"))?;

        if !principal_exists(&mut tx, principal).await? {
            return Ok(None);
        }
        let snapshot = read_snapshot(&mut tx, principal).await?;
        let granted = read_granted(&mut tx, principal).await?;

        tx.commit().await.map_err(db_err("commit"))?;
        Ok(Some(VerificationView { snapshot, granted }))
    }

    async fn put_granted_entitlements(
        &self,
        principal: &PrincipalId,
        groups: &EntitlementSet,
        expected_version: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<PutOutcome, StoreError> {
        let groups = groups_to_json(groups)?;

        let written: Option<(i64,)> = match expected_version {
            None => sqlx::query_as(
                r#"
                insert into granted_entitlements (principal_id, groups, version, updated_at_utc)
                values ($1, $2, 1, $3)
                on conflict (principal_id) do nothing
                returning version
                "#,
            )
            .bind(principal.as_str())
            .bind(&groups)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("granted insert"))?,
            Some(expected) => sqlx::query_as(
                r#"
                update granted_entitlements
                set groups = $2, version = version + 1, updated_at_utc = $3
                where principal_id = $1 and version = $4
                returning version
                "#,
            )
            .bind(principal.as_str())
            .bind(&groups)
            .bind(at)
            .bind(expected)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("granted update"))?,
        };

        Ok(match written {
            Some((version,)) => PutOutcome::Written { version },
            None => PutOutcome::Conflict,
        })
    }

    async fn append_audit_entry(&self, entry: &ReconciliationAuditEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into reconcile_audit (
              entry_id, principal_id, added, removed, success, error, ts_utc
            ) values (
              $1, $2, $3, $4, $5, $6, $7
            )
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.principal_id.as_str())
        .bind(groups_to_json(&entry.added)?)
        .bind(groups_to_json(&entry.removed)?)
        .bind(entry.success)
        .bind(&entry.error)
        .bind(entry.ts_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err("audit insert"))?;
        Ok(())
    }

    async fn list_audit_entries(
        &self,
        principal: &PrincipalId,
    ) -> Result<Vec<ReconciliationAuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            select entry_id, added, removed, success, error, ts_utc
            from reconcile_audit
            where principal_id = $1
            order by id asc
            "#,
        )
        .bind(principal.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("audit list"))?;

        rows.into_iter()
            .map(|row| {
                let entry_id: Uuid = row.try_get("entry_id").map_err(db_err("audit.entry_id"))?;
                let added: Value = row.try_get("added").map_err(db_err("audit.added"))?;
                let removed: Value = row.try_get("removed").map_err(db_err("audit.removed"))?;
                Ok(ReconciliationAuditEntry {
                    entry_id,
                    principal_id: principal.clone(),
                    added: groups_from_json(added, "audit.added")?,
                    removed: groups_from_json(removed, "audit.removed")?,
                    success: row.try_get("success").map_err(db_err("audit.success"))?,
                    error: row.try_get("error").map_err(db_err("audit.error"))?,
                    ts_utc: row.try_get("ts_utc").map_err(db_err("audit.ts_utc"))?,
                })
            })
            .collect()
    }

    async fn list_principals(&self) -> Result<Vec<PrincipalId>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("select principal_id from principals order by principal_id")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err("principal list"))?;
        Ok(rows.into_iter().map(|(p,)| PrincipalId::from(p)).collect())
    }

    async fn get_last_verification(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<VerificationReport>, StoreError> {
        let row: Option<(Value,)> =
            sqlx::query_as("select report from verification_runs where principal_id = $1")
                .bind(principal.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err("verification run query"))?;

        row.map(|(report,)| {
            serde_json::from_value(report)
                .map_err(|e| StoreError::Corrupt(format!("decode verification_runs.report: {e}")))
        })
        .transpose()
    }

    async fn put_last_verification(&self, report: &VerificationReport) -> Result<(), StoreError> {
        let json = serde_json::to_value(report)
            .map_err(|e| StoreError::Corrupt(format!("encode verification report: {e}")))?;
        sqlx::query(
            r#"
            insert into verification_runs (principal_id, verified_at_utc, report)
            values ($1, $2, $3)
            on conflict (principal_id) do update
              set verified_at_utc = excluded.verified_at_utc, report = excluded.report
              where verification_runs.verified_at_utc <= excluded.verified_at_utc
            "#,
        )
        .bind(report.principal_id.as_str())
        .bind(report.verified_at)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(db_err("verification run upsert"))?;
        Ok(())
    }
}
