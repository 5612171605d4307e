// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity records: (provider, hashed-provider-subject) pairs linking a
//! federated sign-in to a tenant (spec §3). The subject is never stored in
//! clear — only its deterministic hash (C2) — so a leaked row cannot be
//! correlated back to the provider's own user id without the hash function
//! being inverted, which SHA-256 does not permit.

use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

impl Database {
    /// Link a provider identity to a tenant. Idempotent: re-linking the same
    /// (provider, hashed subject) to the same tenant is a no-op. The tenant
    /// is already known here, so this runs through `with_tenant_conn` like
    /// every other tenant-owned write.
    pub async fn upsert_identity(
        &self,
        tenant_id: TenantId,
        provider: &str,
        hashed_subject: &str,
        email_encrypted: Option<&str>,
    ) -> AppResult<()> {
        let provider = provider.to_owned();
        let hashed_subject = hashed_subject.to_owned();
        let email_encrypted = email_encrypted.map(str::to_owned);
        self.with_tenant_conn(tenant_id, move |tx| {
            Box::pin(async move { upsert_identity_tx(tx, tenant_id, &provider, &hashed_subject, email_encrypted.as_deref()).await })
        })
        .await
    }

    /// Resolve a (provider, hashed subject) pair to its owning tenant, if
    /// any. This is the lookup that happens *before* a tenant is known — the
    /// caller has a federated sign-in subject and is asking which tenant (if
    /// any) it belongs to, so there is no tenant id yet to scope a connection
    /// to. Like `tenants.rs`, it runs on a plain pool connection.
    pub async fn resolve_identity(&self, provider: &str, hashed_subject: &str) -> AppResult<Option<TenantId>> {
        let row = sqlx::query("SELECT tenant_id FROM user_identities WHERE provider = $1 AND hashed_subject = $2")
            .bind(provider)
            .bind(hashed_subject)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("failed to resolve identity: {e}")))?;

        Ok(row.map(|r| TenantId::from_uuid(r.get::<Uuid, _>("tenant_id"))))
    }
}

async fn upsert_identity_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    provider: &str,
    hashed_subject: &str,
    email_encrypted: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r"
        INSERT INTO user_identities (tenant_id, provider, hashed_subject, email_encrypted)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (provider, hashed_subject) DO UPDATE SET
            tenant_id = EXCLUDED.tenant_id,
            email_encrypted = EXCLUDED.email_encrypted
        ",
    )
    .bind(tenant_id.as_uuid())
    .bind(provider)
    .bind(hashed_subject)
    .bind(email_encrypted)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to upsert identity: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        Some(Database::from_pool(pool))
    }

    #[tokio::test]
    async fn upsert_then_resolve_finds_the_linked_tenant() {
        let Some(db) = test_db().await else { return };
        let tenant = db.create_tenant("identity-test@example.com", vec![1, 2, 3], "UTC").await.unwrap();
        let hashed_subject = crate::crypto::deterministic_hash_hex("google:subject-1");

        db.upsert_identity(tenant.id, "google", &hashed_subject, Some("enc-email-1")).await.unwrap();
        let resolved = db.resolve_identity("google", &hashed_subject).await.unwrap();

        assert_eq!(resolved, Some(tenant.id));
    }

    #[tokio::test]
    async fn resolve_unknown_identity_returns_none() {
        let Some(db) = test_db().await else { return };
        let hashed_subject = crate::crypto::deterministic_hash_hex("google:never-linked");
        let resolved = db.resolve_identity("google", &hashed_subject).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn re_linking_same_subject_to_a_new_tenant_repoints_it() {
        let Some(db) = test_db().await else { return };
        let first = db.create_tenant("identity-repoint-1@example.com", vec![1], "UTC").await.unwrap();
        let second = db.create_tenant("identity-repoint-2@example.com", vec![2], "UTC").await.unwrap();
        let hashed_subject = crate::crypto::deterministic_hash_hex("google:shared-subject");

        db.upsert_identity(first.id, "google", &hashed_subject, None).await.unwrap();
        db.upsert_identity(second.id, "google", &hashed_subject, None).await.unwrap();
        let resolved = db.resolve_identity("google", &hashed_subject).await.unwrap();

        assert_eq!(resolved, Some(second.id));
    }
}
