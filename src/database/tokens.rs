// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage layer for third-party OAuth token bundles (spec §3, §4.5). This
//! module only moves ciphertext and clear-text metadata in and out of
//! Postgres; encryption and the higher-level vault operations
//! (`save`/`get`/`invalidate`/`refresh_if_needed`/`list_expiring_soon`) live
//! in `crate::oauth::vault`.

use chrono::{DateTime, Utc};
use sqlx::{Row, Transaction, Postgres};
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// A stored third-party token record (spec §3 "Third-Party Token Record").
#[derive(Debug, Clone)]
pub struct TokenRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Provider name, e.g. `"google"`.
    pub provider: String,
    /// Ciphertext of the serialized token bundle (access/refresh/scope/type).
    pub encrypted_tokens: String,
    /// Clear-text expiry, kept unencrypted so the refresh scan doesn't need
    /// to unwrap every tenant's DEK just to find candidates.
    pub expires_at: DateTime<Utc>,
    /// Whether this record is currently usable.
    pub is_valid: bool,
    /// Reason recorded the last time this record was invalidated.
    pub revoke_reason: Option<String>,
    /// Last time this record was successfully used to authenticate a call.
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Database {
    /// Upsert on (tenant, provider). Clears any prior revoke metadata and
    /// sets `is_valid = true` — this is the only repository method that may
    /// resurrect a previously invalidated token record, and it only does so
    /// because the caller just obtained a fresh grant or rotation.
    pub async fn upsert_oauth_token(
        &self,
        tenant_id: TenantId,
        provider: &str,
        encrypted_tokens: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let provider = provider.to_owned();
        let encrypted_tokens = encrypted_tokens.to_owned();
        self.with_tenant_conn(tenant_id, move |tx| {
            Box::pin(async move { upsert_oauth_token_tx(tx, tenant_id, &provider, &encrypted_tokens, expires_at).await })
        })
        .await
    }

    /// Fetch a token record regardless of validity; callers decide whether
    /// an invalid record should be treated as absent.
    pub async fn get_oauth_token(&self, tenant_id: TenantId, provider: &str) -> AppResult<Option<TokenRecord>> {
        let provider = provider.to_owned();
        self.with_tenant_conn(tenant_id, move |tx| {
            Box::pin(async move { get_oauth_token_tx(tx, tenant_id, &provider).await })
        })
        .await
    }

    /// Touch `last_used_at` after a successful decrypt-and-use.
    pub async fn mark_oauth_token_used(&self, tenant_id: TenantId, provider: &str) -> AppResult<()> {
        let provider = provider.to_owned();
        self.with_tenant_conn(tenant_id, move |tx| {
            Box::pin(async move {
                sqlx::query("UPDATE user_oauth_tokens SET last_used_at = now() WHERE tenant_id = $1 AND provider = $2")
                    .bind(tenant_id.as_uuid())
                    .bind(&provider)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| AppError::database(format!("failed to touch last_used_at: {e}")))?;
                Ok(())
            })
        })
        .await
    }

    /// Soft-invalidate: flips `is_valid = false` and records why. Never
    /// deletes the row — preserves the audit trail (spec §3 invariant).
    pub async fn invalidate_oauth_token(&self, tenant_id: TenantId, provider: &str, reason: &str) -> AppResult<()> {
        let provider = provider.to_owned();
        let reason = reason.to_owned();
        self.with_tenant_conn(tenant_id, move |tx| {
            Box::pin(async move {
                let result = sqlx::query(
                    "UPDATE user_oauth_tokens SET is_valid = false, revoke_reason = $1 WHERE tenant_id = $2 AND provider = $3",
                )
                .bind(&reason)
                .bind(tenant_id.as_uuid())
                .bind(&provider)
                .execute(&mut **tx)
                .await
                .map_err(|e| AppError::database(format!("failed to invalidate oauth token: {e}")))?;

                if result.rows_affected() == 0 {
                    return Err(AppError::not_found(format!("oauth token for {tenant_id}/{provider}")));
                }
                Ok(())
            })
        })
        .await
    }

    /// Providers whose token for `tenant_id` is valid and expires within
    /// `buffer` from now — candidates for the background refresh job (spec
    /// §4.5 `listExpiringSoon`). Scoped to one tenant at a time (rather than
    /// a single cross-tenant scan) because `user_oauth_tokens` carries an
    /// RLS policy keyed on the scoped connection's tenant setting.
    pub async fn list_expiring_providers(&self, tenant_id: TenantId, buffer: chrono::Duration) -> AppResult<Vec<String>> {
        let cutoff = Utc::now() + buffer;
        self.with_tenant_conn(tenant_id, move |tx| {
            Box::pin(async move {
                let rows = sqlx::query("SELECT provider FROM user_oauth_tokens WHERE is_valid = true AND expires_at <= $1")
                    .bind(cutoff)
                    .fetch_all(&mut **tx)
                    .await
                    .map_err(|e| AppError::database(format!("failed to list expiring tokens: {e}")))?;
                Ok(rows.into_iter().map(|row| row.get("provider")).collect())
            })
        })
        .await
    }
}

async fn upsert_oauth_token_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    provider: &str,
    encrypted_tokens: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r"
        INSERT INTO user_oauth_tokens
            (tenant_id, provider, encrypted_tokens, expires_at, is_valid, revoke_reason, last_used_at)
        VALUES ($1, $2, $3, $4, true, NULL, NULL)
        ON CONFLICT (tenant_id, provider) DO UPDATE SET
            encrypted_tokens = EXCLUDED.encrypted_tokens,
            expires_at = EXCLUDED.expires_at,
            is_valid = true,
            revoke_reason = NULL
        ",
    )
    .bind(tenant_id.as_uuid())
    .bind(provider)
    .bind(encrypted_tokens)
    .bind(expires_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to upsert oauth token: {e}")))?;
    Ok(())
}

async fn get_oauth_token_tx(tx: &mut Transaction<'_, Postgres>, tenant_id: TenantId, provider: &str) -> AppResult<Option<TokenRecord>> {
    let row = sqlx::query(
        r"
        SELECT tenant_id, provider, encrypted_tokens, expires_at, is_valid, revoke_reason, last_used_at
        FROM user_oauth_tokens WHERE tenant_id = $1 AND provider = $2
        ",
    )
    .bind(tenant_id.as_uuid())
    .bind(provider)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to get oauth token: {e}")))?;

    Ok(row.as_ref().map(row_to_token_record))
}

fn row_to_token_record(row: &sqlx::postgres::PgRow) -> TokenRecord {
    TokenRecord {
        tenant_id: TenantId::from_uuid(row.get::<Uuid, _>("tenant_id")),
        provider: row.get("provider"),
        encrypted_tokens: row.get("encrypted_tokens"),
        expires_at: row.get("expires_at"),
        is_valid: row.get("is_valid"),
        revoke_reason: row.get("revoke_reason"),
        last_used_at: row.get("last_used_at"),
    }
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
    async fn upsert_then_get_round_trips_the_record() {
        let Some(db) = test_db().await else { return };
        let tenant = db.create_tenant("token-test@example.com", vec![1, 2, 3], "UTC").await.unwrap();
        let expires_at = Utc::now() + chrono::Duration::hours(1);

        db.upsert_oauth_token(tenant.id, "google", "ciphertext", expires_at).await.unwrap();
        let record = db.get_oauth_token(tenant.id, "google").await.unwrap().unwrap();

        assert_eq!(record.encrypted_tokens, "ciphertext");
        assert!(record.is_valid);
    }

    #[tokio::test]
    async fn invalidate_sets_is_valid_false_and_records_reason() {
        let Some(db) = test_db().await else { return };
        let tenant = db.create_tenant("token-test-2@example.com", vec![1], "UTC").await.unwrap();
        let expires_at = Utc::now() + chrono::Duration::hours(1);
        db.upsert_oauth_token(tenant.id, "google", "ciphertext", expires_at).await.unwrap();

        db.invalidate_oauth_token(tenant.id, "google", "user revoked").await.unwrap();
        let record = db.get_oauth_token(tenant.id, "google").await.unwrap().unwrap();

        assert!(!record.is_valid);
        assert_eq!(record.revoke_reason, Some("user revoked".to_owned()));
    }

    #[tokio::test]
    async fn invalidate_missing_token_returns_not_found() {
        let Some(db) = test_db().await else { return };
        let tenant = db.create_tenant("token-test-3@example.com", vec![1], "UTC").await.unwrap();
        let result = db.invalidate_oauth_token(tenant.id, "google", "n/a").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_expiring_providers_only_returns_valid_tokens_past_the_buffer() {
        let Some(db) = test_db().await else { return };
        let tenant = db.create_tenant("token-test-4@example.com", vec![1], "UTC").await.unwrap();

        db.upsert_oauth_token(tenant.id, "google", "ciphertext", Utc::now() + chrono::Duration::minutes(2))
            .await
            .unwrap();
        db.upsert_oauth_token(tenant.id, "microsoft", "ciphertext", Utc::now() + chrono::Duration::days(30))
            .await
            .unwrap();

        let expiring = db.list_expiring_providers(tenant.id, chrono::Duration::minutes(10)).await.unwrap();

        assert_eq!(expiring, vec!["google".to_owned()]);
    }

    #[tokio::test]
    async fn list_expiring_providers_is_scoped_to_the_calling_tenant() {
        let Some(db) = test_db().await else { return };
        let a = db.create_tenant("token-test-5a@example.com", vec![1], "UTC").await.unwrap();
        let b = db.create_tenant("token-test-5b@example.com", vec![2], "UTC").await.unwrap();

        db.upsert_oauth_token(a.id, "google", "ciphertext", Utc::now() + chrono::Duration::minutes(1)).await.unwrap();
        db.upsert_oauth_token(b.id, "google", "ciphertext", Utc::now() + chrono::Duration::minutes(1)).await.unwrap();

        let expiring = db.list_expiring_providers(a.id, chrono::Duration::minutes(10)).await.unwrap();
        assert_eq!(expiring, vec!["google".to_owned()]);
    }
}
