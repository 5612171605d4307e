// SPDX-License-Identifier: MIT OR Apache-2.0

//! C5: the OAuth token vault. Every bundle is encrypted with the owning
//! tenant's DEK before it touches storage; refreshes for the same
//! (tenant, provider) pair are serialized so two concurrent callers never
//! race to rotate the same refresh token.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::provider_client::{OAuthProviderClient, TokenBundle};
use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::kms::KmsGateway;
use sentinel_core::TenantId;

fn aad_context(tenant_id: TenantId, provider: &str) -> String {
    format!("{tenant_id}|{provider}|user_oauth_tokens")
}

/// The OAuth token vault.
pub struct OAuthVault {
    database: Arc<Database>,
    kms: Arc<dyn KmsGateway>,
    provider_client: Arc<dyn OAuthProviderClient>,
    refresh_locks: DashMap<(uuid::Uuid, String), Arc<Mutex<()>>>,
    refresh_buffer: Duration,
}

impl OAuthVault {
    /// Build a vault over the given storage, KMS, and provider-endpoint
    /// dependencies.
    #[must_use]
    pub fn new(
        database: Arc<Database>,
        kms: Arc<dyn KmsGateway>,
        provider_client: Arc<dyn OAuthProviderClient>,
        refresh_buffer: Duration,
    ) -> Self {
        Self {
            database,
            kms,
            provider_client,
            refresh_locks: DashMap::new(),
            refresh_buffer,
        }
    }

    async fn tenant_dek(&self, tenant_id: TenantId) -> AppResult<crate::crypto::TenantDek> {
        let wrapped = self.database.get_wrapped_dek(tenant_id).await?;
        self.kms.unwrap_tenant_dek(&wrapped).await
    }

    fn lock_for(&self, tenant_id: TenantId, provider: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry((tenant_id.as_uuid(), provider.to_owned()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Encrypt and upsert a new or rotated token bundle.
    pub async fn save(&self, tenant_id: TenantId, provider: &str, bundle: &TokenBundle) -> AppResult<()> {
        let dek = self.tenant_dek(tenant_id).await?;
        let json = serde_json::to_string(bundle)
            .map_err(|e| AppError::internal(format!("failed to serialize token bundle: {e}")))?;
        let encrypted = crate::crypto::encrypt_for_tenant(&dek, &json, &aad_context(tenant_id, provider))?;
        let expires_at = Utc::now() + Duration::seconds(bundle.expires_in);

        self.database
            .upsert_oauth_token(tenant_id, provider, &encrypted, expires_at)
            .await
    }

    /// Return the decrypted bundle, or `None` if absent or invalidated.
    /// Touches `last_used_at` on success.
    pub async fn get(&self, tenant_id: TenantId, provider: &str) -> AppResult<Option<TokenBundle>> {
        let Some(record) = self.database.get_oauth_token(tenant_id, provider).await? else {
            return Ok(None);
        };
        if !record.is_valid {
            return Ok(None);
        }

        let dek = self.tenant_dek(tenant_id).await?;
        let json = crate::crypto::decrypt_for_tenant(&dek, &record.encrypted_tokens, &aad_context(tenant_id, provider))?;
        let bundle: TokenBundle =
            serde_json::from_str(&json).map_err(|e| AppError::internal(format!("corrupt token bundle: {e}")))?;

        self.database.mark_oauth_token_used(tenant_id, provider).await?;
        Ok(Some(bundle))
    }

    /// Soft-invalidate a record. Does not delete.
    ///
    /// Also writes an audit entry: a token revocation is a security-relevant
    /// transition worth a durable trail regardless of whether the database
    /// write itself succeeds, mirroring how a rotated tenant key gets logged.
    pub async fn invalidate(&self, tenant_id: TenantId, provider: &str, reason: &str) -> AppResult<()> {
        let result = self.database.invalidate_oauth_token(tenant_id, provider, reason).await;

        let entry = crate::database::audit_log::AuditLogEntry {
            tenant_id: Some(tenant_id),
            session_id: None,
            action: "oauth_token_invalidated".to_owned(),
            resource_kind: "user_oauth_tokens".to_owned(),
            resource_id: Some(provider.to_owned()),
            details: serde_json::json!({ "reason": reason }),
            source_ip: None,
            user_agent: None,
            request_id: None,
            success: result.is_ok(),
            error: result.as_ref().err().map(std::string::ToString::to_string),
        };
        if let Err(e) = self.database.record_audit_entry(&entry).await {
            tracing::warn!(%tenant_id, provider, error = %e, "failed to write audit entry for token invalidation");
        }

        result
    }

    /// Refresh the bundle if its expiry falls within the configured buffer.
    /// Returns the (possibly unchanged) current access token.
    ///
    /// Serializes concurrent callers for the same (tenant, provider): the
    /// second caller to arrive observes the first caller's already-rotated
    /// bundle and skips its own refresh attempt rather than racing it.
    pub async fn refresh_if_needed(&self, tenant_id: TenantId, provider: &str) -> AppResult<String> {
        let lock = self.lock_for(tenant_id, provider);
        let _guard = lock.lock().await;

        let record = self
            .database
            .get_oauth_token(tenant_id, provider)
            .await?
            .ok_or_else(|| AppError::not_found(format!("oauth token for {tenant_id}/{provider}")))?;

        if !record.is_valid {
            return Err(AppError::token_revoked(format!("{provider} token for {tenant_id} was revoked")));
        }

        if record.expires_at - Utc::now() > self.refresh_buffer {
            let dek = self.tenant_dek(tenant_id).await?;
            let json = crate::crypto::decrypt_for_tenant(&dek, &record.encrypted_tokens, &aad_context(tenant_id, provider))?;
            let bundle: TokenBundle =
                serde_json::from_str(&json).map_err(|e| AppError::internal(format!("corrupt token bundle: {e}")))?;
            return Ok(bundle.access_token);
        }

        let dek = self.tenant_dek(tenant_id).await?;
        let json = crate::crypto::decrypt_for_tenant(&dek, &record.encrypted_tokens, &aad_context(tenant_id, provider))?;
        let current: TokenBundle =
            serde_json::from_str(&json).map_err(|e| AppError::internal(format!("corrupt token bundle: {e}")))?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| AppError::token_expired(format!("no refresh token on file for {provider}")))?;

        match self.provider_client.refresh(provider, &refresh_token).await {
            Ok(mut fresh) => {
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = Some(refresh_token);
                }
                self.save(tenant_id, provider, &fresh).await?;
                Ok(fresh.access_token)
            }
            Err(err) => {
                self.invalidate(tenant_id, provider, &err.message).await?;
                Err(AppError::token_expired(format!("refresh failed for {provider}: {}", err.message)))
            }
        }
    }

    /// Providers whose access token for `tenant_id` will expire within
    /// `buffer` — feeds the background refresh job.
    pub async fn list_expiring_soon(&self, tenant_id: TenantId, buffer: Duration) -> AppResult<Vec<String>> {
        self.database.list_expiring_providers(tenant_id, buffer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::Row;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FixedKms([u8; 32]);

    #[async_trait]
    impl KmsGateway for FixedKms {
        async fn generate_tenant_dek(&self) -> AppResult<(crate::crypto::TenantDek, Vec<u8>)> {
            Ok((crate::crypto::TenantDek::new(self.0), self.0.to_vec()))
        }
        async fn unwrap_tenant_dek(&self, wrapped: &[u8]) -> AppResult<crate::crypto::TenantDek> {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&wrapped[..32]);
            Ok(crate::crypto::TenantDek::new(bytes))
        }
    }

    struct CountingProviderClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OAuthProviderClient for CountingProviderClient {
        async fn refresh(&self, _provider: &str, _refresh_token: &str) -> AppResult<TokenBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenBundle {
                access_token: "fresh-token".to_owned(),
                refresh_token: Some("fresh-refresh".to_owned()),
                token_type: "Bearer".to_owned(),
                expires_in: 3600,
                scope: "contacts".to_owned(),
            })
        }
    }

    #[test]
    fn aad_context_binds_tenant_and_provider() {
        let tenant = TenantId::new();
        let a = aad_context(tenant, "google");
        let b = aad_context(tenant, "microsoft");
        assert_ne!(a, b);
    }

    async fn test_vault() -> Option<(OAuthVault, Arc<CountingProviderClient>, TenantId)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = sqlx::PgPool::connect(&url).await.expect("connect to test database");
        let database = Arc::new(Database::from_pool(pool));
        let kms: Arc<dyn KmsGateway> = Arc::new(FixedKms([5u8; 32]));
        let tenant = database
            .create_tenant(&format!("vault-test-{}@example.com", Uuid::new_v4()), vec![5u8; 32], "UTC")
            .await
            .ok()?;
        let tenant_id = tenant.id;
        let provider_client = Arc::new(CountingProviderClient { calls: AtomicUsize::new(0) });
        let vault = OAuthVault::new(database, kms, provider_client.clone(), Duration::minutes(5));
        Some((vault, provider_client, tenant_id))
    }

    #[tokio::test]
    async fn save_then_get_round_trips_bundle() {
        let Some((vault, _client, tenant_id)) = test_vault().await else { return };
        let bundle = TokenBundle {
            access_token: "at".to_owned(),
            refresh_token: Some("rt".to_owned()),
            token_type: "Bearer".to_owned(),
            expires_in: 3600,
            scope: "contacts".to_owned(),
        };
        vault.save(tenant_id, "google", &bundle).await.unwrap();
        let fetched = vault.get(tenant_id, "google").await.unwrap().unwrap();
        assert_eq!(fetched.access_token, "at");
    }

    #[tokio::test]
    async fn invalidated_token_reads_as_absent() {
        let Some((vault, _client, tenant_id)) = test_vault().await else { return };
        let bundle = TokenBundle {
            access_token: "at".to_owned(),
            refresh_token: Some("rt".to_owned()),
            token_type: "Bearer".to_owned(),
            expires_in: 3600,
            scope: "contacts".to_owned(),
        };
        vault.save(tenant_id, "google", &bundle).await.unwrap();
        vault.invalidate(tenant_id, "google", "user revoked").await.unwrap();
        let fetched = vault.get(tenant_id, "google").await.unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn invalidate_writes_an_audit_entry() {
        let Some((vault, _client, tenant_id)) = test_vault().await else { return };
        let bundle = TokenBundle {
            access_token: "at".to_owned(),
            refresh_token: Some("rt".to_owned()),
            token_type: "Bearer".to_owned(),
            expires_in: 3600,
            scope: "contacts".to_owned(),
        };
        vault.save(tenant_id, "google", &bundle).await.unwrap();
        vault.invalidate(tenant_id, "google", "user revoked").await.unwrap();

        let entry = sqlx::query("SELECT action, success FROM audit_log WHERE tenant_id = $1 AND action = $2")
            .bind(tenant_id.as_uuid())
            .bind("oauth_token_invalidated")
            .fetch_one(vault.database.pool())
            .await
            .unwrap();
        assert!(entry.get::<bool, _>("success"));
    }

    #[tokio::test]
    async fn refresh_rotates_bundle_when_near_expiry() {
        let Some((vault, client, tenant_id)) = test_vault().await else { return };
        let bundle = TokenBundle {
            access_token: "stale".to_owned(),
            refresh_token: Some("rt".to_owned()),
            token_type: "Bearer".to_owned(),
            expires_in: 60,
            scope: "contacts".to_owned(),
        };
        vault.save(tenant_id, "google", &bundle).await.unwrap();
        let access_token = vault.refresh_if_needed(tenant_id, "google").await.unwrap();
        assert_eq!(access_token, "fresh-token");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
