// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant record CRUD. Tenant rows are not RLS-guarded themselves — a
//! tenant's own row is the root of its isolation boundary, not a child of
//! it — so these methods run on a plain pool connection.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// A tenant: one per end user, created on first successful federated
/// sign-in (spec §3). Never deleted silently.
#[derive(Debug, Clone)]
pub struct Tenant {
    /// Unique tenant id.
    pub id: TenantId,
    /// Primary email, used for credential issuance and the allow-list check.
    pub email: String,
    /// The tenant's DEK, wrapped by the KMS key-encryption-key. Opaque.
    pub wrapped_dek: Vec<u8>,
    /// Optional encrypted free-form settings payload.
    pub settings_encrypted: Option<String>,
    /// IANA timezone name, defaults to UTC.
    pub timezone: String,
    /// When the tenant was created.
    pub created_at: DateTime<Utc>,
}

impl Database {
    /// Create a new tenant, generating its initial DEK via the caller's KMS
    /// gateway and storing only the wrapped blob.
    pub async fn create_tenant(&self, email: &str, wrapped_dek: Vec<u8>, timezone: &str) -> AppResult<Tenant> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r"
            INSERT INTO tenants (id, email, wrapped_dek, timezone, created_at)
            VALUES ($1, $2, $3, $4, now())
            RETURNING id, email, wrapped_dek, settings_encrypted, timezone, created_at
            ",
        )
        .bind(id)
        .bind(email.to_lowercase())
        .bind(&wrapped_dek)
        .bind(timezone)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to create tenant: {e}")))?;

        Ok(row_to_tenant(&row))
    }

    /// Look up a tenant by email, used during sign-in to decide whether to
    /// create a new tenant or reuse an existing one.
    pub async fn get_tenant_by_email(&self, email: &str) -> AppResult<Option<Tenant>> {
        let row = sqlx::query(
            "SELECT id, email, wrapped_dek, settings_encrypted, timezone, created_at FROM tenants WHERE email = $1",
        )
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to get tenant: {e}")))?;

        Ok(row.as_ref().map(row_to_tenant))
    }

    /// Look up a tenant by id.
    pub async fn get_tenant_by_id(&self, tenant_id: TenantId) -> AppResult<Tenant> {
        let row = sqlx::query(
            "SELECT id, email, wrapped_dek, settings_encrypted, timezone, created_at FROM tenants WHERE id = $1",
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to get tenant: {e}")))?
        .ok_or_else(|| AppError::not_found(format!("tenant {tenant_id}")))?;

        Ok(row_to_tenant(&row))
    }

    /// Fetch only the wrapped DEK blob, the common case for C1/C2 unwrap.
    pub async fn get_wrapped_dek(&self, tenant_id: TenantId) -> AppResult<Vec<u8>> {
        let row = sqlx::query("SELECT wrapped_dek FROM tenants WHERE id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("failed to get wrapped dek: {e}")))?
            .ok_or_else(|| AppError::not_found(format!("tenant {tenant_id}")))?;

        Ok(row.get::<Vec<u8>, _>("wrapped_dek"))
    }

    /// Every tenant id, the fan-out source for scheduler jobs that walk all
    /// tenants (spec §4.8): contact sync, timezone sync, the chat archiver.
    pub async fn list_tenant_ids(&self) -> AppResult<Vec<TenantId>> {
        let rows = sqlx::query("SELECT id FROM tenants")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("failed to list tenants: {e}")))?;

        Ok(rows.iter().map(|row| TenantId::from_uuid(row.get::<Uuid, _>("id"))).collect())
    }

    /// Replace a tenant's wrapped DEK after a key rotation (spec §9, C1).
    pub async fn update_wrapped_dek(&self, tenant_id: TenantId, wrapped_dek: Vec<u8>) -> AppResult<()> {
        let result = sqlx::query("UPDATE tenants SET wrapped_dek = $1 WHERE id = $2")
            .bind(&wrapped_dek)
            .bind(tenant_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("failed to rotate dek: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("tenant {tenant_id}")));
        }
        Ok(())
    }

    /// Update a tenant's timezone, as observed from their calendar settings
    /// (spec §4.8 `timezoneSync`).
    pub async fn update_timezone(&self, tenant_id: TenantId, timezone: &str) -> AppResult<()> {
        let result = sqlx::query("UPDATE tenants SET timezone = $1 WHERE id = $2")
            .bind(timezone)
            .bind(tenant_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("failed to update timezone: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("tenant {tenant_id}")));
        }
        Ok(())
    }
}

fn row_to_tenant(row: &sqlx::postgres::PgRow) -> Tenant {
    Tenant {
        id: TenantId::from_uuid(row.get::<Uuid, _>("id")),
        email: row.get("email"),
        wrapped_dek: row.get("wrapped_dek"),
        settings_encrypted: row.get("settings_encrypted"),
        timezone: row.get("timezone"),
        created_at: row.get("created_at"),
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
    async fn list_tenant_ids_includes_newly_created_tenant() {
        let Some(db) = test_db().await else { return };
        let tenant = db.create_tenant("scheduler-fanout@example.com", vec![1, 2, 3], "UTC").await.unwrap();

        let ids = db.list_tenant_ids().await.unwrap();
        assert!(ids.contains(&tenant.id));
    }

    #[tokio::test]
    async fn update_timezone_persists_new_value() {
        let Some(db) = test_db().await else { return };
        let tenant = db.create_tenant("tz-update@example.com", vec![1, 2, 3], "UTC").await.unwrap();

        db.update_timezone(tenant.id, "America/New_York").await.unwrap();
        let reloaded = db.get_tenant_by_id(tenant.id).await.unwrap();
        assert_eq!(reloaded.timezone, "America/New_York");
    }

    #[tokio::test]
    async fn update_timezone_on_unknown_tenant_fails() {
        let Some(db) = test_db().await else { return };
        let result = db.update_timezone(TenantId::new(), "UTC").await;
        assert!(result.is_err());
    }
}
