// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection pool and the RLS-bound scoped-connection primitive
//! (C4) every repository method is built on.
//!
//! Row-level security is enforced by Postgres itself, not by this code: the
//! migrations create `owner_user_id = current_setting('app.current_user_id')::uuid`
//! policies on every tenant-owned table. This module's only job is to make
//! sure that setting is always present, scoped to one transaction, and
//! never reused across tenants.

use sqlx::{PgPool, Pool, Postgres, Row, Transaction};
use tracing::info;

use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

pub mod audit_log;
pub mod chat;
pub mod external_ids;
pub mod identities;
pub mod persons;
pub mod pii_audit;
pub mod relationships;
pub mod sync_state;
pub mod tenants;
pub mod tokens;

/// Connection pool wrapper. Holds no encryption key directly — callers fetch
/// and unwrap a tenant's DEK through [`crate::kms::KmsGateway`] and pass it
/// into the `crate::crypto` functions themselves, so the pool never becomes
/// a second place key material can leak from.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    /// Connect and run pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> AppResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| AppError::database(format!("failed to connect: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Build a database handle over an already-open pool, skipping the
    /// migration step (used by tests that migrate a pool once and hand it
    /// to several `Database` instances).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Raw pool access for call sites that need it (health checks, the
    /// migration runner). Ordinary repository code should use
    /// [`Self::with_tenant_conn`] instead.
    #[must_use]
    pub const fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn migrate(&self) -> AppResult<()> {
        info!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Acquire a connection scoped to `tenant_id`: every table with an RLS
    /// policy will only accept rows matching
    /// `current_setting('app.current_user_id')::uuid`, which this call sets
    /// for the lifetime of a single transaction via `set_config(..., true)`
    /// (the `true` third argument makes it transaction-local, equivalent to
    /// `SET LOCAL` but parameterizable).
    ///
    /// Opens a transaction, runs `f`, and commits on success / rolls back on
    /// error. The setting disappears the instant the connection returns to
    /// the pool — there is no way for one tenant's scoping to leak onto the
    /// next caller that borrows the same pooled connection.
    pub async fn with_tenant_conn<F, T>(&self, tenant_id: TenantId, f: F) -> AppResult<T>
    where
        F: for<'c> FnOnce(
            &'c mut Transaction<'_, Postgres>,
        ) -> futures_util::future::BoxFuture<'c, AppResult<T>>,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("failed to start transaction: {e}")))?;

        sqlx::query("SELECT set_config('app.current_user_id', $1, true)")
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("failed to set tenant scope: {e}")))?;

        let result = f(&mut tx).await;

        match result {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::database(format!("commit failed: {e}")))?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    /// Read back the RLS session variable on the current transaction, or
    /// `None` if it was never set.
    pub async fn current_tenant_scope(tx: &mut Transaction<'_, Postgres>) -> AppResult<Option<TenantId>> {
        let row = sqlx::query("SELECT current_setting('app.current_user_id', true) AS tid")
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| AppError::database(format!("failed to read tenant scope: {e}")))?;

        let raw: Option<String> = row.try_get("tid").ok();
        Ok(raw.filter(|s| !s.is_empty()).and_then(|s| s.parse().ok()))
    }

    /// Require an active tenant scope, returning [`AppError::rls_context_missing`]
    /// if none is set. Call this at the top of any repository method that
    /// receives a transaction handle directly rather than going through
    /// [`Self::with_tenant_conn`], to catch a caller that forgot to scope.
    pub async fn require_tenant_scope(tx: &mut Transaction<'_, Postgres>) -> AppResult<TenantId> {
        Self::current_tenant_scope(tx)
            .await?
            .ok_or_else(|| AppError::rls_context_missing("no tenant scope set on this connection"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Integration tests in this module require a reachable Postgres
    /// instance (RLS has no SQLite equivalent to fall back to). Point
    /// `TEST_DATABASE_URL` at a scratch database before running them.
    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        let db = Database::from_pool(pool);
        db.migrate().await.expect("run migrations");
        Some(db)
    }

    #[tokio::test]
    async fn tenant_scope_is_visible_inside_with_tenant_conn() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();
        let seen = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move { Database::current_tenant_scope(tx).await })
            })
            .await
            .unwrap();
        assert_eq!(seen, Some(tenant_id));
    }

    #[tokio::test]
    async fn tenant_scope_does_not_leak_across_calls() {
        let Some(db) = test_db().await else { return };
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        db.with_tenant_conn(tenant_a, |_tx| Box::pin(async move { Ok(()) }))
            .await
            .unwrap();

        let seen = db
            .with_tenant_conn(tenant_b, |tx| {
                Box::pin(async move { Database::current_tenant_scope(tx).await })
            })
            .await
            .unwrap();
        assert_eq!(seen, Some(tenant_b));
    }

    #[tokio::test]
    async fn require_tenant_scope_fails_outside_with_tenant_conn() {
        let Some(db) = test_db().await else { return };
        let mut tx = db.pool.begin().await.unwrap();
        let result = Database::require_tenant_scope(&mut tx).await;
        assert!(result.is_err());
    }
}
