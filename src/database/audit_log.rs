// SPDX-License-Identifier: MIT OR Apache-2.0

//! General audit entry storage (spec §3 "General Audit Entry"). Append-only;
//! nothing here ever updates or deletes a row. Writers are expected to batch
//! (see `crate::context`) rather than insert one row per call on the hot
//! path.

use serde_json::Value;
use uuid::Uuid;

use super::Database;
use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// One audit log row. `tenant_id`/`session_id` are nullable: some actions
/// (a failed sign-in before a tenant is resolved) have no tenant yet.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub tenant_id: Option<TenantId>,
    pub session_id: Option<String>,
    pub action: String,
    pub resource_kind: String,
    pub resource_id: Option<String>,
    pub details: Value,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl Database {
    /// Insert one audit row.
    pub async fn record_audit_entry(&self, entry: &AuditLogEntry) -> AppResult<()> {
        insert_one(&self.pool, entry).await
    }

    /// Insert a batch of audit rows in one round trip. Used by the
    /// request-end flush path rather than one insert per request.
    pub async fn record_audit_entries(&self, entries: &[AuditLogEntry]) -> AppResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| AppError::database(format!("failed to start audit batch: {e}")))?;
        for entry in entries {
            insert_one(&mut *tx, entry).await?;
        }
        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("failed to commit audit batch: {e}")))?;
        Ok(())
    }
}

async fn insert_one<'c, E>(executor: E, entry: &AuditLogEntry) -> AppResult<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    sqlx::query(
        r"
        INSERT INTO audit_log (
            id, tenant_id, session_id, action, resource_kind, resource_id, details,
            source_ip, user_agent, request_id, success, error, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
        ",
    )
    .bind(Uuid::new_v4())
    .bind(entry.tenant_id.map(TenantId::as_uuid))
    .bind(&entry.session_id)
    .bind(&entry.action)
    .bind(&entry.resource_kind)
    .bind(&entry.resource_id)
    .bind(&entry.details)
    .bind(&entry.source_ip)
    .bind(&entry.user_agent)
    .bind(&entry.request_id)
    .bind(entry.success)
    .bind(&entry.error)
    .execute(executor)
    .await
    .map_err(|e| AppError::database(format!("failed to insert audit entry: {e}")))?;
    Ok(())
}
