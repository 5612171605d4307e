// SPDX-License-Identifier: MIT OR Apache-2.0

//! PII audit log storage (spec §3 "PII Audit Entry", C6). Counts only —
//! never the original value, never the placeholder-to-value mapping.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Database;
use crate::errors::AppError;
use crate::errors::AppResult;
use sentinel_core::TenantId;

/// One emitted row: the counts for a single (tool/endpoint) invocation that
/// masked at least one item (spec §4.6 "rows carry counts, not content").
#[derive(Debug, Clone)]
pub struct PiiAuditEntry {
    pub tenant_id: Option<TenantId>,
    pub request_id: Option<String>,
    pub endpoint: Option<String>,
    pub tool_name: String,
    pub masking_mode: String,
    pub total_masked: i32,
    pub counts_by_type: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Database {
    /// Insert one PII audit row. Skips the round trip entirely if
    /// `total_masked` is zero — only non-zero-count invocations are logged
    /// (spec §4.6 "at request end... rows with non-zero counts").
    pub async fn record_pii_audit_entry(&self, entry: &PiiAuditEntry) -> AppResult<()> {
        if entry.total_masked == 0 {
            return Ok(());
        }

        sqlx::query(
            r"
            INSERT INTO pii_audit_log (
                id, tenant_id, request_id, endpoint, tool_name, masking_mode,
                total_masked, counts_by_type, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(entry.tenant_id.map(TenantId::as_uuid))
        .bind(&entry.request_id)
        .bind(&entry.endpoint)
        .bind(&entry.tool_name)
        .bind(&entry.masking_mode)
        .bind(entry.total_masked)
        .bind(&entry.counts_by_type)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("failed to record pii audit entry: {e}")))?;
        Ok(())
    }
}

/// Build a [`PiiAuditEntry`] from a finished [`crate::pii::PiiContext`].
/// Returns `None` when nothing was masked, so callers can skip the write
/// entirely without inspecting `total_masked` themselves.
#[must_use]
pub fn entry_from_context(
    context: &crate::pii::PiiContext,
    tenant_id: Option<TenantId>,
    request_id: Option<String>,
    endpoint: Option<String>,
    tool_name: &str,
    masking_mode: crate::pii::MaskingMode,
) -> Option<PiiAuditEntry> {
    if context.total_masked() == 0 {
        return None;
    }

    let stats = context.stats();
    let counts_by_type = serde_json::to_value(
        stats
            .into_iter()
            .filter(|(k, _)| *k != "total")
            .collect::<std::collections::HashMap<_, _>>(),
    )
    .unwrap_or(serde_json::Value::Null);

    let mode_label = match masking_mode {
        crate::pii::MaskingMode::Full => "full",
        crate::pii::MaskingMode::FinancialOnly => "financial_only",
        crate::pii::MaskingMode::None => "none",
    };

    Some(PiiAuditEntry {
        tenant_id,
        request_id,
        endpoint,
        tool_name: tool_name.to_owned(),
        masking_mode: mode_label.to_owned(),
        total_masked: context.total_masked() as i32,
        counts_by_type,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pii::{MaskingMode, PiiContext};
    use sqlx::PgPool;

    #[test]
    fn entry_from_context_is_none_when_nothing_masked() {
        let context = PiiContext::new();
        assert!(entry_from_context(&context, None, None, None, "search_contacts", MaskingMode::Full).is_none());
    }

    #[test]
    fn entry_from_context_carries_total_and_per_type_counts() {
        let mut context = PiiContext::new();
        context.mask_and_track("alice@example.com and bob@example.com", MaskingMode::Full);
        let entry = entry_from_context(&context, None, Some("req-1".into()), None, "search_contacts", MaskingMode::Full)
            .expect("expected an entry");
        assert_eq!(entry.total_masked, 2);
        assert_eq!(entry.masking_mode, "full");
    }

    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        Some(Database::from_pool(pool))
    }

    #[tokio::test]
    async fn zero_count_entry_is_never_written() {
        let Some(db) = test_db().await else { return };
        let entry = PiiAuditEntry {
            tenant_id: None,
            request_id: None,
            endpoint: None,
            tool_name: "noop".to_owned(),
            masking_mode: "full".to_owned(),
            total_masked: 0,
            counts_by_type: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        db.record_pii_audit_entry(&entry).await.unwrap();
    }
}
