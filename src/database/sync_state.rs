// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sync state repository (C9): one row per (tenant, provider), serialized
//! through the row itself — `start` is conditional on `status != 'syncing'`
//! so two concurrent schedulers racing the same pair can't both begin.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// Sync status for one (tenant, provider) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Failed,
}

impl SyncStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> AppResult<Self> {
        match s {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::internal(format!("unknown sync status {other:?} in database"))),
        }
    }
}

/// A sync state row (spec §3/§4.9).
#[derive(Debug, Clone)]
pub struct SyncState {
    pub user_id: TenantId,
    pub provider: String,
    pub status: SyncStatus,
    pub delta_token: Option<String>,
    pub consecutive_failures: i32,
    pub next_run_at: DateTime<Utc>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub last_incremental_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

const SELECT_COLUMNS: &str = r"
SELECT user_id, provider, status, delta_token, consecutive_failures, next_run_at,
       last_full_sync_at, last_incremental_sync_at, last_error";

/// Fetch the row, creating an idle one with `next_run_at = now()` on first
/// reference so callers never have to special-case "no row yet".
pub async fn get_or_create(tx: &mut Transaction<'_, Postgres>, user_id: TenantId, provider: &str) -> AppResult<SyncState> {
    sqlx::query(
        r"
        INSERT INTO sync_state (user_id, provider, status, consecutive_failures, next_run_at)
        VALUES ($1, $2, 'idle', 0, now())
        ON CONFLICT (user_id, provider) DO NOTHING
        ",
    )
    .bind(user_id.as_uuid())
    .bind(provider)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to seed sync state: {e}")))?;

    let row = sqlx::query(&format!("{SELECT_COLUMNS} FROM sync_state WHERE user_id = $1 AND provider = $2"))
        .bind(user_id.as_uuid())
        .bind(provider)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::database(format!("failed to fetch sync state: {e}")))?;

    row_to_state(&row)
}

/// `start(tenant, provider)`: precondition `status != syncing`. Returns
/// [`AppError::sync_conflict`] if another run already claimed this pair.
pub async fn start(tx: &mut Transaction<'_, Postgres>, user_id: TenantId, provider: &str) -> AppResult<()> {
    let result = sqlx::query(
        "UPDATE sync_state SET status = 'syncing' WHERE user_id = $1 AND provider = $2 AND status != 'syncing'",
    )
    .bind(user_id.as_uuid())
    .bind(provider)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to start sync: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(AppError::sync_conflict(format!("{provider} sync for {user_id} is already in progress")));
    }
    Ok(())
}

/// `complete(...)`: resets failures, clears error, schedules the next run.
pub async fn complete(
    tx: &mut Transaction<'_, Postgres>,
    user_id: TenantId,
    provider: &str,
    delta_token: Option<&str>,
    is_full: bool,
    next_minutes: i64,
) -> AppResult<()> {
    let column = if is_full { "last_full_sync_at" } else { "last_incremental_sync_at" };
    sqlx::query(&format!(
        r"
        UPDATE sync_state SET
            status = 'idle',
            delta_token = COALESCE($1, delta_token),
            consecutive_failures = 0,
            last_error = NULL,
            next_run_at = now() + ($2 || ' minutes')::interval,
            {column} = now()
        WHERE user_id = $3 AND provider = $4
        "
    ))
    .bind(delta_token)
    .bind(next_minutes.to_string())
    .bind(user_id.as_uuid())
    .bind(provider)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to complete sync: {e}")))?;
    Ok(())
}

/// `fail(...)`: increments `consecutive_failures`, applies exponential
/// backoff `min(5 * 2^n, 1440)` minutes, and moves to `failed` once
/// `n >= 5` (spec §4.9).
pub async fn fail(tx: &mut Transaction<'_, Postgres>, user_id: TenantId, provider: &str, error_message: &str) -> AppResult<()> {
    let current: i32 = sqlx::query("SELECT consecutive_failures FROM sync_state WHERE user_id = $1 AND provider = $2")
        .bind(user_id.as_uuid())
        .bind(provider)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::database(format!("failed to read failure count: {e}")))?
        .get("consecutive_failures");

    let failures = current + 1;
    let backoff = backoff_minutes(failures);
    let status = if failures >= 5 { SyncStatus::Failed } else { SyncStatus::Idle };

    sqlx::query(
        r"
        UPDATE sync_state SET
            status = $1,
            consecutive_failures = $2,
            last_error = $3,
            next_run_at = now() + ($4 || ' minutes')::interval
        WHERE user_id = $5 AND provider = $6
        ",
    )
    .bind(status.as_str())
    .bind(failures)
    .bind(error_message)
    .bind(backoff.to_string())
    .bind(user_id.as_uuid())
    .bind(provider)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to record sync failure: {e}")))?;
    Ok(())
}

fn row_to_state(row: &sqlx::postgres::PgRow) -> AppResult<SyncState> {
    Ok(SyncState {
        user_id: TenantId::from_uuid(row.get("user_id")),
        provider: row.get("provider"),
        status: SyncStatus::parse(row.get("status"))?,
        delta_token: row.get("delta_token"),
        consecutive_failures: row.get("consecutive_failures"),
        next_run_at: row.get("next_run_at"),
        last_full_sync_at: row.get("last_full_sync_at"),
        last_incremental_sync_at: row.get("last_incremental_sync_at"),
        last_error: row.get("last_error"),
    })
}

/// `min(5 * 2^n, 1440)` as specified by spec §4.9, exposed standalone for
/// unit testing without a database.
#[must_use]
pub fn backoff_minutes(consecutive_failures: i32) -> i64 {
    (5i64.saturating_mul(1i64 << consecutive_failures.min(30))).min(24 * 60)
}
