// SPDX-License-Identifier: MIT OR Apache-2.0

//! Warm-tier chat repository (C7): the relational record-of-truth for
//! sessions and messages. Content and tool-call payloads are stored as
//! ciphertext; this module never sees plaintext — callers in `crate::chat`
//! encrypt/decrypt around these calls using the tenant's DEK.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// A chat session (spec §3). `message_count`/`last_message_at` are
/// maintained by the insert trigger-equivalent logic in
/// [`append_message`] rather than recomputed by readers.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_id: TenantId,
    pub title: Option<String>,
    pub is_active: bool,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored message row. `content_encrypted`/`tool_calls_encrypted` are
/// ciphertext; decrypting them is the caller's job.
#[derive(Debug, Clone)]
pub struct ChatMessageRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: TenantId,
    pub role: String,
    pub content_encrypted: String,
    pub tool_calls_encrypted: Option<String>,
    pub tokens_used: Option<i32>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Create a new session.
pub async fn create_session(
    tx: &mut Transaction<'_, Postgres>,
    user_id: TenantId,
    title: Option<&str>,
) -> AppResult<ChatSession> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r"
        INSERT INTO chat_sessions (id, user_id, title, is_active, message_count, created_at, updated_at)
        VALUES ($1, $2, $3, true, 0, now(), now())
        RETURNING id, user_id, title, is_active, message_count, last_message_at, created_at, updated_at
        ",
    )
    .bind(id)
    .bind(user_id.as_uuid())
    .bind(title)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to create chat session: {e}")))?;

    Ok(row_to_session(&row))
}

/// The tenant's most recent active session, or `None` if they have never
/// chatted.
pub async fn get_active_session(tx: &mut Transaction<'_, Postgres>) -> AppResult<Option<ChatSession>> {
    let row = sqlx::query(
        r"
        SELECT id, user_id, title, is_active, message_count, last_message_at, created_at, updated_at
        FROM chat_sessions WHERE is_active = true ORDER BY last_message_at DESC NULLS LAST LIMIT 1
        ",
    )
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to get active session: {e}")))?;

    Ok(row.as_ref().map(row_to_session))
}

/// A session by id.
pub async fn get_session(tx: &mut Transaction<'_, Postgres>, session_id: Uuid) -> AppResult<Option<ChatSession>> {
    let row = sqlx::query(
        r"
        SELECT id, user_id, title, is_active, message_count, last_message_at, created_at, updated_at
        FROM chat_sessions WHERE id = $1
        ",
    )
    .bind(session_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to get session: {e}")))?;

    Ok(row.as_ref().map(row_to_session))
}

/// Sessions with `last_message_at` older than `cutoff`, still active — the
/// candidate set for the chat archiver job (spec §4.7/§4.8).
pub async fn active_sessions_older_than(
    tx: &mut Transaction<'_, Postgres>,
    cutoff: DateTime<Utc>,
) -> AppResult<Vec<ChatSession>> {
    let rows = sqlx::query(
        r"
        SELECT id, user_id, title, is_active, message_count, last_message_at, created_at, updated_at
        FROM chat_sessions WHERE is_active = true AND last_message_at < $1
        ",
    )
    .bind(cutoff)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to list archivable sessions: {e}")))?;

    Ok(rows.iter().map(row_to_session).collect())
}

/// Append a message, encrypted, and bump the session's `message_count`/
/// `last_message_at` in the same transaction.
pub async fn append_message(
    tx: &mut Transaction<'_, Postgres>,
    session_id: Uuid,
    user_id: TenantId,
    role: &str,
    content_encrypted: &str,
    tool_calls_encrypted: Option<&str>,
    tokens_used: Option<i32>,
    model: Option<&str>,
) -> AppResult<ChatMessageRow> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r"
        INSERT INTO chat_messages (
            id, session_id, user_id, role, content_encrypted, tool_calls_encrypted,
            tokens_used, model, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
        RETURNING id, session_id, user_id, role, content_encrypted, tool_calls_encrypted,
                  tokens_used, model, created_at
        ",
    )
    .bind(id)
    .bind(session_id)
    .bind(user_id.as_uuid())
    .bind(role)
    .bind(content_encrypted)
    .bind(tool_calls_encrypted)
    .bind(tokens_used)
    .bind(model)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to append chat message: {e}")))?;

    sqlx::query(
        "UPDATE chat_sessions SET message_count = message_count + 1, last_message_at = now(), updated_at = now() WHERE id = $1",
    )
    .bind(session_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to update session counters: {e}")))?;

    Ok(row_to_message(&row))
}

/// Most recent `limit` messages for a session, oldest-first (ready to feed
/// directly into a model context window).
pub async fn recent_messages(
    tx: &mut Transaction<'_, Postgres>,
    session_id: Uuid,
    limit: i64,
) -> AppResult<Vec<ChatMessageRow>> {
    let rows = sqlx::query(
        r"
        SELECT id, session_id, user_id, role, content_encrypted, tool_calls_encrypted,
               tokens_used, model, created_at
        FROM chat_messages WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2
        ",
    )
    .bind(session_id)
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to fetch recent messages: {e}")))?;

    let mut messages: Vec<ChatMessageRow> = rows.iter().map(row_to_message).collect();
    messages.reverse();
    Ok(messages)
}

/// All messages for a session, oldest-first — used by the archiver to
/// package a full session before upload.
pub async fn all_messages(tx: &mut Transaction<'_, Postgres>, session_id: Uuid) -> AppResult<Vec<ChatMessageRow>> {
    let rows = sqlx::query(
        r"
        SELECT id, session_id, user_id, role, content_encrypted, tool_calls_encrypted,
               tokens_used, model, created_at
        FROM chat_messages WHERE session_id = $1 ORDER BY created_at ASC
        ",
    )
    .bind(session_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to fetch all messages: {e}")))?;

    Ok(rows.iter().map(row_to_message).collect())
}

/// Mark a session inactive after its messages have been archived to cold
/// storage (soft archive — rows are not deleted here).
pub async fn mark_session_archived(tx: &mut Transaction<'_, Postgres>, session_id: Uuid) -> AppResult<()> {
    let result = sqlx::query("UPDATE chat_sessions SET is_active = false, updated_at = now() WHERE id = $1")
        .bind(session_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::database(format!("failed to mark session archived: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("chat session {session_id}")));
    }
    Ok(())
}

fn row_to_session(row: &sqlx::postgres::PgRow) -> ChatSession {
    ChatSession {
        id: row.get("id"),
        user_id: TenantId::from_uuid(row.get("user_id")),
        title: row.get("title"),
        is_active: row.get("is_active"),
        message_count: row.get("message_count"),
        last_message_at: row.get("last_message_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_message(row: &sqlx::postgres::PgRow) -> ChatMessageRow {
    ChatMessageRow {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_id: TenantId::from_uuid(row.get("user_id")),
        role: row.get("role"),
        content_encrypted: row.get("content_encrypted"),
        tool_calls_encrypted: row.get("tool_calls_encrypted"),
        tokens_used: row.get("tokens_used"),
        model: row.get("model"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use sqlx::PgPool;

    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        Some(Database::from_pool(pool))
    }

    #[tokio::test]
    async fn append_message_bumps_session_counters() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        let session_id = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let session = create_session(tx, tenant_id, Some("first chat")).await?;
                    append_message(tx, session.id, tenant_id, "user", "ciphertext-1", None, None, None).await?;
                    append_message(tx, session.id, tenant_id, "assistant", "ciphertext-2", None, Some(42), Some("gpt")).await?;
                    Ok(session.id)
                })
            })
            .await
            .unwrap();

        let session = db
            .with_tenant_conn(tenant_id, |tx| Box::pin(async move { get_session(tx, session_id).await }))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.message_count, 2);
        assert!(session.last_message_at.is_some());
    }

    #[tokio::test]
    async fn recent_messages_return_oldest_first() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        let messages = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let session = create_session(tx, tenant_id, None).await?;
                    append_message(tx, session.id, tenant_id, "user", "first", None, None, None).await?;
                    append_message(tx, session.id, tenant_id, "assistant", "second", None, None, None).await?;
                    recent_messages(tx, session.id, 10).await
                })
            })
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content_encrypted, "first");
        assert_eq!(messages[1].content_encrypted, "second");
    }
}
