// SPDX-License-Identifier: MIT OR Apache-2.0

//! C7: the chat tiered store. Coordinates the hot cache, the warm
//! relational store (`crate::database::chat`), and the cold object archive
//! so callers never touch any tier directly or see ciphertext leak across a
//! tier boundary.

pub mod cold;
pub mod hot;

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use cold::{ColdReadOutcome, InMemoryObjectStore, ObjectStore};
pub use hot::HotTier;

use crate::crypto::{decrypt_for_tenant, encrypt_for_tenant, TenantDek};
use crate::database::{chat as db_chat, Database};
use crate::errors::{AppError, AppResult};
use crate::kms::KmsGateway;
use sentinel_core::TenantId;

/// A chat message in plaintext, the shape used everywhere above the warm
/// tier's ciphertext columns: in the hot cache and in archive packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaintextMessage {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tokens_used: Option<i32>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A packaged, archived session (spec §4.7 cold-tier wire shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub session_id: Uuid,
    pub tenant_id: TenantId,
    pub archived_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: Vec<PlaintextMessage>,
}

/// Outcome of reading a session back from cold storage.
pub enum ArchiveReadOutcome {
    Found(ArchivedSession),
    RestoreNeeded,
    NotFound,
}

fn aad(tenant_id: TenantId, session_id: Uuid, part: &str) -> String {
    format!("{tenant_id}|{session_id}|chat_messages.{part}")
}

/// Coordinates the three tiers. Holds no key material itself — every call
/// unwraps the tenant's DEK fresh via `kms`, mirroring [`crate::oauth::vault::OAuthVault`].
pub struct ChatStore {
    database: Arc<Database>,
    kms: Arc<dyn KmsGateway>,
    hot: HotTier,
    cold: Arc<dyn ObjectStore>,
    archive_window: ChronoDuration,
}

impl ChatStore {
    #[must_use]
    pub fn new(database: Arc<Database>, kms: Arc<dyn KmsGateway>, hot: HotTier, cold: Arc<dyn ObjectStore>, archive_window_days: i64) -> Self {
        Self {
            database,
            kms,
            hot,
            cold,
            archive_window: ChronoDuration::days(archive_window_days),
        }
    }

    async fn tenant_dek(&self, tenant_id: TenantId) -> AppResult<TenantDek> {
        let wrapped = self.database.get_wrapped_dek(tenant_id).await?;
        self.kms.unwrap_tenant_dek(&wrapped).await
    }

    /// Append a message: encrypt, write to warm (record of truth), then
    /// best-effort push to hot (spec §4.7 write path).
    pub async fn append_message(
        &self,
        tenant_id: TenantId,
        session_id: Uuid,
        role: &str,
        content: &str,
        tool_calls: Option<&Value>,
        tokens_used: Option<i32>,
        model: Option<&str>,
    ) -> AppResult<Uuid> {
        let dek = self.tenant_dek(tenant_id).await?;
        let content_encrypted = encrypt_for_tenant(&dek, content, &aad(tenant_id, session_id, "content"))?;
        let tool_calls_encrypted = match tool_calls {
            Some(value) => {
                let raw = serde_json::to_string(value).map_err(|e| AppError::internal(format!("failed to serialize tool calls: {e}")))?;
                Some(encrypt_for_tenant(&dek, &raw, &aad(tenant_id, session_id, "tool_calls"))?)
            }
            None => None,
        };

        let role_owned = role.to_owned();
        let model_owned = model.map(str::to_owned);
        let row = self
            .database
            .with_tenant_conn(tenant_id, move |tx| {
                Box::pin(async move {
                    db_chat::append_message(
                        tx,
                        session_id,
                        tenant_id,
                        &role_owned,
                        &content_encrypted,
                        tool_calls_encrypted.as_deref(),
                        tokens_used,
                        model_owned.as_deref(),
                    )
                    .await
                })
            })
            .await?;

        let plaintext = PlaintextMessage {
            id: row.id,
            role: row.role,
            content: content.to_owned(),
            tool_calls: tool_calls.cloned(),
            tokens_used,
            model: model.map(str::to_owned),
            created_at: row.created_at,
        };
        if let Err(e) = self.hot.push(tenant_id, session_id, &plaintext).await {
            tracing::warn!(error = %e, %tenant_id, %session_id, "hot-tier push failed; warm-tier write still committed");
        }

        Ok(row.id)
    }

    fn decrypt_row(&self, dek: &TenantDek, tenant_id: TenantId, session_id: Uuid, row: db_chat::ChatMessageRow) -> AppResult<PlaintextMessage> {
        let content = decrypt_for_tenant(dek, &row.content_encrypted, &aad(tenant_id, session_id, "content"))?;
        let tool_calls = match &row.tool_calls_encrypted {
            Some(ciphertext) => {
                let raw = decrypt_for_tenant(dek, ciphertext, &aad(tenant_id, session_id, "tool_calls"))?;
                Some(serde_json::from_str(&raw).map_err(|e| AppError::internal(format!("corrupt tool_calls payload: {e}")))?)
            }
            None => None,
        };
        Ok(PlaintextMessage {
            id: row.id,
            role: row.role,
            content,
            tool_calls,
            tokens_used: row.tokens_used,
            model: row.model,
            created_at: row.created_at,
        })
    }

    /// Get-recent-messages: hot tier first, warm tier on miss, best-effort
    /// hot-tier repopulation after a miss (spec §4.7 read path).
    pub async fn recent_messages(&self, tenant_id: TenantId, session_id: Uuid, limit: i64) -> AppResult<Vec<PlaintextMessage>> {
        if let Ok(Some(hit)) = self.hot.recent(tenant_id, session_id, limit).await {
            return Ok(hit);
        }

        let dek = self.tenant_dek(tenant_id).await?;
        let rows = self
            .database
            .with_tenant_conn(tenant_id, move |tx| Box::pin(async move { db_chat::recent_messages(tx, session_id, limit).await }))
            .await?;

        let messages = rows
            .into_iter()
            .map(|row| self.decrypt_row(&dek, tenant_id, session_id, row))
            .collect::<AppResult<Vec<_>>>()?;

        for message in &messages {
            if let Err(e) = self.hot.push(tenant_id, session_id, message).await {
                tracing::warn!(error = %e, %tenant_id, %session_id, "hot-tier repopulation after miss failed");
            }
        }

        Ok(messages)
    }

    /// Archive path: every active session whose `last_message_at` is older
    /// than `ARCHIVE_WINDOW` is pulled from warm, packaged, encrypted,
    /// compressed, uploaded to cold, then soft-archived in warm and evicted
    /// from hot (spec §4.7 archive path). Returns the count archived.
    pub async fn archive_due_sessions(&self, tenant_id: TenantId) -> AppResult<usize> {
        let cutoff = Utc::now() - self.archive_window;
        let dek = self.tenant_dek(tenant_id).await?;

        let sessions = self
            .database
            .with_tenant_conn(tenant_id, move |tx| Box::pin(async move { db_chat::active_sessions_older_than(tx, cutoff).await }))
            .await?;

        let mut archived = 0usize;
        for session in sessions {
            let session_id = session.id;
            let rows = self
                .database
                .with_tenant_conn(tenant_id, move |tx| Box::pin(async move { db_chat::all_messages(tx, session_id).await }))
                .await?;

            let messages = rows
                .into_iter()
                .map(|row| self.decrypt_row(&dek, tenant_id, session_id, row))
                .collect::<AppResult<Vec<_>>>()?;
            let message_count = messages.len();

            let archived_at = Utc::now();
            let package = ArchivedSession { session_id, tenant_id, archived_at, message_count, messages };
            let key = cold::archive_key(tenant_id, archived_at, session_id);
            let bytes = pack_archive(&dek, &package, &aad(tenant_id, session_id, "archive"))?;
            self.cold.put(&key, bytes).await?;

            self.database
                .with_tenant_conn(tenant_id, move |tx| Box::pin(async move { db_chat::mark_session_archived(tx, session_id).await }))
                .await?;
            let _ = self.hot.drop_session(tenant_id, session_id).await;

            archived += 1;
        }

        Ok(archived)
    }

    /// Cold read path: fetch an archived session, or report that it needs
    /// restoring from deep archive first (spec §4.7 cold read path).
    pub async fn get_archived_session(&self, tenant_id: TenantId, archived_at: DateTime<Utc>, session_id: Uuid) -> AppResult<ArchiveReadOutcome> {
        let key = cold::archive_key(tenant_id, archived_at, session_id);
        match self.cold.get(&key).await? {
            ColdReadOutcome::NotFound => Ok(ArchiveReadOutcome::NotFound),
            ColdReadOutcome::RestoreNeeded => Ok(ArchiveReadOutcome::RestoreNeeded),
            ColdReadOutcome::Found(bytes) => {
                let dek = self.tenant_dek(tenant_id).await?;
                let archive = unpack_archive(&dek, &bytes, &aad(tenant_id, session_id, "archive"))?;
                Ok(ArchiveReadOutcome::Found(archive))
            }
        }
    }
}

/// Serialize, encrypt, then compress an archive package, in that order
/// (spec §4.7: "encrypted with the tenant's DEK, then compressed").
fn pack_archive(dek: &TenantDek, archive: &ArchivedSession, aad_context: &str) -> AppResult<Vec<u8>> {
    let json = serde_json::to_string(archive).map_err(|e| AppError::internal(format!("failed to serialize archive: {e}")))?;
    let encrypted = encrypt_for_tenant(dek, &json, aad_context)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(encrypted.as_bytes())
        .map_err(|e| AppError::internal(format!("failed to compress archive: {e}")))?;
    encoder.finish().map_err(|e| AppError::internal(format!("failed to finish archive compression: {e}")))
}

fn unpack_archive(dek: &TenantDek, bytes: &[u8], aad_context: &str) -> AppResult<ArchivedSession> {
    let mut decoder = GzDecoder::new(bytes);
    let mut encrypted = String::new();
    decoder
        .read_to_string(&mut encrypted)
        .map_err(|e| AppError::internal(format!("failed to decompress archive: {e}")))?;

    let json = decrypt_for_tenant(dek, &encrypted, aad_context)?;
    serde_json::from_str(&json).map_err(|e| AppError::internal(format!("corrupt archive payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::LocalKmsGateway;

    fn test_dek() -> TenantDek {
        TenantDek::new([5u8; 32])
    }

    fn sample_archive() -> ArchivedSession {
        ArchivedSession {
            session_id: Uuid::new_v4(),
            tenant_id: TenantId::new(),
            archived_at: Utc::now(),
            message_count: 1,
            messages: vec![PlaintextMessage {
                id: Uuid::new_v4(),
                role: "user".to_owned(),
                content: "hello".to_owned(),
                tool_calls: None,
                tokens_used: None,
                model: None,
                created_at: Utc::now(),
            }],
        }
    }

    #[test]
    fn pack_then_unpack_round_trips_archive() {
        let dek = test_dek();
        let archive = sample_archive();
        let packed = pack_archive(&dek, &archive, "ctx").unwrap();
        let unpacked = unpack_archive(&dek, &packed, "ctx").unwrap();
        assert_eq!(unpacked.session_id, archive.session_id);
        assert_eq!(unpacked.messages[0].content, "hello");
    }

    #[test]
    fn unpack_rejects_archive_unpacked_under_wrong_aad() {
        let dek = test_dek();
        let archive = sample_archive();
        let packed = pack_archive(&dek, &archive, "ctx-a").unwrap();
        assert!(unpack_archive(&dek, &packed, "ctx-b").is_err());
    }

    #[tokio::test]
    async fn wrapped_dek_round_trips_through_kms() {
        let kms = LocalKmsGateway::new([9u8; 32]);
        let (dek, wrapped) = kms.generate_tenant_dek().await.unwrap();
        let unwrapped = kms.unwrap_tenant_dek(&wrapped).await.unwrap();
        let archive = sample_archive();
        let packed = pack_archive(&dek, &archive, "ctx").unwrap();
        let unpacked = unpack_archive(&unwrapped, &packed, "ctx").unwrap();
        assert_eq!(unpacked.session_id, archive.session_id);
    }
}
