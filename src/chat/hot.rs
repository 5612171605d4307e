// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hot tier (C7): recent messages for sessions active within `HOT_WINDOW`,
//! stored decrypted under the assumption the cache is process-local and
//! tenant-scoped by key prefix (spec §4.7, §9 open question). Keyed
//! `chat:<tenantID>:session:<sessionID>:messages`, a Redis sorted set
//! ordered by message timestamp, capped and TTL-refreshed on every write.

use redis::AsyncCommands;
use uuid::Uuid;

use super::PlaintextMessage;
use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// A Redis-backed cache-aside layer in front of the warm tier. Cloning a
/// [`redis::aio::ConnectionManager`] is cheap (it's an `Arc` around a
/// reconnecting connection), so each call clones one rather than holding a
/// lock across an await point.
pub struct HotTier {
    conn: redis::aio::ConnectionManager,
    ttl_seconds: i64,
    max_per_session: isize,
}

impl HotTier {
    /// Connect to the hot-tier Redis instance.
    ///
    /// # Errors
    /// Returns [`AppError::external_service`] if the URL is malformed or the
    /// initial connection fails.
    pub async fn connect(redis_url: &str, hot_window_days: i64, max_per_session: usize) -> AppResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::external_service(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::external_service(format!("failed to connect to redis: {e}")))?;
        Ok(Self {
            conn,
            ttl_seconds: hot_window_days.max(0) * 86_400,
            max_per_session: max_per_session as isize,
        })
    }

    fn key(tenant_id: TenantId, session_id: Uuid) -> String {
        format!("chat:{tenant_id}:session:{session_id}:messages")
    }

    /// Best-effort push: append one message, trim to `max_per_session`, and
    /// refresh the key's TTL. Callers must not fail the surrounding write on
    /// an error here (spec §4.7 write-path step 4).
    pub async fn push(&self, tenant_id: TenantId, session_id: Uuid, message: &PlaintextMessage) -> AppResult<()> {
        let key = Self::key(tenant_id, session_id);
        let member = serde_json::to_string(message)
            .map_err(|e| AppError::internal(format!("failed to serialize hot-tier message: {e}")))?;
        let score = message.created_at.timestamp_millis();

        let mut conn = self.conn.clone();
        let _: () = conn.zadd(&key, member, score).await?;
        if self.max_per_session > 0 {
            let _: () = conn.zremrangebyrank(&key, 0, -(self.max_per_session + 1)).await?;
        }
        if self.ttl_seconds > 0 {
            let _: () = conn.expire(&key, self.ttl_seconds).await?;
        }
        Ok(())
    }

    /// The most recent `limit` messages, oldest-first, or `None` on a cache
    /// miss (no key, or the key has expired). An empty session that was
    /// genuinely cached with zero messages is indistinguishable from a miss
    /// here, which is acceptable: the warm-tier fallback returns the same
    /// empty result either way.
    pub async fn recent(&self, tenant_id: TenantId, session_id: Uuid, limit: i64) -> AppResult<Option<Vec<PlaintextMessage>>> {
        let key = Self::key(tenant_id, session_id);
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrange(&key, (-limit.max(1)) as isize, -1).await?;
        if members.is_empty() {
            return Ok(None);
        }

        let messages = members.into_iter().filter_map(|raw| serde_json::from_str(&raw).ok()).collect();
        Ok(Some(messages))
    }

    /// Drop a session's cached messages entirely, used once its warm-tier
    /// row has been archived to cold storage.
    pub async fn drop_session(&self, tenant_id: TenantId, session_id: Uuid) -> AppResult<()> {
        let key = Self::key(tenant_id, session_id);
        let mut conn = self.conn.clone();
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}
