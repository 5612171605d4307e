// SPDX-License-Identifier: MIT OR Apache-2.0

//! External-id mapping repository (C9): remembers which `Person` a
//! provider's own record id resolves to, so repeated syncs recognize the
//! same contact instead of re-running email/phone matching every time.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::errors::AppResult;

/// One provider-record-id to person mapping.
#[derive(Debug, Clone)]
pub struct ExternalIdMapping {
    pub person_id: Uuid,
    pub provider: String,
    pub provider_record_id: String,
    pub etag: Option<String>,
    pub last_observed_at: DateTime<Utc>,
}

/// Look up the person already mapped to this provider record, if any
/// (entity-resolution step 1, spec §4.9).
pub async fn find_by_provider_record(
    tx: &mut Transaction<'_, Postgres>,
    provider: &str,
    provider_record_id: &str,
) -> AppResult<Option<Uuid>> {
    let row = sqlx::query("SELECT person_id FROM external_ids WHERE provider = $1 AND provider_record_id = $2")
        .bind(provider)
        .bind(provider_record_id)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(row.map(|r| r.get("person_id")))
}

/// Record or refresh a mapping, overwriting the etag and last-observed
/// timestamp on conflict — the provider value always wins for these
/// last-observed fields (spec §4.9).
pub async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    user_id: uuid::Uuid,
    person_id: Uuid,
    provider: &str,
    provider_record_id: &str,
    etag: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r"
        INSERT INTO external_ids (user_id, person_id, provider, provider_record_id, etag, last_observed_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (provider, provider_record_id, user_id)
        DO UPDATE SET person_id = EXCLUDED.person_id, etag = EXCLUDED.etag, last_observed_at = now()
        ",
    )
    .bind(user_id)
    .bind(person_id)
    .bind(provider)
    .bind(provider_record_id)
    .bind(etag)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::persons;
    use crate::database::Database;
    use sentinel_core::TenantId;
    use sqlx::PgPool;

    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        Some(Database::from_pool(pool))
    }

    #[tokio::test]
    async fn upsert_then_find_resolves_to_same_person() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        let found = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let fields = persons::PersonFields { name: "Dana".into(), ..Default::default() };
                    let person = persons::create_person(tx, tenant_id, &fields).await?;
                    upsert(tx, tenant_id.as_uuid(), person.id, "google", "rec-1", Some("etag-1")).await?;
                    find_by_provider_record(tx, "google", "rec-1").await
                })
            })
            .await
            .unwrap();

        assert!(found.is_some());
    }

    #[tokio::test]
    async fn upsert_on_conflict_repoints_existing_mapping() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        let (first_person, resolved) = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let first_fields = persons::PersonFields { name: "First".into(), ..Default::default() };
                    let second_fields = persons::PersonFields { name: "Second".into(), ..Default::default() };
                    let first = persons::create_person(tx, tenant_id, &first_fields).await?;
                    let second = persons::create_person(tx, tenant_id, &second_fields).await?;
                    upsert(tx, tenant_id.as_uuid(), first.id, "google", "rec-2", None).await?;
                    upsert(tx, tenant_id.as_uuid(), second.id, "google", "rec-2", None).await?;
                    let resolved = find_by_provider_record(tx, "google", "rec-2").await?;
                    Ok((first.id, resolved))
                })
            })
            .await
            .unwrap();

        assert_ne!(resolved, Some(first_person));
    }
}
