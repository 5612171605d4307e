// SPDX-License-Identifier: MIT OR Apache-2.0

//! Person (contact) repository. Every statement here runs inside a
//! transaction already scoped by [`super::Database::with_tenant_conn`] — the
//! `owner_user_id` bind on writes is the second line of defense the RLS
//! policy itself is the first.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// A contact, or (when `is_core_user` is set) the tenant's own profile row.
#[derive(Debug, Clone)]
pub struct Person {
    /// Unique id.
    pub id: Uuid,
    /// Owning tenant.
    pub owner_user_id: TenantId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: String,
    pub aliases: Vec<String>,
    /// True on exactly one row per tenant: the tenant's own profile.
    pub is_core_user: bool,
    pub work_email: Option<String>,
    pub personal_email: Option<String>,
    pub work_cell: Option<String>,
    pub personal_cell: Option<String>,
    pub company: Option<String>,
    pub latest_title: Option<String>,
    /// Free-form interests, kept as JSON (spec §3).
    pub interests: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating or updating a contact. All optional except
/// `name`, matching the "requires at least one contact method" rule applied
/// by the caller during entity resolution (C9), not by this repository.
#[derive(Debug, Clone, Default)]
pub struct PersonFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: String,
    pub aliases: Vec<String>,
    pub work_email: Option<String>,
    pub personal_email: Option<String>,
    pub work_cell: Option<String>,
    pub personal_cell: Option<String>,
    pub company: Option<String>,
    pub latest_title: Option<String>,
    pub interests: Value,
}

/// Insert a new contact row. `is_core_user` is set by [`create_core_user`]
/// only — ordinary contacts are never created with it set.
pub async fn create_person(
    tx: &mut Transaction<'_, Postgres>,
    owner_user_id: TenantId,
    fields: &PersonFields,
) -> AppResult<Person> {
    insert(tx, owner_user_id, fields, false).await
}

/// Insert the tenant's own profile row. Call exactly once per tenant, at
/// tenant creation.
pub async fn create_core_user(
    tx: &mut Transaction<'_, Postgres>,
    owner_user_id: TenantId,
    fields: &PersonFields,
) -> AppResult<Person> {
    insert(tx, owner_user_id, fields, true).await
}

async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    owner_user_id: TenantId,
    fields: &PersonFields,
    is_core_user: bool,
) -> AppResult<Person> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r"
        INSERT INTO persons (
            id, owner_user_id, first_name, last_name, name, aliases, is_core_user,
            work_email, personal_email, work_cell, personal_cell, company, latest_title,
            interests, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now(), now())
        RETURNING id, owner_user_id, first_name, last_name, name, aliases, is_core_user,
                  work_email, personal_email, work_cell, personal_cell, company, latest_title,
                  interests, created_at, updated_at
        ",
    )
    .bind(id)
    .bind(owner_user_id.as_uuid())
    .bind(&fields.first_name)
    .bind(&fields.last_name)
    .bind(&fields.name)
    .bind(&fields.aliases)
    .bind(is_core_user)
    .bind(&fields.work_email)
    .bind(&fields.personal_email)
    .bind(&fields.work_cell)
    .bind(&fields.personal_cell)
    .bind(&fields.company)
    .bind(&fields.latest_title)
    .bind(&fields.interests)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to create person: {e}")))?;

    Ok(row_to_person(&row))
}

/// The tenant's own profile row.
pub async fn get_core_user(tx: &mut Transaction<'_, Postgres>) -> AppResult<Option<Person>> {
    let row = sqlx::query(&format!("{SELECT_COLUMNS} FROM persons WHERE is_core_user = true"))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::database(format!("failed to get core user: {e}")))?;

    Ok(row.as_ref().map(row_to_person))
}

/// A single contact by id, excluding the core-user row.
pub async fn get_contact(tx: &mut Transaction<'_, Postgres>, person_id: Uuid) -> AppResult<Option<Person>> {
    let row = sqlx::query(&format!("{SELECT_COLUMNS} FROM persons WHERE id = $1 AND is_core_user = false"))
        .bind(person_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::database(format!("failed to get contact: {e}")))?;

    Ok(row.as_ref().map(row_to_person))
}

/// Contacts, excluding the core-user row, paginated and name-sorted.
pub async fn list_contacts(tx: &mut Transaction<'_, Postgres>, limit: i64, offset: i64) -> AppResult<Vec<Person>> {
    let rows = sqlx::query(&format!(
        "{SELECT_COLUMNS} FROM persons WHERE is_core_user = false ORDER BY name LIMIT $1 OFFSET $2"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to list contacts: {e}")))?;

    Ok(rows.iter().map(row_to_person).collect())
}

/// Full-text search over the derived `search_vector` column.
pub async fn search_contacts(tx: &mut Transaction<'_, Postgres>, query: &str) -> AppResult<Vec<Person>> {
    let rows = sqlx::query(&format!(
        r"
        {SELECT_COLUMNS}, ts_rank(search_vector, plainto_tsquery('english', $1)) AS rank
        FROM persons
        WHERE search_vector @@ plainto_tsquery('english', $1) AND is_core_user = false
        ORDER BY rank DESC
        LIMIT 20
        "
    ))
    .bind(query)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to search contacts: {e}")))?;

    Ok(rows.iter().map(row_to_person).collect())
}

/// A contact whose work or personal email matches, case-insensitively
/// (entity-resolution step 2, spec §4.9).
pub async fn find_by_email(tx: &mut Transaction<'_, Postgres>, email: &str) -> AppResult<Option<Uuid>> {
    let row = sqlx::query(
        "SELECT id FROM persons WHERE is_core_user = false AND (lower(work_email) = lower($1) OR lower(personal_email) = lower($1)) LIMIT 1",
    )
    .bind(email)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to look up contact by email: {e}")))?;

    Ok(row.map(|r| r.get("id")))
}

/// A contact whose work or personal cell matches a normalized phone number
/// (entity-resolution step 3, spec §4.9). Callers are expected to have
/// already normalized `phone` (digits only) the same way stored numbers are.
pub async fn find_by_phone(tx: &mut Transaction<'_, Postgres>, phone: &str) -> AppResult<Option<Uuid>> {
    let row = sqlx::query("SELECT id FROM persons WHERE is_core_user = false AND (work_cell = $1 OR personal_cell = $1) LIMIT 1")
        .bind(phone)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::database(format!("failed to look up contact by phone: {e}")))?;

    Ok(row.map(|r| r.get("id")))
}

/// Overwrite the mutable fields of an existing contact.
pub async fn update_person(
    tx: &mut Transaction<'_, Postgres>,
    person_id: Uuid,
    fields: &PersonFields,
) -> AppResult<Person> {
    let row = sqlx::query(&format!(
        r"
        UPDATE persons SET
            first_name = $1, last_name = $2, name = $3, aliases = $4,
            work_email = $5, personal_email = $6, work_cell = $7, personal_cell = $8,
            company = $9, latest_title = $10, interests = $11, updated_at = now()
        WHERE id = $12
        RETURNING id, owner_user_id, first_name, last_name, name, aliases, is_core_user,
                  work_email, personal_email, work_cell, personal_cell, company, latest_title,
                  interests, created_at, updated_at
        "
    ))
    .bind(&fields.first_name)
    .bind(&fields.last_name)
    .bind(&fields.name)
    .bind(&fields.aliases)
    .bind(&fields.work_email)
    .bind(&fields.personal_email)
    .bind(&fields.work_cell)
    .bind(&fields.personal_cell)
    .bind(&fields.company)
    .bind(&fields.latest_title)
    .bind(&fields.interests)
    .bind(person_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to update person: {e}")))?
    .ok_or_else(|| AppError::not_found(format!("person {person_id}")))?;

    Ok(row_to_person(&row))
}

const SELECT_COLUMNS: &str = r"
SELECT id, owner_user_id, first_name, last_name, name, aliases, is_core_user,
       work_email, personal_email, work_cell, personal_cell, company, latest_title,
       interests, created_at, updated_at";

fn row_to_person(row: &sqlx::postgres::PgRow) -> Person {
    Person {
        id: row.get("id"),
        owner_user_id: TenantId::from_uuid(row.get("owner_user_id")),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        name: row.get("name"),
        aliases: row.get("aliases"),
        is_core_user: row.get("is_core_user"),
        work_email: row.get("work_email"),
        personal_email: row.get("personal_email"),
        work_cell: row.get("work_cell"),
        personal_cell: row.get("personal_cell"),
        company: row.get("company"),
        latest_title: row.get("latest_title"),
        interests: row.get("interests"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
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
        let db = Database::from_pool(pool);
        Some(db)
    }

    fn sample(name: &str) -> PersonFields {
        PersonFields {
            name: name.to_owned(),
            personal_email: Some(format!("{name}@example.com")),
            interests: serde_json::json!([]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn core_user_row_is_excluded_from_contact_listing() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        db.with_tenant_conn(tenant_id, |tx| {
            Box::pin(async move {
                create_core_user(tx, tenant_id, &sample("self")).await?;
                create_person(tx, tenant_id, &sample("alice")).await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        let contacts = db
            .with_tenant_conn(tenant_id, |tx| Box::pin(async move { list_contacts(tx, 100, 0).await }))
            .await
            .unwrap();

        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "alice");
    }

    #[tokio::test]
    async fn search_finds_contact_by_name() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        db.with_tenant_conn(tenant_id, |tx| {
            Box::pin(async move { create_person(tx, tenant_id, &sample("bob builder")).await.map(|_| ()) })
        })
        .await
        .unwrap();

        let found = db
            .with_tenant_conn(tenant_id, |tx| Box::pin(async move { search_contacts(tx, "builder").await }))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "bob builder");
    }

    #[tokio::test]
    async fn find_by_email_matches_case_insensitively() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        let found = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let fields = PersonFields { name: "Carol".into(), personal_email: Some("Carol@Example.com".into()), ..Default::default() };
                    create_person(tx, tenant_id, &fields).await?;
                    find_by_email(tx, "carol@example.com").await
                })
            })
            .await
            .unwrap();

        assert!(found.is_some());
    }

    #[tokio::test]
    async fn find_by_phone_ignores_core_user_row() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        let found = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let core = PersonFields { name: "Me".into(), personal_cell: Some("15551234567".into()), ..Default::default() };
                    create_core_user(tx, tenant_id, &core).await?;
                    find_by_phone(tx, "15551234567").await
                })
            })
            .await
            .unwrap();

        assert!(found.is_none());
    }
}
