// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relationship repository: directed edges between two [`super::persons::Person`]
//! rows, owned by the same tenant as both endpoints.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// A directed edge between two persons (spec §3).
#[derive(Debug, Clone)]
pub struct Relationship {
    pub id: Uuid,
    pub owner_user_id: TenantId,
    pub from_person_id: Uuid,
    pub to_person_id: Uuid,
    /// e.g. "family", "work".
    pub category: String,
    /// Role `from` holds with respect to `to` (e.g. "manager").
    pub from_role: Option<String>,
    /// Role `to` holds with respect to `from` (e.g. "report").
    pub to_role: Option<String>,
    pub first_meeting_date: Option<NaiveDate>,
    pub is_active: bool,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create a new active relationship edge.
pub async fn create_relationship(
    tx: &mut Transaction<'_, Postgres>,
    owner_user_id: TenantId,
    from_person_id: Uuid,
    to_person_id: Uuid,
    category: &str,
    from_role: Option<&str>,
    to_role: Option<&str>,
) -> AppResult<Relationship> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r"
        INSERT INTO relationships (
            id, owner_user_id, from_person_id, to_person_id, category, from_role, to_role,
            is_active, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, true, now(), now())
        RETURNING id, owner_user_id, from_person_id, to_person_id, category, from_role, to_role,
                  first_meeting_date, is_active, ended_at, created_at, updated_at
        ",
    )
    .bind(id)
    .bind(owner_user_id.as_uuid())
    .bind(from_person_id)
    .bind(to_person_id)
    .bind(category)
    .bind(from_role)
    .bind(to_role)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to create relationship: {e}")))?;

    Ok(row_to_relationship(&row))
}

/// All relationships where `person_id` is either endpoint.
pub async fn relationships_for_person(
    tx: &mut Transaction<'_, Postgres>,
    person_id: Uuid,
) -> AppResult<Vec<Relationship>> {
    let rows = sqlx::query(
        r"
        SELECT id, owner_user_id, from_person_id, to_person_id, category, from_role, to_role,
               first_meeting_date, is_active, ended_at, created_at, updated_at
        FROM relationships
        WHERE from_person_id = $1 OR to_person_id = $1
        ",
    )
    .bind(person_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("failed to list relationships: {e}")))?;

    Ok(rows.iter().map(row_to_relationship).collect())
}

/// Soft-end a relationship: sets `ended_at` and clears `is_active`, never
/// deletes the row (spec §4.9 "delete semantics are soft").
pub async fn end_relationship(tx: &mut Transaction<'_, Postgres>, relationship_id: Uuid) -> AppResult<()> {
    let result = sqlx::query("UPDATE relationships SET is_active = false, ended_at = now(), updated_at = now() WHERE id = $1")
        .bind(relationship_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::database(format!("failed to end relationship: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("relationship {relationship_id}")));
    }
    Ok(())
}

fn row_to_relationship(row: &sqlx::postgres::PgRow) -> Relationship {
    Relationship {
        id: row.get("id"),
        owner_user_id: TenantId::from_uuid(row.get("owner_user_id")),
        from_person_id: row.get("from_person_id"),
        to_person_id: row.get("to_person_id"),
        category: row.get("category"),
        from_role: row.get("from_role"),
        to_role: row.get("to_role"),
        first_meeting_date: row.get("first_meeting_date"),
        is_active: row.get("is_active"),
        ended_at: row.get("ended_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::persons::{create_person, PersonFields};
    use crate::database::Database;
    use sqlx::PgPool;

    async fn test_db() -> Option<Database> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        Some(Database::from_pool(pool))
    }

    #[tokio::test]
    async fn end_relationship_clears_active_flag_without_deleting() {
        let Some(db) = test_db().await else { return };
        let tenant_id = TenantId::new();

        let relationship_id = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let a = create_person(
                        tx,
                        tenant_id,
                        &PersonFields { name: "a".into(), interests: serde_json::json!([]), ..Default::default() },
                    )
                    .await?;
                    let b = create_person(
                        tx,
                        tenant_id,
                        &PersonFields { name: "b".into(), interests: serde_json::json!([]), ..Default::default() },
                    )
                    .await?;
                    let rel = create_relationship(tx, tenant_id, a.id, b.id, "work", Some("manager"), Some("report"))
                        .await?;
                    Ok(rel.id)
                })
            })
            .await
            .unwrap();

        db.with_tenant_conn(tenant_id, |tx| Box::pin(async move { end_relationship(tx, relationship_id).await }))
            .await
            .unwrap();

        let relationships = db
            .with_tenant_conn(tenant_id, |tx| {
                Box::pin(async move {
                    let a = create_person(
                        tx,
                        tenant_id,
                        &PersonFields { name: "c".into(), interests: serde_json::json!([]), ..Default::default() },
                    )
                    .await?;
                    relationships_for_person(tx, a.id).await
                })
            })
            .await
            .unwrap();
        assert!(relationships.is_empty());
    }
}
