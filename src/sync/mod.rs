// SPDX-License-Identifier: MIT OR Apache-2.0

//! C9: the sync state machine and the entity resolution it guards. The
//! state transitions live in `crate::database::sync_state`; this module
//! owns the orchestration around them — eligibility, the resolution order,
//! and turning a batch of provider records into persons and mappings.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::database::sync_state::SyncStatus;
use crate::database::{external_ids, persons, sync_state, Database};
use crate::errors::AppResult;
use sentinel_core::TenantId;

/// One provider-supplied contact record, already normalized by the caller
/// (lowercased email, digits-only phone) before it reaches resolution.
#[derive(Debug, Clone)]
pub struct IncomingContact {
    pub provider_record_id: String,
    pub etag: Option<String>,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
}

impl IncomingContact {
    fn has_contact_method(&self) -> bool {
        self.email.is_some() || self.phone.is_some()
    }

    fn as_person_fields(&self) -> persons::PersonFields {
        persons::PersonFields {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            name: self.name.clone(),
            aliases: Vec::new(),
            work_email: None,
            personal_email: self.email.clone(),
            work_cell: None,
            personal_cell: self.phone.clone(),
            company: self.company.clone(),
            latest_title: self.title.clone(),
            interests: serde_json::json!([]),
        }
    }
}

/// How one incoming record resolved against existing contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    MatchedExisting,
    Created,
    Skipped,
}

/// Tally returned by [`SyncOrchestrator::run_contact_sync`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncSummary {
    pub matched: usize,
    pub created: usize,
    pub skipped: usize,
}

/// Resolve one incoming record to a person id, in the order spec §4.9
/// prescribes: existing mapping, then email, then phone, then create.
/// Records with no contact method at all cannot be created and are skipped.
async fn resolve_contact(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: TenantId,
    provider: &str,
    contact: &IncomingContact,
) -> AppResult<(Resolution, Option<Uuid>)> {
    if let Some(person_id) = external_ids::find_by_provider_record(tx, provider, &contact.provider_record_id).await? {
        external_ids::upsert(tx, tenant_id.as_uuid(), person_id, provider, &contact.provider_record_id, contact.etag.as_deref()).await?;
        return Ok((Resolution::MatchedExisting, Some(person_id)));
    }

    if let Some(email) = &contact.email {
        if let Some(person_id) = persons::find_by_email(tx, email).await? {
            external_ids::upsert(tx, tenant_id.as_uuid(), person_id, provider, &contact.provider_record_id, contact.etag.as_deref()).await?;
            return Ok((Resolution::MatchedExisting, Some(person_id)));
        }
    }

    if let Some(phone) = &contact.phone {
        if let Some(person_id) = persons::find_by_phone(tx, phone).await? {
            external_ids::upsert(tx, tenant_id.as_uuid(), person_id, provider, &contact.provider_record_id, contact.etag.as_deref()).await?;
            return Ok((Resolution::MatchedExisting, Some(person_id)));
        }
    }

    if !contact.has_contact_method() {
        tracing::warn!(%tenant_id, provider, record_id = %contact.provider_record_id, "incoming contact has no email or phone; skipping creation");
        return Ok((Resolution::Skipped, None));
    }

    let person = persons::create_person(tx, tenant_id, &contact.as_person_fields()).await?;
    external_ids::upsert(tx, tenant_id.as_uuid(), person.id, provider, &contact.provider_record_id, contact.etag.as_deref()).await?;
    Ok((Resolution::Created, Some(person.id)))
}

/// Orchestrates sync runs for a (tenant, provider) pair.
pub struct SyncOrchestrator {
    database: Arc<Database>,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Eligibility (spec §4.9): not syncing, not failed, `next_run_at` due,
    /// and the caller holds a valid token (checked by the caller, since
    /// token validity is C5's concern, not this module's).
    pub async fn is_eligible(&self, tenant_id: TenantId, provider: &str, has_valid_token: bool) -> AppResult<bool> {
        if !has_valid_token {
            return Ok(false);
        }
        let provider = provider.to_owned();
        let state = self
            .database
            .with_tenant_conn(tenant_id, move |tx| Box::pin(async move { sync_state::get_or_create(tx, tenant_id, &provider).await }))
            .await?;

        Ok(!matches!(state.status, SyncStatus::Syncing | SyncStatus::Failed) && state.next_run_at <= Utc::now())
    }

    /// Run one full sync pass over `records`: claim the state row, resolve
    /// every record, then mark the pass complete or failed. `is_full`
    /// distinguishes a full resync from an incremental delta pull (spec
    /// §4.9's `lastFullSync`/`lastIncrementalSync` bookkeeping).
    pub async fn run_contact_sync(
        &self,
        tenant_id: TenantId,
        provider: &str,
        records: Vec<IncomingContact>,
        delta_token: Option<String>,
        is_full: bool,
        next_minutes: i64,
    ) -> AppResult<SyncSummary> {
        let provider = provider.to_owned();

        self.database
            .with_tenant_conn(tenant_id, {
                let provider = provider.clone();
                move |tx| Box::pin(async move { sync_state::start(tx, tenant_id, &provider).await })
            })
            .await?;

        let outcome = self
            .database
            .with_tenant_conn(tenant_id, {
                let provider = provider.clone();
                move |tx| {
                    Box::pin(async move {
                        let mut summary = SyncSummary::default();
                        for contact in &records {
                            let (resolution, _) = resolve_contact(tx, tenant_id, &provider, contact).await?;
                            match resolution {
                                Resolution::MatchedExisting => summary.matched += 1,
                                Resolution::Created => summary.created += 1,
                                Resolution::Skipped => summary.skipped += 1,
                            }
                        }
                        Ok(summary)
                    })
                }
            })
            .await;

        match outcome {
            Ok(summary) => {
                self.database
                    .with_tenant_conn(tenant_id, {
                        let provider = provider.clone();
                        move |tx| {
                            Box::pin(async move {
                                sync_state::complete(tx, tenant_id, &provider, delta_token.as_deref(), is_full, next_minutes).await
                            })
                        }
                    })
                    .await?;
                Ok(summary)
            }
            Err(e) => {
                let message = e.to_string();
                self.database
                    .with_tenant_conn(tenant_id, move |tx| Box::pin(async move { sync_state::fail(tx, tenant_id, &provider, &message).await }))
                    .await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    async fn test_db() -> Option<Arc<Database>> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        Some(Arc::new(Database::from_pool(pool)))
    }

    fn contact(record_id: &str, email: Option<&str>) -> IncomingContact {
        IncomingContact {
            provider_record_id: record_id.to_owned(),
            etag: Some("etag-1".to_owned()),
            name: format!("contact-{record_id}"),
            first_name: None,
            last_name: None,
            email: email.map(str::to_owned),
            phone: None,
            company: None,
            title: None,
        }
    }

    #[tokio::test]
    async fn first_sync_creates_contacts_second_sync_matches_them() {
        let Some(db) = test_db().await else { return };
        let orchestrator = SyncOrchestrator::new(Arc::clone(&db));
        let tenant_id = TenantId::new();

        let first = orchestrator
            .run_contact_sync(tenant_id, "google", vec![contact("rec-1", Some("a@example.com"))], None, true, 60)
            .await
            .unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(first.matched, 0);

        let second = orchestrator
            .run_contact_sync(tenant_id, "google", vec![contact("rec-1", Some("a@example.com"))], None, false, 15)
            .await
            .unwrap();
        assert_eq!(second.matched, 1);
        assert_eq!(second.created, 0);
    }

    #[tokio::test]
    async fn contact_with_no_email_or_phone_is_skipped() {
        let Some(db) = test_db().await else { return };
        let orchestrator = SyncOrchestrator::new(Arc::clone(&db));
        let tenant_id = TenantId::new();

        let summary = orchestrator
            .run_contact_sync(tenant_id, "google", vec![contact("rec-2", None)], None, true, 60)
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 0);
    }

    #[tokio::test]
    async fn ineligible_without_a_valid_token() {
        let Some(db) = test_db().await else { return };
        let orchestrator = SyncOrchestrator::new(Arc::clone(&db));
        let tenant_id = TenantId::new();
        assert!(!orchestrator.is_eligible(tenant_id, "google", false).await.unwrap());
    }

    #[tokio::test]
    async fn eligible_immediately_after_first_reference() {
        let Some(db) = test_db().await else { return };
        let orchestrator = SyncOrchestrator::new(Arc::clone(&db));
        let tenant_id = TenantId::new();
        assert!(orchestrator.is_eligible(tenant_id, "google", true).await.unwrap());
    }
}
