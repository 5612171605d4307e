// SPDX-License-Identifier: MIT OR Apache-2.0

//! Composition root: wires every subsystem's `Arc`-held dependencies into
//! one [`Services`] handle. Nothing here owns business logic — it exists so
//! a binary (or a future HTTP layer, out of scope per spec §1) has exactly
//! one place to construct the crate instead of threading six constructors
//! through `main`.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::auth::TokenIssuer;
use crate::chat::{ChatStore, HotTier, ObjectStore};
use crate::config::ServerConfig;
use crate::database::Database;
use crate::errors::AppResult;
use crate::kms::{KmsGateway, LocalKmsGateway};
use crate::oauth::{OAuthProviderClient, OAuthVault};
use crate::scheduler::{CalendarTimezoneClient, ChatArchiverJob, ContactSyncJob, ContactsProviderClient, HealthCheckJob, Scheduler, TimezoneSyncJob, TokenRefreshJob};
use crate::sync::SyncOrchestrator;

/// External collaborators a binary must supply at startup because their
/// wire-level implementation is out of scope for this crate (spec §1): the
/// provider token endpoint, the contacts and calendar APIs, and the cold
/// chat tier's object store.
pub struct ExternalClients {
    pub google_oauth: Arc<dyn OAuthProviderClient>,
    pub contacts: Arc<dyn ContactsProviderClient>,
    pub calendar_timezone: Arc<dyn CalendarTimezoneClient>,
    pub cold_store: Arc<dyn ObjectStore>,
}

/// Every long-lived subsystem, constructed once at startup and cloned
/// (cheaply, via `Arc`) into whatever calls into the crate.
pub struct Services {
    pub database: Arc<Database>,
    pub kms: Arc<dyn KmsGateway>,
    pub token_issuer: TokenIssuer,
    pub oauth_vault: Arc<OAuthVault>,
    pub chat_store: Arc<ChatStore>,
    pub sync_orchestrator: Arc<SyncOrchestrator>,
    pub scheduler: Arc<Scheduler>,
}

impl Services {
    /// Build every subsystem from `config` and the caller-supplied external
    /// collaborators, and register the standing set of scheduled jobs
    /// (spec §4.8). Does not start the scheduler — call
    /// [`Scheduler::start`] once the caller is ready to run in the
    /// background.
    pub async fn bootstrap(config: &ServerConfig, kms_master_key: [u8; 32], clients: ExternalClients) -> AppResult<Arc<Self>> {
        let database = Arc::new(Database::connect(&config.database.url, config.database.max_connections).await?);
        let kms: Arc<dyn KmsGateway> = Arc::new(LocalKmsGateway::new(kms_master_key));
        let token_issuer = TokenIssuer::new(&config.auth);

        let hot = HotTier::connect(&config.chat_store.hot_cache_url, config.chat_store.hot_window_days, 200).await?;
        let chat_store = Arc::new(ChatStore::new(
            Arc::clone(&database),
            Arc::clone(&kms),
            hot,
            Arc::clone(&clients.cold_store),
            config.chat_store.archive_window_days,
        ));

        let oauth_vault = Arc::new(OAuthVault::new(
            Arc::clone(&database),
            Arc::clone(&kms),
            Arc::clone(&clients.google_oauth),
            ChronoDuration::minutes(10),
        ));

        let sync_orchestrator = Arc::new(SyncOrchestrator::new(Arc::clone(&database)));

        let scheduler = Arc::new(
            Scheduler::new()
                .register(Arc::new(ContactSyncJob::new(
                    Arc::clone(&database),
                    Arc::clone(&oauth_vault),
                    Arc::clone(&sync_orchestrator),
                    Arc::clone(&clients.contacts),
                    "google",
                )))
                .register(Arc::new(TokenRefreshJob::new(Arc::clone(&database), Arc::clone(&oauth_vault), vec!["google"], ChronoDuration::minutes(10))))
                .register(Arc::new(TimezoneSyncJob::new(Arc::clone(&database), Arc::clone(&oauth_vault), Arc::clone(&clients.calendar_timezone), "google")))
                .register(Arc::new(ChatArchiverJob::new(Arc::clone(&database), Arc::clone(&chat_store))))
                .register(Arc::new(HealthCheckJob::new())),
        );

        Ok(Arc::new(Self {
            database,
            kms,
            token_issuer,
            oauth_vault,
            chat_store,
            sync_orchestrator,
            scheduler,
        }))
    }
}
