// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process entrypoint: load configuration, wire [`Services`], start the
//! background scheduler, and run until `SIGINT`/`SIGTERM` asks for a
//! graceful drain. The HTTP layer that would sit in front of this is out
//! of scope — this binary only proves the library boots and keeps its
//! jobs alive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sentinel_server::chat::{InMemoryObjectStore, ObjectStore};
use sentinel_server::config::ServerConfig;
use sentinel_server::context::{ExternalClients, Services};
use sentinel_server::errors::{AppError, AppResult};
use sentinel_server::oauth::{OAuthProviderClient, TokenBundle};
use sentinel_server::scheduler::{CalendarTimezoneClient, ContactsPage, ContactsProviderClient};

/// Stands in for a real provider token-endpoint client until an HTTP layer
/// supplies one. Returns [`AppError::external_service`] rather than
/// panicking so a misconfigured deployment fails the affected job run
/// instead of the whole process.
struct UnconfiguredProviderClient;

#[async_trait]
impl OAuthProviderClient for UnconfiguredProviderClient {
    async fn refresh(&self, provider: &str, _refresh_token: &str) -> AppResult<TokenBundle> {
        Err(AppError::external_service(format!("no {provider} provider client configured")))
    }
}

#[async_trait]
impl ContactsProviderClient for UnconfiguredProviderClient {
    async fn list_contacts(&self, _access_token: &str, _delta_token: Option<&str>) -> AppResult<ContactsPage> {
        Err(AppError::external_service("no contacts provider client configured"))
    }
}

#[async_trait]
impl CalendarTimezoneClient for UnconfiguredProviderClient {
    async fn fetch_timezone(&self, _access_token: &str) -> AppResult<String> {
        Err(AppError::external_service("no calendar provider client configured"))
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn kms_master_key() -> AppResult<[u8; 32]> {
    let raw = std::env::var("KMS_MASTER_KEY").map_err(|_| AppError::config("missing required env var KMS_MASTER_KEY"))?;
    let bytes = hex::decode(&raw).map_err(|e| AppError::config(format!("KMS_MASTER_KEY is not valid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| AppError::config("KMS_MASTER_KEY must decode to exactly 32 bytes"))
}

#[tokio::main]
async fn main() -> AppResult<()> {
    init_tracing();

    let config = ServerConfig::from_env()?;
    let kms_master_key = kms_master_key()?;

    let unconfigured: Arc<UnconfiguredProviderClient> = Arc::new(UnconfiguredProviderClient);
    let cold_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let clients = ExternalClients {
        google_oauth: unconfigured.clone(),
        contacts: unconfigured.clone(),
        calendar_timezone: unconfigured,
        cold_store,
    };

    let services = Services::bootstrap(&config, kms_master_key, clients).await?;
    services.scheduler.clone().start();
    tracing::info!(port = config.port, "sentinel-server started");

    tokio::signal::ctrl_c().await.map_err(|e| AppError::internal(format!("failed to listen for shutdown signal: {e}")))?;
    tracing::info!("shutdown signal received, draining background jobs");
    services.scheduler.shutdown(Duration::from_secs(30)).await;

    Ok(())
}
