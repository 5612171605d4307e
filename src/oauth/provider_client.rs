// SPDX-License-Identifier: MIT OR Apache-2.0

//! The outbound provider token-endpoint contract (spec §6). Wire-level
//! details of any particular provider's API are an external collaborator
//! and out of scope here — this is the seam the vault calls through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;

/// A token bundle as returned by (or stored for) a provider's token
/// endpoint. Field names match the OAuth2 token response shape named in
/// spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Short-lived access token.
    pub access_token: String,
    /// Long-lived refresh token, if the grant included one.
    pub refresh_token: Option<String>,
    /// Usually `"Bearer"`.
    pub token_type: String,
    /// Seconds until `access_token` expires, relative to issuance.
    pub expires_in: i64,
    /// Space-delimited granted scopes.
    pub scope: String,
}

/// Whether a failed refresh attempt should be retried later or treated as a
/// permanent revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Transient failure (network, 5xx); caller should try again next cycle.
    Retryable,
    /// Provider returned `invalid_grant` or similar; the refresh token is
    /// dead and the record must be invalidated.
    Irrecoverable,
}

/// A provider's OAuth2 token endpoint.
#[async_trait]
pub trait OAuthProviderClient: Send + Sync {
    /// Exchange a refresh token for a fresh bundle.
    ///
    /// # Errors
    /// On failure, implementations should prefer returning
    /// [`AppError::external_service`] for transient errors; the vault
    /// inspects `refresh_outcome` below via a caller-supplied classifier
    /// rather than parsing error messages.
    async fn refresh(&self, provider: &str, refresh_token: &str) -> AppResult<TokenBundle>;
}

/// Classify a provider's non-200 response the way spec §6 directs: any
/// 400/401 carrying `invalid_grant` is irrecoverable, everything else is
/// retried on the next scheduler cycle.
#[must_use]
pub fn classify_refresh_failure(status: u16, error_body: &str) -> RefreshOutcome {
    if (status == 400 || status == 401) && error_body.contains("invalid_grant") {
        RefreshOutcome::Irrecoverable
    } else {
        RefreshOutcome::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_grant_is_irrecoverable() {
        assert_eq!(
            classify_refresh_failure(400, r#"{"error":"invalid_grant"}"#),
            RefreshOutcome::Irrecoverable
        );
    }

    #[test]
    fn server_error_is_retryable() {
        assert_eq!(classify_refresh_failure(503, "service unavailable"), RefreshOutcome::Retryable);
    }

    #[test]
    fn unrelated_400_is_retryable() {
        assert_eq!(
            classify_refresh_failure(400, r#"{"error":"invalid_request"}"#),
            RefreshOutcome::Retryable
        );
    }
}
