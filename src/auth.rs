// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tenant identity resolution from a request's bearer credential (C3).
//!
//! A valid credential only establishes *who the caller claims to be*; it is
//! resolving that email against both the allow-list and the Identity table
//! that establishes which tenant the rest of the stack may touch.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::errors::{AppError, AppResult};
use sentinel_core::TenantId;

/// JWT claims for an internally issued bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Subject: the tenant's stable email address.
    sub: String,
    /// Display name, if known at issuance time.
    name: Option<String>,
    /// Expiry, seconds since epoch.
    exp: i64,
    /// Issued-at, seconds since epoch.
    iat: i64,
}

/// Tenant identity attached to a request once C3 has run.
///
/// Every handler below the auth boundary receives one of these; there is no
/// code path that operates on tenant data without it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Resolved tenant id.
    pub tenant_id: TenantId,
    /// The email the credential was issued for.
    pub email: String,
    /// Display name, if known.
    pub display_name: Option<String>,
}

/// Issues and validates the internally signed bearer credential.
pub struct TokenIssuer {
    secret: String,
    expiry_seconds: i64,
}

impl TokenIssuer {
    /// Build an issuer from the auth section of [`crate::config::ServerConfig`].
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            expiry_seconds: config.jwt_expiry_seconds,
        }
    }

    /// Issue a bearer credential for an email that has already passed the
    /// allow-list check and identity resolution.
    pub fn issue(&self, email: &str, display_name: Option<&str>) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: email.to_lowercase(),
            name: display_name.map(str::to_owned),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.expiry_seconds)).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(AppError::from)
    }

    /// Validate signature and expiry, returning the claimed email and name.
    ///
    /// Does not touch the database — see [`resolve`] for the full C3 flow
    /// including the allow-list and Identity table lookup.
    fn validate(&self, token: &str) -> AppResult<(String, Option<String>)> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(AppError::from)?;
        Ok((data.claims.sub, data.claims.name))
    }
}

/// Extract a bearer credential from the `Authorization` header, falling back
/// to a `session` cookie if absent.
#[must_use]
pub fn extract_credential(authorization_header: Option<&str>, cookie_header: Option<&str>) -> Option<String> {
    if let Some(header) = authorization_header {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    let cookies = cookie_header?;
    cookies.split(';').find_map(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        (key == "session").then(|| value.to_string())
    })
}

/// A resolved tenant identity plus the email it was looked up under, used by
/// callers that need to distinguish "no credential" from "credential valid
/// but email not provisioned yet".
pub struct IdentityLookup<'a> {
    /// Resolve an email (already allow-listed) to an existing tenant id.
    pub resolve: Box<dyn Fn(&str) -> AppResult<Option<TenantId>> + Send + Sync + 'a>,
}

/// Run the full C3 flow: validate the credential, check the allow-list,
/// resolve the tenant.
///
/// Missing or invalid credentials surface as [`AppError::auth_invalid`]
/// (401). A structurally valid credential for an email that is not
/// whitelisted surfaces as [`AppError::forbidden`] (403).
pub fn resolve_auth_context(
    issuer: &TokenIssuer,
    auth_config: &AuthConfig,
    credential: Option<&str>,
    lookup: &IdentityLookup<'_>,
) -> AppResult<AuthContext> {
    let token = credential.ok_or_else(|| AppError::auth_invalid("missing bearer credential"))?;
    let (email, display_name) = issuer.validate(token)?;

    if !auth_config.is_allowed(&email) {
        return Err(AppError::forbidden(format!("{email} is not on the allow list")));
    }

    let tenant_id = (lookup.resolve)(&email)?
        .ok_or_else(|| AppError::auth_invalid(format!("no tenant provisioned for {email}")))?;

    Ok(AuthContext {
        tenant_id,
        email,
        display_name,
    })
}

/// Deterministic hash of a provider subject, used as the Identity table's
/// lookup key so the raw subject is never stored in clear (spec §3/§4.2).
#[must_use]
pub fn hash_provider_subject(provider: &str, subject: &str) -> String {
    crate::crypto::deterministic_hash_hex(&format!("{provider}:{subject}"))
}

/// Generate a fresh internal user id for a tenant's `is_core_user` row.
#[must_use]
pub fn new_person_id() -> Uuid {
    Uuid::new_v4()
}
