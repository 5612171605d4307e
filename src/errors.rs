// SPDX-License-Identifier: MIT OR Apache-2.0

//! Application error type and stable error codes.
//!
//! Every fallible operation in this crate returns [`AppResult<T>`]. Error
//! codes are stable across releases so callers (and the audit log) can
//! match on them without string-parsing messages.

use std::fmt;

/// Stable, machine-matchable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Underlying storage operation failed.
    Database,
    /// Unexpected internal condition; not the caller's fault.
    Internal,
    /// Caller-supplied input failed validation.
    InvalidInput,
    /// Input was structurally well-formed but semantically malformed.
    InvalidFormat,
    /// Requested resource does not exist.
    ResourceNotFound,
    /// Missing a required field in a request payload.
    MissingRequiredField,
    /// Credentials were absent, malformed, or expired.
    AuthInvalid,
    /// Caller authenticated but lacks permission for the operation.
    PermissionDenied,
    /// A required configuration value was missing or invalid.
    Config,
    /// A downstream dependency (Redis, object store, KMS) failed.
    ExternalService,
    /// The tenant's KMS key could not be reached.
    KmsUnavailable,
    /// The KMS denied the request for this tenant's key.
    KmsAccessDenied,
    /// A wrapped DEK blob failed to parse or did not match its tenant.
    KmsInvalidCiphertext,
    /// AEAD decryption failed (wrong key, tampered ciphertext, or bad AAD).
    DecryptionError,
    /// A database operation ran without the RLS session variable set.
    RlsContextMissing,
    /// Two sync sources disagree and automatic resolution was not possible.
    SyncConflict,
    /// A scheduled job exceeded its execution timeout.
    JobTimeout,
    /// An OAuth access token has expired and no refresh token is available.
    TokenExpired,
    /// An OAuth token was explicitly revoked and must not be used.
    TokenRevoked,
}

impl ErrorCode {
    /// Stable string form, suitable for logs, audit details, and API bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Internal => "internal",
            Self::InvalidInput => "invalid_input",
            Self::InvalidFormat => "invalid_format",
            Self::ResourceNotFound => "resource_not_found",
            Self::MissingRequiredField => "missing_required_field",
            Self::AuthInvalid => "auth_invalid",
            Self::PermissionDenied => "permission_denied",
            Self::Config => "config",
            Self::ExternalService => "external_service",
            Self::KmsUnavailable => "kms_unavailable",
            Self::KmsAccessDenied => "kms_access_denied",
            Self::KmsInvalidCiphertext => "kms_invalid_ciphertext",
            Self::DecryptionError => "decryption_error",
            Self::RlsContextMissing => "rls_context_missing",
            Self::SyncConflict => "sync_conflict",
            Self::JobTimeout => "job_timeout",
            Self::TokenExpired => "token_expired",
            Self::TokenRevoked => "token_revoked",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AppError {
    /// Stable classification of this error.
    pub code: ErrorCode,
    /// Human-readable detail. Never contains raw PII or secret material.
    pub message: String,
}

/// Convenience alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Construct an error with an explicit code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A storage-layer failure (connection, query, migration).
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Database, message)
    }

    /// An unexpected internal condition.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Caller-supplied input failed validation.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Requested resource does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, message)
    }

    /// Credentials were absent, malformed, or expired.
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Caller authenticated but lacks permission for the operation.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// A required configuration value was missing or invalid.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, message)
    }

    /// A downstream dependency failed.
    pub fn external_service(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExternalService, message)
    }

    /// The tenant's KMS key could not be reached.
    pub fn kms_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KmsUnavailable, message)
    }

    /// The KMS denied the request for this tenant's key.
    pub fn kms_access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KmsAccessDenied, message)
    }

    /// A wrapped DEK blob failed to parse or did not match its tenant.
    pub fn kms_invalid_ciphertext(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::KmsInvalidCiphertext, message)
    }

    /// AEAD decryption failed.
    pub fn decryption_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DecryptionError, message)
    }

    /// A database operation ran without the RLS session variable set.
    pub fn rls_context_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RlsContextMissing, message)
    }

    /// Two sync sources disagree and automatic resolution was not possible.
    pub fn sync_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SyncConflict, message)
    }

    /// A scheduled job exceeded its execution timeout.
    pub fn job_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::JobTimeout, message)
    }

    /// An OAuth access token expired and no refresh token is available.
    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TokenExpired, message)
    }

    /// An OAuth token was explicitly revoked.
    pub fn token_revoked(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TokenRevoked, message)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        Self::external_service(format!("redis: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::auth_invalid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_survives_display_formatting() {
        let err = AppError::not_found("tenant abc123");
        assert_eq!(err.code, ErrorCode::ResourceNotFound);
        assert_eq!(err.to_string(), "resource_not_found: tenant abc123");
    }
}
