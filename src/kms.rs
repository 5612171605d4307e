// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key-management boundary: generating and unwrapping tenant DEKs.
//!
//! The key-encryption-key (KEK) never leaves this boundary — callers only
//! ever see a plaintext DEK transiently, or an opaque wrapped blob meant for
//! storage. [`KmsGateway`] is the seam a managed KMS client (AWS KMS, GCP
//! KMS) would implement in production; [`LocalKmsGateway`] stands in for
//! one, wrapping DEKs with a process-held master key via the same AEAD
//! primitive the rest of the crate uses.

use async_trait::async_trait;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::crypto::TenantDek;
use crate::errors::{AppError, AppResult};

const NONCE_LEN: usize = 12;

/// Two operations only, matching what a real KMS client exposes: generate a
/// fresh data key, or unwrap one previously generated. No key material is
/// ever exported except as these two opaque shapes.
#[async_trait]
pub trait KmsGateway: Send + Sync {
    /// Generate a new tenant DEK. Returns the plaintext key (for immediate
    /// use, never persisted) and the wrapped blob (the only form stored).
    ///
    /// # Errors
    /// Returns [`AppError::kms_unavailable`] if the gateway cannot be
    /// reached, or [`AppError::kms_access_denied`] if the configured key id
    /// is rejected.
    async fn generate_tenant_dek(&self) -> AppResult<(TenantDek, Vec<u8>)>;

    /// Unwrap a previously generated DEK. The result must be discarded
    /// promptly by the caller and must never be logged.
    ///
    /// # Errors
    /// Returns [`AppError::kms_unavailable`], [`AppError::kms_access_denied`],
    /// or [`AppError::kms_invalid_ciphertext`] if the blob is malformed or
    /// was wrapped under a different key.
    async fn unwrap_tenant_dek(&self, wrapped: &[u8]) -> AppResult<TenantDek>;
}

/// A local stand-in for a managed KMS: wraps tenant DEKs in an AES-256-GCM
/// envelope under a single process-held master key. The master key plays
/// the role a cloud KMS's KEK plays — it never leaves this struct.
pub struct LocalKmsGateway {
    master_key: [u8; 32],
}

impl LocalKmsGateway {
    /// Build a gateway from raw master-key bytes (e.g. decoded from the
    /// `KMS_KEY_ID`-addressed secret in a real deployment).
    #[must_use]
    pub const fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn seal(&self, plaintext: &[u8; 32]) -> AppResult<Vec<u8>> {
        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|e| AppError::kms_unavailable(format!("rng failure: {e}")))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.master_key)
            .map_err(|e| AppError::kms_unavailable(format!("failed to load master key: {e}")))?;
        let key = LessSafeKey::new(unbound_key);

        let mut buf = plaintext.to_vec();
        key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buf)
            .map_err(|e| AppError::kms_unavailable(format!("wrap failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + buf.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&buf);
        Ok(combined)
    }

    fn open(&self, wrapped: &[u8]) -> AppResult<[u8; 32]> {
        if wrapped.len() < NONCE_LEN {
            return Err(AppError::kms_invalid_ciphertext("wrapped blob too short"));
        }
        let (nonce_bytes, body) = wrapped.split_at(NONCE_LEN);
        let nonce = Nonce::assume_unique_for_key(
            nonce_bytes
                .try_into()
                .map_err(|_| AppError::kms_invalid_ciphertext("invalid nonce length"))?,
        );

        let unbound_key = UnboundKey::new(&AES_256_GCM, &self.master_key)
            .map_err(|e| AppError::kms_unavailable(format!("failed to load master key: {e}")))?;
        let key = LessSafeKey::new(unbound_key);

        let mut buf = body.to_vec();
        let opened = key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| AppError::kms_invalid_ciphertext("blob was not wrapped under this key"))?;

        opened
            .try_into()
            .map_err(|_| AppError::kms_invalid_ciphertext("unwrapped key is not 32 bytes"))
    }
}

#[async_trait]
impl KmsGateway for LocalKmsGateway {
    async fn generate_tenant_dek(&self) -> AppResult<(TenantDek, Vec<u8>)> {
        let rng = SystemRandom::new();
        let mut plaintext = [0u8; 32];
        rng.fill(&mut plaintext)
            .map_err(|e| AppError::kms_unavailable(format!("rng failure: {e}")))?;

        let wrapped = self.seal(&plaintext)?;
        tracing::info!("generated new tenant dek");
        Ok((TenantDek::new(plaintext), wrapped))
    }

    async fn unwrap_tenant_dek(&self, wrapped: &[u8]) -> AppResult<TenantDek> {
        let plaintext = self.open(wrapped)?;
        Ok(TenantDek::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> LocalKmsGateway {
        LocalKmsGateway::new([3u8; 32])
    }

    #[tokio::test]
    async fn wraps_and_unwraps_a_dek() {
        let kms = gateway();
        let (dek, wrapped) = kms.generate_tenant_dek().await.unwrap();
        let unwrapped = kms.unwrap_tenant_dek(&wrapped).await.unwrap();

        let plaintext = crate::crypto::encrypt_for_tenant(&dek, "secret", "ctx").unwrap();
        let roundtrip = crate::crypto::decrypt_for_tenant(&unwrapped, &plaintext, "ctx").unwrap();
        assert_eq!(roundtrip, "secret");
    }

    #[tokio::test]
    async fn rejects_blob_wrapped_under_a_different_key() {
        let kms_a = LocalKmsGateway::new([1u8; 32]);
        let kms_b = LocalKmsGateway::new([2u8; 32]);
        let (_, wrapped) = kms_a.generate_tenant_dek().await.unwrap();
        let result = kms_b.unwrap_tenant_dek(&wrapped).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn generated_deks_are_unique() {
        let kms = gateway();
        let (_, wrapped_a) = kms.generate_tenant_dek().await.unwrap();
        let (_, wrapped_b) = kms.generate_tenant_dek().await.unwrap();
        assert_ne!(wrapped_a, wrapped_b);
    }
}
