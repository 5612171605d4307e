// SPDX-License-Identifier: MIT OR Apache-2.0

//! Thin AEAD layer over a tenant's unwrapped data-encryption key.
//!
//! Every encrypt/decrypt call here binds an AAD context string of the form
//! `"{tenant_id}|{user_id}|{provider}|table"` so ciphertext produced for one
//! row can never be substituted into another without the open failing.

use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::errors::{AppError, AppResult};

const NONCE_LEN: usize = 12;

/// A tenant's unwrapped 256-bit data-encryption key, held only in memory for
/// the lifetime of a single request or job run. Dropping this zeroizes the
/// key material.
pub struct TenantDek(zeroize::Zeroizing<[u8; 32]>);

impl TenantDek {
    /// Wrap raw key bytes, taking ownership so they zeroize on drop.
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(zeroize::Zeroizing::new(bytes))
    }

    fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Encrypt `plaintext` for a tenant, binding it to `aad_context`.
///
/// The returned string is base64 of `nonce || ciphertext || tag`, so the
/// ciphertext is fully self-describing and needs nothing alongside it but
/// the DEK and the same AAD context used here.
pub fn encrypt_for_tenant(dek: &TenantDek, plaintext: &str, aad_context: &str) -> AppResult<String> {
    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|e| AppError::internal(format!("failed to generate nonce: {e}")))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let unbound_key = UnboundKey::new(&AES_256_GCM, dek.bytes())
        .map_err(|e| AppError::internal(format!("failed to build encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    let mut buf = plaintext.as_bytes().to_vec();
    let aad = Aad::from(aad_context.as_bytes());
    key.seal_in_place_append_tag(nonce, aad, &mut buf)
        .map_err(|e| AppError::internal(format!("encryption failed: {e}")))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + buf.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&buf);
    Ok(general_purpose::STANDARD.encode(combined))
}

/// Decrypt a ciphertext produced by [`encrypt_for_tenant`].
///
/// Fails with [`AppError::decryption_error`] on tampering, a wrong key, or a
/// mismatched AAD context. This failure is never masked as empty output.
pub fn decrypt_for_tenant(dek: &TenantDek, ciphertext: &str, aad_context: &str) -> AppResult<String> {
    let combined = general_purpose::STANDARD
        .decode(ciphertext)
        .map_err(|e| AppError::decryption_error(format!("invalid base64: {e}")))?;

    if combined.len() < NONCE_LEN {
        return Err(AppError::decryption_error("ciphertext too short"));
    }

    let (nonce_bytes, body) = combined.split_at(NONCE_LEN);
    let nonce = Nonce::assume_unique_for_key(
        nonce_bytes
            .try_into()
            .map_err(|_| AppError::decryption_error("invalid nonce length"))?,
    );

    let unbound_key = UnboundKey::new(&AES_256_GCM, dek.bytes())
        .map_err(|e| AppError::internal(format!("failed to build decryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    let mut buf = body.to_vec();
    let aad = Aad::from(aad_context.as_bytes());
    let opened = key
        .open_in_place(nonce, aad, &mut buf)
        .map_err(|_| AppError::decryption_error("authentication failed: wrong key, tampered ciphertext, or mismatched AAD"))?;

    String::from_utf8(opened.to_vec())
        .map_err(|e| AppError::decryption_error(format!("decrypted data is not valid utf-8: {e}")))
}

/// SHA-256 a string for use as a lookup/index value.
///
/// Non-reversible but correlatable: two calls with the same input produce
/// the same hash. Never use this for secrets — only for values that must be
/// looked up by equality (e.g. a hashed provider subject id).
#[must_use]
pub fn deterministic_hash(s: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hasher.finalize().into()
}

/// Hex-encoded [`deterministic_hash`], convenient for storing as a text column.
#[must_use]
pub fn deterministic_hash_hex(s: &str) -> String {
    hex::encode(deterministic_hash(s))
}
