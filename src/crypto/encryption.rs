// src/crypto/encryption.rs
//! Authenticated encryption of document payloads using AES-256-GCM.
//!
//! Every encryption call draws a fresh random initialization vector; an IV
//! is never reused under the same key, which would break both the
//! confidentiality and the integrity guarantees of GCM. The authentication
//! tag is kept detached from the ciphertext so the integrity binder can hash
//! each field separately.
//!
//! # Security Notes
//! - Key material lives in an explicit [`EncryptionKey`] context object that
//!   is zeroized on drop; it is never held in process-wide mutable state.
//! - Decryption verifies the authentication tag before releasing any
//!   plaintext; a tag mismatch yields an error and no partial output.

use crate::error::StoreError;
use crate::models::payload::{CipherAlgorithm, EncryptedPayload, IV_LEN, TAG_LEN};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

/// Required symmetric key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Symmetric key context for payload encryption.
///
/// Wiped from memory when dropped.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wraps an existing 32-byte key.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a key from a byte slice, rejecting anything but 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != KEY_LEN {
            return Err(StoreError::Encryption(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Builds a key from its hex encoding (64 hex characters).
    pub fn from_hex(encoded: &str) -> Result<Self, StoreError> {
        let bytes = hex::decode(encoded)
            .map_err(|e| StoreError::Encryption(format!("key is not valid hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Generates a fresh random key from the operating system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Encrypts plaintext under the given key.
///
/// # Returns
/// An [`EncryptedPayload`] carrying ciphertext, the freshly generated IV,
/// and the detached authentication tag.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<EncryptedPayload, StoreError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    // The aead API appends the tag to the ciphertext; split it back off so
    // the payload carries it as a separate field.
    let mut combined = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| StoreError::Encryption("AES-GCM encryption failed".to_string()))?;
    let tag_bytes = combined.split_off(combined.len() - TAG_LEN);
    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(&tag_bytes);

    Ok(EncryptedPayload {
        ciphertext: combined,
        iv,
        auth_tag,
        algorithm: CipherAlgorithm::Aes256Gcm,
    })
}

/// Decrypts a payload under the given key.
///
/// Fails with [`StoreError::Decryption`] when the authentication tag does
/// not verify, covering both corruption and tampering. Never returns
/// partially decrypted or unauthenticated plaintext.
pub fn decrypt(key: &EncryptionKey, payload: &EncryptedPayload) -> Result<Vec<u8>, StoreError> {
    match payload.algorithm {
        CipherAlgorithm::Aes256Gcm => {}
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut combined = Vec::with_capacity(payload.ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(&payload.ciphertext);
    combined.extend_from_slice(&payload.auth_tag);

    cipher
        .decrypt(Nonce::from_slice(&payload.iv), combined.as_slice())
        .map_err(|_| StoreError::Decryption("authentication tag mismatch".to_string()))
}
