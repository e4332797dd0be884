// src/crypto/integrity.rs
//! Integrity binder: the hash linking a ledger commitment to stored
//! ciphertext.
//!
//! The commitment hash is computed over a canonical, length-prefixed
//! encoding of every payload field, so a single-byte change to ciphertext,
//! IV, authentication tag, or algorithm identifier changes the hash. The
//! orchestrator verifies this hash before any decryption is attempted.

use crate::models::payload::{DocIdHash, EncryptedPayload, PayloadHash};
use sha2::{Digest, Sha256};

/// Computes the commitment hash for an encrypted payload.
///
/// Covers `(ciphertext, iv, auth_tag, algorithm)` with the ciphertext
/// length prefixed, so field boundaries cannot alias across inputs.
pub fn commit(payload: &EncryptedPayload) -> PayloadHash {
    let mut hasher = Sha256::new();
    hasher.update((payload.ciphertext.len() as u64).to_be_bytes());
    hasher.update(&payload.ciphertext);
    hasher.update(payload.iv);
    hasher.update(payload.auth_tag);
    hasher.update([payload.algorithm.id()]);
    PayloadHash(hasher.finalize().into())
}

/// Verifies a payload against a ledger-supplied commitment hash.
///
/// Must be called before decryption; on `false` the caller must not
/// decrypt.
pub fn verify(payload: &EncryptedPayload, expected: &PayloadHash) -> bool {
    commit(payload) == *expected
}

/// One-way hash of a document identifier.
///
/// This is the key under which both the ledger and the document store file
/// the document; the plaintext identifier never leaves the orchestrator.
pub fn hash_doc_id(did: &str) -> DocIdHash {
    let mut hasher = Sha256::new();
    hasher.update(did.as_bytes());
    DocIdHash(hasher.finalize().into())
}
