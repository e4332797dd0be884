// src/models/payload.rs
//! Encrypted payload and ledger commitment data model.
//!
//! These are the two halves of the hybrid store: the [`EncryptedPayload`]
//! lives in the confidentiality-preserving document store, the
//! [`Commitment`] lives on the append-only integrity ledger. The integrity
//! binder ties them together by hashing the payload and comparing against
//! the committed hash.

use serde::{Deserialize, Serialize};
use std::fmt;

/// AES-GCM initialization vector length in bytes.
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Authenticated cipher used to encrypt document payloads.
///
/// A single variant today; the algorithm identifier is carried on every
/// payload (and folded into the commitment hash) so a future algorithm
/// migration cannot be confused with tampering.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// Stable one-byte identifier folded into the commitment hash.
    pub fn id(self) -> u8 {
        match self {
            CipherAlgorithm::Aes256Gcm => 1,
        }
    }
}

/// An encrypted document body as held by the document store.
///
/// Exactly one current payload exists per document identifier; superseded
/// payloads are not retained by the store. History, if any, lives only in
/// the ledger's append-only log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// AEAD ciphertext of the canonical document bytes.
    pub ciphertext: Vec<u8>,

    /// Initialization vector, freshly generated for every encryption.
    pub iv: [u8; IV_LEN],

    /// Detached authentication tag covering the ciphertext.
    pub auth_tag: [u8; TAG_LEN],

    /// Cipher the payload was produced with.
    pub algorithm: CipherAlgorithm,
}

/// One-way hash of a document identifier, the key shared by ledger and
/// store. The plaintext identifier never reaches either collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocIdHash(pub [u8; 32]);

impl fmt::Display for DocIdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Commitment hash over an encrypted payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadHash(pub [u8; 32]);

impl fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A ledger-held commitment binding a document identifier to a payload
/// hash, signature, and version nonce.
///
/// Owned by the ledger. The orchestrator only reads and proposes
/// commitments, never mutates them directly.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub doc_id_hash: DocIdHash,
    pub payload_hash: PayloadHash,

    /// Strictly increasing per-identifier update counter, starting at 0.
    pub nonce: u64,

    /// Caller-supplied signature over the commitment contents.
    pub signature: Vec<u8>,

    /// Ledger-assigned ordering marker (block or sequence number).
    pub sequence: u64,
}

/// Idempotency key for ledger update submissions.
///
/// A retried submission after a network-level ambiguous failure carries the
/// same key and therefore cannot be double-applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub doc_id_hash: DocIdHash,
    pub proposed_nonce: u64,
}
