// src/error.rs
//! Error taxonomy for the anchored document store.
//!
//! Every fallible operation in the crate surfaces one of these variants;
//! nothing is downgraded to a stringly-typed catch-all on the way out. The
//! orchestrator performs automatic retry only for the idempotent store `put`
//! step; every other error crosses the boundary to the caller typed and
//! unmodified.

use crate::models::payload::DocIdHash;
use thiserror::Error;

/// Unified error type for document-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document violates the DID Document schema (missing identifier,
    /// malformed key or service entry).
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Encryption failed (wrong key length, cipher failure).
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed. Covers both corruption and tampering: the
    /// authentication tag did not verify, so no plaintext was produced.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The payload held by the document store does not hash to the commitment
    /// recorded on the ledger. Treated as a security event and logged
    /// distinctly from ordinary not-found conditions.
    #[error("integrity violation for document {doc_id_hash}")]
    IntegrityViolation { doc_id_hash: DocIdHash },

    /// Nonce race: another writer advanced the document version first.
    /// Caller-retryable: re-fetch the document and retry the update.
    #[error("version conflict: proposed nonce {proposed_nonce}, current nonce {current_nonce}")]
    Conflict {
        current_nonce: u64,
        proposed_nonce: u64,
    },

    /// The ledger confirms the document exists but the store does not yet
    /// hold its payload. Transient store/ledger divergence; retry upstream.
    #[error("document {doc_id_hash} is committed but its payload is unavailable")]
    DataUnavailable { doc_id_hash: DocIdHash },

    /// The store holds a payload with no matching ledger commitment. Ledger
    /// writes always precede store writes, so this should never occur; fail
    /// closed, never guess.
    #[error("inconsistent state for document {doc_id_hash}: store is ahead of ledger")]
    InconsistentState { doc_id_hash: DocIdHash },

    /// Transport or backend failure reported by the ledger collaborator.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Transport or backend failure reported by the document store
    /// collaborator.
    #[error("store error: {0}")]
    Store(String),

    /// The ledger has no record of the document at all.
    #[error("document not found")]
    NotFound,

    /// The operation exceeded its configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// The per-document update counter cannot be advanced any further.
    #[error("nonce overflow")]
    NonceOverflow,
}

impl StoreError {
    /// Whether the caller may retry the whole operation and reasonably
    /// expect a different outcome.
    ///
    /// `Conflict` requires a re-fetch first; `IntegrityViolation` and
    /// `InconsistentState` are terminal and must be investigated, never
    /// retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::DataUnavailable { .. }
                | StoreError::Ledger(_)
                | StoreError::Store(_)
                | StoreError::Timeout
        )
    }
}
