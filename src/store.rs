// src/store.rs
//! Document store adapter interface.
//!
//! The document store is an external collaborator holding the encrypted
//! payload bodies, keyed by the one-way hash of the document identifier
//! with a uniqueness constraint on that key. `put` is idempotent:
//! re-submitting the same payload for the same identifier is a no-op
//! success, which is what makes the orchestrator's retry policy safe
//! without additional locking.
//!
//! The in-memory implementation doubles as the test collaborator and can
//! inject put failures and byte corruption for partial-failure scenarios.

use crate::error::StoreError;
use crate::models::payload::{DocIdHash, EncryptedPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Interface to the encrypted document store.
#[async_trait]
pub trait DocumentStoreAdapter: Send + Sync {
    /// Persists the payload for a document, replacing any previous payload
    /// under the same key. Idempotent for identical payloads.
    async fn put(&self, doc_id_hash: DocIdHash, payload: EncryptedPayload)
        -> Result<(), StoreError>;

    /// Retrieves the current payload for a document.
    async fn get(&self, doc_id_hash: DocIdHash) -> Result<EncryptedPayload, StoreError>;
}

/// In-memory document store with fault injection hooks.
pub struct InMemoryDocumentStore {
    inner: Mutex<StoreState>,
}

struct StoreState {
    payloads: HashMap<DocIdHash, EncryptedPayload>,
    /// Number of upcoming `put` calls that fail with a transport error.
    failing_puts: u32,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        InMemoryDocumentStore {
            inner: Mutex::new(StoreState {
                payloads: HashMap::new(),
                failing_puts: 0,
            }),
        }
    }

    /// Makes the next `count` calls to `put` fail with [`StoreError::Store`].
    pub fn fail_next_puts(&self, count: u32) {
        self.inner.lock().expect("store state poisoned").failing_puts = count;
    }

    /// Flips one bit of the stored ciphertext for a document.
    ///
    /// Returns `false` when no payload is stored under the key.
    pub fn corrupt_ciphertext(&self, doc_id_hash: DocIdHash) -> bool {
        let mut state = self.inner.lock().expect("store state poisoned");
        match state.payloads.get_mut(&doc_id_hash) {
            Some(payload) if !payload.ciphertext.is_empty() => {
                payload.ciphertext[0] ^= 0x01;
                true
            }
            _ => false,
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStoreAdapter for InMemoryDocumentStore {
    async fn put(
        &self,
        doc_id_hash: DocIdHash,
        payload: EncryptedPayload,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock().expect("store state poisoned");
        if state.failing_puts > 0 {
            state.failing_puts -= 1;
            return Err(StoreError::Store("injected put failure".to_string()));
        }
        if state.payloads.get(&doc_id_hash) == Some(&payload) {
            // Idempotent re-submission.
            return Ok(());
        }
        state.payloads.insert(doc_id_hash, payload);
        Ok(())
    }

    async fn get(&self, doc_id_hash: DocIdHash) -> Result<EncryptedPayload, StoreError> {
        let state = self.inner.lock().expect("store state poisoned");
        state
            .payloads
            .get(&doc_id_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}
