// src/orchestrator.rs
//! DID orchestrator: the state machine coordinating codec, encryption,
//! integrity binder, version controller, ledger, and document store.
//!
//! A document moves through `Unregistered → Active ⇄ Updating → Active`.
//! The two underlying writes (ledger commitment, store payload) are not
//! atomic with each other; the orchestrator makes the combination behave
//! atomically from the caller's perspective:
//!
//! - Ledger writes always precede store writes, so existence is governed by
//!   the ledger.
//! - A store `put` that fails after ledger confirmation leaves the document
//!   committed-but-unavailable; the put is retried with bounded backoff
//!   (inline, then in a background repair task) and resolves report
//!   `DataUnavailable` until it lands: never `NotFound`, never a
//!   fabricated document.
//! - A store payload with no ledger commitment should never exist; it is
//!   reported as `InconsistentState` and nothing is repaired or guessed.
//!
//! Operations on different identifiers run fully in parallel; operations on
//! the same identifier, resolve included, are linearized through a
//! per-identifier async lock, with the ledger's nonce check as the final
//! serialization point. A resolve that ran lock-free could observe a fresh
//! commitment next to a payload the in-flight update has not written yet
//! and misread the window as tampering.
//!
//! The optional operation deadline covers everything up to ledger
//! confirmation. Once the commitment is on the ledger the payload write and
//! repair handoff run to completion regardless of the deadline; cancelling
//! them would strand the document with no repair task running.

use crate::codec;
use crate::crypto::encryption::{self, EncryptionKey};
use crate::crypto::integrity;
use crate::error::StoreError;
use crate::ledger::{CommitmentEvents, LedgerAdapter};
use crate::models::did::{DIDDocument, DocumentPatch};
use crate::models::payload::{Commitment, DocIdHash, EncryptedPayload, IdempotencyKey};
use crate::retry::RetryPolicy;
use crate::store::DocumentStoreAdapter;
use crate::version;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A successfully resolved document together with its ledger version.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDocument {
    pub document: DIDDocument,
    /// Current update counter from the ledger commitment.
    pub nonce: u64,
    /// Ledger-assigned ordering marker of the commitment.
    pub sequence: u64,
}

type LockMap = HashMap<DocIdHash, Arc<tokio::sync::Mutex<()>>>;

/// Orchestrates create/resolve/update across the integrity ledger and the
/// encrypted document store.
///
/// Exposes exactly three operations to its caller; an HTTP or RPC layer
/// built on top is out of scope here.
pub struct DidOrchestrator<L, S> {
    ledger: Arc<L>,
    store: Arc<S>,
    key: EncryptionKey,
    retry: RetryPolicy,
    op_timeout: Option<Duration>,
    /// Per-identifier exclusive sections. No nonce is cached here by
    /// design: the current nonce is always read from the ledger, so an
    /// abandoned operation cannot leave stale local state behind. Entries
    /// are evicted once no operation or repair task holds them.
    locks: Arc<Mutex<LockMap>>,
}

impl<L, S> DidOrchestrator<L, S>
where
    L: LedgerAdapter + 'static,
    S: DocumentStoreAdapter + 'static,
{
    /// Creates an orchestrator over the given collaborators.
    ///
    /// # Arguments
    /// * `ledger` - Integrity ledger adapter
    /// * `store` - Encrypted document store adapter
    /// * `key` - Symmetric key context used for all payload encryption
    pub fn new(ledger: Arc<L>, store: Arc<S>, key: EncryptionKey) -> Self {
        DidOrchestrator {
            ledger,
            store,
            key,
            retry: RetryPolicy::default(),
            op_timeout: None,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replaces the store-put retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets a deadline on the pre-confirmation phase of each operation.
    ///
    /// The deadline never interrupts the payload write that follows a
    /// confirmed ledger commitment.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = Some(timeout);
        self
    }

    /// Registers a new DID Document.
    ///
    /// Precondition: the identifier is unregistered on the ledger. The
    /// document is encrypted, its commitment recorded at nonce 0, and the
    /// payload persisted to the store.
    ///
    /// # Returns
    /// The confirmed ledger commitment, or [`StoreError::DataUnavailable`]
    /// when the ledger accepted the commitment but the store write has not
    /// yet succeeded (a background repair keeps retrying it).
    pub async fn create_did(
        &self,
        document: DIDDocument,
        signature: Vec<u8>,
    ) -> Result<Commitment, StoreError> {
        codec::validate(&document)?;
        let doc_id_hash = integrity::hash_doc_id(&document.id);
        let lock = lock_entry(&self.locks, doc_id_hash);
        let result = {
            let _guard = lock.lock().await;
            match self
                .bounded(self.commit_create(doc_id_hash, document, signature))
                .await
            {
                Ok((commitment, payload)) => {
                    match self.persist_payload(doc_id_hash, payload).await {
                        Ok(()) => {
                            info!("document {} created", doc_id_hash);
                            Ok(commitment)
                        }
                        Err(err) => Err(err),
                    }
                }
                Err(err) => Err(err),
            }
        };
        drop(lock);
        evict_idle(&self.locks, doc_id_hash);
        result
    }

    async fn commit_create(
        &self,
        doc_id_hash: DocIdHash,
        document: DIDDocument,
        signature: Vec<u8>,
    ) -> Result<(Commitment, EncryptedPayload), StoreError> {
        // Existence is governed by the ledger.
        match self.ledger.get_commitment(doc_id_hash).await {
            Err(StoreError::NotFound) => {}
            Ok(existing) => {
                return Err(StoreError::Conflict {
                    current_nonce: existing.nonce,
                    proposed_nonce: 0,
                });
            }
            Err(err) => return Err(err),
        }

        let bytes = codec::serialize(&document)?;
        let payload = encryption::encrypt(&self.key, &bytes)?;
        let payload_hash = integrity::commit(&payload);

        let commitment = self
            .ledger
            .create_commitment(doc_id_hash, payload_hash, signature)
            .await?;
        debug!(
            "created commitment for {} at sequence {}",
            doc_id_hash, commitment.sequence
        );
        Ok((commitment, payload))
    }

    /// Resolves a DID to its current document.
    ///
    /// Waits for any in-flight write on the same identifier to settle, then
    /// fetches the ledger commitment and the store payload, verifies the
    /// commitment hash before any decryption, and only then decrypts and
    /// parses the payload.
    pub async fn resolve_did(&self, did: &str) -> Result<ResolvedDocument, StoreError> {
        let doc_id_hash = integrity::hash_doc_id(did);
        let lock = lock_entry(&self.locks, doc_id_hash);
        let result = self
            .bounded(async {
                let _guard = lock.lock().await;
                self.resolve_by_hash(doc_id_hash).await
            })
            .await;
        drop(lock);
        evict_idle(&self.locks, doc_id_hash);
        result
    }

    async fn resolve_by_hash(&self, doc_id_hash: DocIdHash) -> Result<ResolvedDocument, StoreError> {
        let (commitment_result, payload_result) = futures::join!(
            self.ledger.get_commitment(doc_id_hash),
            self.store.get(doc_id_hash)
        );

        let (commitment, payload) = match (commitment_result, payload_result) {
            (Ok(commitment), Ok(payload)) => (commitment, payload),
            // Committed but the payload has not landed yet: transient,
            // retry upstream. Never NotFound, never a fabricated document.
            (Ok(_), Err(StoreError::NotFound)) => {
                return Err(StoreError::DataUnavailable { doc_id_hash });
            }
            // Store ahead of ledger should be impossible; fail closed.
            (Err(StoreError::NotFound), Ok(_)) => {
                error!("store holds a payload for {} with no commitment", doc_id_hash);
                return Err(StoreError::InconsistentState { doc_id_hash });
            }
            (Err(StoreError::NotFound), Err(StoreError::NotFound)) => {
                return Err(StoreError::NotFound);
            }
            (Err(err), _) => return Err(err),
            (_, Err(err)) => return Err(err),
        };

        self.verify_and_decrypt(doc_id_hash, &commitment, &payload)
            .map(|document| ResolvedDocument {
                document,
                nonce: commitment.nonce,
                sequence: commitment.sequence,
            })
    }

    fn verify_and_decrypt(
        &self,
        doc_id_hash: DocIdHash,
        commitment: &Commitment,
        payload: &EncryptedPayload,
    ) -> Result<DIDDocument, StoreError> {
        // Integrity check short-circuits before decryption: no decrypted
        // bytes are ever produced when the hash does not match.
        if !integrity::verify(payload, &commitment.payload_hash) {
            error!(
                "integrity violation: payload for {} does not match committed hash {}",
                doc_id_hash, commitment.payload_hash
            );
            return Err(StoreError::IntegrityViolation { doc_id_hash });
        }

        let plaintext = encryption::decrypt(&self.key, payload)?;
        codec::deserialize(&plaintext)
    }

    /// Updates an existing DID Document by applying a partial patch.
    ///
    /// The current document must resolve successfully first; the patch is
    /// merged, the result re-encrypted and committed at `current nonce + 1`.
    /// A ledger nonce rejection surfaces [`StoreError::Conflict`] carrying
    /// the reconciled current nonce; the caller re-fetches and retries;
    /// there is no server-side retry loop that could clobber a concurrent
    /// writer's intent.
    pub async fn update_did(
        &self,
        did: &str,
        patch: DocumentPatch,
        signature: Vec<u8>,
    ) -> Result<Commitment, StoreError> {
        let doc_id_hash = integrity::hash_doc_id(did);
        let lock = lock_entry(&self.locks, doc_id_hash);
        let result = {
            let _guard = lock.lock().await;
            match self
                .bounded(self.commit_update(doc_id_hash, patch, signature))
                .await
            {
                Ok((commitment, payload)) => {
                    match self.persist_payload(doc_id_hash, payload).await {
                        Ok(()) => {
                            info!(
                                "document {} updated to nonce {}",
                                doc_id_hash, commitment.nonce
                            );
                            Ok(commitment)
                        }
                        Err(err) => Err(err),
                    }
                }
                Err(err) => Err(err),
            }
        };
        drop(lock);
        evict_idle(&self.locks, doc_id_hash);
        result
    }

    async fn commit_update(
        &self,
        doc_id_hash: DocIdHash,
        patch: DocumentPatch,
        signature: Vec<u8>,
    ) -> Result<(Commitment, EncryptedPayload), StoreError> {
        // No update on an unavailable document.
        let resolved = self.resolve_by_hash(doc_id_hash).await?;

        let mut document = resolved.document;
        document.apply_patch(patch, Utc::now());
        codec::validate(&document)?;

        let bytes = codec::serialize(&document)?;
        let payload = encryption::encrypt(&self.key, &bytes)?;
        let payload_hash = integrity::commit(&payload);

        let proposed_nonce = version::propose_nonce(resolved.nonce)?;
        let idempotency_key = IdempotencyKey {
            doc_id_hash,
            proposed_nonce,
        };

        let commitment = match self
            .ledger
            .update_commitment(doc_id_hash, payload_hash, signature, proposed_nonce, idempotency_key)
            .await
        {
            Ok(commitment) => commitment,
            Err(StoreError::Conflict { .. }) => {
                // Lost the race: reconcile so the caller retries against
                // the nonce the document is actually at.
                warn!("nonce conflict updating {}", doc_id_hash);
                return Err(version::reconcile_conflict(
                    self.ledger.as_ref(),
                    doc_id_hash,
                    proposed_nonce,
                )
                .await);
            }
            Err(err) => return Err(err),
        };
        debug!(
            "updated commitment for {} to nonce {}",
            doc_id_hash, commitment.nonce
        );
        Ok((commitment, payload))
    }

    /// Subscribes to commitment events for a DID.
    pub fn subscribe(&self, did: &str) -> CommitmentEvents {
        self.ledger.subscribe(integrity::hash_doc_id(did))
    }

    /// Persists a payload after its commitment was confirmed.
    ///
    /// Runs outside the operation deadline: the ledger write is already
    /// visible, so this step must hand off to the repair task rather than
    /// be cancelled. Retries inline with bounded backoff; if the budget is
    /// exhausted, a detached repair task keeps retrying (the put is
    /// idempotent) and the operation reports the document as
    /// committed-but-unavailable.
    async fn persist_payload(
        &self,
        doc_id_hash: DocIdHash,
        payload: EncryptedPayload,
    ) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        let result = self
            .retry
            .run(|| {
                let store = Arc::clone(&store);
                let payload = payload.clone();
                async move { store.put(doc_id_hash, payload).await }
            })
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    "ledger committed {} but store put keeps failing: {}",
                    doc_id_hash, err
                );
                self.spawn_repair(doc_id_hash, payload);
                Err(StoreError::DataUnavailable { doc_id_hash })
            }
        }
    }

    fn spawn_repair(&self, doc_id_hash: DocIdHash, payload: EncryptedPayload) {
        let ledger = Arc::clone(&self.ledger);
        let store = Arc::clone(&self.store);
        let locks = Arc::clone(&self.locks);
        let policy = self.retry.clone();
        let expected_hash = integrity::commit(&payload);
        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                // The identifier lock keeps the supersession check and the
                // put atomic with respect to concurrent updates. A put may
                // have been applied even though it reported failure, so an
                // unlocked check-then-put could re-write a payload that an
                // update replaced in between.
                let lock = lock_entry(&locks, doc_id_hash);
                let put_result = {
                    let _guard = lock.lock().await;
                    match ledger.get_commitment(doc_id_hash).await {
                        Ok(commitment) if commitment.payload_hash != expected_hash => {
                            debug!("repair for {} abandoned: payload superseded", doc_id_hash);
                            None
                        }
                        _ => Some(store.put(doc_id_hash, payload.clone()).await),
                    }
                };
                drop(lock);
                evict_idle(&locks, doc_id_hash);

                match put_result {
                    None => return,
                    Some(Ok(())) => {
                        info!("repair put for {} succeeded", doc_id_hash);
                        return;
                    }
                    Some(Err(err)) => {
                        debug!("repair put for {} failed: {}", doc_id_hash, err);
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        });
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.op_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| StoreError::Timeout)?,
            None => operation.await,
        }
    }
}

fn lock_entry(locks: &Mutex<LockMap>, doc_id_hash: DocIdHash) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = locks.lock().expect("lock map poisoned");
    Arc::clone(locks.entry(doc_id_hash).or_default())
}

/// Removes the map entry once no operation or repair task holds a clone.
fn evict_idle(locks: &Mutex<LockMap>, doc_id_hash: DocIdHash) {
    let mut locks = locks.lock().expect("lock map poisoned");
    if locks
        .get(&doc_id_hash)
        .map_or(false, |lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(&doc_id_hash);
    }
}
