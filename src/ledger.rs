// src/ledger.rs
//! Integrity ledger adapter interface.
//!
//! The ledger is an external collaborator: an append-only store of
//! commitments that is linearizable per key. This module defines the fixed
//! interface the orchestrator consumes (no dynamic method resolution) plus
//! the cancellable commitment event feed and an in-memory ledger that honors
//! the full consistency contract for tests.
//!
//! # Consistency contract
//! Concurrent `update_commitment` calls for the same identifier with the
//! same proposed nonce resolve to exactly one winner; losers receive a
//! conflict. Replaying an already-applied idempotency key returns the
//! existing commitment instead of double-applying.

use crate::error::StoreError;
use crate::models::payload::{Commitment, DocIdHash, IdempotencyKey, PayloadHash};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// A commitment change observed on the ledger.
#[derive(Debug, Clone)]
pub enum CommitmentEvent {
    Created(Commitment),
    Updated(Commitment),
}

/// Cancellable subscription to commitment events for one identifier.
///
/// Delivery order per identifier matches ledger commit order. Dropping the
/// handle (or calling [`CommitmentEvents::unsubscribe`]) cancels the
/// subscription.
pub struct CommitmentEvents {
    doc_id_hash: DocIdHash,
    rx: broadcast::Receiver<(DocIdHash, CommitmentEvent)>,
}

impl CommitmentEvents {
    /// Waits for the next event on the subscribed identifier.
    ///
    /// Returns `None` once the ledger side has shut down. Events for other
    /// identifiers are filtered out; if the subscriber lags behind the
    /// channel capacity, intervening events are skipped rather than
    /// terminating the feed.
    pub async fn recv(&mut self) -> Option<CommitmentEvent> {
        loop {
            match self.rx.recv().await {
                Ok((hash, event)) if hash == self.doc_id_hash => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicitly cancels the subscription.
    pub fn unsubscribe(self) {}
}

/// Interface to the integrity ledger.
///
/// Implementations wrap whatever transport the ledger actually speaks
/// (contract RPC, gRPC, ...); the orchestrator only depends on this method
/// set.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Records the initial commitment for a document, at nonce 0.
    ///
    /// Fails with a conflict if a commitment already exists for the
    /// identifier.
    async fn create_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
    ) -> Result<Commitment, StoreError>;

    /// Records an updated commitment at `nonce`, which must be exactly the
    /// current nonce plus one.
    ///
    /// The idempotency key makes a retried submission after an ambiguous
    /// network failure safe: a replay of an applied key returns the
    /// commitment it produced.
    async fn update_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
        nonce: u64,
        idempotency_key: IdempotencyKey,
    ) -> Result<Commitment, StoreError>;

    /// Reads the current commitment for a document.
    async fn get_commitment(&self, doc_id_hash: DocIdHash) -> Result<Commitment, StoreError>;

    /// Subscribes to commitment events for one identifier.
    fn subscribe(&self, doc_id_hash: DocIdHash) -> CommitmentEvents;
}

/// In-memory ledger honoring the full consistency contract.
///
/// Reference implementation used by the test suite; per-key linearizable by
/// construction (one interior mutex guards all state).
pub struct InMemoryLedger {
    inner: Mutex<LedgerState>,
    events: broadcast::Sender<(DocIdHash, CommitmentEvent)>,
}

struct LedgerState {
    commitments: HashMap<DocIdHash, Commitment>,
    applied: HashMap<IdempotencyKey, Commitment>,
    next_sequence: u64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        InMemoryLedger {
            inner: Mutex::new(LedgerState {
                commitments: HashMap::new(),
                applied: HashMap::new(),
                next_sequence: 0,
            }),
            events,
        }
    }

    fn publish(&self, doc_id_hash: DocIdHash, event: CommitmentEvent) {
        // No subscribers is fine; the send result only signals that.
        let _ = self.events.send((doc_id_hash, event));
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerAdapter for InMemoryLedger {
    async fn create_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
    ) -> Result<Commitment, StoreError> {
        let commitment = {
            let mut state = self.inner.lock().expect("ledger state poisoned");
            if let Some(existing) = state.commitments.get(&doc_id_hash) {
                return Err(StoreError::Conflict {
                    current_nonce: existing.nonce,
                    proposed_nonce: 0,
                });
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let commitment = Commitment {
                doc_id_hash,
                payload_hash,
                nonce: 0,
                signature,
                sequence,
            };
            state.commitments.insert(doc_id_hash, commitment.clone());
            commitment
        };
        self.publish(doc_id_hash, CommitmentEvent::Created(commitment.clone()));
        Ok(commitment)
    }

    async fn update_commitment(
        &self,
        doc_id_hash: DocIdHash,
        payload_hash: PayloadHash,
        signature: Vec<u8>,
        nonce: u64,
        idempotency_key: IdempotencyKey,
    ) -> Result<Commitment, StoreError> {
        let commitment = {
            let mut state = self.inner.lock().expect("ledger state poisoned");

            // Replay of an already-applied submission: return what it
            // produced, do not double-apply. A different writer that merely
            // collided on (doc, nonce) is a conflict, not a replay.
            if let Some(applied) = state.applied.get(&idempotency_key) {
                if applied.payload_hash == payload_hash {
                    return Ok(applied.clone());
                }
                return Err(StoreError::Conflict {
                    current_nonce: applied.nonce,
                    proposed_nonce: nonce,
                });
            }

            let current = state
                .commitments
                .get(&doc_id_hash)
                .ok_or(StoreError::NotFound)?;
            if nonce != current.nonce + 1 {
                return Err(StoreError::Conflict {
                    current_nonce: current.nonce,
                    proposed_nonce: nonce,
                });
            }

            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let commitment = Commitment {
                doc_id_hash,
                payload_hash,
                nonce,
                signature,
                sequence,
            };
            state.commitments.insert(doc_id_hash, commitment.clone());
            state.applied.insert(idempotency_key, commitment.clone());
            commitment
        };
        self.publish(doc_id_hash, CommitmentEvent::Updated(commitment.clone()));
        Ok(commitment)
    }

    async fn get_commitment(&self, doc_id_hash: DocIdHash) -> Result<Commitment, StoreError> {
        let state = self.inner.lock().expect("ledger state poisoned");
        state
            .commitments
            .get(&doc_id_hash)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn subscribe(&self, doc_id_hash: DocIdHash) -> CommitmentEvents {
        CommitmentEvents {
            doc_id_hash,
            rx: self.events.subscribe(),
        }
    }
}
