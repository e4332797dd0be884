// src/lib.rs
//! # Hybrid Anchored Document Store
//!
//! Anchors DID Documents across two independently-failing stores: an
//! append-only integrity ledger that records a tamper-evident commitment
//! (hash + signature + monotonic nonce) for each document, and a
//! confidentiality-preserving document store that holds the encrypted
//! document body.
//!
//! ## Architecture Overview
//! 1. **Codec**: canonical (de)serialization of DID Documents
//! 2. **Encryption Engine**: AES-256-GCM over the canonical bytes
//! 3. **Integrity Binder**: commitment hash linking ledger and store
//! 4. **Version Controller**: monotonic nonce for optimistic concurrency
//! 5. **Adapters**: ledger and document store collaborator interfaces
//! 6. **Orchestrator**: the state machine tying it all together with
//!    defined partial-failure behavior
//!
//! The orchestrator exposes exactly three operations: create, resolve,
//! update. Transports, wallets, and HTTP surfaces live outside this crate.

pub mod codec;       // Canonical document encoding
pub mod crypto;      // Encryption engine and integrity binder
pub mod error;       // Typed error taxonomy
pub mod ledger;      // Integrity ledger adapter interface
pub mod models;      // Data structures
pub mod orchestrator; // Create/resolve/update state machine
pub mod retry;       // Bounded-backoff retry policy
pub mod store;       // Document store adapter interface
pub mod version;     // Nonce propose/validate/reconcile

pub use crate::crypto::encryption::EncryptionKey;
pub use crate::error::StoreError;
pub use crate::ledger::{CommitmentEvent, CommitmentEvents, InMemoryLedger, LedgerAdapter};
pub use crate::models::did::{DIDDocument, DocumentPatch, Proof, PublicKey, Service};
pub use crate::models::payload::{
    CipherAlgorithm, Commitment, DocIdHash, EncryptedPayload, IdempotencyKey, PayloadHash,
};
pub use crate::orchestrator::{DidOrchestrator, ResolvedDocument};
pub use crate::retry::RetryPolicy;
pub use crate::store::{DocumentStoreAdapter, InMemoryDocumentStore};
