// src/models/did.rs
//! Decentralized Identifier (DID) data model implementation.
//!
//! Defines the core structure for W3C-compliant DID Documents following the
//! [DID Core Specification](https://www.w3.org/TR/did-core/), plus the
//! partial-update patch applied during document updates.
//!
//! Field names serialize in W3C camelCase (`publicKeyMultibase`,
//! `serviceEndpoint`) so documents stay interchangeable with other DID
//! tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A DID Document representing a decentralized identity.
///
/// Contains the cryptographic material and service endpoints necessary to
/// authenticate and interact with the DID subject.
///
/// # Ownership
/// The document is owned exclusively by the caller until handed to the
/// orchestrator; the orchestrator never retains an unencrypted copy beyond
/// the scope of one operation.
///
/// # Immutability
/// `id` and `created` never change after registration. Only the remaining
/// fields (and the ledger-side version nonce) change across updates.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DIDDocument {
    /// The complete DID string identifier.
    /// Example: "did:example:123456789abcdefghi"
    pub id: String,

    /// Identity that controls this document.
    pub controller: String,

    /// Creation timestamp, set once at registration.
    pub created: DateTime<Utc>,

    /// Last-update timestamp, stamped by the orchestrator on every update.
    pub updated: DateTime<Utc>,

    /// Ordered public-key descriptors for the DID subject.
    pub public_keys: Vec<PublicKey>,

    /// Ordered service-endpoint descriptors.
    pub services: Vec<Service>,

    /// Optional cryptographic proof block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

/// A public-key descriptor within a DID Document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Key identifier, typically `<did>#<fragment>`.
    pub id: String,

    /// Key type, e.g. "Ed25519VerificationKey2020".
    #[serde(rename = "type")]
    pub key_type: String,

    /// Identity that controls this key.
    pub controller: String,

    /// Multibase-encoded key material.
    pub public_key_multibase: String,
}

/// A service-endpoint descriptor within a DID Document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service identifier, typically `<did>#<fragment>`.
    pub id: String,

    /// Service type, e.g. "LinkedDomains".
    #[serde(rename = "type")]
    pub service_type: String,

    /// URI for interacting with the service.
    pub service_endpoint: String,
}

/// Optional proof block attached to a DID Document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: DateTime<Utc>,
    pub verification_method: String,
    pub proof_purpose: String,
    pub proof_value: String,
}

/// Partial update applied to an existing DID Document.
///
/// Every field is optional; absent fields are left untouched. `id` and
/// `created` are deliberately not patchable: the identifier is immutable
/// and the creation timestamp is preserved across updates. `updated` is
/// stamped by the orchestrator, never supplied by the caller.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    pub controller: Option<String>,
    pub public_keys: Option<Vec<PublicKey>>,
    pub services: Option<Vec<Service>>,
    pub proof: Option<Proof>,
}

impl DIDDocument {
    /// Applies a patch in place and stamps the update timestamp.
    ///
    /// # Arguments
    /// * `patch` - Fields to replace; `None` fields keep their current value
    /// * `now` - Timestamp recorded as the document's `updated` time
    pub fn apply_patch(&mut self, patch: DocumentPatch, now: DateTime<Utc>) {
        if let Some(controller) = patch.controller {
            self.controller = controller;
        }
        if let Some(public_keys) = patch.public_keys {
            self.public_keys = public_keys;
        }
        if let Some(services) = patch.services {
            self.services = services;
        }
        if let Some(proof) = patch.proof {
            self.proof = Some(proof);
        }
        self.updated = now;
    }
}
