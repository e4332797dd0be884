// src/codec.rs
//! Canonical (de)serialization of DID Documents.
//!
//! The integrity binder hashes ciphertext derived from these bytes, so the
//! encoding must be deterministic: the same logical document always produces
//! the same byte sequence. Struct field order is fixed by the serde derive
//! and the schema contains no maps, which gives canonical JSON without a
//! separate canonicalization pass.

use crate::error::StoreError;
use crate::models::did::DIDDocument;

/// Serializes a document to its canonical byte encoding.
///
/// Validates the schema first so that only well-formed documents are ever
/// encrypted and committed.
pub fn serialize(document: &DIDDocument) -> Result<Vec<u8>, StoreError> {
    validate(document)?;
    serde_json::to_vec(document).map_err(|e| StoreError::MalformedDocument(e.to_string()))
}

/// Deserializes a document from its canonical byte encoding.
///
/// Fails with [`StoreError::MalformedDocument`] on any schema violation:
/// unparseable JSON, missing identifier, or malformed key/service entries.
pub fn deserialize(bytes: &[u8]) -> Result<DIDDocument, StoreError> {
    let document: DIDDocument =
        serde_json::from_slice(bytes).map_err(|e| StoreError::MalformedDocument(e.to_string()))?;
    validate(&document)?;
    Ok(document)
}

/// Checks the DID Document schema beyond what the type system enforces.
pub fn validate(document: &DIDDocument) -> Result<(), StoreError> {
    if document.id.is_empty() {
        return Err(StoreError::MalformedDocument(
            "document identifier is empty".to_string(),
        ));
    }
    if !document.id.starts_with("did:") {
        return Err(StoreError::MalformedDocument(format!(
            "identifier '{}' is not a DID",
            document.id
        )));
    }
    if document.controller.is_empty() {
        return Err(StoreError::MalformedDocument(
            "controller is empty".to_string(),
        ));
    }
    for key in &document.public_keys {
        if key.id.is_empty() || key.key_type.is_empty() || key.public_key_multibase.is_empty() {
            return Err(StoreError::MalformedDocument(format!(
                "malformed public key entry '{}'",
                key.id
            )));
        }
    }
    for service in &document.services {
        if service.id.is_empty() || service.service_type.is_empty() || service.service_endpoint.is_empty()
        {
            return Err(StoreError::MalformedDocument(format!(
                "malformed service entry '{}'",
                service.id
            )));
        }
    }
    Ok(())
}
