// src/crypto/mod.rs
//! Cryptographic building blocks: authenticated encryption of document
//! payloads and the integrity hash binding payloads to ledger commitments.

pub mod encryption;
pub mod integrity;
