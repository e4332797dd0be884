// src/models/mod.rs
//! Data structures shared across the document store.

pub mod did;
pub mod payload;
