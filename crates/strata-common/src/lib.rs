//! Model types for the strata version store
//!
//! This crate provides the building blocks shared by every layer of the store:
//!
//! - **Ids**: fixed-width content hashes with a distinguished empty value
//! - **Entities**: the canonical value algebra records serialize into, with a
//!   deterministic DAG-CBOR byte encoding
//! - **Keys**: ordered string-segment keys with an exact path-string codec,
//!   plus key mutations (additions/removals) carried alongside commits
//! - **Commit metadata** and the opaque **contents payloads** (Iceberg, Hive,
//!   Delta Lake, SQL views) the store persists verbatim
//!
//! # Design Philosophy
//!
//! - Everything here is immutable and cheap to clone
//! - Canonical encodings are deterministic so content hashing is stable
//! - Payloads are opaque: this crate serializes them, the store never looks
//!   inside

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod contents;
pub mod entity;
pub mod error;
pub mod id;
pub mod key;
pub mod meta;

pub use contents::Contents;
pub use entity::Entity;
pub use error::ModelError;
pub use id::Id;
pub use key::{Key, KeyMutation, KeyMutationList};
pub use meta::CommitMeta;
