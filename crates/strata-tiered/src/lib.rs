//! Tiered, content-addressed version store
//!
//! This crate provides Git-like branching and commit semantics over a
//! key-value store with conditional updates:
//!
//! - **Store abstraction**: typed KV persistence with batched idempotent
//!   saves and atomic conditional updates over nested attribute paths
//! - **Entity graph**: immutable, content-addressed tree tiers (L1/L2/L3)
//!   summarising the catalog state at every commit
//! - **Branch state machine**: an intention log of pending commits embedded
//!   in the branch record, materialised into persisted L1s and collapsed
//!   back to a single saved pointer through optimistic compare-and-set
//! - **[`TieredVersionStore`]**: the high-level surface for creating
//!   references, committing operations, and reading values and keys
//!
//! # Design Philosophy
//!
//! - Graph nodes are write-once; only reference records mutate, and only
//!   through conditional updates — there are no locks on the branch record
//! - Many writers may append to a shared branch; at most one wins the
//!   collapse race per round, and losers reconstruct their plan and retry
//! - Readers replay a dirty intention log in memory; completing the
//!   collapse improves compactness, never correctness

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod branch;
pub mod config;
pub mod error;
pub mod refs;
pub mod store;
pub mod tiers;
pub mod tree;
pub mod values;
pub mod version_store;

pub use branch::{CommitEntry, InternalBranch, UnsavedDelta, UpdateState};
pub use config::StoreConfig;
pub use error::{Result, TieredError, TieredErrorKind};
pub use refs::{InternalRef, InternalTag};
pub use store::{MemoryStore, SaveOp, Store, ValueType};
pub use tiers::{KeyLog, L1, L2, L3};
pub use tree::IdMap;
pub use values::{InternalCommitMetadata, InternalValue};
pub use version_store::{Operation, TieredVersionStore};
