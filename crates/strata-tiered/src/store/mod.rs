//! Typed KV persistence for the version store
//!
//! The branch state machine relies on a small contract: load records by
//! `(kind, id)`, save content-addressed batches idempotently, and mutate
//! reference records through atomic conditional updates over nested
//! attribute paths. Implementations might use:
//! - An in-memory table ([`MemoryStore`])
//! - A DynamoDB-style service with native conditional writes
//! - Any KV engine offering per-key compare-and-set
//!
//! Clone is required so the collapse task can share the store across
//! spawned work.

use crate::error::Result;
use strata_common::{Entity, Id};

pub mod expr;
pub mod memory;

pub use expr::{ConditionExpression, ExpressionPath, UpdateClause, UpdateExpression};
pub use memory::MemoryStore;

/// The record kinds the store distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Branch and tag records
    Ref,
    /// Root tree summaries
    L1,
    /// Mid tree tier
    L2,
    /// Leaf tree tier
    L3,
    /// Opaque contents payloads
    Value,
    /// Opaque commit metadata
    CommitMetadata,
}

impl ValueType {
    /// Short name used in errors and tracing
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Ref => "ref",
            ValueType::L1 => "l1",
            ValueType::L2 => "l2",
            ValueType::L3 => "l3",
            ValueType::Value => "value",
            ValueType::CommitMetadata => "commit-metadata",
        }
    }
}

/// A single record to persist
#[derive(Debug, Clone)]
pub struct SaveOp {
    /// Record kind
    pub value_type: ValueType,
    /// Storage key
    pub id: Id,
    /// Record body
    pub entity: Entity,
}

impl SaveOp {
    /// Bundle a record for saving
    pub fn new(value_type: ValueType, id: Id, entity: Entity) -> Self {
        SaveOp {
            value_type,
            id,
            entity,
        }
    }
}

/// Async store trait
///
/// All graph nodes are content-addressed, so `save` is idempotent by
/// construction: writing an already-present id is a no-op. Reference
/// records are the only mutable rows, and they change exclusively through
/// [`Store::update`].
#[trait_variant::make(Send)]
pub trait Store: Clone {
    /// Load one record; missing records are a `NotFound` error
    async fn load_single(&self, value_type: ValueType, id: Id) -> Result<Entity>;

    /// Load a batch of records; missing entries come back as `None`
    async fn load_multi(&self, value_type: ValueType, ids: &[Id]) -> Result<Vec<Option<Entity>>>;

    /// Persist a batch of content-addressed records
    ///
    /// Atomic per item and safe to repeat: ids already present are left
    /// untouched.
    async fn save(&self, ops: Vec<SaveOp>) -> Result<()>;

    /// Persist a record only if its id is absent
    ///
    /// Returns `false` when the id already exists. Used for reference
    /// creation, where overwriting would clobber another writer's branch.
    async fn put_if_absent(&self, op: SaveOp) -> Result<bool>;

    /// Conditionally mutate a record
    ///
    /// Checks every condition term against the stored record, then applies
    /// the update clauses all-or-nothing. Returns `None` — not an error —
    /// when a condition does not hold or the record is missing, and the
    /// produced post-update record on success.
    async fn update(
        &self,
        value_type: ValueType,
        id: Id,
        update: UpdateExpression,
        condition: Option<ConditionExpression>,
    ) -> Result<Option<Entity>>;

    /// Delete a record, reporting whether it existed
    async fn delete(&self, value_type: ValueType, id: Id) -> Result<bool>;
}
