//! Canonical value algebra for the typed store format
//!
//! Every persisted record serializes into an [`Entity`] tree before it is
//! hashed or written. The encoding is DAG-CBOR with `BTreeMap`-ordered map
//! keys, so two structurally equal entities always produce identical bytes
//! and therefore identical ids.

use crate::error::ModelError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// A typed attribute value
///
/// The store addresses nested attributes of these trees through expression
/// paths (`commits[2].id`), so the shape mirrors what a conditional-update
/// KV store can express: maps, lists, and scalar leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    /// Raw bytes (ids, opaque payloads)
    Binary(Bytes),
    /// UTF-8 text
    String(SmolStr),
    /// Signed integer
    Number(i64),
    /// Boolean flag
    Boolean(bool),
    /// Ordered list of entities
    List(Vec<Entity>),
    /// String-keyed map; `BTreeMap` keeps the encoding deterministic
    Map(BTreeMap<SmolStr, Entity>),
}

impl Entity {
    /// Build a binary entity
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Entity::Binary(bytes.into())
    }

    /// Build a string entity
    pub fn string(s: impl Into<SmolStr>) -> Self {
        Entity::String(s.into())
    }

    /// Build a number entity
    pub fn number(n: i64) -> Self {
        Entity::Number(n)
    }

    /// Build a list entity
    pub fn list(items: Vec<Entity>) -> Self {
        Entity::List(items)
    }

    /// Build a map entity
    pub fn map(map: BTreeMap<SmolStr, Entity>) -> Self {
        Entity::Map(map)
    }

    /// Short name of this entity's kind, used in mismatch errors
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Binary(_) => "binary",
            Entity::String(_) => "string",
            Entity::Number(_) => "number",
            Entity::Boolean(_) => "boolean",
            Entity::List(_) => "list",
            Entity::Map(_) => "map",
        }
    }

    /// Canonical byte encoding of this entity
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ModelError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| ModelError::Encode(Box::new(e)))
    }

    /// Decode an entity from its canonical byte encoding
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(|e| ModelError::Decode(Box::new(e)))
    }

    fn mismatch(&self, expected: &'static str) -> ModelError {
        ModelError::EntityMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// View as a map
    pub fn as_map(&self) -> Result<&BTreeMap<SmolStr, Entity>, ModelError> {
        match self {
            Entity::Map(m) => Ok(m),
            other => Err(other.mismatch("map")),
        }
    }

    /// View as a mutable map
    pub fn as_map_mut(&mut self) -> Result<&mut BTreeMap<SmolStr, Entity>, ModelError> {
        match self {
            Entity::Map(m) => Ok(m),
            other => Err(other.mismatch("map")),
        }
    }

    /// View as a list
    pub fn as_list(&self) -> Result<&[Entity], ModelError> {
        match self {
            Entity::List(l) => Ok(l),
            other => Err(other.mismatch("list")),
        }
    }

    /// View as a mutable list
    pub fn as_list_mut(&mut self) -> Result<&mut Vec<Entity>, ModelError> {
        match self {
            Entity::List(l) => Ok(l),
            other => Err(other.mismatch("list")),
        }
    }

    /// View as bytes
    pub fn as_binary(&self) -> Result<&Bytes, ModelError> {
        match self {
            Entity::Binary(b) => Ok(b),
            other => Err(other.mismatch("binary")),
        }
    }

    /// View as a string
    pub fn as_string(&self) -> Result<&SmolStr, ModelError> {
        match self {
            Entity::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// View as a number
    pub fn as_number(&self) -> Result<i64, ModelError> {
        match self {
            Entity::Number(n) => Ok(*n),
            other => Err(other.mismatch("number")),
        }
    }

    /// View as a boolean
    pub fn as_boolean(&self) -> Result<bool, ModelError> {
        match self {
            Entity::Boolean(b) => Ok(*b),
            other => Err(other.mismatch("boolean")),
        }
    }

    /// Fetch a required attribute from a map entity
    pub fn attr(&self, name: &'static str) -> Result<&Entity, ModelError> {
        self.as_map()?
            .get(name)
            .ok_or(ModelError::MissingAttribute { name })
    }
}
