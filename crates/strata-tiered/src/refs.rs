//! Reference records
//!
//! References are the only mutable rows in the store. They share a header
//! (name-derived id plus creation timestamp) and split into branches, which
//! carry an intention log, and tags, which are bare commit pointers.

use crate::branch::InternalBranch;
use crate::error::{Result, TieredError};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use strata_common::{Entity, Id};

/// Milliseconds since the epoch, for reference headers
pub(crate) fn dt_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A branch or tag record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalRef {
    /// Branch with an intention log
    Branch(InternalBranch),
    /// Tag pointing at a persisted L1
    Tag(InternalTag),
}

impl InternalRef {
    /// The reference's name-derived id
    pub fn id(&self) -> Id {
        match self {
            InternalRef::Branch(b) => b.id(),
            InternalRef::Tag(t) => t.id(),
        }
    }

    /// The reference's name
    pub fn name(&self) -> &str {
        match self {
            InternalRef::Branch(b) => b.name(),
            InternalRef::Tag(t) => t.name(),
        }
    }

    /// Creation timestamp, milliseconds since the epoch
    pub fn dt(&self) -> i64 {
        match self {
            InternalRef::Branch(b) => b.dt(),
            InternalRef::Tag(t) => t.dt(),
        }
    }

    /// Unwrap as a branch; a tag is a `NotFound` error
    pub fn into_branch(self) -> Result<InternalBranch> {
        match self {
            InternalRef::Branch(b) => Ok(b),
            InternalRef::Tag(t) => Err(TieredError::reference_not_found(format!(
                "reference {} is a tag, not a branch",
                t.name()
            ))),
        }
    }

    /// Encode as an entity, tagged with the reference kind
    pub fn to_entity(&self) -> Entity {
        match self {
            InternalRef::Branch(b) => b.to_entity(),
            InternalRef::Tag(t) => t.to_entity(),
        }
    }

    /// Decode a stored reference, dispatching on its kind tag
    pub fn from_entity(entity: &Entity) -> Result<Self> {
        match entity.attr("type")?.as_string().map_err(TieredError::from)?.as_str() {
            "b" => Ok(InternalRef::Branch(InternalBranch::from_entity(entity)?)),
            "t" => Ok(InternalRef::Tag(InternalTag::from_entity(entity)?)),
            other => Err(TieredError::corruption(format!(
                "unknown reference kind: {other:?}"
            ))),
        }
    }
}

/// An immutable pointer to a persisted L1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalTag {
    id: Id,
    name: SmolStr,
    commit_id: Id,
    dt: i64,
}

impl InternalTag {
    /// Create a tag pointing at an L1
    pub fn new(name: impl Into<SmolStr>, commit_id: Id) -> Self {
        let name = name.into();
        InternalTag {
            id: Id::of_name(&name),
            name,
            commit_id,
            dt: dt_now(),
        }
    }

    /// The tag's name-derived id
    pub fn id(&self) -> Id {
        self.id
    }

    /// The tag's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pinned L1 id
    pub fn commit_id(&self) -> Id {
        self.commit_id
    }

    /// Creation timestamp
    pub fn dt(&self) -> i64 {
        self.dt
    }

    /// Encode as an entity
    pub fn to_entity(&self) -> Entity {
        let mut map = BTreeMap::new();
        map.insert(SmolStr::new("type"), Entity::string("t"));
        map.insert(SmolStr::new("id"), self.id.to_entity());
        map.insert(SmolStr::new("name"), Entity::String(self.name.clone()));
        map.insert(SmolStr::new("commit"), self.commit_id.to_entity());
        map.insert(SmolStr::new("dt"), Entity::number(self.dt));
        Entity::Map(map)
    }

    /// Decode a stored tag, verifying its name-derived id
    pub fn from_entity(entity: &Entity) -> Result<Self> {
        let name = entity.attr("name")?.as_string().map_err(TieredError::from)?.clone();
        let id = Id::from_entity(entity.attr("id")?)?;
        if id != Id::of_name(&name) {
            return Err(TieredError::corruption(format!(
                "tag id {id} does not match name {name:?}"
            )));
        }
        Ok(InternalTag {
            id,
            name,
            commit_id: Id::from_entity(entity.attr("commit")?)?,
            dt: entity.attr("dt")?.as_number().map_err(TieredError::from)?,
        })
    }
}
