//! Leaf tree tier

use crate::error::{Result, TieredError};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use strata_common::{Entity, Id, Key};

/// Leaf tier mapping keys to value ids
///
/// Keys are held sorted, so the canonical encoding (and therefore the id)
/// is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L3 {
    entries: BTreeMap<Key, Id>,
    id: Id,
}

impl L3 {
    /// The canonical empty leaf; never persisted
    pub fn empty() -> L3 {
        L3 {
            entries: BTreeMap::new(),
            id: Id::EMPTY,
        }
    }

    /// Build a leaf from entries, computing its content id
    pub fn new(entries: BTreeMap<Key, Id>) -> Result<L3> {
        if entries.is_empty() {
            return Ok(Self::empty());
        }
        let mut l3 = L3 {
            entries,
            id: Id::EMPTY,
        };
        l3.id = Id::build(&l3.to_entity())?;
        Ok(l3)
    }

    /// This leaf's content id
    pub fn id(&self) -> Id {
        self.id
    }

    /// The value id stored under a key, or the empty id
    pub fn get(&self, key: &Key) -> Id {
        self.entries.get(key).copied().unwrap_or(Id::EMPTY)
    }

    /// A copy with one entry set; an empty `value_id` removes the key
    pub fn with(&self, key: &Key, value_id: Id) -> Result<L3> {
        let mut entries = self.entries.clone();
        if value_id.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.clone(), value_id);
        }
        Self::new(entries)
    }

    /// Iterate entries in key order
    pub fn entries(&self) -> impl Iterator<Item = (&Key, Id)> + '_ {
        self.entries.iter().map(|(k, v)| (k, *v))
    }

    /// Load an L3 by id, short-circuiting the empty id
    pub async fn load<S: crate::store::Store + Sync>(store: &S, id: Id) -> Result<L3> {
        if id.is_empty() {
            return Ok(Self::empty());
        }
        let entity = store.load_single(crate::store::ValueType::L3, id).await?;
        Self::load_checked(id, &entity)
    }

    /// Encode as an entity
    pub fn to_entity(&self) -> Entity {
        Entity::List(
            self.entries
                .iter()
                .map(|(key, value)| {
                    let mut map = BTreeMap::new();
                    map.insert(SmolStr::new("key"), key.to_entity());
                    map.insert(SmolStr::new("id"), value.to_entity());
                    Entity::Map(map)
                })
                .collect(),
        )
    }

    /// Decode a stored leaf and verify its id matches the requested one
    pub fn load_checked(requested: Id, entity: &Entity) -> Result<L3> {
        let mut entries = BTreeMap::new();
        for item in entity.as_list().map_err(TieredError::from)? {
            let key = Key::from_entity(item.attr("key")?)?;
            let value = Id::from_entity(item.attr("id")?)?;
            entries.insert(key, value);
        }
        let l3 = Self::new(entries)?;
        if l3.id != requested {
            return Err(TieredError::corruption(format!(
                "l3 {requested} hashed to {}",
                l3.id
            )));
        }
        Ok(l3)
    }
}
