//! Fixed-width id maps
//!
//! An [`IdMap`] is the frontier of a tree tier: a dense vector mapping slot
//! positions to child ids. Updates are immutable; unchanged slots are
//! copied, which keeps the type trivially shareable across derived states.

use crate::error::{Result, TieredError};
use strata_common::{Entity, Id};

/// Dense slot-to-id mapping of a fixed width
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdMap {
    ids: Vec<Id>,
}

impl IdMap {
    /// A map of `size` empty slots
    pub fn new(size: usize) -> Self {
        IdMap {
            ids: vec![Id::EMPTY; size],
        }
    }

    /// Number of slots; constant for the map's lifetime
    pub fn size(&self) -> usize {
        self.ids.len()
    }

    /// The id at a slot
    ///
    /// # Panics
    ///
    /// Panics when `position` is out of range. Positions flow from decoded
    /// records, which validate them, or from position hashing, which cannot
    /// exceed the width.
    pub fn get(&self, position: usize) -> Id {
        self.ids[position]
    }

    /// A copy with one slot replaced
    pub fn with_id(&self, position: usize, id: Id) -> IdMap {
        debug_assert!(position < self.ids.len());
        let mut ids = self.ids.clone();
        ids[position] = id;
        IdMap { ids }
    }

    /// Whether every slot is empty
    pub fn is_empty(&self) -> bool {
        self.ids.iter().all(Id::is_empty)
    }

    /// Iterate the slots in order
    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.ids.iter().copied()
    }

    /// Encode as a list-of-binary entity
    pub fn to_entity(&self) -> Entity {
        Entity::List(self.ids.iter().map(Id::to_entity).collect())
    }

    /// Decode from a list entity, enforcing the expected width
    pub fn from_entity(entity: &Entity, expected_size: usize) -> Result<IdMap> {
        let items = entity.as_list().map_err(TieredError::from)?;
        if items.len() != expected_size {
            return Err(TieredError::corruption(format!(
                "id map has {} slots, expected {expected_size}",
                items.len()
            )));
        }
        let mut ids = Vec::with_capacity(expected_size);
        for item in items {
            ids.push(Id::from_entity(item)?);
        }
        Ok(IdMap { ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_map_is_empty() {
        let map = IdMap::new(43);
        assert_eq!(map.size(), 43);
        assert!(map.is_empty());
        assert!(map.get(42).is_empty());
    }

    #[test]
    fn with_id_leaves_original_untouched() {
        let map = IdMap::new(4);
        let id = Id::of_name("child");
        let updated = map.with_id(2, id);

        assert!(map.get(2).is_empty());
        assert_eq!(updated.get(2), id);
        assert_eq!(updated.size(), 4);
        assert_ne!(map, updated);
    }

    #[test]
    fn entity_round_trip() {
        let map = IdMap::new(4).with_id(1, Id::of_name("a")).with_id(3, Id::of_name("b"));
        let decoded = IdMap::from_entity(&map.to_entity(), 4).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn decode_rejects_wrong_width() {
        let map = IdMap::new(4);
        let err = IdMap::from_entity(&map.to_entity(), 5).unwrap_err();
        assert_eq!(err.kind(), crate::error::TieredErrorKind::Corruption);
    }
}
