//! Mid tree tier

use crate::error::{Result, TieredError};
use crate::tree::IdMap;
use strata_common::{Entity, Id};

/// Mid tier fanning an L1 slot out over leaf records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2 {
    map: IdMap,
    id: Id,
}

impl L2 {
    /// Number of leaf slots
    pub const SIZE: usize = 199;

    /// The canonical empty tier; never persisted
    pub fn empty() -> L2 {
        L2 {
            map: IdMap::new(Self::SIZE),
            id: Id::EMPTY,
        }
    }

    fn build(map: IdMap) -> Result<L2> {
        if map.is_empty() {
            return Ok(Self::empty());
        }
        let mut l2 = L2 { map, id: Id::EMPTY };
        l2.id = Id::build(&l2.to_entity())?;
        Ok(l2)
    }

    /// This tier's content id
    pub fn id(&self) -> Id {
        self.id
    }

    /// The leaf id at a slot
    pub fn get(&self, position: usize) -> Id {
        self.map.get(position)
    }

    /// A copy with one slot replaced; all slots empty collapses to
    /// [`L2::empty`]
    pub fn with_id(&self, position: usize, l3_id: Id) -> Result<L2> {
        Self::build(self.map.with_id(position, l3_id))
    }

    /// Load an L2 by id, short-circuiting the empty id
    pub async fn load<S: crate::store::Store + Sync>(store: &S, id: Id) -> Result<L2> {
        if id.is_empty() {
            return Ok(Self::empty());
        }
        let entity = store.load_single(crate::store::ValueType::L2, id).await?;
        Self::load_checked(id, &entity)
    }

    /// Encode as an entity
    pub fn to_entity(&self) -> Entity {
        self.map.to_entity()
    }

    /// Decode a stored tier and verify its id matches the requested one
    pub fn load_checked(requested: Id, entity: &Entity) -> Result<L2> {
        let l2 = Self::build(IdMap::from_entity(entity, Self::SIZE)?)?;
        if l2.id != requested {
            return Err(TieredError::corruption(format!(
                "l2 {requested} hashed to {}",
                l2.id
            )));
        }
        Ok(l2)
    }
}
