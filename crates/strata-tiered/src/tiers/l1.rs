//! Root tree tier
//!
//! An [`L1`] pins the whole catalog state at one commit: a fixed-width map
//! of L2 children, the commit metadata id, a bounded ancestry list, and a
//! key log. The key log is incremental most of the time — just this
//! commit's mutations plus a pointer to the last checkpoint — and every
//! [`CHECKPOINT_DISTANCE`] commits it folds into a complete key set so key
//! listings stay O(1) amortised instead of walking unbounded history.

use crate::error::{Result, TieredError};
use crate::store::{Store, ValueType};
use crate::tree::IdMap;
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use strata_common::{Entity, Id, Key, KeyMutation, KeyMutationList};

/// Incremental key logs fold into a checkpoint at this chain length
pub const CHECKPOINT_DISTANCE: u32 = 20;

const MAX_PARENTS: usize = 20;

/// The key log carried by an L1
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLog {
    /// This commit's mutations plus a pointer to the previous checkpoint
    Incremental {
        /// Id of the nearest ancestor holding a complete key set
        checkpoint_id: Id,
        /// Incremental commits since that checkpoint, this one included
        distance: u32,
        /// Mutations applied by this commit
        mutations: KeyMutationList,
    },
    /// A complete key set, terminating every walk that reaches it
    Checkpoint {
        /// All keys visible at this commit
        keys: BTreeSet<Key>,
    },
}

/// Root tree summary of one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1 {
    metadata_id: Id,
    parents: Vec<Id>,
    map: IdMap,
    keys: KeyLog,
    id: Id,
}

impl L1 {
    /// Number of L2 slots
    pub const SIZE: usize = 43;

    /// The canonical empty L1; its id is the empty id and it is never
    /// persisted
    pub fn empty() -> L1 {
        L1 {
            metadata_id: Id::EMPTY,
            parents: Vec::new(),
            map: IdMap::new(Self::SIZE),
            keys: KeyLog::Checkpoint {
                keys: BTreeSet::new(),
            },
            id: Id::EMPTY,
        }
    }

    fn build(metadata_id: Id, parents: Vec<Id>, map: IdMap, keys: KeyLog) -> Result<L1> {
        let mut l1 = L1 {
            metadata_id,
            parents,
            map,
            keys,
            id: Id::EMPTY,
        };
        if l1 != Self::empty() {
            l1.id = Id::build(&l1.to_entity())?;
        }
        Ok(l1)
    }

    /// This summary's content id
    pub fn id(&self) -> Id {
        self.id
    }

    /// The commit metadata id
    pub fn metadata_id(&self) -> Id {
        self.metadata_id
    }

    /// The immediate parent's id, or the empty id for a root
    pub fn parent_id(&self) -> Id {
        self.parents.first().copied().unwrap_or(Id::EMPTY)
    }

    /// The L2 frontier
    pub fn map(&self) -> &IdMap {
        &self.map
    }

    /// The key log
    pub fn key_log(&self) -> &KeyLog {
        &self.keys
    }

    /// Derive the summary of a child commit
    ///
    /// The child's parent is this L1; its key log starts (or extends) an
    /// incremental chain hanging off the nearest checkpoint.
    pub fn get_child_with_tree(
        &self,
        commit_id: Id,
        tree: IdMap,
        mutations: KeyMutationList,
    ) -> Result<L1> {
        let mut parents = Vec::with_capacity(MAX_PARENTS);
        parents.push(self.id);
        parents.extend(self.parents.iter().copied().take(MAX_PARENTS - 1));

        let keys = match &self.keys {
            KeyLog::Checkpoint { .. } => KeyLog::Incremental {
                checkpoint_id: self.id,
                distance: 1,
                mutations,
            },
            KeyLog::Incremental {
                checkpoint_id,
                distance,
                ..
            } => KeyLog::Incremental {
                checkpoint_id: *checkpoint_id,
                distance: distance + 1,
                mutations,
            },
        };

        Self::build(commit_id, parents, tree, keys)
    }

    /// Fold the incremental chain into a checkpoint once it is long enough
    ///
    /// Ancestors resolve through `unsaved` before the store, so a cascade
    /// of not-yet-persisted L1s can complete without a round trip. Returns
    /// `self` unchanged below the threshold; otherwise the rebuilt L1 has a
    /// different id.
    pub async fn with_checkpoint_as_necessary<S: Store + Sync>(
        self,
        store: &S,
        unsaved: &HashMap<Id, L1>,
    ) -> Result<L1> {
        let due = matches!(
            &self.keys,
            KeyLog::Incremental { distance, .. } if *distance >= CHECKPOINT_DISTANCE
        );
        if !due {
            return Ok(self);
        }
        let keys = fold_keys(store, unsaved, &self).await?;
        Self::build(
            self.metadata_id,
            self.parents,
            self.map,
            KeyLog::Checkpoint { keys },
        )
    }

    /// All keys visible at this commit, in sorted order
    pub async fn keys<S: Store + Sync>(
        &self,
        store: &S,
        unsaved: &HashMap<Id, L1>,
    ) -> Result<Vec<Key>> {
        Ok(fold_keys(store, unsaved, self).await?.into_iter().collect())
    }

    /// Load an L1 by id, short-circuiting the empty id
    pub async fn load<S: Store + Sync>(store: &S, id: Id) -> Result<L1> {
        if id.is_empty() {
            return Ok(Self::empty());
        }
        let entity = store.load_single(ValueType::L1, id).await?;
        Self::load_checked(id, &entity)
    }

    /// Encode as an entity
    pub fn to_entity(&self) -> Entity {
        let mut map = BTreeMap::new();
        map.insert(SmolStr::new("metadata"), self.metadata_id.to_entity());
        map.insert(
            SmolStr::new("parents"),
            Entity::List(self.parents.iter().map(Id::to_entity).collect()),
        );
        map.insert(SmolStr::new("tree"), self.map.to_entity());

        let keys = match &self.keys {
            KeyLog::Incremental {
                checkpoint_id,
                distance,
                mutations,
            } => {
                let mut m = BTreeMap::new();
                m.insert(SmolStr::new("chk"), checkpoint_id.to_entity());
                m.insert(SmolStr::new("dist"), Entity::number(i64::from(*distance)));
                m.insert(SmolStr::new("mutations"), mutations.to_entity());
                Entity::Map(m)
            }
            KeyLog::Checkpoint { keys } => {
                let mut m = BTreeMap::new();
                m.insert(
                    SmolStr::new("complete"),
                    Entity::List(keys.iter().map(Key::to_entity).collect()),
                );
                Entity::Map(m)
            }
        };
        map.insert(SmolStr::new("keys"), keys);
        Entity::Map(map)
    }

    /// Decode a stored L1 and verify its id matches the requested one
    pub fn load_checked(requested: Id, entity: &Entity) -> Result<L1> {
        let metadata_id = Id::from_entity(entity.attr("metadata")?)?;

        let mut parents = Vec::new();
        for item in entity.attr("parents")?.as_list().map_err(TieredError::from)? {
            parents.push(Id::from_entity(item)?);
        }

        let map = IdMap::from_entity(entity.attr("tree")?, Self::SIZE)?;

        let keys_entity = entity.attr("keys")?;
        let keys = if let Ok(complete) = keys_entity.attr("complete") {
            let mut keys = BTreeSet::new();
            for item in complete.as_list().map_err(TieredError::from)? {
                keys.insert(Key::from_entity(item)?);
            }
            KeyLog::Checkpoint { keys }
        } else {
            let distance = keys_entity.attr("dist")?.as_number().map_err(TieredError::from)?;
            let distance = u32::try_from(distance).map_err(|_| {
                TieredError::corruption(format!("l1 key log distance out of range: {distance}"))
            })?;
            KeyLog::Incremental {
                checkpoint_id: Id::from_entity(keys_entity.attr("chk")?)?,
                distance,
                mutations: KeyMutationList::from_entity(keys_entity.attr("mutations")?)?,
            }
        };

        let l1 = Self::build(metadata_id, parents, map, keys)?;
        if l1.id != requested {
            return Err(TieredError::corruption(format!(
                "l1 {requested} hashed to {}",
                l1.id
            )));
        }
        Ok(l1)
    }
}

async fn resolve_ancestor<S: Store + Sync>(
    store: &S,
    unsaved: &HashMap<Id, L1>,
    id: Id,
) -> Result<L1> {
    if id.is_empty() {
        return Ok(L1::empty());
    }
    if let Some(l1) = unsaved.get(&id) {
        return Ok(l1.clone());
    }
    let entity = store.load_single(ValueType::L1, id).await?;
    L1::load_checked(id, &entity)
}

/// Materialize the complete key set at `start` by walking the incremental
/// chain back to its checkpoint
async fn fold_keys<S: Store + Sync>(
    store: &S,
    unsaved: &HashMap<Id, L1>,
    start: &L1,
) -> Result<BTreeSet<Key>> {
    let (mut increments, walk_budget) = match &start.keys {
        KeyLog::Checkpoint { keys } => return Ok(keys.clone()),
        KeyLog::Incremental {
            distance, mutations, ..
        } => (vec![mutations.clone()], *distance),
    };

    let mut cursor = start.parent_id();
    let mut keys = loop {
        if increments.len() as u32 > walk_budget {
            return Err(TieredError::corruption(format!(
                "key log chain at l1 {} exceeds its recorded distance {walk_budget}",
                start.id
            )));
        }
        let ancestor = resolve_ancestor(store, unsaved, cursor).await?;
        match &ancestor.keys {
            KeyLog::Checkpoint { keys } => break keys.clone(),
            KeyLog::Incremental { mutations, .. } => {
                increments.push(mutations.clone());
                cursor = ancestor.parent_id();
            }
        }
    };

    // Oldest increment first.
    for list in increments.iter().rev() {
        for mutation in list.mutations() {
            match mutation {
                KeyMutation::Addition(key) => {
                    keys.insert(key.clone());
                }
                KeyMutation::Removal(key) => {
                    keys.remove(key);
                }
            }
        }
    }
    Ok(keys)
}
