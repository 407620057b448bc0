//! High-level version-store operations
//!
//! [`TieredVersionStore`] is the surface callers use: reference lifecycle,
//! committing batches of key operations, and reading values and keys
//! through a branch's logical head. Staging follows the same optimistic
//! discipline as the collapse: a commit appends one unsaved entry to the
//! branch record with a conditional update pinning every tree slot it
//! touches, and a rejected condition just means reload and retry.

use crate::branch::{CommitEntry, InternalBranch, UnsavedDelta};
use crate::config::StoreConfig;
use crate::error::{Result, TieredError, TieredErrorKind};
use crate::refs::{InternalRef, InternalTag};
use crate::store::{
    ConditionExpression, ExpressionPath, SaveOp, Store, UpdateClause, UpdateExpression, ValueType,
};
use crate::tiers::{L1, L2, L3};
use crate::values::{InternalCommitMetadata, InternalValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_common::{CommitMeta, Contents, Entity, Id, Key, KeyMutation, KeyMutationList};

/// One key operation inside a commit
#[derive(Debug, Clone)]
pub enum Operation {
    /// Store contents under a key
    Put {
        /// The key to write
        key: Key,
        /// The payload to store
        contents: Contents,
    },
    /// Remove a key
    Delete {
        /// The key to remove
        key: Key,
    },
}

impl Operation {
    /// The key this operation touches
    pub fn key(&self) -> &Key {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

/// Slot positions a key lands on, derived from its stable hash
fn positions(key: &Key) -> (usize, usize) {
    let hash = key.position_hash();
    let l1_pos = (hash % L1::SIZE as u64) as usize;
    let l2_pos = ((hash / L1::SIZE as u64) % L2::SIZE as u64) as usize;
    (l1_pos, l2_pos)
}

/// Git-like version store over a typed KV backend
pub struct TieredVersionStore<S: Store> {
    store: S,
    config: StoreConfig,
}

impl<S: Store + Send + Sync + 'static> TieredVersionStore<S> {
    /// Wrap a store with the given configuration
    pub fn new(store: S, config: StoreConfig) -> Self {
        TieredVersionStore { store, config }
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The active configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Load any reference by name
    pub async fn load_ref(&self, name: &str) -> Result<InternalRef> {
        let entity = self
            .store
            .load_single(ValueType::Ref, Id::of_name(name))
            .await
            .map_err(|e| {
                if e.kind() == TieredErrorKind::NotFound {
                    TieredError::reference_not_found(format!("reference {name:?} not found"))
                } else {
                    e
                }
            })?;
        InternalRef::from_entity(&entity)
    }

    /// Load a branch by name; a tag of the same name is a `NotFound` error
    pub async fn load_branch(&self, name: &str) -> Result<InternalBranch> {
        self.load_ref(name).await?.into_branch()
    }

    /// Create a branch, optionally targeting a persisted L1
    ///
    /// With no target the branch starts at the canonical empty state: one
    /// saved entry pointing at the empty summary.
    pub async fn create_branch(
        &self,
        name: &str,
        target: Option<Id>,
    ) -> Result<InternalBranch> {
        let branch = match target {
            None => InternalBranch::new(name),
            Some(l1_id) => {
                let l1 = L1::load(&self.store, l1_id).await?;
                InternalBranch::with_target(name, &l1)
            }
        };
        let created = self
            .store
            .put_if_absent(SaveOp::new(ValueType::Ref, branch.id(), branch.to_entity()))
            .await?;
        if !created {
            return Err(TieredError::conflict(format!(
                "reference {name:?} already exists"
            )));
        }
        Ok(branch)
    }

    /// Create a tag pinning a persisted L1
    pub async fn create_tag(&self, name: &str, l1_id: Id) -> Result<InternalTag> {
        // The target must exist; a dangling tag would never resolve.
        L1::load(&self.store, l1_id).await?;
        let tag = InternalTag::new(name, l1_id);
        let created = self
            .store
            .put_if_absent(SaveOp::new(ValueType::Ref, tag.id(), tag.to_entity()))
            .await?;
        if !created {
            return Err(TieredError::conflict(format!(
                "reference {name:?} already exists"
            )));
        }
        Ok(tag)
    }

    /// Delete a branch or tag by name
    pub async fn delete_reference(&self, name: &str) -> Result<()> {
        if !self.store.delete(ValueType::Ref, Id::of_name(name)).await? {
            return Err(TieredError::reference_not_found(format!(
                "reference {name:?} not found"
            )));
        }
        Ok(())
    }

    /// Commit a batch of operations to a branch
    ///
    /// Folds the operations into fresh leaf and mid tiers, persists every
    /// content-addressed record, then appends one unsaved entry to the
    /// branch with a conditional update pinning each touched tree slot.
    /// Returns the id of the branch's new head summary after driving the
    /// collapse.
    pub async fn commit(
        &self,
        branch_name: &str,
        meta: &CommitMeta,
        operations: &[Operation],
    ) -> Result<Id> {
        if operations.is_empty() {
            return Err(TieredError::illegal_argument(
                "commit requires at least one operation",
            ));
        }
        let meta_record = InternalCommitMetadata::of(meta.to_bytes()?)?;

        for _attempt in 0..self.config.p2_commit_attempts {
            let branch = self.load_branch(branch_name).await?;
            let state = Arc::new(branch.get_update_state(&self.store).await?);
            state.clone().ensure_available(&self.store, &self.config).await?;
            let tree = state.l1()?.map().clone();

            let mut saves = vec![SaveOp::new(
                ValueType::CommitMetadata,
                meta_record.id(),
                meta_record.to_entity(),
            )];
            let mut l2s: BTreeMap<usize, L2> = BTreeMap::new();
            let mut l3s: BTreeMap<(usize, usize), L3> = BTreeMap::new();
            let mut mutations = Vec::new();

            for op in operations {
                let (l1_pos, l2_pos) = positions(op.key());

                let l2 = match l2s.get(&l1_pos) {
                    Some(l2) => l2.clone(),
                    None => {
                        let l2 = L2::load(&self.store, tree.get(l1_pos)).await?;
                        l2s.insert(l1_pos, l2.clone());
                        l2
                    }
                };
                let l3 = match l3s.get(&(l1_pos, l2_pos)) {
                    Some(l3) => l3.clone(),
                    None => L3::load(&self.store, l2.get(l2_pos)).await?,
                };

                let next = match op {
                    Operation::Put { key, contents } => {
                        let value = InternalValue::of(contents.to_bytes()?)?;
                        saves.push(SaveOp::new(
                            ValueType::Value,
                            value.id(),
                            value.to_entity(),
                        ));
                        mutations.push(KeyMutation::Addition(key.clone()));
                        l3.with(key, value.id())?
                    }
                    Operation::Delete { key } => {
                        if l3.get(key).is_empty() {
                            return Err(TieredError::not_found("key", key));
                        }
                        mutations.push(KeyMutation::Removal(key.clone()));
                        l3.with(key, Id::EMPTY)?
                    }
                };
                l3s.insert((l1_pos, l2_pos), next);
            }

            // Fold the touched leaves back into their mid tiers.
            for ((l1_pos, l2_pos), l3) in &l3s {
                if let Some(current) = l2s.get(l1_pos).cloned() {
                    l2s.insert(*l1_pos, current.with_id(*l2_pos, l3.id())?);
                }
                if !l3.id().is_empty() {
                    saves.push(SaveOp::new(ValueType::L3, l3.id(), l3.to_entity()));
                }
            }

            // One delta per slot that actually moved.
            let mut deltas = Vec::new();
            for (l1_pos, l2) in &l2s {
                let old_id = tree.get(*l1_pos);
                if l2.id() == old_id {
                    continue;
                }
                if !l2.id().is_empty() {
                    saves.push(SaveOp::new(ValueType::L2, l2.id(), l2.to_entity()));
                }
                deltas.push(UnsavedDelta::new(*l1_pos, old_id, l2.id()));
            }

            let entry = CommitEntry::Unsaved {
                id: Id::random(),
                commit: meta_record.id(),
                deltas: deltas.clone(),
                key_mutations: KeyMutationList::of(mutations),
            };

            self.store.save(saves).await?;

            let mut update = UpdateExpression::initial().and(UpdateClause::Append(
                ExpressionPath::name("commits"),
                entry.to_entity(),
            ));
            let mut condition = ConditionExpression::initial()
                .and_equals(ExpressionPath::name("type"), Entity::string("b"));
            for delta in &deltas {
                update = update.and(UpdateClause::Set(
                    ExpressionPath::name("tree").index(delta.position()),
                    delta.new_id().to_entity(),
                ));
                condition = condition.and_equals(
                    ExpressionPath::name("tree").index(delta.position()),
                    delta.old_id().to_entity(),
                );
            }

            let staged = self
                .store
                .update(ValueType::Ref, branch.id(), update, Some(condition))
                .await?;
            let Some(entity) = staged else {
                // A racing writer moved a slot we pinned; start over.
                continue;
            };

            let updated = InternalRef::from_entity(&entity)?.into_branch()?;
            let state = Arc::new(updated.get_update_state(&self.store).await?);
            let head = state.logical_l1().id();
            state.clone().ensure_available(&self.store, &self.config).await?;
            return Ok(head);
        }

        Err(TieredError::conflict(format!(
            "unable to commit to {branch_name:?} after {} attempts, giving up",
            self.config.p2_commit_attempts
        )))
    }

    /// Read the contents stored under a key on a branch
    ///
    /// Replays a dirty intention log in memory; storage is not mutated.
    pub async fn get_value(&self, branch_name: &str, key: &Key) -> Result<Option<Contents>> {
        let branch = self.load_branch(branch_name).await?;
        let state = branch.get_update_state(&self.store).await?;

        let (l1_pos, l2_pos) = positions(key);
        let l2 = L2::load(&self.store, state.logical_l1().map().get(l1_pos)).await?;
        let l3 = L3::load(&self.store, l2.get(l2_pos)).await?;

        let value_id = l3.get(key);
        if value_id.is_empty() {
            return Ok(None);
        }
        let entity = self.store.load_single(ValueType::Value, value_id).await?;
        let value = InternalValue::load_checked(value_id, &entity)?;
        Ok(Some(Contents::from_bytes(value.value())?))
    }

    /// List every key visible on a branch, in sorted order
    pub async fn get_keys(&self, branch_name: &str) -> Result<Vec<Key>> {
        let branch = self.load_branch(branch_name).await?;
        let state = branch.get_update_state(&self.store).await?;
        state
            .logical_l1()
            .keys(&self.store, state.unsaved_l1s())
            .await
    }

    /// Load the commit metadata stored under an id
    pub async fn commit_metadata(&self, id: Id) -> Result<CommitMeta> {
        let entity = self
            .store
            .load_single(ValueType::CommitMetadata, id)
            .await?;
        let record = InternalCommitMetadata::load_checked(id, &entity)?;
        Ok(CommitMeta::from_bytes(record.value())?)
    }
}
