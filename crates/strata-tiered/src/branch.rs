//! Branch records and the intention-log state machine
//!
//! A branch record embeds a short log of commit entries: a saved anchor
//! followed by pending intentions that have not been materialised into
//! persisted L1s yet. Writers append intentions with conditional updates;
//! any party that needs the branch's logical L1 replays the log in memory
//! ([`InternalBranch::get_update_state`]), persists the derived summaries,
//! and then tries to collapse the record back to a single saved pointer
//! through compare-and-set. Losing a collapse race is routine: reload,
//! rebuild the plan against the new anchor, try again.

use crate::config::StoreConfig;
use crate::error::{Result, TieredError};
use crate::refs::{dt_now, InternalRef};
use crate::store::{
    ConditionExpression, ExpressionPath, SaveOp, Store, UpdateClause, UpdateExpression, ValueType,
};
use crate::tiers::L1;
use crate::tree::IdMap;
use smol_str::SmolStr;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_common::{Entity, Id, KeyMutationList};
use tracing::Instrument;

/// A single slot change in the L1 frontier
///
/// Deltas are point-wise invertible, which is what lets a reader rewind a
/// staged record to its saved anchor and replay it forward again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsavedDelta {
    position: usize,
    old_id: Id,
    new_id: Id,
}

impl UnsavedDelta {
    /// Describe a slot moving from `old_id` to `new_id`
    pub fn new(position: usize, old_id: Id, new_id: Id) -> Self {
        debug_assert!(position < L1::SIZE);
        UnsavedDelta {
            position,
            old_id,
            new_id,
        }
    }

    /// The changed slot
    pub fn position(&self) -> usize {
        self.position
    }

    /// The slot value before the commit
    pub fn old_id(&self) -> Id {
        self.old_id
    }

    /// The slot value after the commit
    pub fn new_id(&self) -> Id {
        self.new_id
    }

    /// Apply the delta to a frontier
    pub fn apply(&self, tree: &IdMap) -> IdMap {
        tree.with_id(self.position, self.new_id)
    }

    /// Undo the delta on a frontier
    pub fn reverse(&self, tree: &IdMap) -> IdMap {
        tree.with_id(self.position, self.old_id)
    }

    fn to_entity(&self) -> Entity {
        let mut map = BTreeMap::new();
        map.insert(SmolStr::new("position"), Entity::number(self.position as i64));
        map.insert(SmolStr::new("old"), self.old_id.to_entity());
        map.insert(SmolStr::new("new"), self.new_id.to_entity());
        Entity::Map(map)
    }

    fn from_entity(entity: &Entity) -> Result<Self> {
        let position = entity.attr("position")?.as_number().map_err(TieredError::from)?;
        let position = usize::try_from(position)
            .ok()
            .filter(|p| *p < L1::SIZE)
            .ok_or_else(|| {
                TieredError::corruption(format!("delta position out of range: {position}"))
            })?;
        Ok(UnsavedDelta {
            position,
            old_id: Id::from_entity(entity.attr("old")?)?,
            new_id: Id::from_entity(entity.attr("new")?)?,
        })
    }
}

/// One entry of a branch's commit log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitEntry {
    /// A materialised commit: `id` names a persisted L1
    Saved {
        /// Id of the persisted L1
        id: Id,
        /// Commit metadata id
        commit: Id,
        /// Parent L1 id
        parent: Id,
    },
    /// A pending intention; `id` is a random placeholder used by
    /// optimistic conditions to tell racing writers apart
    Unsaved {
        /// Random placeholder id
        id: Id,
        /// Commit metadata id
        commit: Id,
        /// Frontier changes this commit stages
        deltas: Vec<UnsavedDelta>,
        /// Key changes this commit stages
        key_mutations: KeyMutationList,
    },
}

impl CommitEntry {
    /// The entry's id: a persisted L1 id, or a random placeholder
    pub fn id(&self) -> Id {
        match self {
            CommitEntry::Saved { id, .. } | CommitEntry::Unsaved { id, .. } => *id,
        }
    }

    /// Whether the entry refers to a persisted L1
    pub fn is_saved(&self) -> bool {
        matches!(self, CommitEntry::Saved { .. })
    }

    /// Encode as an entity
    ///
    /// Saved entries carry a `parent` attribute; unsaved entries carry
    /// `deltas` and `keys` instead. The collapse update rewrites one shape
    /// into the other in place.
    pub fn to_entity(&self) -> Entity {
        let mut map = BTreeMap::new();
        match self {
            CommitEntry::Saved { id, commit, parent } => {
                map.insert(SmolStr::new("id"), id.to_entity());
                map.insert(SmolStr::new("commit"), commit.to_entity());
                map.insert(SmolStr::new("parent"), parent.to_entity());
            }
            CommitEntry::Unsaved {
                id,
                commit,
                deltas,
                key_mutations,
            } => {
                map.insert(SmolStr::new("id"), id.to_entity());
                map.insert(SmolStr::new("commit"), commit.to_entity());
                map.insert(
                    SmolStr::new("deltas"),
                    Entity::List(deltas.iter().map(UnsavedDelta::to_entity).collect()),
                );
                map.insert(SmolStr::new("keys"), key_mutations.to_entity());
            }
        }
        Entity::Map(map)
    }

    /// Decode an entry, dispatching on the attributes present
    pub fn from_entity(entity: &Entity) -> Result<Self> {
        let id = Id::from_entity(entity.attr("id")?)?;
        let commit = Id::from_entity(entity.attr("commit")?)?;
        if let Ok(parent) = entity.attr("parent") {
            return Ok(CommitEntry::Saved {
                id,
                commit,
                parent: Id::from_entity(parent)?,
            });
        }
        let mut deltas = Vec::new();
        for item in entity.attr("deltas")?.as_list().map_err(TieredError::from)? {
            deltas.push(UnsavedDelta::from_entity(item)?);
        }
        Ok(CommitEntry::Unsaved {
            id,
            commit,
            deltas,
            key_mutations: KeyMutationList::from_entity(entity.attr("keys")?)?,
        })
    }
}

/// A scheduled removal of one log position, pinned to the id observed there
#[derive(Debug, Clone)]
struct Delete {
    position: usize,
    id: Id,
}

/// The state of a branch as stored
///
/// Invariants, enforced on decode:
/// - the log is non-empty and starts with a saved anchor
/// - every saved entry precedes every unsaved entry
/// - `tree` is the frontier after all unsaved deltas
/// - the record id equals the hash of the branch name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalBranch {
    id: Id,
    name: SmolStr,
    metadata: Id,
    tree: IdMap,
    commits: Vec<CommitEntry>,
    dt: i64,
}

impl InternalBranch {
    /// Create an empty branch
    pub fn new(name: impl Into<SmolStr>) -> Self {
        let name = name.into();
        InternalBranch {
            id: Id::of_name(&name),
            name,
            metadata: Id::EMPTY,
            tree: L1::empty().map().clone(),
            commits: vec![CommitEntry::Saved {
                id: Id::EMPTY,
                commit: Id::EMPTY,
                parent: Id::EMPTY,
            }],
            dt: dt_now(),
        }
    }

    /// Create a branch targeting an already-persisted L1
    pub fn with_target(name: impl Into<SmolStr>, target: &L1) -> Self {
        let name = name.into();
        InternalBranch {
            id: Id::of_name(&name),
            name,
            metadata: Id::EMPTY,
            tree: target.map().clone(),
            commits: vec![CommitEntry::Saved {
                id: target.id(),
                commit: target.metadata_id(),
                parent: target.parent_id(),
            }],
            dt: dt_now(),
        }
    }

    /// The branch's name-derived id
    pub fn id(&self) -> Id {
        self.id
    }

    /// The branch's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation timestamp, milliseconds since the epoch
    pub fn dt(&self) -> i64 {
        self.dt
    }

    /// The head frontier, all unsaved deltas applied
    pub fn tree(&self) -> &IdMap {
        &self.tree
    }

    /// The commit log, saved anchor first
    pub fn commits(&self) -> &[CommitEntry] {
        &self.commits
    }

    /// The most recent saved entry's id, reachable without replaying
    ///
    /// Garbage collection keys off this anchor.
    pub fn get_last_defined_parent(&self) -> Result<Id> {
        self.commits
            .iter()
            .rev()
            .find(|entry| entry.is_saved())
            .map(CommitEntry::id)
            .ok_or_else(|| TieredError::corruption("intention log has no saved anchor"))
    }

    /// Compute the work needed to bring this record to a clean state
    ///
    /// Partitions the log, rewinds the head frontier to the saved anchor,
    /// replays every intention to derive the pending L1s, and schedules the
    /// log positions to drop. Both directions are checked: a frontier that
    /// fails to rewind to the anchor, or to replay back to the stored head,
    /// is corruption.
    pub async fn get_update_state<S: Store + Sync>(&self, store: &S) -> Result<UpdateState> {
        struct Pending<'a> {
            id: Id,
            commit: Id,
            deltas: &'a [UnsavedDelta],
            mutations: &'a KeyMutationList,
        }

        let mut pending: Vec<Pending<'_>> = Vec::new();
        let mut last_saved: Option<&CommitEntry> = None;
        let mut unsaved_start_offset = 0usize;
        for entry in &self.commits {
            match entry {
                CommitEntry::Saved { .. } => {
                    if !pending.is_empty() {
                        return Err(TieredError::corruption(
                            "saved commit entry after unsaved entries",
                        ));
                    }
                    last_saved = Some(entry);
                    unsaved_start_offset += 1;
                }
                CommitEntry::Unsaved {
                    id,
                    commit,
                    deltas,
                    key_mutations,
                } => {
                    if last_saved.is_none() {
                        return Err(TieredError::corruption("intention log has no saved anchor"));
                    }
                    pending.push(Pending {
                        id: *id,
                        commit: *commit,
                        deltas,
                        mutations: key_mutations,
                    });
                }
            }
        }
        let last_saved = last_saved
            .ok_or_else(|| TieredError::corruption("intention log has no saved anchor"))?;

        // Only the tail position survives the collapse.
        let mut deletes = Vec::new();
        for (position, entry) in self.commits.iter().enumerate().take(self.commits.len() - 1) {
            deletes.push(Delete {
                position,
                id: entry.id(),
            });
        }

        let last_saved_l1 = L1::load(store, last_saved.id()).await?;

        if pending.is_empty() {
            let final_l1_random_id = last_saved_l1.id();
            return UpdateState::new(
                Vec::new(),
                deletes,
                last_saved_l1,
                0,
                final_l1_random_id,
                self.clone(),
                HashMap::new(),
            );
        }

        // Rewind the head frontier to the saved anchor.
        let mut tree = self.tree.clone();
        for entry in pending.iter().rev() {
            for delta in entry.deltas.iter().rev() {
                tree = delta.reverse(&tree);
            }
        }
        if &tree != last_saved_l1.map() {
            return Err(TieredError::corruption(
                "rewound frontier does not match the last saved summary",
            ));
        }

        // Replay forward, deriving one L1 per intention.
        let mut last_l1 = last_saved_l1;
        let mut last_pos = unsaved_start_offset;
        let mut last_id = Id::EMPTY;
        let mut saves = Vec::new();
        let mut unsaved_l1s: HashMap<Id, L1> = HashMap::new();
        let last_index = pending.len() - 1;
        for (i, entry) in pending.iter().enumerate() {
            for delta in entry.deltas {
                tree = delta.apply(&tree);
            }

            unsaved_l1s.insert(last_l1.id(), last_l1.clone());

            last_l1 = last_l1
                .get_child_with_tree(entry.commit, tree.clone(), entry.mutations.clone())?
                .with_checkpoint_as_necessary(store, &unsaved_l1s)
                .await?;

            saves.push(SaveOp::new(ValueType::L1, last_l1.id(), last_l1.to_entity()));
            last_id = entry.id;
            if i != last_index {
                last_pos += 1;
            }
        }

        // The replayed frontier must land exactly on the stored head.
        if tree != self.tree {
            return Err(TieredError::corruption(
                "replayed frontier does not match the branch head",
            ));
        }

        UpdateState::new(
            saves,
            deletes,
            last_l1,
            last_pos,
            last_id,
            self.clone(),
            unsaved_l1s,
        )
    }

    /// Encode as an entity
    pub fn to_entity(&self) -> Entity {
        let mut map = BTreeMap::new();
        map.insert(SmolStr::new("type"), Entity::string("b"));
        map.insert(SmolStr::new("id"), self.id.to_entity());
        map.insert(SmolStr::new("name"), Entity::String(self.name.clone()));
        map.insert(SmolStr::new("metadata"), self.metadata.to_entity());
        map.insert(SmolStr::new("tree"), self.tree.to_entity());
        map.insert(
            SmolStr::new("commits"),
            Entity::List(self.commits.iter().map(CommitEntry::to_entity).collect()),
        );
        map.insert(SmolStr::new("dt"), Entity::number(self.dt));
        Entity::Map(map)
    }

    /// Decode a stored branch record, enforcing every record invariant
    pub fn from_entity(entity: &Entity) -> Result<Self> {
        let name = entity.attr("name")?.as_string().map_err(TieredError::from)?.clone();
        let id = Id::from_entity(entity.attr("id")?)?;
        if id != Id::of_name(&name) {
            return Err(TieredError::corruption(format!(
                "branch id {id} does not match name {name:?}"
            )));
        }

        let mut commits = Vec::new();
        for item in entity.attr("commits")?.as_list().map_err(TieredError::from)? {
            commits.push(CommitEntry::from_entity(item)?);
        }
        if commits.is_empty() {
            return Err(TieredError::corruption("branch has an empty commit log"));
        }
        if !commits[0].is_saved() {
            return Err(TieredError::corruption("intention log has no saved anchor"));
        }
        let mut seen_unsaved = false;
        for entry in &commits {
            if entry.is_saved() {
                if seen_unsaved {
                    return Err(TieredError::corruption(
                        "saved commit entry after unsaved entries",
                    ));
                }
            } else {
                seen_unsaved = true;
            }
        }

        Ok(InternalBranch {
            id,
            name,
            metadata: Id::from_entity(entity.attr("metadata")?)?,
            tree: IdMap::from_entity(entity.attr("tree")?, L1::SIZE)?,
            commits,
            dt: entity.attr("dt")?.as_number().map_err(TieredError::from)?,
        })
    }
}

/// The plan computed from a loaded branch record
///
/// Describes which L1s to persist, which log positions to drop, and which
/// tail to rewrite into the new saved anchor. The save step runs at most
/// once per plan, no matter how many callers share it.
#[derive(Debug)]
pub struct UpdateState {
    saved: AtomicBool,
    save_guard: tokio::sync::Mutex<()>,
    saves: Vec<SaveOp>,
    deletes: Vec<Delete>,
    final_l1: L1,
    final_l1_position: usize,
    final_l1_random_id: Id,
    initial_branch: InternalBranch,
    unsaved_l1s: HashMap<Id, L1>,
}

impl UpdateState {
    #[allow(clippy::too_many_arguments)]
    fn new(
        saves: Vec<SaveOp>,
        deletes: Vec<Delete>,
        final_l1: L1,
        final_l1_position: usize,
        final_l1_random_id: Id,
        initial_branch: InternalBranch,
        unsaved_l1s: HashMap<Id, L1>,
    ) -> Result<Self> {
        if final_l1_position == 0 && !deletes.is_empty() {
            return Err(TieredError::corruption(
                "clean log position cannot carry scheduled deletes",
            ));
        }
        Ok(UpdateState {
            saved: AtomicBool::new(false),
            save_guard: tokio::sync::Mutex::new(()),
            saves,
            deletes,
            final_l1,
            final_l1_position,
            final_l1_random_id,
            initial_branch,
            unsaved_l1s,
        })
    }

    /// The branch record this plan was computed from
    pub fn initial_branch(&self) -> &InternalBranch {
        &self.initial_branch
    }

    /// The logical L1 implied by the record, which may not be persisted yet
    ///
    /// Read paths replay a dirty record through this without touching
    /// storage; anything that hands the id out must call
    /// [`UpdateState::ensure_available`] first.
    pub fn logical_l1(&self) -> &L1 {
        &self.final_l1
    }

    /// Not-yet-persisted ancestors derived by the replay, keyed by id
    pub fn unsaved_l1s(&self) -> &HashMap<Id, L1> {
        &self.unsaved_l1s
    }

    /// The final L1 once [`UpdateState::ensure_available`] has persisted it
    pub fn l1(&self) -> Result<&L1> {
        if !self.saved.load(Ordering::Acquire) {
            return Err(TieredError::illegal_argument(
                "ensure_available must run before reading the branch L1",
            ));
        }
        Ok(&self.final_l1)
    }

    /// Persist the derived L1s if they are not already saved
    ///
    /// Safe to call any number of times from any number of tasks; the
    /// underlying store save happens at most once.
    pub async fn save<S: Store + Sync>(&self, store: &S) -> Result<()> {
        if self.saved.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.save_guard.lock().await;
        if self.saved.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.saves.is_empty() {
            store.save(self.saves.clone()).await?;
        }
        self.saved.store(true, Ordering::Release);
        Ok(())
    }

    /// Make the derived L1s durable and schedule the log collapse
    ///
    /// Returns once the L1s referenced by this plan are persisted. The
    /// collapse itself runs on a spawned task; with `wait_on_collapse` set
    /// the call blocks on it and surfaces its error, otherwise the task
    /// finishes in the background and a later writer picks up anything it
    /// leaves behind. Dropping the caller never cancels the collapse.
    pub async fn ensure_available<S>(
        self: Arc<Self>,
        store: &S,
        config: &StoreConfig,
    ) -> Result<()>
    where
        S: Store + Send + Sync + 'static,
    {
        self.save(store).await?;

        if self.saves.is_empty() {
            return Ok(());
        }

        let task = tokio::spawn(collapse_intention_log(
            Arc::clone(&self),
            store.clone(),
            config.clone(),
        ));

        if !config.wait_on_collapse {
            return Ok(());
        }

        match task.await {
            Ok(result) => result.map(|_| ()),
            Err(join) => Err(TieredError::new(
                crate::error::TieredErrorKind::Store,
                Some(Box::new(join)),
            )
            .with_context("collapse task failed")),
        }
    }

    /// The conditional update that collapses the log to its tail
    ///
    /// Every scheduled delete pins the exact id observed at its position,
    /// and the tail pins the random placeholder, so a record touched by any
    /// racing writer fails the whole conjunction deterministically.
    fn collapse_expressions(&self) -> (UpdateExpression, ConditionExpression) {
        let mut update = UpdateExpression::initial();
        let mut condition = ConditionExpression::initial();

        for delete in &self.deletes {
            let path = ExpressionPath::name("commits").index(delete.position);
            condition = condition.and_equals(path.clone().field("id"), delete.id.to_entity());
            update = update.and(UpdateClause::Remove(path));
        }

        let last = ExpressionPath::name("commits").index(self.final_l1_position);
        condition = condition.and_equals(
            last.clone().field("id"),
            self.final_l1_random_id.to_entity(),
        );

        update = update
            .and(UpdateClause::Remove(last.clone().field("deltas")))
            .and(UpdateClause::Remove(last.clone().field("keys")))
            .and(UpdateClause::Set(
                last.clone().field("parent"),
                self.final_l1.parent_id().to_entity(),
            ))
            .and(UpdateClause::Set(
                last.field("id"),
                self.final_l1.id().to_entity(),
            ));

        (update, condition)
    }
}

/// One collapse attempt: save (no-op after the first), then the
/// conditional rewrite
async fn try_collapse<S: Store + Sync>(
    state: &UpdateState,
    store: &S,
) -> Result<Option<InternalBranch>> {
    state.save(store).await?;

    let (update, condition) = state.collapse_expressions();
    match store
        .update(
            ValueType::Ref,
            state.initial_branch.id(),
            update,
            Some(condition),
        )
        .await?
    {
        Some(entity) => Ok(Some(InternalRef::from_entity(&entity)?.into_branch()?)),
        None => Ok(None),
    }
}

/// Collapse a branch's intention log, reattempting a bounded number of
/// times
///
/// Each attempt re-saves (a no-op after the first pass) and issues the
/// conditional rewrite. A rejected condition means the record moved:
/// reload it, recompute the plan against the new anchor, and go again. A
/// reference that is no longer a branch is a `NotFound` error; running out
/// of attempts is a `Conflict`.
pub async fn collapse_intention_log<S>(
    mut state: Arc<UpdateState>,
    store: S,
    config: StoreConfig,
) -> Result<InternalBranch>
where
    S: Store + Send + Sync + 'static,
{
    let span = if config.enable_tracing {
        tracing::info_span!(
            "collapse_intention_log",
            operation = "CollapseIntentionLog",
            branch = %state.initial_branch.name(),
        )
    } else {
        tracing::Span::none()
    };

    async move {
        let branch_id = state.initial_branch.id();
        for attempt in 0..config.p2_commit_attempts {
            let attempt_span = if config.enable_tracing {
                tracing::debug_span!(
                    "collapse_attempt",
                    attempt,
                    num_saves = state.saves.len(),
                    num_deletes = state.deletes.len(),
                    completed = tracing::field::Empty,
                )
            } else {
                tracing::Span::none()
            };

            let updated = try_collapse(&state, &store)
                .instrument(attempt_span.clone())
                .await?;

            if let Some(updated) = updated {
                attempt_span.record("completed", true);
                tracing::debug!(
                    attempt,
                    l1 = %state.final_l1.id(),
                    parent = %state.final_l1.parent_id(),
                    position = state.final_l1_position,
                    "collapse update applied"
                );
                return Ok(updated);
            }

            tracing::debug!(
                attempt,
                l1 = %state.final_l1.id(),
                "collapse update rejected, reloading branch"
            );

            // Something moved underneath us; rebuild the plan.
            let entity = store.load_single(ValueType::Ref, branch_id).await?;
            let branch = match InternalRef::from_entity(&entity)? {
                InternalRef::Branch(branch) => branch,
                InternalRef::Tag(tag) => {
                    return Err(TieredError::reference_not_found(format!(
                        "failure while collapsing log: former branch {:?} is now a tag",
                        tag.name()
                    )));
                }
            };
            state = Arc::new(branch.get_update_state(&store).await?);
        }

        Err(TieredError::conflict(format!(
            "unable to collapse intention log after {} attempts, giving up",
            config.p2_commit_attempts
        )))
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use strata_common::{Key, KeyMutation};

    fn unsaved_entry(seed: &str, deltas: Vec<UnsavedDelta>) -> CommitEntry {
        CommitEntry::Unsaved {
            id: Id::random(),
            commit: Id::of_name(seed),
            deltas,
            key_mutations: KeyMutationList::of(vec![KeyMutation::Addition(
                Key::of([seed]).unwrap(),
            )]),
        }
    }

    fn staged_branch(entries: Vec<CommitEntry>) -> InternalBranch {
        // Assemble a record the way a staging writer would leave it: the
        // head frontier carries every delta, the log carries the entries.
        let clean = InternalBranch::new("main");
        let mut tree = clean.tree().clone();
        for entry in &entries {
            if let CommitEntry::Unsaved { deltas, .. } = entry {
                for delta in deltas {
                    tree = delta.apply(&tree);
                }
            }
        }
        let mut commits = clean.commits().to_vec();
        commits.extend(entries);

        let mut entity = clean.to_entity();
        if let Entity::Map(map) = &mut entity {
            map.insert(SmolStr::new("tree"), tree.to_entity());
            map.insert(
                SmolStr::new("commits"),
                Entity::List(commits.iter().map(CommitEntry::to_entity).collect()),
            );
        }
        InternalBranch::from_entity(&entity).unwrap()
    }

    #[test]
    fn new_branch_is_clean_and_empty() {
        let branch = InternalBranch::new("main");
        assert_eq!(branch.id(), Id::of_name("main"));
        assert_eq!(
            branch.commits(),
            &[CommitEntry::Saved {
                id: Id::EMPTY,
                commit: Id::EMPTY,
                parent: Id::EMPTY,
            }]
        );
        assert_eq!(branch.tree(), L1::empty().map());
        assert_eq!(branch.get_last_defined_parent().unwrap(), Id::EMPTY);
    }

    #[test]
    fn entity_round_trip_with_staged_entries() {
        let branch = staged_branch(vec![unsaved_entry(
            "c1",
            vec![UnsavedDelta::new(3, Id::EMPTY, Id::of_name("l2"))],
        )]);
        let decoded = InternalBranch::from_entity(&branch.to_entity()).unwrap();
        assert_eq!(decoded, branch);
    }

    #[test]
    fn decode_rejects_saved_after_unsaved() {
        let branch = staged_branch(vec![unsaved_entry(
            "c1",
            vec![UnsavedDelta::new(3, Id::EMPTY, Id::of_name("l2"))],
        )]);
        let mut entity = branch.to_entity();
        if let Entity::Map(map) = &mut entity {
            let commits = map.get_mut("commits").unwrap().as_list_mut().unwrap();
            commits.push(
                CommitEntry::Saved {
                    id: Id::of_name("x"),
                    commit: Id::EMPTY,
                    parent: Id::EMPTY,
                }
                .to_entity(),
            );
        }
        let err = InternalBranch::from_entity(&entity).unwrap_err();
        assert_eq!(err.kind(), crate::error::TieredErrorKind::Corruption);
    }

    #[test]
    fn decode_rejects_missing_anchor() {
        let branch = staged_branch(vec![unsaved_entry(
            "c1",
            vec![UnsavedDelta::new(3, Id::EMPTY, Id::of_name("l2"))],
        )]);
        let mut entity = branch.to_entity();
        if let Entity::Map(map) = &mut entity {
            let commits = map.get_mut("commits").unwrap().as_list_mut().unwrap();
            commits.remove(0);
        }
        let err = InternalBranch::from_entity(&entity).unwrap_err();
        assert_eq!(err.kind(), crate::error::TieredErrorKind::Corruption);
    }

    #[tokio::test]
    async fn update_state_of_clean_branch_has_no_work() {
        let store = MemoryStore::new();
        let branch = InternalBranch::new("main");
        let state = branch.get_update_state(&store).await.unwrap();
        assert!(state.saves.is_empty());
        assert!(state.deletes.is_empty());
        assert!(state.logical_l1().id().is_empty());
    }

    #[tokio::test]
    async fn update_state_derives_one_l1_per_intention() {
        let store = MemoryStore::new();
        let branch = staged_branch(vec![
            unsaved_entry("c1", vec![UnsavedDelta::new(3, Id::EMPTY, Id::of_name("a"))]),
            unsaved_entry("c2", vec![UnsavedDelta::new(7, Id::EMPTY, Id::of_name("b"))]),
        ]);

        let state = branch.get_update_state(&store).await.unwrap();
        assert_eq!(state.saves.len(), 2);
        assert_eq!(state.deletes.len(), 2);
        assert_eq!(state.final_l1_position, 2);
        assert_eq!(state.logical_l1().map(), branch.tree());
        // The tail's placeholder is what the collapse condition pins.
        assert_eq!(state.final_l1_random_id, branch.commits()[2].id());
    }

    #[tokio::test]
    async fn update_state_rejects_inconsistent_frontier() {
        let store = MemoryStore::new();
        let branch = staged_branch(vec![unsaved_entry(
            "c1",
            vec![UnsavedDelta::new(3, Id::EMPTY, Id::of_name("a"))],
        )]);

        // Corrupt the head frontier so the rewind cannot reach the anchor.
        let mut entity = branch.to_entity();
        if let Entity::Map(map) = &mut entity {
            let tree = IdMap::new(L1::SIZE).with_id(9, Id::of_name("bogus"));
            map.insert(SmolStr::new("tree"), tree.to_entity());
        }
        let branch = InternalBranch::from_entity(&entity).unwrap();

        let err = branch.get_update_state(&store).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::TieredErrorKind::Corruption);
    }

    #[tokio::test]
    async fn l1_is_gated_on_save() {
        let store = MemoryStore::new();
        let branch = staged_branch(vec![unsaved_entry(
            "c1",
            vec![UnsavedDelta::new(3, Id::EMPTY, Id::of_name("a"))],
        )]);
        let state = branch.get_update_state(&store).await.unwrap();

        assert!(state.l1().is_err());
        state.save(&store).await.unwrap();
        assert_eq!(state.l1().unwrap().id(), state.logical_l1().id());
    }

    proptest! {
        // Rewind-apply identity: reversing all deltas from the head and
        // replaying them forward reproduces the head frontier exactly.
        #[test]
        fn rewind_apply_identity(
            changes in proptest::collection::vec((0usize..L1::SIZE, 1u8..255), 1..24)
        ) {
            let mut tree = IdMap::new(L1::SIZE);
            let mut deltas = Vec::new();
            for (position, seed) in changes {
                let new_id = Id::hash_bytes(&[seed]);
                deltas.push(UnsavedDelta::new(position, tree.get(position), new_id));
                tree = tree.with_id(position, new_id);
            }
            let head = tree.clone();

            let mut rewound = head.clone();
            for delta in deltas.iter().rev() {
                rewound = delta.reverse(&rewound);
            }
            prop_assert_eq!(&rewound, &IdMap::new(L1::SIZE));

            let mut replayed = rewound;
            for delta in &deltas {
                replayed = delta.apply(&replayed);
            }
            prop_assert_eq!(replayed, head);
        }
    }
}
