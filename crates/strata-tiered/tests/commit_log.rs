//! Intention-log collapse scenarios driven through the public API
//!
//! Commits are staged the way a writer leaves them in storage: an unsaved
//! entry appended to the branch record with a conditional update, tree
//! slots rewritten in the same step. Collapse behavior is then observed
//! through `ensure_available` and the store contents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_common::{Entity, Id, Key, KeyMutation, KeyMutationList};
use strata_tiered::store::{
    ConditionExpression, ExpressionPath, UpdateClause, UpdateExpression,
};
use strata_tiered::{
    CommitEntry, InternalBranch, InternalRef, MemoryStore, SaveOp, Store, StoreConfig,
    TieredErrorKind, UnsavedDelta, ValueType, L1,
};

async fn create_branch(store: &MemoryStore, name: &str) -> InternalBranch {
    let branch = InternalBranch::new(name);
    assert!(
        store
            .put_if_absent(SaveOp::new(ValueType::Ref, branch.id(), branch.to_entity()))
            .await
            .unwrap()
    );
    branch
}

async fn load_branch(store: &impl Store, id: Id) -> InternalBranch {
    let entity = store.load_single(ValueType::Ref, id).await.unwrap();
    InternalRef::from_entity(&entity)
        .unwrap()
        .into_branch()
        .unwrap()
}

/// Append one unsaved entry to the stored branch record, the way the
/// staging path does it: conditional on every touched tree slot.
async fn stage(
    store: &impl Store,
    branch: &InternalBranch,
    deltas: Vec<UnsavedDelta>,
    seed: &str,
) -> InternalBranch {
    let entry = CommitEntry::Unsaved {
        id: Id::random(),
        commit: Id::of_name(seed),
        deltas: deltas.clone(),
        key_mutations: KeyMutationList::of(vec![KeyMutation::Addition(
            Key::of([seed]).unwrap(),
        )]),
    };

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

    let entity = store
        .update(ValueType::Ref, branch.id(), update, Some(condition))
        .await
        .unwrap()
        .expect("staging update should apply");
    InternalRef::from_entity(&entity)
        .unwrap()
        .into_branch()
        .unwrap()
}

/// Store wrapper that counts saves and updates, and can reject every
/// conditional update to starve the retry loop.
#[derive(Clone)]
struct InstrumentedStore {
    inner: MemoryStore,
    saves: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    reject_updates: bool,
}

impl InstrumentedStore {
    fn wrapping(inner: MemoryStore) -> Self {
        InstrumentedStore {
            inner,
            saves: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(AtomicUsize::new(0)),
            reject_updates: false,
        }
    }

    fn rejecting_updates(inner: MemoryStore) -> Self {
        InstrumentedStore {
            reject_updates: true,
            ..Self::wrapping(inner)
        }
    }

    fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl Store for InstrumentedStore {
    async fn load_single(&self, value_type: ValueType, id: Id) -> strata_tiered::Result<Entity> {
        self.inner.load_single(value_type, id).await
    }

    async fn load_multi(
        &self,
        value_type: ValueType,
        ids: &[Id],
    ) -> strata_tiered::Result<Vec<Option<Entity>>> {
        self.inner.load_multi(value_type, ids).await
    }

    async fn save(&self, ops: Vec<SaveOp>) -> strata_tiered::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(ops).await
    }

    async fn put_if_absent(&self, op: SaveOp) -> strata_tiered::Result<bool> {
        self.inner.put_if_absent(op).await
    }

    async fn update(
        &self,
        value_type: ValueType,
        id: Id,
        update: UpdateExpression,
        condition: Option<ConditionExpression>,
    ) -> strata_tiered::Result<Option<Entity>> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.reject_updates {
            return Ok(None);
        }
        self.inner.update(value_type, id, update, condition).await
    }

    async fn delete(&self, value_type: ValueType, id: Id) -> strata_tiered::Result<bool> {
        self.inner.delete(value_type, id).await
    }
}

#[tokio::test]
async fn single_commit_collapse() {
    let store = MemoryStore::new();
    let config = StoreConfig::default();
    let branch = create_branch(&store, "main").await;

    // One intention carrying two deltas.
    let staged = stage(
        &store,
        &branch,
        vec![
            UnsavedDelta::new(1, Id::EMPTY, Id::of_name("l2-a")),
            UnsavedDelta::new(5, Id::EMPTY, Id::of_name("l2-b")),
        ],
        "c1",
    )
    .await;
    assert_eq!(staged.commits().len(), 2);

    let state = Arc::new(staged.get_update_state(&store).await.unwrap());
    let expected_l1 = state.logical_l1().id();
    state.clone().ensure_available(&store, &config).await.unwrap();

    // The derived summary is durable and matches the plan.
    assert!(store.contains(ValueType::L1, expected_l1));
    assert_eq!(state.l1().unwrap().id(), expected_l1);

    // The record is clean: one saved entry naming the new summary.
    let collapsed = load_branch(&store, branch.id()).await;
    assert_eq!(collapsed.commits().len(), 1);
    assert_eq!(
        collapsed.commits()[0],
        CommitEntry::Saved {
            id: expected_l1,
            commit: Id::of_name("c1"),
            parent: Id::EMPTY,
        }
    );
    assert_eq!(collapsed.tree(), staged.tree());
    assert_eq!(collapsed.get_last_defined_parent().unwrap(), expected_l1);
}

#[tokio::test]
async fn collapse_with_tracing_enabled() {
    let store = MemoryStore::new();
    let config = StoreConfig {
        enable_tracing: true,
        ..StoreConfig::default()
    };
    let branch = create_branch(&store, "main").await;
    let staged = stage(
        &store,
        &branch,
        vec![UnsavedDelta::new(4, Id::EMPTY, Id::of_name("l2"))],
        "c1",
    )
    .await;

    let state = Arc::new(staged.get_update_state(&store).await.unwrap());
    state.clone().ensure_available(&store, &config).await.unwrap();

    assert_eq!(load_branch(&store, branch.id()).await.commits().len(), 1);
}

#[tokio::test]
async fn two_writer_race_converges() {
    let inner = MemoryStore::new();
    let config = StoreConfig::default();
    let branch = create_branch(&inner, "main").await;

    // Writer A stages and computes its plan.
    let staged_a = stage(
        &inner,
        &branch,
        vec![UnsavedDelta::new(1, Id::EMPTY, Id::of_name("l2-a"))],
        "a",
    )
    .await;
    let state_a = Arc::new(staged_a.get_update_state(&inner).await.unwrap());

    // Writer B stages on top before A collapses.
    let staged_b = stage(
        &inner,
        &staged_a,
        vec![UnsavedDelta::new(2, Id::EMPTY, Id::of_name("l2-b"))],
        "b",
    )
    .await;
    let state_b = Arc::new(staged_b.get_update_state(&inner).await.unwrap());

    let store = InstrumentedStore::wrapping(inner);

    // A wins its round outright; B loses once, reloads, and wins the next.
    state_a.clone().ensure_available(&store, &config).await.unwrap();
    state_b.clone().ensure_available(&store, &config).await.unwrap();
    assert_eq!(store.update_count(), 3);

    let collapsed = load_branch(&store, branch.id()).await;
    assert_eq!(collapsed.commits().len(), 1);
    assert!(collapsed.commits()[0].is_saved());

    // The final head is B's summary, derived on top of A's.
    let head = L1::load(&store, collapsed.commits()[0].id()).await.unwrap();
    assert_eq!(head.id(), state_b.logical_l1().id());
    assert_eq!(head.parent_id(), state_a.logical_l1().id());
    assert_eq!(head.map(), staged_b.tree());
}

#[tokio::test]
async fn retry_budget_exhaustion_is_conflict() {
    let inner = MemoryStore::new();
    let config = StoreConfig::default();
    let branch = create_branch(&inner, "main").await;
    let staged = stage(
        &inner,
        &branch,
        vec![UnsavedDelta::new(0, Id::EMPTY, Id::of_name("l2"))],
        "c1",
    )
    .await;

    let store = InstrumentedStore::rejecting_updates(inner);
    let state = Arc::new(staged.get_update_state(&store).await.unwrap());

    let err = state.clone().ensure_available(&store, &config).await.unwrap_err();
    assert_eq!(err.kind(), TieredErrorKind::Conflict);
    assert_eq!(store.update_count(), config.p2_commit_attempts as usize);
}

#[tokio::test]
async fn save_runs_at_most_once_per_plan() {
    let inner = MemoryStore::new();
    let config = StoreConfig::default();
    let branch = create_branch(&inner, "main").await;
    let staged = stage(
        &inner,
        &branch,
        vec![UnsavedDelta::new(0, Id::EMPTY, Id::of_name("l2"))],
        "c1",
    )
    .await;

    let store = InstrumentedStore::wrapping(inner);
    let state = Arc::new(staged.get_update_state(&store).await.unwrap());

    // Hammer save from several tasks, then run the full procedure twice.
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let state = Arc::clone(&state);
        let store = store.clone();
        tasks.push(tokio::spawn(async move { state.save(&store).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    state.clone().ensure_available(&store, &config).await.unwrap();
    state.clone().ensure_available(&store, &config).await.unwrap();

    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn clean_branch_needs_no_collapse() {
    let inner = MemoryStore::new();
    let config = StoreConfig::default();
    let branch = create_branch(&inner, "main").await;

    let store = InstrumentedStore::wrapping(inner);
    let state = Arc::new(branch.get_update_state(&store).await.unwrap());
    state.clone().ensure_available(&store, &config).await.unwrap();

    // Nothing to save, so no save call and no conditional update.
    assert_eq!(store.save_count(), 0);
    assert_eq!(store.update_count(), 0);
    assert!(state.l1().unwrap().id().is_empty());
}

#[tokio::test]
async fn background_collapse_eventually_cleans_the_record() {
    let store = MemoryStore::new();
    let config = StoreConfig {
        wait_on_collapse: false,
        ..StoreConfig::default()
    };
    let branch = create_branch(&store, "main").await;
    let staged = stage(
        &store,
        &branch,
        vec![UnsavedDelta::new(3, Id::EMPTY, Id::of_name("l2"))],
        "c1",
    )
    .await;

    let state = Arc::new(staged.get_update_state(&store).await.unwrap());
    state.clone().ensure_available(&store, &config).await.unwrap();

    // The L1s are durable on return even though the collapse is detached.
    assert!(store.contains(ValueType::L1, state.l1().unwrap().id()));

    for _ in 0..100 {
        if load_branch(&store, branch.id()).await.commits().len() == 1 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("background collapse never cleaned the record");
}

#[tokio::test]
async fn branch_turned_tag_is_not_found() {
    let store = MemoryStore::new();
    let config = StoreConfig::default();
    let branch = create_branch(&store, "main").await;
    let staged = stage(
        &store,
        &branch,
        vec![UnsavedDelta::new(0, Id::EMPTY, Id::of_name("l2"))],
        "c1",
    )
    .await;
    let state = Arc::new(staged.get_update_state(&store).await.unwrap());

    // Swap the reference for a tag of the same name behind the plan's back.
    store.delete(ValueType::Ref, branch.id()).await.unwrap();
    let tag = strata_tiered::InternalTag::new("main", Id::EMPTY);
    store
        .put_if_absent(SaveOp::new(ValueType::Ref, tag.id(), tag.to_entity()))
        .await
        .unwrap();

    let err = state.clone().ensure_available(&store, &config).await.unwrap_err();
    assert_eq!(err.kind(), TieredErrorKind::NotFound);
}

#[tokio::test]
async fn deleted_branch_is_not_found() {
    let store = MemoryStore::new();
    let config = StoreConfig::default();
    let branch = create_branch(&store, "main").await;
    let staged = stage(
        &store,
        &branch,
        vec![UnsavedDelta::new(0, Id::EMPTY, Id::of_name("l2"))],
        "c1",
    )
    .await;
    let state = Arc::new(staged.get_update_state(&store).await.unwrap());

    store.delete(ValueType::Ref, branch.id()).await.unwrap();

    let err = state.clone().ensure_available(&store, &config).await.unwrap_err();
    assert_eq!(err.kind(), TieredErrorKind::NotFound);
}
