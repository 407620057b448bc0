//! In-memory store implementation

use crate::error::{Result, TieredError};
use crate::store::{ConditionExpression, SaveOp, Store, UpdateExpression, ValueType};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use strata_common::{Entity, Id};

/// In-memory store backed by a shared hash table
///
/// Useful for:
/// - Testing
/// - Single-process catalogs
///
/// Conditional updates take the table's write lock for the whole
/// check-then-apply step, which gives the same per-key atomicity a
/// conditional-write KV service provides.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<(ValueType, Id), Entity>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether a record exists
    pub fn contains(&self, value_type: ValueType, id: Id) -> bool {
        self.read().contains_key(&(value_type, id))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<(ValueType, Id), Entity>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<(ValueType, Id), Entity>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    async fn load_single(&self, value_type: ValueType, id: Id) -> Result<Entity> {
        self.read()
            .get(&(value_type, id))
            .cloned()
            .ok_or_else(|| TieredError::not_found(value_type.name(), id))
    }

    async fn load_multi(&self, value_type: ValueType, ids: &[Id]) -> Result<Vec<Option<Entity>>> {
        let records = self.read();
        Ok(ids
            .iter()
            .map(|id| records.get(&(value_type, *id)).cloned())
            .collect())
    }

    async fn save(&self, ops: Vec<SaveOp>) -> Result<()> {
        let mut records = self.write();
        for op in ops {
            // Content-addressed: an id already present carries equal bytes.
            records.entry((op.value_type, op.id)).or_insert(op.entity);
        }
        Ok(())
    }

    async fn put_if_absent(&self, op: SaveOp) -> Result<bool> {
        let mut records = self.write();
        let key = (op.value_type, op.id);
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, op.entity);
        Ok(true)
    }

    async fn update(
        &self,
        value_type: ValueType,
        id: Id,
        update: UpdateExpression,
        condition: Option<ConditionExpression>,
    ) -> Result<Option<Entity>> {
        let mut records = self.write();
        let key = (value_type, id);
        let Some(current) = records.get(&key) else {
            return Ok(None);
        };
        if let Some(condition) = &condition {
            if !condition.holds(current) {
                return Ok(None);
            }
        }
        let updated = update.apply(current.clone())?;
        records.insert(key, updated.clone());
        Ok(Some(updated))
    }

    async fn delete(&self, value_type: ValueType, id: Id) -> Result<bool> {
        Ok(self.write().remove(&(value_type, id)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ExpressionPath, UpdateClause};
    use smol_str::SmolStr;
    use std::collections::BTreeMap;

    fn record(n: i64) -> Entity {
        let mut map = BTreeMap::new();
        map.insert(SmolStr::new("n"), Entity::number(n));
        Entity::map(map)
    }

    #[tokio::test]
    async fn save_and_load() {
        let store = MemoryStore::new();
        let id = Id::of_name("x");
        store
            .save(vec![SaveOp::new(ValueType::L1, id, record(1))])
            .await
            .unwrap();

        assert_eq!(store.load_single(ValueType::L1, id).await.unwrap(), record(1));
    }

    #[tokio::test]
    async fn load_single_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .load_single(ValueType::L1, Id::of_name("missing"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::TieredErrorKind::NotFound);
    }

    #[tokio::test]
    async fn save_is_idempotent() {
        let store = MemoryStore::new();
        let id = Id::of_name("x");
        store
            .save(vec![SaveOp::new(ValueType::L1, id, record(1))])
            .await
            .unwrap();
        store
            .save(vec![SaveOp::new(ValueType::L1, id, record(1))])
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn put_if_absent_reports_presence() {
        let store = MemoryStore::new();
        let id = Id::of_name("main");
        let op = SaveOp::new(ValueType::Ref, id, record(1));
        assert!(store.put_if_absent(op.clone()).await.unwrap());
        assert!(!store.put_if_absent(op).await.unwrap());
    }

    #[tokio::test]
    async fn update_applies_when_condition_holds() {
        let store = MemoryStore::new();
        let id = Id::of_name("x");
        store
            .save(vec![SaveOp::new(ValueType::Ref, id, record(1))])
            .await
            .unwrap();

        let update = UpdateExpression::initial()
            .and(UpdateClause::Set(ExpressionPath::name("n"), Entity::number(2)));
        let condition = ConditionExpression::initial()
            .and_equals(ExpressionPath::name("n"), Entity::number(1));

        let out = store
            .update(ValueType::Ref, id, update, Some(condition))
            .await
            .unwrap();
        assert_eq!(out, Some(record(2)));
        assert_eq!(store.load_single(ValueType::Ref, id).await.unwrap(), record(2));
    }

    #[tokio::test]
    async fn update_returns_none_on_condition_mismatch() {
        let store = MemoryStore::new();
        let id = Id::of_name("x");
        store
            .save(vec![SaveOp::new(ValueType::Ref, id, record(1))])
            .await
            .unwrap();

        let update = UpdateExpression::initial()
            .and(UpdateClause::Set(ExpressionPath::name("n"), Entity::number(2)));
        let condition = ConditionExpression::initial()
            .and_equals(ExpressionPath::name("n"), Entity::number(9));

        let out = store
            .update(ValueType::Ref, id, update, Some(condition))
            .await
            .unwrap();
        assert_eq!(out, None);
        // Untouched on mismatch.
        assert_eq!(store.load_single(ValueType::Ref, id).await.unwrap(), record(1));
    }

    #[tokio::test]
    async fn update_on_missing_record_is_none() {
        let store = MemoryStore::new();
        let out = store
            .update(
                ValueType::Ref,
                Id::of_name("missing"),
                UpdateExpression::initial(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = MemoryStore::new();
        let id = Id::of_name("x");
        store
            .save(vec![SaveOp::new(ValueType::Value, id, record(1))])
            .await
            .unwrap();
        assert!(store.delete(ValueType::Value, id).await.unwrap());
        assert!(!store.delete(ValueType::Value, id).await.unwrap());
    }

    #[tokio::test]
    async fn clone_shares_storage() {
        let store1 = MemoryStore::new();
        let store2 = store1.clone();
        let id = Id::of_name("x");
        store1
            .save(vec![SaveOp::new(ValueType::L2, id, record(1))])
            .await
            .unwrap();
        assert!(store2.contains(ValueType::L2, id));
    }
}
