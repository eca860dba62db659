//! Row storage interface and its in-memory implementation

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::errors::{StorageError, StorageResult};
use super::record::{RecordId, RelationId, Row, Value};

/// Row storage as seen by the execution layer.
///
/// Storage is independent of the indexes: a row reached through an index
/// entry may have changed or disappeared since the entry was written.
pub trait RowStorage: Send + Sync {
    /// Reads a row by record identifier
    fn fetch_row(&self, id: RecordId) -> StorageResult<Option<Row>>;

    /// Next row of `relation` in storage order, strictly after `after`
    fn next_row(&self, relation: RelationId, after: Option<RecordId>) -> StorageResult<Option<Row>>;

    /// Write-locks a row for `transaction`. Returns false if the row is gone.
    fn lock_row(&self, transaction: u64, id: RecordId) -> StorageResult<bool>;
}

#[derive(Default)]
struct StoreState {
    relations: BTreeMap<RelationId, BTreeMap<RecordId, Vec<Option<Value>>>>,
    owners: HashMap<RecordId, RelationId>,
    locks: HashMap<RecordId, u64>,
}

/// In-memory row store with per-row write locks
#[derive(Default)]
pub struct MemoryRowStore {
    state: Mutex<StoreState>,
    next_id: AtomicU64,
    fetches: AtomicU64,
}

impl MemoryRowStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an empty relation
    pub fn create_relation(&self, relation: RelationId) {
        self.state().relations.entry(relation).or_default();
    }

    /// Appends a row and returns its identifier
    pub fn insert(&self, relation: RelationId, fields: Vec<Option<Value>>) -> RecordId {
        let id = RecordId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut state = self.state();
        state.relations.entry(relation).or_default().insert(id, fields);
        state.owners.insert(id, relation);
        id
    }

    /// Replaces the fields of a row. Returns false if the row does not exist.
    pub fn update(&self, id: RecordId, fields: Vec<Option<Value>>) -> bool {
        let mut state = self.state();
        let Some(relation) = state.owners.get(&id).copied() else {
            return false;
        };
        match state.relations.get_mut(&relation).and_then(|rows| rows.get_mut(&id)) {
            Some(slot) => {
                *slot = fields;
                true
            }
            None => false,
        }
    }

    /// Deletes a row. Returns false if the row does not exist.
    pub fn delete(&self, id: RecordId) -> bool {
        let mut state = self.state();
        let Some(relation) = state.owners.remove(&id) else {
            return false;
        };
        state.locks.remove(&id);
        state
            .relations
            .get_mut(&relation)
            .map(|rows| rows.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Transaction holding the write lock on a row, if any
    pub fn lock_holder(&self, id: RecordId) -> Option<u64> {
        self.state().locks.get(&id).copied()
    }

    /// Releases every lock held by `transaction`
    pub fn release_locks(&self, transaction: u64) {
        self.state().locks.retain(|_, holder| *holder != transaction);
    }

    /// Number of `fetch_row` and `next_row` calls served so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of rows in a relation
    pub fn row_count(&self, relation: RelationId) -> usize {
        self.state().relations.get(&relation).map(|r| r.len()).unwrap_or(0)
    }
}

impl RowStorage for MemoryRowStore {
    fn fetch_row(&self, id: RecordId) -> StorageResult<Option<Row>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let state = self.state();
        let row = state
            .owners
            .get(&id)
            .and_then(|relation| state.relations.get(relation))
            .and_then(|rows| rows.get(&id))
            .map(|fields| Row::new(id, fields.clone()));
        Ok(row)
    }

    fn next_row(&self, relation: RelationId, after: Option<RecordId>) -> StorageResult<Option<Row>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let state = self.state();
        let rows = state
            .relations
            .get(&relation)
            .ok_or(StorageError::UnknownRelation(relation.0))?;
        let next = match after {
            Some(after) => rows.range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded)).next(),
            None => rows.iter().next(),
        };
        Ok(next.map(|(id, fields)| Row::new(*id, fields.clone())))
    }

    fn lock_row(&self, transaction: u64, id: RecordId) -> StorageResult<bool> {
        let mut state = self.state();
        if !state.owners.contains_key(&id) {
            return Ok(false);
        }
        match state.locks.get(&id) {
            Some(&holder) if holder != transaction => {
                Err(StorageError::LockConflict { record: id, holder })
            }
            _ => {
                state.locks.insert(id, transaction);
                Ok(true)
            }
        }
    }
}
