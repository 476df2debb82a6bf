//! Tables: tile-group allocation, tuple insertion and index maintenance

use super::{
    INVALID_CID, INVALID_TXN_ID, Index, IndexKind, Indirection, ItemPointer, Oid, Schema,
    TileGroup, TileGroupCatalog, TxnId, new_indirection,
};
use crate::error::{Error, Result};
use crate::types::Value;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A table stored as a growing list of tile groups
#[derive(Debug)]
pub struct DataTable {
    db_oid: Oid,
    oid: Oid,
    name: String,
    schema: Schema,
    tuples_per_tile_group: u32,
    tile_groups: RwLock<Vec<Arc<TileGroup>>>,
    indexes: RwLock<Vec<Arc<Index>>>,
    catalog: Arc<TileGroupCatalog>,
    slots_used: AtomicU64,
    slot_limit: AtomicU64,
}

crate::proxy_opaque!(DataTable => "DataTable");

impl DataTable {
    pub(crate) fn new(
        db_oid: Oid,
        oid: Oid,
        name: &str,
        schema: Schema,
        tuples_per_tile_group: u32,
        catalog: Arc<TileGroupCatalog>,
    ) -> Self {
        let first = catalog.allocate(db_oid, oid, tuples_per_tile_group);
        Self {
            db_oid,
            oid,
            name: name.to_string(),
            schema,
            tuples_per_tile_group,
            tile_groups: RwLock::new(vec![first]),
            indexes: RwLock::new(Vec::new()),
            catalog,
            slots_used: AtomicU64::new(0),
            slot_limit: AtomicU64::new(u64::MAX),
        }
    }

    /// Table id
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Owning database
    pub fn database_oid(&self) -> Oid {
        self.db_oid
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column definitions
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Cap the total number of tuple slots; allocation fails once reached.
    /// `None` removes the cap.
    pub fn set_slot_limit(&self, limit: Option<u64>) {
        self.slot_limit
            .store(limit.unwrap_or(u64::MAX), Ordering::Release);
    }

    /// Slots allocated so far, versions included
    pub fn slots_used(&self) -> u64 {
        self.slots_used.load(Ordering::Acquire)
    }

    /// Number of tile groups
    pub fn tile_group_count(&self) -> u32 {
        self.tile_groups.read().len() as u32
    }

    /// Tile group by position within the table
    pub fn tile_group(&self, offset: u32) -> Option<Arc<TileGroup>> {
        self.tile_groups.read().get(offset as usize).cloned()
    }

    /// Tile group by global id; it must belong to this table
    pub fn tile_group_by_id(&self, id: Oid) -> Result<Arc<TileGroup>> {
        self.catalog
            .get(id)
            .filter(|tg| tg.table_oid() == self.oid)
            .ok_or_else(|| {
                Error::catalog(format!("table '{}' has no tile group {id}", self.name))
            })
    }

    /// Copy of the tuple at `location`
    pub fn tuple(&self, location: ItemPointer) -> Result<Vec<Value>> {
        self.tile_group_by_id(location.block)?.tuple(location.offset)
    }

    fn reserve_slot(&self) -> bool {
        let limit = self.slot_limit.load(Ordering::Acquire);
        self.slots_used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .is_ok()
    }

    fn allocate_slot(&self) -> Option<ItemPointer> {
        if !self.reserve_slot() {
            debug!(table = %self.name, "slot limit reached");
            return None;
        }
        loop {
            let last = self.tile_groups.read().last().cloned()?;
            if let Some(offset) = last.header().next_empty_slot() {
                return Some(ItemPointer::new(last.id(), offset));
            }
            let mut tile_groups = self.tile_groups.write();
            let still_last = tile_groups
                .last()
                .is_some_and(|tg| Arc::ptr_eq(tg, &last));
            if still_last {
                let tg = self
                    .catalog
                    .allocate(self.db_oid, self.oid, self.tuples_per_tile_group);
                trace!(table = %self.name, tile_group = tg.id(), "added tile group");
                tile_groups.push(tg);
            }
        }
    }

    fn write_row(&self, location: ItemPointer, row: Vec<Value>) -> Result<()> {
        self.tile_group_by_id(location.block)?
            .set_tuple(location.offset, row)
    }

    /// Whether the chain headed at `head` still holds its key for `txn_id`:
    /// some transaction owns it and it is not deleted by `txn_id` itself
    fn head_is_live(&self, head: ItemPointer, txn_id: TxnId) -> bool {
        let Some(tg) = self.catalog.get(head.block) else {
            return false;
        };
        let header = tg.header();
        let owner = header.transaction_id(head.offset);
        if owner == INVALID_TXN_ID {
            return false;
        }
        !(owner == txn_id && header.end_commit_id(head.offset) == INVALID_CID)
    }

    /// Store a new tuple and add it to every index
    ///
    /// Returns the location and the indirection shared with the indexes
    /// (absent when the table has no index), or `None` when the slot limit
    /// is reached or a unique index already holds the key. The new slot
    /// stays invisible until the transaction manager claims it.
    pub fn insert_tuple(
        &self,
        values: Vec<Value>,
        txn_id: TxnId,
    ) -> Result<Option<(ItemPointer, Option<Indirection>)>> {
        let row = self.schema.conform(values)?;
        let indexes = self.indexes.read().clone();
        let keys = indexes
            .iter()
            .map(|index| index.key_of(&row))
            .collect::<Result<Vec<_>>>()?;
        let Some(location) = self.allocate_slot() else {
            return Ok(None);
        };
        self.write_row(location, row)?;
        if indexes.is_empty() {
            return Ok(Some((location, None)));
        }

        let indirection = new_indirection(location);
        for (done, (index, key)) in indexes.iter().zip(&keys).enumerate() {
            let inserted = index.insert_entry(key.clone(), indirection.clone(), |head| {
                self.head_is_live(head, txn_id)
            });
            if !inserted {
                debug!(table = %self.name, index = index.name(), "unique key violation");
                for (index, key) in indexes.iter().zip(&keys).take(done) {
                    index.delete_entry(key, &indirection);
                }
                return Ok(None);
            }
        }
        Ok(Some((location, Some(indirection))))
    }

    /// Allocate a slot for a version whose contents the caller fills in
    pub fn acquire_version(&self) -> Result<Option<ItemPointer>> {
        let Some(location) = self.allocate_slot() else {
            return Ok(None);
        };
        self.write_row(location, self.schema.null_row())?;
        Ok(Some(location))
    }

    /// Allocate an all-null version used as a delete marker
    pub fn insert_empty_version(&self) -> Result<Option<ItemPointer>> {
        self.acquire_version()
    }

    /// Publish a new version's keys in the secondary indexes touched by
    /// `target_columns`; false on a unique-key violation
    pub fn install_version(
        &self,
        row: &[Value],
        target_columns: &[u32],
        indirection: Option<&Indirection>,
        txn_id: TxnId,
    ) -> Result<bool> {
        let Some(indirection) = indirection else {
            return Ok(true);
        };
        let indexes = self.indexes.read().clone();
        for index in indexes.iter() {
            if index.kind() == IndexKind::Primary || !index.covers_any(target_columns) {
                continue;
            }
            let key = index.key_of(row)?;
            if !index.insert_entry(key, indirection.clone(), |head| {
                self.head_is_live(head, txn_id)
            }) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Attach an index; existing tuples are not backfilled
    pub fn add_index(&self, name: &str, kind: IndexKind, key_columns: Vec<u32>) -> Result<Arc<Index>> {
        if let Some(bad) = key_columns
            .iter()
            .find(|&&c| c as usize >= self.schema.column_count())
        {
            return Err(Error::catalog(format!(
                "table '{}' has no column {bad}",
                self.name
            )));
        }
        let mut indexes = self.indexes.write();
        if kind == IndexKind::Primary && indexes.iter().any(|i| i.kind() == IndexKind::Primary) {
            return Err(Error::catalog(format!(
                "table '{}' already has a primary key",
                self.name
            )));
        }
        let oid = indexes.len() as Oid;
        let index = Arc::new(Index::new(oid, name, kind, key_columns));
        indexes.push(index.clone());
        Ok(index)
    }

    /// Index by position
    pub fn index(&self, offset: u32) -> Result<Arc<Index>> {
        self.indexes
            .read()
            .get(offset as usize)
            .cloned()
            .ok_or_else(|| Error::catalog(format!("table '{}' has no index {offset}", self.name)))
    }

    /// Primary key index, if any
    pub fn primary_index(&self) -> Option<Arc<Index>> {
        self.indexes
            .read()
            .iter()
            .find(|i| i.kind() == IndexKind::Primary)
            .cloned()
    }

    /// Whether any column in `columns` belongs to the primary key
    pub fn touches_primary_key(&self, columns: &[u32]) -> bool {
        self.primary_index()
            .is_some_and(|index| index.covers_any(columns))
    }

    /// Number of indexes
    pub fn index_count(&self) -> usize {
        self.indexes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Column, INITIAL_TXN_ID, StorageManager};
    use crate::types::TypeId;

    fn table(capacity: u32) -> Arc<DataTable> {
        let storage = StorageManager::new(0, capacity);
        storage
            .create_table(
                "t",
                Schema::new(vec![
                    Column::not_null("id", TypeId::Integer),
                    Column::new("v", TypeId::Varchar),
                ]),
            )
            .unwrap()
    }

    fn row(id: i32, v: &str) -> Vec<Value> {
        vec![Value::integer(id), Value::varchar(v)]
    }

    #[test]
    fn test_tile_groups_grow_on_demand() {
        let t = table(2);
        for i in 0..5 {
            t.insert_tuple(row(i, "x"), 2).unwrap().unwrap();
        }
        assert_eq!(t.tile_group_count(), 3);
        let last = t.tile_group(2).unwrap();
        assert_eq!(last.next_tuple_slot(), 1);
        assert_eq!(t.tile_group_by_id(last.id()).unwrap().id(), last.id());
    }

    #[test]
    fn test_insert_without_index_has_no_indirection() {
        let t = table(4);
        let (loc, indirection) = t.insert_tuple(row(1, "a"), 2).unwrap().unwrap();
        assert!(indirection.is_none());
        assert_eq!(t.tuple(loc).unwrap(), row(1, "a"));
    }

    #[test]
    fn test_unique_violation_rolls_back_index_entries() {
        let t = table(4);
        let by_name = t.add_index("by_v", IndexKind::Secondary, vec![1]).unwrap();
        let pk = t.add_index("pk", IndexKind::Primary, vec![0]).unwrap();
        let (loc, _) = t.insert_tuple(row(1, "a"), 2).unwrap().unwrap();
        let tg = t.tile_group_by_id(loc.block).unwrap();
        tg.header().set_transaction_id(loc.offset, INITIAL_TXN_ID);

        assert!(t.insert_tuple(row(1, "b"), 2).unwrap().is_none());
        assert_eq!(by_name.len(), 1);
        assert_eq!(pk.len(), 1);
    }

    #[test]
    fn test_dead_key_can_be_reused() {
        let t = table(4);
        t.add_index("pk", IndexKind::Primary, vec![0]).unwrap();
        // first insert is never claimed by a transaction, so its key is dead
        t.insert_tuple(row(1, "a"), 2).unwrap().unwrap();
        assert!(t.insert_tuple(row(1, "b"), 2).unwrap().is_some());
    }

    #[test]
    fn test_slot_limit_fails_allocation() {
        let t = table(4);
        t.set_slot_limit(Some(1));
        assert!(t.insert_tuple(row(1, "a"), 2).unwrap().is_some());
        assert!(t.insert_empty_version().unwrap().is_none());
        t.set_slot_limit(None);
        assert!(t.acquire_version().unwrap().is_some());
    }

    #[test]
    fn test_add_index_validates_columns() {
        let t = table(4);
        assert!(t.add_index("bad", IndexKind::Secondary, vec![5]).is_err());
        t.add_index("pk", IndexKind::Primary, vec![0]).unwrap();
        assert!(t.add_index("pk2", IndexKind::Primary, vec![1]).is_err());
        assert!(t.touches_primary_key(&[0]));
        assert!(!t.touches_primary_key(&[1]));
    }
}
