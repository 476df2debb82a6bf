//! Tile groups and their MVCC headers

use super::{Cid, INVALID_TXN_ID, Indirection, ItemPointer, MAX_CID, Oid, TxnId};
use crate::error::{Error, Result};
use crate::types::Value;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Version metadata of one tuple slot
#[derive(Debug)]
struct TupleHeader {
    txn_id: AtomicU64,
    begin_cid: AtomicU64,
    end_cid: AtomicU64,
    next: AtomicU64,
    prev: AtomicU64,
    last_reader_cid: AtomicU64,
    indirection: Mutex<Option<Indirection>>,
    latch: Mutex<()>,
}

impl TupleHeader {
    fn empty() -> Self {
        Self {
            txn_id: AtomicU64::new(INVALID_TXN_ID),
            begin_cid: AtomicU64::new(MAX_CID),
            end_cid: AtomicU64::new(MAX_CID),
            next: AtomicU64::new(ItemPointer::INVALID.pack()),
            prev: AtomicU64::new(ItemPointer::INVALID.pack()),
            last_reader_cid: AtomicU64::new(0),
            indirection: Mutex::new(None),
            latch: Mutex::new(()),
        }
    }
}

/// Per-slot version headers of a tile group
///
/// `next` points to the older version of a tuple and `prev` to the newer
/// one. Slots are handed out once and never reused.
#[derive(Debug)]
pub struct TileGroupHeader {
    tile_group_id: Oid,
    slots: Box<[TupleHeader]>,
    next_free: AtomicU32,
}

impl TileGroupHeader {
    fn new(tile_group_id: Oid, capacity: u32) -> Self {
        Self {
            tile_group_id,
            slots: (0..capacity).map(|_| TupleHeader::empty()).collect(),
            next_free: AtomicU32::new(0),
        }
    }

    /// Id of the tile group these headers belong to
    pub fn tile_group_id(&self) -> Oid {
        self.tile_group_id
    }

    fn slot(&self, offset: Oid) -> &TupleHeader {
        &self.slots[offset as usize]
    }

    /// Claim the next unused slot
    pub fn next_empty_slot(&self) -> Option<Oid> {
        let capacity = self.capacity();
        self.next_free
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < capacity).then_some(n + 1))
            .ok()
    }

    /// Slots handed out so far
    pub fn allocated(&self) -> Oid {
        self.next_free.load(Ordering::Acquire).min(self.capacity())
    }

    /// Slot count
    pub fn capacity(&self) -> Oid {
        self.slots.len() as Oid
    }

    /// Owning transaction
    pub fn transaction_id(&self, offset: Oid) -> TxnId {
        self.slot(offset).txn_id.load(Ordering::Acquire)
    }

    /// Overwrite the owner
    pub fn set_transaction_id(&self, offset: Oid, txn_id: TxnId) {
        self.slot(offset).txn_id.store(txn_id, Ordering::Release);
    }

    /// Swap the owner from `expected` to `txn_id`; false if someone else won
    pub fn cas_transaction_id(&self, offset: Oid, expected: TxnId, txn_id: TxnId) -> bool {
        self.slot(offset)
            .txn_id
            .compare_exchange(expected, txn_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// First commit id the version is visible at
    pub fn begin_commit_id(&self, offset: Oid) -> Cid {
        self.slot(offset).begin_cid.load(Ordering::Acquire)
    }

    /// Set the begin commit id
    pub fn set_begin_commit_id(&self, offset: Oid, cid: Cid) {
        self.slot(offset).begin_cid.store(cid, Ordering::Release);
    }

    /// First commit id the version is no longer visible at
    pub fn end_commit_id(&self, offset: Oid) -> Cid {
        self.slot(offset).end_cid.load(Ordering::Acquire)
    }

    /// Set the end commit id
    pub fn set_end_commit_id(&self, offset: Oid, cid: Cid) {
        self.slot(offset).end_cid.store(cid, Ordering::Release);
    }

    /// Older version
    pub fn next_item_pointer(&self, offset: Oid) -> ItemPointer {
        ItemPointer::unpack(self.slot(offset).next.load(Ordering::Acquire))
    }

    /// Link the older version
    pub fn set_next_item_pointer(&self, offset: Oid, location: ItemPointer) {
        self.slot(offset).next.store(location.pack(), Ordering::Release);
    }

    /// Newer version
    pub fn prev_item_pointer(&self, offset: Oid) -> ItemPointer {
        ItemPointer::unpack(self.slot(offset).prev.load(Ordering::Acquire))
    }

    /// Link the newer version
    pub fn set_prev_item_pointer(&self, offset: Oid, location: ItemPointer) {
        self.slot(offset).prev.store(location.pack(), Ordering::Release);
    }

    /// Largest commit id that read the version
    pub fn last_reader_commit_id(&self, offset: Oid) -> Cid {
        self.slot(offset).last_reader_cid.load(Ordering::Acquire)
    }

    /// Overwrite the last reader commit id
    pub fn set_last_reader_commit_id(&self, offset: Oid, cid: Cid) {
        self.slot(offset).last_reader_cid.store(cid, Ordering::Release);
    }

    /// Chain head shared with the indexes
    pub fn indirection(&self, offset: Oid) -> Option<Indirection> {
        self.slot(offset).indirection.lock().clone()
    }

    /// Attach the chain head
    pub fn set_indirection(&self, offset: Oid, indirection: Option<Indirection>) {
        *self.slot(offset).indirection.lock() = indirection;
    }

    /// Per-slot latch serializing ownership and reader-timestamp updates
    pub fn latch(&self, offset: Oid) -> MutexGuard<'_, ()> {
        self.slot(offset).latch.lock()
    }
}

/// Fixed-capacity block of tuple slots
#[derive(Debug)]
pub struct TileGroup {
    id: Oid,
    table_oid: Oid,
    db_oid: Oid,
    header: TileGroupHeader,
    rows: Box<[RwLock<Vec<Value>>]>,
}

crate::proxy_opaque!(TileGroup => "TileGroup");

impl TileGroup {
    pub(crate) fn new(id: Oid, db_oid: Oid, table_oid: Oid, capacity: u32) -> Self {
        Self {
            id,
            table_oid,
            db_oid,
            header: TileGroupHeader::new(id, capacity),
            rows: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Globally unique tile group id
    pub fn id(&self) -> Oid {
        self.id
    }

    /// Owning table
    pub fn table_oid(&self) -> Oid {
        self.table_oid
    }

    /// Owning database
    pub fn database_oid(&self) -> Oid {
        self.db_oid
    }

    /// Version headers
    pub fn header(&self) -> &TileGroupHeader {
        &self.header
    }

    /// Slots handed out so far
    pub fn next_tuple_slot(&self) -> Oid {
        self.header.allocated()
    }

    fn row(&self, offset: Oid) -> Result<&RwLock<Vec<Value>>> {
        if offset >= self.header.allocated() {
            return Err(Error::storage(format!(
                "tile group {} has no tuple at offset {offset}",
                self.id
            )));
        }
        Ok(&self.rows[offset as usize])
    }

    /// One column of a tuple
    pub fn value(&self, offset: Oid, column: u32) -> Result<Value> {
        self.row(offset)?
            .read()
            .get(column as usize)
            .cloned()
            .ok_or_else(|| Error::storage(format!("tuple has no column {column}")))
    }

    /// Overwrite one column of a tuple
    pub fn set_value(&self, offset: Oid, column: u32, value: Value) -> Result<()> {
        let row = self.row(offset)?;
        let mut row = row.write();
        let slot = row
            .get_mut(column as usize)
            .ok_or_else(|| Error::storage(format!("tuple has no column {column}")))?;
        *slot = value;
        Ok(())
    }

    /// Copy of a whole tuple
    pub fn tuple(&self, offset: Oid) -> Result<Vec<Value>> {
        Ok(self.row(offset)?.read().clone())
    }

    /// Overwrite a whole tuple
    pub fn set_tuple(&self, offset: Oid, values: Vec<Value>) -> Result<()> {
        *self.row(offset)?.write() = values;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::INITIAL_TXN_ID;

    #[test]
    fn test_slots_start_invisible() {
        let tg = TileGroup::new(3, 0, 1, 2);
        let offset = tg.header().next_empty_slot().unwrap();
        assert_eq!(tg.header().transaction_id(offset), INVALID_TXN_ID);
        assert_eq!(tg.header().begin_commit_id(offset), MAX_CID);
        assert!(tg.header().next_item_pointer(offset).is_null());
        assert!(tg.header().indirection(offset).is_none());
    }

    #[test]
    fn test_slot_allocation_stops_at_capacity() {
        let tg = TileGroup::new(0, 0, 1, 2);
        assert_eq!(tg.header().next_empty_slot(), Some(0));
        assert_eq!(tg.header().next_empty_slot(), Some(1));
        assert_eq!(tg.header().next_empty_slot(), None);
        assert_eq!(tg.next_tuple_slot(), 2);
    }

    #[test]
    fn test_owner_cas() {
        let tg = TileGroup::new(0, 0, 1, 1);
        tg.header().set_transaction_id(0, INITIAL_TXN_ID);
        assert!(tg.header().cas_transaction_id(0, INITIAL_TXN_ID, 9));
        assert!(!tg.header().cas_transaction_id(0, INITIAL_TXN_ID, 10));
        assert_eq!(tg.header().transaction_id(0), 9);
    }

    #[test]
    fn test_values_round_trip() {
        let tg = TileGroup::new(0, 0, 1, 1);
        assert!(tg.value(0, 0).is_err());
        tg.header().next_empty_slot();
        tg.set_tuple(0, vec![Value::integer(1), Value::varchar("a")]).unwrap();
        tg.set_value(0, 1, Value::varchar("b")).unwrap();
        assert_eq!(tg.value(0, 1).unwrap(), Value::varchar("b"));
        assert!(tg.set_value(0, 5, Value::integer(0)).is_err());
    }
}
