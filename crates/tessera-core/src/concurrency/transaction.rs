//! Per-transaction state: identity, read/write set and result flag

use super::{IsolationLevel, ResultType, RwType};
use crate::storage::{Cid, ItemPointer, TxnId};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// A running transaction
///
/// The begin commit id doubles as the commit id. The read/write set maps
/// every touched version to the strongest access performed on it; its
/// transitions are the `record_*` methods.
#[derive(Debug)]
pub struct TransactionContext {
    txn_id: TxnId,
    read_id: Cid,
    isolation: IsolationLevel,
    read_only: bool,
    rw_set: Mutex<BTreeMap<ItemPointer, RwType>>,
    result: Mutex<ResultType>,
}

crate::proxy_opaque!(TransactionContext => "TransactionContext");

impl TransactionContext {
    /// New transaction; normally created by a transaction manager
    pub fn new(txn_id: TxnId, read_id: Cid, isolation: IsolationLevel) -> Self {
        Self {
            txn_id,
            read_id,
            isolation,
            read_only: false,
            rw_set: Mutex::new(BTreeMap::new()),
            result: Mutex::new(ResultType::Success),
        }
    }

    /// Mark the transaction as never writing
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Transaction id
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Snapshot commit id
    pub fn read_id(&self) -> Cid {
        self.read_id
    }

    /// Commit id assigned to versions this transaction writes
    pub fn commit_id(&self) -> Cid {
        self.read_id
    }

    /// Isolation level
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Whether the transaction was declared read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current result flag
    pub fn result(&self) -> ResultType {
        *self.result.lock()
    }

    /// Overwrite the result flag
    pub fn set_result(&self, result: ResultType) {
        *self.result.lock() = result;
    }

    /// Whether a protocol failure has been recorded
    pub fn has_failed(&self) -> bool {
        self.result() == ResultType::Failure
    }

    /// Access recorded for a version
    pub fn rw_type(&self, location: ItemPointer) -> Option<RwType> {
        self.rw_set.lock().get(&location).copied()
    }

    /// Snapshot of the read/write set in location order
    pub fn rw_set(&self) -> Vec<(ItemPointer, RwType)> {
        self.rw_set.lock().iter().map(|(l, t)| (*l, *t)).collect()
    }

    /// Whether nothing was written
    pub fn is_write_set_empty(&self) -> bool {
        self.rw_set
            .lock()
            .values()
            .all(|t| matches!(t, RwType::Read | RwType::ReadOwn))
    }

    /// Register a plain read
    pub fn record_read(&self, location: ItemPointer) {
        self.rw_set.lock().entry(location).or_insert(RwType::Read);
    }

    /// Register a read that took ownership
    pub fn record_read_own(&self, location: ItemPointer) {
        let mut rw = self.rw_set.lock();
        match rw.get(&location) {
            None | Some(RwType::Read) => {
                rw.insert(location, RwType::ReadOwn);
            }
            Some(_) => {}
        }
    }

    /// Register an update of the version at `location`
    pub fn record_update(&self, location: ItemPointer) {
        let mut rw = self.rw_set.lock();
        match rw.get(&location) {
            None | Some(RwType::Read) | Some(RwType::ReadOwn) => {
                rw.insert(location, RwType::Update);
            }
            Some(_) => {}
        }
    }

    /// Register an insert
    pub fn record_insert(&self, location: ItemPointer) {
        self.rw_set.lock().insert(location, RwType::Insert);
    }

    /// Register a delete; returns true if it cancelled an own insert
    pub fn record_delete(&self, location: ItemPointer) -> bool {
        let mut rw = self.rw_set.lock();
        match rw.get(&location) {
            Some(RwType::Insert) => {
                rw.insert(location, RwType::InsDel);
                true
            }
            Some(RwType::Delete) | Some(RwType::InsDel) => false,
            _ => {
                rw.insert(location, RwType::Delete);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn() -> TransactionContext {
        TransactionContext::new(5, 3, IsolationLevel::Serializable)
    }

    #[test]
    fn test_read_is_weakest() {
        let t = txn();
        let loc = ItemPointer::new(0, 1);
        t.record_update(loc);
        t.record_read(loc);
        t.record_read_own(loc);
        assert_eq!(t.rw_type(loc), Some(RwType::Update));
    }

    #[test]
    fn test_read_upgrades_to_read_own() {
        let t = txn();
        let loc = ItemPointer::new(0, 1);
        t.record_read(loc);
        t.record_read_own(loc);
        assert_eq!(t.rw_type(loc), Some(RwType::ReadOwn));
        assert!(t.is_write_set_empty());
    }

    #[test]
    fn test_delete_of_own_insert() {
        let t = txn();
        let loc = ItemPointer::new(0, 1);
        t.record_insert(loc);
        t.record_update(loc);
        assert_eq!(t.rw_type(loc), Some(RwType::Insert));
        assert!(t.record_delete(loc));
        assert_eq!(t.rw_type(loc), Some(RwType::InsDel));
    }

    #[test]
    fn test_delete_after_update() {
        let t = txn();
        let loc = ItemPointer::new(2, 0);
        t.record_update(loc);
        assert!(!t.record_delete(loc));
        assert_eq!(t.rw_type(loc), Some(RwType::Delete));
        assert!(!t.is_write_set_empty());
    }

    #[test]
    fn test_result_flag() {
        let t = txn();
        assert_eq!(t.result(), ResultType::Success);
        t.set_result(ResultType::Failure);
        assert!(t.has_failed());
        assert_eq!(t.commit_id(), t.read_id());
    }
}
