//! Transaction manager trait and the timestamp-ordering implementation

use super::{IsolationLevel, ResultType, RwType, TransactionContext, VisibilityType};
use crate::error::{Error, Result};
use crate::storage::{
    INITIAL_TXN_ID, INVALID_CID, INVALID_TXN_ID, Indirection, ItemPointer, MAX_CID, Oid,
    StorageManager, TileGroup, TileGroupHeader,
};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Ownership, visibility and version-installation protocol
///
/// Ownership failures are not errors: they return `false` and, where the
/// protocol says so, flag the transaction as failed. `Err` is reserved for
/// addresses that do not resolve to a tile group.
pub trait TransactionManager: Send + Sync + fmt::Debug {
    /// Start a transaction
    fn begin_transaction(&self, isolation: IsolationLevel) -> Arc<TransactionContext>;

    /// Start a transaction that never writes
    fn begin_read_only_transaction(&self) -> Arc<TransactionContext>;

    /// Make every write visible at the commit id. A transaction carrying a
    /// failure is rolled back instead.
    fn commit_transaction(&self, txn: &TransactionContext) -> Result<ResultType>;

    /// Roll back every write
    fn abort_transaction(&self, txn: &TransactionContext) -> Result<ResultType>;

    /// Visibility of a version to `txn`
    fn is_visible(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> VisibilityType;

    /// Whether `txn` holds the version's write lock
    fn is_owner(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool;

    /// Whether `txn` created this version and has not committed it
    fn is_written(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool;

    /// Whether nobody owns the latest version and `txn` may take it
    fn is_ownable(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool;

    /// Take the write lock; on failure `txn` is flagged as failed
    fn acquire_ownership(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool;

    /// Release a write lock taken in the current call chain
    fn yield_ownership(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid);

    /// Register a read, optionally taking ownership (select for update)
    fn perform_read(&self, txn: &TransactionContext, location: ItemPointer, acquire_ownership: bool) -> Result<bool>;

    /// Claim a freshly stored tuple
    fn perform_insert(&self, txn: &TransactionContext, location: ItemPointer, indirection: Option<Indirection>) -> Result<()>;

    /// Link `new` in front of the owned version `old`
    fn perform_update(&self, txn: &TransactionContext, old: ItemPointer, new: ItemPointer) -> Result<()>;

    /// Record an in-place update of a version `txn` wrote itself
    fn perform_update_in_place(&self, txn: &TransactionContext, location: ItemPointer) -> Result<()>;

    /// Link the delete marker `new` in front of the owned version `old`
    fn perform_delete(&self, txn: &TransactionContext, old: ItemPointer, new: ItemPointer) -> Result<()>;

    /// Delete a version `txn` wrote itself
    fn perform_delete_in_place(&self, txn: &TransactionContext, location: ItemPointer) -> Result<()>;

    /// Overwrite the transaction's result flag
    fn set_transaction_result(&self, txn: &TransactionContext, result: ResultType) {
        txn.set_result(result);
    }
}

/// Timestamp-ordering MVCC
///
/// One counter hands out both transaction ids and commit ids; a
/// transaction's begin commit id is its commit id. Readers raise a
/// per-version last-reader commit id under the slot latch, and a writer may
/// only take a version no later transaction has read.
pub struct TimestampOrderingTransactionManager {
    storage: Arc<StorageManager>,
    next_id: AtomicU64,
}

crate::proxy_opaque!(TimestampOrderingTransactionManager => "TimestampOrderingTransactionManager");

impl fmt::Debug for TimestampOrderingTransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimestampOrderingTransactionManager")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl TimestampOrderingTransactionManager {
    /// Manager over the tile groups of `storage`
    pub fn new(storage: Arc<StorageManager>) -> Self {
        Self {
            storage,
            next_id: AtomicU64::new(INITIAL_TXN_ID + 1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::AcqRel)
    }

    fn tile_group(&self, location: ItemPointer) -> Result<Arc<TileGroup>> {
        self.storage.tile_group(location.block).ok_or_else(|| {
            Error::catalog(format!("no tile group for tuple {location}"))
        })
    }

    /// Commit id of the last transaction that read the version
    pub fn last_reader_commit_id(&self, header: &TileGroupHeader, offset: Oid) -> u64 {
        header.last_reader_commit_id(offset)
    }

    fn set_last_reader_commit_id(&self, header: &TileGroupHeader, offset: Oid, cid: u64) -> bool {
        let _latch = header.latch(offset);
        if header.transaction_id(offset) != INITIAL_TXN_ID {
            return false;
        }
        if header.last_reader_commit_id(offset) < cid {
            header.set_last_reader_commit_id(offset, cid);
        }
        true
    }

    /// Common tail of update and delete: splice `new` in front of `old`
    fn link_new_version(&self, txn: &TransactionContext, old: ItemPointer, new: ItemPointer) -> Result<()> {
        let old_tg = self.tile_group(old)?;
        let new_tg = self.tile_group(new)?;
        let old_header = old_tg.header();
        let new_header = new_tg.header();

        let old_prev = old_header.prev_item_pointer(old.offset);
        old_header.set_prev_item_pointer(old.offset, new);
        new_header.set_prev_item_pointer(new.offset, old_prev);
        new_header.set_next_item_pointer(new.offset, old);
        new_header.set_transaction_id(new.offset, txn.txn_id());

        let indirection = old_header.indirection(old.offset);
        new_header.set_indirection(new.offset, indirection.clone());
        if !old_prev.is_null() {
            self.tile_group(old_prev)?
                .header()
                .set_next_item_pointer(old_prev.offset, new);
        } else if let Some(indirection) = indirection {
            indirection.store(new.pack(), Ordering::Release);
        }
        Ok(())
    }

    /// Undo an update or delete of `old`
    fn unlink_new_version(&self, old: ItemPointer) -> Result<()> {
        let old_tg = self.tile_group(old)?;
        let old_header = old_tg.header();
        let new = old_header.prev_item_pointer(old.offset);
        if new.is_null() {
            return Err(Error::internal(format!("version {old} has no newer version to roll back")));
        }
        let new_tg = self.tile_group(new)?;
        let new_header = new_tg.header();
        new_header.set_begin_commit_id(new.offset, MAX_CID);
        new_header.set_end_commit_id(new.offset, MAX_CID);

        let old_prev = new_header.prev_item_pointer(new.offset);
        if old_prev.is_null() {
            if let Some(indirection) = new_header.indirection(new.offset) {
                let _ = indirection.compare_exchange(
                    new.pack(),
                    old.pack(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        } else {
            self.tile_group(old_prev)?
                .header()
                .set_next_item_pointer(old_prev.offset, old);
        }
        old_header.set_prev_item_pointer(old.offset, old_prev);
        new_header.set_transaction_id(new.offset, INVALID_TXN_ID);
        old_header.set_transaction_id(old.offset, INITIAL_TXN_ID);
        Ok(())
    }

    fn kill_version(&self, location: ItemPointer) -> Result<()> {
        let tg = self.tile_group(location)?;
        let header = tg.header();
        header.set_begin_commit_id(location.offset, MAX_CID);
        header.set_end_commit_id(location.offset, MAX_CID);
        header.set_transaction_id(location.offset, INVALID_TXN_ID);
        Ok(())
    }
}

impl TransactionManager for TimestampOrderingTransactionManager {
    fn begin_transaction(&self, isolation: IsolationLevel) -> Arc<TransactionContext> {
        let id = self.next_id();
        debug!(txn_id = id, ?isolation, "begin transaction");
        Arc::new(TransactionContext::new(id, id, isolation))
    }

    fn begin_read_only_transaction(&self) -> Arc<TransactionContext> {
        let id = self.next_id();
        debug!(txn_id = id, "begin read-only transaction");
        Arc::new(TransactionContext::new(id, id, IsolationLevel::Snapshot).read_only())
    }

    fn commit_transaction(&self, txn: &TransactionContext) -> Result<ResultType> {
        if txn.has_failed() {
            debug!(txn_id = txn.txn_id(), "commit of failed transaction, aborting");
            return self.abort_transaction(txn);
        }
        let cid = txn.commit_id();
        for (location, rw) in txn.rw_set() {
            let tg = self.tile_group(location)?;
            let header = tg.header();
            let offset = location.offset;
            match rw {
                RwType::Read => {}
                RwType::ReadOwn => self.yield_ownership(txn, header, offset),
                RwType::Update | RwType::Delete => {
                    let new = header.prev_item_pointer(offset);
                    let new_tg = self.tile_group(new)?;
                    let new_header = new_tg.header();
                    new_header.set_begin_commit_id(new.offset, cid);
                    new_header.set_end_commit_id(new.offset, header.end_commit_id(offset));
                    header.set_end_commit_id(offset, cid);
                    let new_owner = if rw == RwType::Update {
                        INITIAL_TXN_ID
                    } else {
                        INVALID_TXN_ID
                    };
                    new_header.set_transaction_id(new.offset, new_owner);
                    header.set_transaction_id(offset, INITIAL_TXN_ID);
                }
                RwType::Insert => {
                    header.set_begin_commit_id(offset, cid);
                    header.set_end_commit_id(offset, MAX_CID);
                    header.set_transaction_id(offset, INITIAL_TXN_ID);
                }
                RwType::InsDel => self.kill_version(location)?,
            }
        }
        txn.set_result(ResultType::Success);
        debug!(txn_id = txn.txn_id(), cid, "committed transaction");
        Ok(ResultType::Success)
    }

    fn abort_transaction(&self, txn: &TransactionContext) -> Result<ResultType> {
        for (location, rw) in txn.rw_set() {
            match rw {
                RwType::Read => {}
                RwType::ReadOwn => {
                    let tg = self.tile_group(location)?;
                    self.yield_ownership(txn, tg.header(), location.offset);
                }
                RwType::Update | RwType::Delete => self.unlink_new_version(location)?,
                RwType::Insert | RwType::InsDel => self.kill_version(location)?,
            }
        }
        txn.set_result(ResultType::Aborted);
        debug!(txn_id = txn.txn_id(), "aborted transaction");
        Ok(ResultType::Aborted)
    }

    fn is_visible(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> VisibilityType {
        let owner = header.transaction_id(offset);
        let begin = header.begin_commit_id(offset);
        let end = header.end_commit_id(offset);
        let activated = txn.read_id() >= begin;
        let invalidated = txn.read_id() >= end;

        if owner == INVALID_TXN_ID {
            // aborted versions and committed delete markers
            return if activated && !invalidated {
                VisibilityType::Deleted
            } else {
                VisibilityType::Invisible
            };
        }

        if owner == txn.txn_id() {
            let location = ItemPointer::new(header.tile_group_id(), offset);
            return if begin == MAX_CID && end != INVALID_CID {
                VisibilityType::Ok
            } else if txn.rw_type(location) == Some(RwType::ReadOwn) {
                VisibilityType::Ok
            } else if end == INVALID_CID {
                VisibilityType::Deleted
            } else {
                // the older version of our own update
                VisibilityType::Invisible
            };
        }

        if owner != INITIAL_TXN_ID && begin == MAX_CID {
            // someone else's uncommitted version
            return VisibilityType::Invisible;
        }
        if activated && !invalidated {
            VisibilityType::Ok
        } else {
            VisibilityType::Invisible
        }
    }

    fn is_owner(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool {
        header.transaction_id(offset) == txn.txn_id()
    }

    fn is_written(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool {
        header.transaction_id(offset) == txn.txn_id() && header.begin_commit_id(offset) == MAX_CID
    }

    fn is_ownable(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool {
        header.transaction_id(offset) == INITIAL_TXN_ID && header.end_commit_id(offset) > txn.read_id()
    }

    fn acquire_ownership(&self, txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) -> bool {
        if self.is_owner(txn, header, offset) {
            return true;
        }
        let acquired = self.is_ownable(txn, header, offset) && {
            let _latch = header.latch(offset);
            header.last_reader_commit_id(offset) <= txn.commit_id()
                && header.cas_transaction_id(offset, INITIAL_TXN_ID, txn.txn_id())
        };
        if !acquired {
            trace!(txn_id = txn.txn_id(), offset, "ownership acquisition failed");
            self.set_transaction_result(txn, ResultType::Failure);
        }
        acquired
    }

    fn yield_ownership(&self, _txn: &TransactionContext, header: &TileGroupHeader, offset: Oid) {
        header.set_transaction_id(offset, INITIAL_TXN_ID);
    }

    fn perform_read(&self, txn: &TransactionContext, location: ItemPointer, acquire_ownership: bool) -> Result<bool> {
        if txn.is_read_only() {
            return Ok(true);
        }
        let tg = self.tile_group(location)?;
        let header = tg.header();
        let offset = location.offset;

        if acquire_ownership && !self.is_owner(txn, header, offset) {
            if !self.is_ownable(txn, header, offset) {
                return Ok(false);
            }
            if !self.acquire_ownership(txn, header, offset) {
                return Ok(false);
            }
            txn.record_read_own(location);
        }
        if self.is_owner(txn, header, offset) {
            return Ok(true);
        }
        if txn.isolation_level() == IsolationLevel::ReadCommitted {
            return Ok(true);
        }
        if self.set_last_reader_commit_id(header, offset, txn.read_id()) {
            txn.record_read(location);
            Ok(true)
        } else {
            trace!(txn_id = txn.txn_id(), %location, "read blocked by concurrent owner");
            Ok(false)
        }
    }

    fn perform_insert(&self, txn: &TransactionContext, location: ItemPointer, indirection: Option<Indirection>) -> Result<()> {
        let tg = self.tile_group(location)?;
        let header = tg.header();
        if header.transaction_id(location.offset) != INVALID_TXN_ID {
            return Err(Error::internal(format!("insert into occupied slot {location}")));
        }
        header.set_transaction_id(location.offset, txn.txn_id());
        header.set_last_reader_commit_id(location.offset, txn.commit_id());
        header.set_indirection(location.offset, indirection);
        txn.record_insert(location);
        Ok(())
    }

    fn perform_update(&self, txn: &TransactionContext, old: ItemPointer, new: ItemPointer) -> Result<()> {
        self.link_new_version(txn, old, new)?;
        txn.record_update(old);
        Ok(())
    }

    fn perform_update_in_place(&self, txn: &TransactionContext, location: ItemPointer) -> Result<()> {
        let tg = self.tile_group(location)?;
        let older = tg.header().next_item_pointer(location.offset);
        if !older.is_null() {
            txn.record_update(older);
        }
        Ok(())
    }

    fn perform_delete(&self, txn: &TransactionContext, old: ItemPointer, new: ItemPointer) -> Result<()> {
        self.link_new_version(txn, old, new)?;
        self.tile_group(new)?
            .header()
            .set_end_commit_id(new.offset, INVALID_CID);
        txn.record_delete(old);
        Ok(())
    }

    fn perform_delete_in_place(&self, txn: &TransactionContext, location: ItemPointer) -> Result<()> {
        let tg = self.tile_group(location)?;
        let header = tg.header();
        header.set_end_commit_id(location.offset, INVALID_CID);
        let older = header.next_item_pointer(location.offset);
        if older.is_null() {
            txn.record_delete(location);
        } else {
            txn.record_delete(older);
        }
        Ok(())
    }
}
