//! Batched visibility checks called from compiled scans

use super::{TransactionContext, TransactionManager, VisibilityType};
use crate::error::{Error, Result};
use crate::storage::{ItemPointer, StorageManager, TileGroup};

/// Entry points compiled scans use to filter tuples through the transaction
/// manager
pub struct TransactionRuntime;

impl TransactionRuntime {
    /// Filter `[tid_start, tid_end)` of a tile group down to the tuples the
    /// transaction can see and successfully registers as read
    ///
    /// The first pass writes every visible id into `selection`; the second
    /// pass asks the manager to register each selected read and compacts
    /// `selection` in place to the reads that succeeded. Returns the number
    /// of ids kept.
    pub fn perform_vectorized_read(
        txn_manager: &dyn TransactionManager,
        txn: &TransactionContext,
        tile_group: &TileGroup,
        tid_start: u32,
        tid_end: u32,
        selection: &mut [u32],
    ) -> Result<u32> {
        let width = tid_end.saturating_sub(tid_start) as usize;
        if selection.len() < width {
            return Err(Error::internal(format!(
                "selection vector of {} cannot hold {width} ids",
                selection.len()
            )));
        }
        let header = tile_group.header();

        let mut out = 0usize;
        for tid in tid_start..tid_end {
            selection[out] = tid;
            out += (txn_manager.is_visible(txn, header, tid) == VisibilityType::Ok) as usize;
        }

        let mut kept = 0usize;
        for idx in 0..out {
            let tid = selection[idx];
            let location = ItemPointer::new(tile_group.id(), tid);
            selection[kept] = tid;
            kept += txn_manager.perform_read(txn, location, false)? as usize;
        }
        Ok(kept as u32)
    }

    /// Walk a version chain from its newest version to the one `txn` sees
    ///
    /// Returns `None` when the visible version is a delete marker or no
    /// version is visible.
    pub fn visible_version(
        txn_manager: &dyn TransactionManager,
        storage: &StorageManager,
        txn: &TransactionContext,
        head: ItemPointer,
    ) -> Result<Option<ItemPointer>> {
        let mut location = head;
        while !location.is_null() {
            let tile_group = storage
                .tile_group(location.block)
                .ok_or_else(|| Error::catalog(format!("no tile group for tuple {location}")))?;
            let header = tile_group.header();
            match txn_manager.is_visible(txn, header, location.offset) {
                VisibilityType::Ok => return Ok(Some(location)),
                VisibilityType::Deleted => return Ok(None),
                VisibilityType::Invisible => {
                    location = header.next_item_pointer(location.offset);
                }
            }
        }
        Ok(None)
    }
}
