//! Batch of tuple ids surviving a visibility check

use crate::concurrency::TransactionRuntime;
use crate::error::{Error, Result};
use crate::executor::ExecutorContext;
use crate::storage::TileGroup;
use std::sync::Arc;

/// Tuple ids of one tile-group batch
#[derive(Debug, Default)]
pub struct SelectionVector {
    ids: Vec<u32>,
    count: u32,
}

crate::proxy_opaque!(SelectionVector => "SelectionVector");

impl SelectionVector {
    /// Reserve room for `capacity` ids
    pub fn init(&mut self, capacity: u32) {
        self.ids = vec![0; capacity as usize];
        self.count = 0;
    }

    /// Ids the vector can hold
    pub fn capacity(&self) -> u32 {
        self.ids.len() as u32
    }

    /// Keep the ids in `[start, end)` that are visible to the running
    /// transaction and whose read it registered; returns the count
    pub fn filter_visible(
        &mut self,
        ctx: Arc<ExecutorContext>,
        tile_group: Arc<TileGroup>,
        start: u32,
        end: u32,
    ) -> Result<u32> {
        let width = end.saturating_sub(start);
        if width > self.capacity() {
            self.ids.resize(width as usize, 0);
        }
        self.count = TransactionRuntime::perform_vectorized_read(
            ctx.txn_manager(),
            ctx.txn(),
            &tile_group,
            start,
            end,
            &mut self.ids,
        )?;
        Ok(self.count)
    }

    /// Selected ids
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The `index`-th selected id
    pub fn get(&self, index: u32) -> Result<u32> {
        if index >= self.count {
            return Err(Error::internal(format!(
                "selection index {index} out of {} entries",
                self.count
            )));
        }
        Ok(self.ids[index as usize])
    }

    /// Selected ids in order
    pub fn ids(&self) -> &[u32] {
        &self.ids[..self.count as usize]
    }
}
