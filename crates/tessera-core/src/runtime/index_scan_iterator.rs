//! Buffered index lookup feeding compiled index scans
//!
//! The iterator runs one index operation, resolves every hit to the version
//! the running transaction sees and groups the results by tile group.
//! Generated code then walks each tile group's offset range with the usual
//! vectorized visibility check and keeps only the offsets present in the
//! result, found with [`IndexScanIterator::row_offset_in_result`].

use crate::concurrency::TransactionRuntime;
use crate::error::{Error, Result};
use crate::executor::ExecutorContext;
use crate::proxy::Tuple;
use crate::storage::{Index, ItemPointer, Oid};
use crate::types::{SortKey, Value};
use std::sync::Arc;
use tracing::trace;

/// Lookup mode, fixed by which keys were supplied at init
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScanMode {
    /// No keys: every entry of the index
    #[default]
    Full,
    /// Exact key
    Point(Vec<Value>),
    /// Inclusive key range; a missing bound is open
    Range {
        /// Lower bound
        low: Option<Vec<Value>>,
        /// Upper bound
        high: Option<Vec<Value>>,
    },
}

impl ScanMode {
    /// Whether a version holding `key` belongs to the lookup
    pub fn admits(&self, key: &SortKey) -> bool {
        let bound = |values: &[Value]| SortKey::new(values.to_vec());
        match self {
            ScanMode::Full => true,
            ScanMode::Point(point) => *key == bound(point),
            ScanMode::Range { low, high } => {
                low.as_deref().is_none_or(|low| *key >= bound(low))
                    && high.as_deref().is_none_or(|high| *key <= bound(high))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GroupRange {
    tile_group_id: Oid,
    start: usize,
    end: usize,
}

/// Point, range or full index scan with buffered results
#[derive(Debug, Default)]
pub struct IndexScanIterator {
    mode: ScanMode,
    result: Vec<ItemPointer>,
    groups: Vec<GroupRange>,
}

crate::proxy_opaque!(IndexScanIterator => "IndexScanIterator");

fn optional_key(tuple: &Tuple) -> Option<Vec<Value>> {
    (!tuple.values().is_empty()).then(|| tuple.to_vec())
}

impl IndexScanIterator {
    /// Choose the mode from the keys; an empty tuple stands for an absent key
    pub fn init(&mut self, point: Tuple, low: Tuple, high: Tuple) -> Result<()> {
        let point = optional_key(&point);
        let low = optional_key(&low);
        let high = optional_key(&high);
        self.mode = match (point, low, high) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(Error::codegen(
                    "index scan takes either a point key or a key range",
                ));
            }
            (Some(key), None, None) => ScanMode::Point(key),
            (None, None, None) => ScanMode::Full,
            (None, low, high) => ScanMode::Range { low, high },
        };
        self.result.clear();
        self.groups.clear();
        Ok(())
    }

    /// Lookup mode
    pub fn mode(&self) -> &ScanMode {
        &self.mode
    }

    /// Run the lookup and buffer the visible versions; returns the hit count
    ///
    /// Index entries outlive the versions that created them, so a visible
    /// version whose current key falls outside the lookup is dropped.
    pub fn do_scan(&mut self, index: Arc<Index>, ctx: Arc<ExecutorContext>) -> Result<u32> {
        let heads = match &self.mode {
            ScanMode::Full => index.scan_all(),
            ScanMode::Point(key) => index.scan_key(key),
            ScanMode::Range { low, high } => index.scan_range(low.as_deref(), high.as_deref()),
        };

        let mut result = Vec::with_capacity(heads.len());
        for head in heads {
            if let Some(location) = TransactionRuntime::visible_version(
                ctx.txn_manager(),
                ctx.storage(),
                ctx.txn(),
                head,
            )? {
                if matches!(self.mode, ScanMode::Full) || self.version_matches(&index, &ctx, location)? {
                    result.push(location);
                }
            }
        }
        result.sort_unstable_by_key(|loc| (loc.block, loc.offset));
        result.dedup();

        let mut groups: Vec<GroupRange> = Vec::new();
        for (i, location) in result.iter().enumerate() {
            match groups.last_mut() {
                Some(group) if group.tile_group_id == location.block => group.end = i + 1,
                _ => groups.push(GroupRange {
                    tile_group_id: location.block,
                    start: i,
                    end: i + 1,
                }),
            }
        }
        trace!(index = index.name(), hits = result.len(), tile_groups = groups.len(), "index scan");
        self.result = result;
        self.groups = groups;
        Ok(self.result.len() as u32)
    }

    fn version_matches(&self, index: &Index, ctx: &ExecutorContext, location: ItemPointer) -> Result<bool> {
        let tile_group = ctx
            .storage()
            .tile_group(location.block)
            .ok_or_else(|| Error::catalog(format!("no tile group for tuple {location}")))?;
        let key = index.key_of(&tile_group.tuple(location.offset)?)?;
        Ok(self.mode.admits(&key))
    }

    fn group(&self, group: u32) -> Result<&GroupRange> {
        self.groups
            .get(group as usize)
            .ok_or_else(|| Error::internal(format!("index scan has no tile group #{group}")))
    }

    /// Buffered hits
    pub fn result_size(&self) -> u32 {
        self.result.len() as u32
    }

    /// Distinct tile groups among the hits
    pub fn num_tile_groups(&self) -> u32 {
        self.groups.len() as u32
    }

    /// Id of the `group`-th tile group
    pub fn tile_group_id(&self, group: u32) -> Result<u32> {
        Ok(self.group(group)?.tile_group_id)
    }

    /// Smallest hit offset within the `group`-th tile group
    pub fn min_offset(&self, group: u32) -> Result<u32> {
        let range = self.group(group)?;
        Ok(self.result[range.start].offset)
    }

    /// Largest hit offset within the `group`-th tile group
    pub fn max_offset(&self, group: u32) -> Result<u32> {
        let range = self.group(group)?;
        Ok(self.result[range.end - 1].offset)
    }

    /// Position of `(tile_group_id, offset)` in the buffered result, or -1
    pub fn row_offset_in_result(&self, tile_group_id: u32, offset: u32) -> i64 {
        let Some(range) = self
            .groups
            .iter()
            .find(|g| g.tile_group_id == tile_group_id)
        else {
            return -1;
        };
        self.result[range.start..range.end]
            .binary_search_by_key(&offset, |loc| loc.offset)
            .map_or(-1, |i| (range.start + i) as i64)
    }

    /// Buffered hits in (tile group, offset) order
    pub fn result(&self) -> &[ItemPointer] {
        &self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: i32) -> Tuple {
        Tuple::new(vec![Value::integer(v)])
    }

    fn empty() -> Tuple {
        Tuple::new(Vec::new())
    }

    #[test]
    fn test_mode_from_keys() {
        let mut it = IndexScanIterator::default();
        it.init(key(3), empty(), empty()).unwrap();
        assert_eq!(it.mode(), &ScanMode::Point(vec![Value::integer(3)]));

        it.init(empty(), key(1), empty()).unwrap();
        assert!(matches!(it.mode(), ScanMode::Range { low: Some(_), high: None }));

        it.init(empty(), empty(), empty()).unwrap();
        assert_eq!(it.mode(), &ScanMode::Full);

        assert!(it.init(key(1), key(0), empty()).is_err());
    }

    #[test]
    fn test_mode_admits_keys() {
        let key = |v: i32| SortKey::new(vec![Value::integer(v)]);
        assert!(ScanMode::Point(vec![Value::integer(3)]).admits(&key(3)));
        assert!(!ScanMode::Point(vec![Value::integer(3)]).admits(&key(4)));
        let range = ScanMode::Range {
            low: Some(vec![Value::integer(10)]),
            high: None,
        };
        assert!(range.admits(&key(10)));
        assert!(range.admits(&key(99)));
        assert!(!range.admits(&key(9)));
        assert!(ScanMode::Full.admits(&key(-1)));
    }

    #[test]
    fn test_row_offset_binary_search() {
        let mut it = IndexScanIterator::default();
        it.result = vec![
            ItemPointer::new(1, 2),
            ItemPointer::new(1, 5),
            ItemPointer::new(1, 9),
            ItemPointer::new(4, 0),
        ];
        it.groups = vec![
            GroupRange {
                tile_group_id: 1,
                start: 0,
                end: 3,
            },
            GroupRange {
                tile_group_id: 4,
                start: 3,
                end: 4,
            },
        ];
        assert_eq!(it.row_offset_in_result(1, 5), 1);
        assert_eq!(it.row_offset_in_result(4, 0), 3);
        assert_eq!(it.row_offset_in_result(1, 6), -1);
        assert_eq!(it.row_offset_in_result(2, 0), -1);
        assert_eq!(it.min_offset(0).unwrap(), 2);
        assert_eq!(it.max_offset(0).unwrap(), 9);
        assert!(it.tile_group_id(2).is_err());
    }
}
