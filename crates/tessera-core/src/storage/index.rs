//! Ordered secondary structure mapping keys to version-chain heads

use super::{Indirection, ItemPointer, Oid};
use crate::error::{Error, Result};
use crate::types::{SortKey, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Role of an index on its table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Unique key identifying the row; never touched by version installs
    Primary,
    /// Unique secondary key
    Unique,
    /// Non-unique secondary key
    Secondary,
}

impl IndexKind {
    /// Whether duplicate live keys are rejected
    pub fn is_unique(self) -> bool {
        matches!(self, IndexKind::Primary | IndexKind::Unique)
    }
}

/// B-tree index over one or more key columns
///
/// Entries point at the indirection of a tuple, so they keep resolving to
/// the newest version as the tuple is updated.
#[derive(Debug)]
pub struct Index {
    oid: Oid,
    name: String,
    kind: IndexKind,
    key_columns: Vec<u32>,
    entries: RwLock<BTreeMap<SortKey, Vec<Indirection>>>,
}

crate::proxy_opaque!(Index => "Index");

impl Index {
    /// Empty index over `key_columns` of the table schema
    pub fn new(oid: Oid, name: impl Into<String>, kind: IndexKind, key_columns: Vec<u32>) -> Self {
        Self {
            oid,
            name: name.into(),
            kind,
            key_columns,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Index id
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// Index name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role on the table
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Table columns forming the key
    pub fn key_columns(&self) -> &[u32] {
        &self.key_columns
    }

    /// Whether any key column is in `columns`
    pub fn covers_any(&self, columns: &[u32]) -> bool {
        self.key_columns.iter().any(|c| columns.contains(c))
    }

    /// Project a full row onto the key columns
    pub fn key_of(&self, row: &[Value]) -> Result<SortKey> {
        self.key_columns
            .iter()
            .map(|&c| {
                row.get(c as usize).cloned().ok_or_else(|| {
                    Error::storage(format!("index '{}' key column {c} is missing", self.name))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(SortKey::new)
    }

    /// Add an entry; a unique index refuses a key some live tuple already
    /// holds. `is_live` decides liveness from the current chain head.
    pub fn insert_entry(
        &self,
        key: SortKey,
        indirection: Indirection,
        is_live: impl Fn(ItemPointer) -> bool,
    ) -> bool {
        let mut entries = self.entries.write();
        let slot = entries.entry(key).or_default();
        if self.kind.is_unique() {
            let conflict = slot.iter().any(|existing| {
                !Arc::ptr_eq(existing, &indirection)
                    && is_live(ItemPointer::unpack(existing.load(Ordering::Acquire)))
            });
            if conflict {
                return false;
            }
        }
        if !slot.iter().any(|e| Arc::ptr_eq(e, &indirection)) {
            slot.push(indirection);
        }
        true
    }

    /// Drop one entry
    pub fn delete_entry(&self, key: &SortKey, indirection: &Indirection) {
        let mut entries = self.entries.write();
        if let Some(slot) = entries.get_mut(key) {
            slot.retain(|e| !Arc::ptr_eq(e, indirection));
            if slot.is_empty() {
                entries.remove(key);
            }
        }
    }

    fn heads<'a>(slots: impl Iterator<Item = &'a Vec<Indirection>>) -> Vec<ItemPointer> {
        slots
            .flatten()
            .map(|i| ItemPointer::unpack(i.load(Ordering::Acquire)))
            .collect()
    }

    /// Chain heads stored under exactly `key`
    pub fn scan_key(&self, key: &[Value]) -> Vec<ItemPointer> {
        let entries = self.entries.read();
        Self::heads(entries.get(&SortKey::new(key.to_vec())).into_iter())
    }

    /// Chain heads with keys in `[low, high]`; a missing bound is open
    pub fn scan_range(&self, low: Option<&[Value]>, high: Option<&[Value]>) -> Vec<ItemPointer> {
        let lower = low.map_or(Bound::Unbounded, |k| Bound::Included(SortKey::new(k.to_vec())));
        let upper = high.map_or(Bound::Unbounded, |k| Bound::Included(SortKey::new(k.to_vec())));
        if let (Bound::Included(l), Bound::Included(h)) = (&lower, &upper) {
            if l > h {
                return Vec::new();
            }
        }
        let entries = self.entries.read();
        Self::heads(entries.range((lower, upper)).map(|(_, v)| v))
    }

    /// Every chain head in key order
    pub fn scan_all(&self) -> Vec<ItemPointer> {
        let entries = self.entries.read();
        Self::heads(entries.values())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::new_indirection;

    fn key(v: i32) -> SortKey {
        SortKey::new(vec![Value::integer(v)])
    }

    #[test]
    fn test_unique_index_rejects_live_duplicate() {
        let index = Index::new(1, "pk", IndexKind::Primary, vec![0]);
        let a = new_indirection(ItemPointer::new(0, 0));
        let b = new_indirection(ItemPointer::new(0, 1));
        assert!(index.insert_entry(key(1), a, |_| true));
        assert!(!index.insert_entry(key(1), b.clone(), |_| true));
        // the existing holder is dead, so the key is free again
        assert!(index.insert_entry(key(1), b, |_| false));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_secondary_index_allows_duplicates() {
        let index = Index::new(2, "by_name", IndexKind::Secondary, vec![1]);
        assert!(index.insert_entry(key(4), new_indirection(ItemPointer::new(0, 0)), |_| true));
        assert!(index.insert_entry(key(4), new_indirection(ItemPointer::new(0, 1)), |_| true));
        assert_eq!(index.scan_key(&[Value::integer(4)]).len(), 2);
    }

    #[test]
    fn test_range_scan_is_inclusive_and_follows_heads() {
        let index = Index::new(1, "pk", IndexKind::Primary, vec![0]);
        let heads: Vec<_> = (0..5).map(|i| new_indirection(ItemPointer::new(0, i))).collect();
        for (i, head) in heads.iter().enumerate() {
            index.insert_entry(key(i as i32 * 10), head.clone(), |_| true);
        }
        heads[2].store(ItemPointer::new(3, 7).pack(), Ordering::Release);
        let found = index.scan_range(Some(&[Value::integer(10)]), Some(&[Value::integer(30)]));
        assert_eq!(
            found,
            vec![ItemPointer::new(0, 1), ItemPointer::new(3, 7), ItemPointer::new(0, 3)]
        );
        assert!(
            index
                .scan_range(Some(&[Value::integer(30)]), Some(&[Value::integer(10)]))
                .is_empty()
        );
        assert_eq!(index.scan_all().len(), 5);
    }

    #[test]
    fn test_delete_entry_removes_empty_keys() {
        let index = Index::new(1, "pk", IndexKind::Unique, vec![0]);
        let head = new_indirection(ItemPointer::new(0, 0));
        index.insert_entry(key(1), head.clone(), |_| true);
        index.delete_entry(&key(1), &head);
        assert!(index.is_empty());
    }
}
