//! Chained hash table holding serialized tuples
//!
//! Used by hash joins (build side) and hash aggregation. The table never
//! deduplicates: every insert prepends a new entry to its bucket's chain.

use super::Buffer;
use crate::error::{Error, Result};
use crate::proxy::Tuple;
use crate::types::{SerializeInput, SerializeOutput, deserialize_tuple, serialize_tuple};

#[derive(Debug)]
struct HashEntry {
    hash: u64,
    next: Option<u32>,
    data: Box<[u8]>,
}

/// Bucket-chained hash table
#[derive(Debug, Default)]
pub struct CCHashTable {
    entries: Vec<HashEntry>,
    buckets: Vec<Option<u32>>,
    bucket_mask: u64,
    num_elements: u64,
    scratch: Buffer,
}

crate::proxy_opaque!(CCHashTable => "CCHashTable");

/// Default bound of one serialized tuple
pub const DEFAULT_MAX_TUPLE_BYTES: usize = 64 * 1024;

impl CCHashTable {
    /// Allocate `num_buckets` buckets, rounded up to a power of two
    pub fn init(&mut self, num_buckets: u64) {
        self.init_with_tuple_limit(num_buckets, DEFAULT_MAX_TUPLE_BYTES);
    }

    /// Allocate buckets and a scratch buffer of `max_tuple_bytes`
    pub fn init_with_tuple_limit(&mut self, num_buckets: u64, max_tuple_bytes: usize) {
        let num_buckets = num_buckets.max(1).next_power_of_two();
        self.buckets = vec![None; num_buckets as usize];
        self.bucket_mask = num_buckets - 1;
        self.entries.clear();
        self.num_elements = 0;
        self.scratch.init(max_tuple_bytes);
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash & self.bucket_mask) as usize
    }

    /// Prepend a zeroed entry of `size` bytes to the chain of `hash` and
    /// return it for the caller to fill
    pub fn store_tuple(&mut self, hash: u64, size: usize) -> Result<&mut [u8]> {
        if self.buckets.is_empty() {
            return Err(Error::internal("hash table used before init"));
        }
        let id = u32::try_from(self.entries.len())
            .map_err(|_| Error::out_of_range("hash table entry limit reached"))?;
        let bucket = self.bucket_of(hash);
        self.entries.push(HashEntry {
            hash,
            next: self.buckets[bucket],
            data: vec![0; size].into_boxed_slice(),
        });
        self.buckets[bucket] = Some(id);
        self.num_elements += 1;
        Ok(&mut self.entries[id as usize].data)
    }

    fn serialize(&mut self, tuple: &Tuple) -> Result<()> {
        self.scratch.reset();
        let mut out = SerializeOutput::new(&mut self.scratch);
        serialize_tuple(tuple.values(), &mut out)
    }

    /// Insert a tuple; returns its entry id
    pub fn insert(&mut self, hash: u64, tuple: Tuple) -> Result<i64> {
        self.serialize(&tuple)?;
        let bytes: Box<[u8]> = self.scratch.as_slice().into();
        let id = self.entries.len() as i64;
        self.store_tuple(hash, bytes.len())?.copy_from_slice(&bytes);
        Ok(id)
    }

    fn decode(&self, id: u32) -> Result<Tuple> {
        let entry = self
            .entries
            .get(id as usize)
            .ok_or_else(|| Error::internal(format!("hash table has no entry {id}")))?;
        let values = deserialize_tuple(&mut SerializeInput::new(&entry.data))?;
        Ok(Tuple::new(values))
    }

    fn chain(&self, hash: u64) -> ChainIter<'_> {
        let head = if self.buckets.is_empty() {
            None
        } else {
            self.buckets[self.bucket_of(hash)]
        };
        ChainIter { table: self, next: head }
    }

    /// Entry ids whose stored hash equals `hash`, newest first
    pub fn find_all(&self, hash: u64) -> Vec<u32> {
        self.chain(hash)
            .filter(|(_, entry)| entry.hash == hash)
            .map(|(id, _)| id)
            .collect()
    }

    /// Tuples stored under `hash`, newest first
    pub fn probe(&self, hash: u64) -> Result<Vec<Tuple>> {
        self.find_all(hash).into_iter().map(|id| self.decode(id)).collect()
    }

    /// Id of the entry whose first `key.len()` columns equal `key`, or -1
    pub fn find_group(&self, hash: u64, key: Tuple) -> Result<i64> {
        for id in self.find_all(hash) {
            let stored = self.decode(id)?;
            let matches = stored.values().len() >= key.values().len()
                && stored
                    .values()
                    .iter()
                    .zip(key.values())
                    .all(|(a, b)| group_key_eq(a, b));
            if matches {
                return Ok(id as i64);
            }
        }
        Ok(-1)
    }

    /// Stored tuple of an entry
    pub fn entry(&self, id: i64) -> Result<Tuple> {
        let id = u32::try_from(id).map_err(|_| Error::internal(format!("invalid entry id {id}")))?;
        self.decode(id)
    }

    /// Replace the tuple of an entry, keeping its chain position
    pub fn update_entry(&mut self, id: i64, tuple: Tuple) -> Result<()> {
        let index = usize::try_from(id)
            .ok()
            .filter(|i| *i < self.entries.len())
            .ok_or_else(|| Error::internal(format!("invalid entry id {id}")))?;
        self.serialize(&tuple)?;
        self.entries[index].data = self.scratch.as_slice().into();
        Ok(())
    }

    /// Every stored tuple in insertion order
    pub fn entries(&self) -> Result<Vec<Tuple>> {
        (0..self.entries.len() as u32).map(|id| self.decode(id)).collect()
    }

    /// Hashes along one bucket's chain, head first
    pub fn bucket_chain(&self, bucket: usize) -> Vec<u64> {
        let mut hashes = Vec::new();
        let mut next = self.buckets.get(bucket).copied().flatten();
        while let Some(id) = next {
            let entry = &self.entries[id as usize];
            hashes.push(entry.hash);
            next = entry.next;
        }
        hashes
    }

    /// Live entries
    pub fn num_elements(&self) -> u64 {
        self.num_elements
    }

    /// Bucket count (a power of two)
    pub fn num_buckets(&self) -> u64 {
        self.buckets.len() as u64
    }

    /// `num_buckets - 1`
    pub fn bucket_mask(&self) -> u64 {
        self.bucket_mask
    }

    /// Free all entries and the bucket array
    pub fn destroy(&mut self) {
        self.entries = Vec::new();
        self.buckets = Vec::new();
        self.bucket_mask = 0;
        self.num_elements = 0;
        self.scratch.destroy();
    }
}

/// Grouping treats nulls as equal to each other
fn group_key_eq(a: &crate::types::Value, b: &crate::types::Value) -> bool {
    match (a.is_null(), b.is_null()) {
        (true, true) => true,
        (false, false) => a.compare_equals(b).map(|c| c.is_true()).unwrap_or(false),
        _ => false,
    }
}

struct ChainIter<'a> {
    table: &'a CCHashTable,
    next: Option<u32>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (u32, &'a HashEntry);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let entry = &self.table.entries[id as usize];
        self.next = entry.next;
        Some((id, entry))
    }
}
