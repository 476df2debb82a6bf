//! Bloom filter used to prefilter hash-join probes

use super::hash::bloom_hashes;
use crate::proxy::Tuple;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bit-array bloom filter
///
/// Each key contributes one bit per hash function. `contains` never returns
/// false for an added key; it may return true for keys never added.
#[derive(Debug, Default)]
pub struct BloomFilter {
    bytes: Vec<u8>,
    num_bits: u64,
    num_probes: AtomicU64,
    num_misses: AtomicU64,
}

crate::proxy_opaque!(BloomFilter => "BloomFilter");

impl BloomFilter {
    /// Bits to allocate for `estimated_keys` keys
    pub fn bits_for(estimated_keys: u64, bits_per_key: u64) -> u64 {
        estimated_keys.saturating_mul(bits_per_key).max(64)
    }

    /// Allocate `ceil(num_bits / 8)` zeroed bytes
    pub fn init(&mut self, num_bits: u64) {
        let num_bits = num_bits.max(1);
        self.bytes = vec![0; num_bits.div_ceil(8) as usize];
        self.num_bits = num_bits;
        self.num_probes.store(0, Ordering::Relaxed);
        self.num_misses.store(0, Ordering::Relaxed);
    }

    fn bit(&self, hash: u64) -> (usize, u8) {
        let bit = hash % self.num_bits;
        ((bit / 8) as usize, 1 << (bit % 8))
    }

    /// Set the bit of every hash
    pub fn add(&mut self, hashes: &[u64]) {
        if self.num_bits == 0 {
            return;
        }
        for &hash in hashes {
            let (byte, mask) = self.bit(hash);
            self.bytes[byte] |= mask;
        }
    }

    /// True if the bit of every hash is set
    pub fn contains(&self, hashes: &[u64]) -> bool {
        if self.num_bits == 0 {
            return false;
        }
        self.num_probes.fetch_add(1, Ordering::Relaxed);
        let found = hashes.iter().all(|&hash| {
            let (byte, mask) = self.bit(hash);
            self.bytes[byte] & mask != 0
        });
        if !found {
            self.num_misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Add a composite key using both key hash functions
    pub fn add_key(&mut self, key: Tuple) {
        self.add(&bloom_hashes(key.values()));
    }

    /// Probe a composite key using both key hash functions
    pub fn contains_key(&self, key: Tuple) -> bool {
        self.contains(&bloom_hashes(key.values()))
    }

    /// Size of the bit array in bits
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Size of the bit array in bytes
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Probes made and probes rejected
    pub fn probe_stats(&self) -> (u64, u64) {
        (
            self.num_probes.load(Ordering::Relaxed),
            self.num_misses.load(Ordering::Relaxed),
        )
    }

    /// Release the bit array
    pub fn destroy(&mut self) {
        self.bytes = Vec::new();
        self.num_bits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_allocation_rounds_up() {
        let mut filter = BloomFilter::default();
        filter.init(17);
        assert_eq!(filter.byte_len(), 3);
        assert_eq!(filter.num_bits(), 17);
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::default();
        filter.init(BloomFilter::bits_for(100, 10));
        for i in 0..100 {
            filter.add_key(Tuple::new(vec![Value::integer(i)]));
        }
        for i in 0..100 {
            assert!(filter.contains_key(Tuple::new(vec![Value::integer(i)])));
        }
    }

    #[test]
    fn test_colliding_hashes_are_false_positives() {
        let mut filter = BloomFilter::default();
        filter.init(64);
        filter.add(&[3, 10]);
        assert!(filter.contains(&[3, 10]));
        // unrelated key whose hashes land on the same bits
        assert!(filter.contains(&[67, 138]));
        assert!(!filter.contains(&[3, 11]));
        assert_eq!(filter.probe_stats(), (3, 1));
    }
}
