//! Key hash functions used by hash tables and bloom filters
//!
//! All functions start from [`Value::hash_code`], so keys that compare equal
//! across numeric widths hash equally under every function here.

use crate::types::{Value, hash_values};

/// Murmur3 64-bit finalizer
pub fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// Hash of a composite key used to place it in a [`CCHashTable`](super::CCHashTable)
pub fn hash_key(values: &[Value]) -> u64 {
    hash_values(values)
}

/// Murmur3-mixed key hash
pub fn murmur3_key(values: &[Value]) -> u64 {
    values.iter().fold(0x9747_b28c_u64, |acc, value| {
        fmix64(acc ^ value.hash_code()).rotate_left(31)
    })
}

/// CRC32-based key hash, widened to 64 bits
pub fn crc_key(values: &[Value]) -> u64 {
    let mut low = crc32fast::Hasher::new();
    let mut high = crc32fast::Hasher::new_with_initial(0x5bd1_e995);
    for value in values {
        let bytes = value.hash_code().to_le_bytes();
        low.update(&bytes);
        high.update(&bytes);
    }
    ((high.finalize() as u64) << 32) | low.finalize() as u64
}

/// The two independent hashes a bloom filter probes per key
pub fn bloom_hashes(values: &[Value]) -> [u64; 2] {
    [murmur3_key(values), crc_key(values)]
}
