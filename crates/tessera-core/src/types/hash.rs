//! Hashing consistent with SQL equality
//!
//! Integers of every width and integral decimals share one canonical form so
//! that values comparing equal across types hash equally.

use super::Value;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

const NULL_HASH: u64 = 0x2545_f491_4f6c_dd1d;
const TIMESTAMP_SEED: u64 = 0x75;
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

fn hash_canonical_integer(v: i64) -> u64 {
    xxh3_64(&v.to_le_bytes())
}

impl Value {
    /// Hash code consistent with [`Value::compare_equals`]
    pub fn hash_code(&self) -> u64 {
        match self {
            Value::Null(_) => NULL_HASH,
            Value::Boolean(b) => xxh3_64(&[0xb0, *b as u8]),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Integer(_) | Value::BigInt(_) => {
                let v = self.as_i64().unwrap_or_default();
                // values beyond 2^53 compare against decimals after rounding
                hash_canonical_integer((v as f64) as i64)
            }
            Value::Decimal(d) => {
                if d.fract() == 0.0 && *d >= -TWO_POW_63 && *d <= TWO_POW_63 {
                    hash_canonical_integer(*d as i64)
                } else {
                    xxh3_64(&d.to_bits().to_le_bytes())
                }
            }
            Value::Timestamp(t) => xxh3_64_with_seed(&t.to_le_bytes(), TIMESTAMP_SEED),
            Value::Varchar(v) | Value::Varbinary(v) => xxh3_64(v.as_bytes()),
        }
    }

    /// Fold this value's hash into `seed`
    pub fn hash_combine(&self, seed: &mut u64) {
        hash_combine(seed, self.hash_code());
    }
}

/// `seed ^= h + 0x9e3779b9 + (seed << 6) + (seed >> 2)`
pub fn hash_combine(seed: &mut u64, hash: u64) {
    *seed ^= hash
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}

/// Combined hash of a list of values
pub fn hash_values(values: &[Value]) -> u64 {
    let mut seed = 0u64;
    for value in values {
        value.hash_combine(&mut seed);
    }
    seed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeId;

    #[test]
    fn test_equal_numerics_hash_equal() {
        let h = Value::integer(42).hash_code();
        assert_eq!(Value::tinyint(42).hash_code(), h);
        assert_eq!(Value::bigint(42).hash_code(), h);
        assert_eq!(Value::decimal(42.0).hash_code(), h);
        assert_eq!(Value::decimal(0.0).hash_code(), Value::decimal(-0.0).hash_code());
        assert_eq!(
            Value::bigint(i64::MAX).hash_code(),
            Value::decimal(i64::MAX as f64).hash_code()
        );
    }

    #[test]
    fn test_nulls_hash_alike() {
        assert_eq!(
            Value::null(TypeId::Integer).hash_code(),
            Value::null(TypeId::Varchar).hash_code()
        );
    }

    #[test]
    fn test_hash_values_is_order_sensitive() {
        let a = hash_values(&[Value::integer(1), Value::integer(2)]);
        let b = hash_values(&[Value::integer(2), Value::integer(1)]);
        assert_ne!(a, b);
    }
}
