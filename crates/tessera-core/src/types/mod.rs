//! Runtime value and type model
//!
//! Every SQL scalar is a [`Value`]: a closed sum type over booleans,
//! integers of four widths, decimals, timestamps and variable-length
//! character/binary data, with an explicit typed null. The model defines
//! arithmetic, comparison, casting, hashing and serialization.
//!
//! # Null encoding
//!
//! In memory a null is `Value::Null(type_id)`. In serialized form each
//! fixed-width type reserves a sentinel (the minimum of each integer width,
//! `f64::MIN` for decimals, `u64::MAX` for timestamps) and variable-length
//! types use a length prefix of `-1`. The valid integer ranges therefore
//! start at `MIN + 1`.

mod cast;
mod compare;
mod hash;
mod numeric;
mod serialize;
pub mod timestamp;
mod value;

pub use compare::{CmpBool, CompareOp, SortKey};
pub use hash::{hash_combine, hash_values};
pub use numeric::ArithOp;
pub use serialize::{ByteSink, SerializeInput, SerializeOutput, deserialize_tuple, serialize_tuple};
pub use value::{Value, Varlen};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved values and valid ranges for each scalar type
pub mod limits {
    /// Smallest valid TINYINT
    pub const TINYINT_MIN: i8 = i8::MIN + 1;
    /// Largest valid TINYINT
    pub const TINYINT_MAX: i8 = i8::MAX;
    /// Serialized TINYINT null
    pub const TINYINT_NULL: i8 = i8::MIN;

    /// Smallest valid SMALLINT
    pub const SMALLINT_MIN: i16 = i16::MIN + 1;
    /// Largest valid SMALLINT
    pub const SMALLINT_MAX: i16 = i16::MAX;
    /// Serialized SMALLINT null
    pub const SMALLINT_NULL: i16 = i16::MIN;

    /// Smallest valid INTEGER
    pub const INTEGER_MIN: i32 = i32::MIN + 1;
    /// Largest valid INTEGER
    pub const INTEGER_MAX: i32 = i32::MAX;
    /// Serialized INTEGER null
    pub const INTEGER_NULL: i32 = i32::MIN;

    /// Smallest valid BIGINT
    pub const BIGINT_MIN: i64 = i64::MIN + 1;
    /// Largest valid BIGINT
    pub const BIGINT_MAX: i64 = i64::MAX;
    /// Serialized BIGINT null
    pub const BIGINT_NULL: i64 = i64::MIN;

    /// Serialized DECIMAL null
    pub const DECIMAL_NULL: f64 = f64::MIN;

    /// Largest valid TIMESTAMP (microseconds since the epoch)
    pub const TIMESTAMP_MAX: u64 = 11_231_999_986_399_999_999;
    /// Serialized TIMESTAMP null
    pub const TIMESTAMP_NULL: u64 = u64::MAX;

    /// Serialized BOOLEAN null
    pub const BOOLEAN_NULL: i8 = i8::MIN;

    /// Length prefix of a null variable-length value
    pub const VARLEN_NULL_LENGTH: i32 = -1;
}

/// SQL type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeId {
    /// BOOLEAN
    Boolean,
    /// TINYINT (8-bit)
    TinyInt,
    /// SMALLINT (16-bit)
    SmallInt,
    /// INTEGER (32-bit)
    Integer,
    /// BIGINT (64-bit)
    BigInt,
    /// DECIMAL (double precision)
    Decimal,
    /// TIMESTAMP (microseconds since the Unix epoch)
    Timestamp,
    /// VARCHAR
    Varchar,
    /// VARBINARY
    Varbinary,
}

impl TypeId {
    /// All type ids, in tag order
    pub const ALL: [TypeId; 9] = [
        TypeId::Boolean,
        TypeId::TinyInt,
        TypeId::SmallInt,
        TypeId::Integer,
        TypeId::BigInt,
        TypeId::Decimal,
        TypeId::Timestamp,
        TypeId::Varchar,
        TypeId::Varbinary,
    ];

    /// SQL name of the type
    pub fn name(self) -> &'static str {
        match self {
            TypeId::Boolean => "BOOLEAN",
            TypeId::TinyInt => "TINYINT",
            TypeId::SmallInt => "SMALLINT",
            TypeId::Integer => "INTEGER",
            TypeId::BigInt => "BIGINT",
            TypeId::Decimal => "DECIMAL",
            TypeId::Timestamp => "TIMESTAMP",
            TypeId::Varchar => "VARCHAR",
            TypeId::Varbinary => "VARBINARY",
        }
    }

    /// One-byte tag used by tuple serialization
    pub fn tag(self) -> u8 {
        match self {
            TypeId::Boolean => 1,
            TypeId::TinyInt => 2,
            TypeId::SmallInt => 3,
            TypeId::Integer => 4,
            TypeId::BigInt => 5,
            TypeId::Decimal => 6,
            TypeId::Timestamp => 7,
            TypeId::Varchar => 8,
            TypeId::Varbinary => 9,
        }
    }

    /// Inverse of [`TypeId::tag`]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    /// TINYINT through BIGINT
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            TypeId::TinyInt | TypeId::SmallInt | TypeId::Integer | TypeId::BigInt
        )
    }

    /// Integral or DECIMAL
    pub fn is_numeric(self) -> bool {
        self.is_integral() || self == TypeId::Decimal
    }

    /// VARCHAR or VARBINARY
    pub fn is_varlen(self) -> bool {
        matches!(self, TypeId::Varchar | TypeId::Varbinary)
    }

    /// Serialized width of fixed-width types
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            TypeId::Boolean | TypeId::TinyInt => Some(1),
            TypeId::SmallInt => Some(2),
            TypeId::Integer => Some(4),
            TypeId::BigInt | TypeId::Decimal | TypeId::Timestamp => Some(8),
            TypeId::Varchar | TypeId::Varbinary => None,
        }
    }

    /// Valid range of an integral type, widened
    pub fn integral_bounds(self) -> Option<(i128, i128)> {
        match self {
            TypeId::TinyInt => Some((limits::TINYINT_MIN as i128, limits::TINYINT_MAX as i128)),
            TypeId::SmallInt => Some((limits::SMALLINT_MIN as i128, limits::SMALLINT_MAX as i128)),
            TypeId::Integer => Some((limits::INTEGER_MIN as i128, limits::INTEGER_MAX as i128)),
            TypeId::BigInt => Some((limits::BIGINT_MIN as i128, limits::BIGINT_MAX as i128)),
            _ => None,
        }
    }

    fn integral_rank(self) -> Option<u8> {
        match self {
            TypeId::TinyInt => Some(1),
            TypeId::SmallInt => Some(2),
            TypeId::Integer => Some(3),
            TypeId::BigInt => Some(4),
            _ => None,
        }
    }

    /// Result type of an arithmetic operation on two numeric types
    ///
    /// Integers promote to the wider width; any decimal operand makes the
    /// result a decimal. Returns `None` when either side is not numeric.
    pub fn promote(self, other: TypeId) -> Option<TypeId> {
        if !self.is_numeric() || !other.is_numeric() {
            return None;
        }
        if self == TypeId::Decimal || other == TypeId::Decimal {
            return Some(TypeId::Decimal);
        }
        let (a, b) = (self.integral_rank()?, other.integral_rank()?);
        Some(if a >= b { self } else { other })
    }

    /// Whether values of the two types may be compared
    pub fn is_comparable_with(self, other: TypeId) -> bool {
        (self.is_numeric() && other.is_numeric()) || self == other
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_picks_wider_type() {
        assert_eq!(TypeId::TinyInt.promote(TypeId::SmallInt), Some(TypeId::SmallInt));
        assert_eq!(TypeId::BigInt.promote(TypeId::Integer), Some(TypeId::BigInt));
        assert_eq!(TypeId::Integer.promote(TypeId::Decimal), Some(TypeId::Decimal));
        assert_eq!(TypeId::Integer.promote(TypeId::Varchar), None);
        assert_eq!(TypeId::Boolean.promote(TypeId::Boolean), None);
    }

    #[test]
    fn test_tags_round_trip() {
        for t in TypeId::ALL {
            assert_eq!(TypeId::from_tag(t.tag()), Some(t));
        }
        assert_eq!(TypeId::from_tag(0), None);
    }

    #[test]
    fn test_comparability() {
        assert!(TypeId::TinyInt.is_comparable_with(TypeId::Decimal));
        assert!(TypeId::Varchar.is_comparable_with(TypeId::Varchar));
        assert!(!TypeId::Varchar.is_comparable_with(TypeId::Varbinary));
        assert!(!TypeId::Boolean.is_comparable_with(TypeId::Integer));
    }
}
