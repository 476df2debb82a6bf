//! The [`Value`] sum type and its factories

use super::{TypeId, limits, timestamp};
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Serialize, Serializer};
use std::fmt;

/// Variable-length payload of a VARCHAR or VARBINARY value
///
/// A managed payload is exclusively owned by its value. An unmanaged payload
/// references data owned elsewhere (for example a static string or a shared
/// buffer); [`Value::copy`] always produces a managed payload.
#[derive(Clone)]
pub struct Varlen {
    data: Bytes,
    managed: bool,
}

impl Varlen {
    /// Take ownership of a byte vector
    pub fn owned(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            managed: true,
        }
    }

    /// Reference externally managed bytes without copying
    pub fn external(data: Bytes) -> Self {
        Self {
            data,
            managed: false,
        }
    }

    /// Reference static bytes without copying
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::external(Bytes::from_static(data))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Zero-length payload
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the payload is owned by the value
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Deep copy into an owned payload
    pub fn deep_copy(&self) -> Self {
        Self {
            data: Bytes::copy_from_slice(&self.data),
            managed: true,
        }
    }
}

impl PartialEq for Varlen {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Varlen {}

impl fmt::Debug for Varlen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.data) {
            Ok(text) => write!(f, "{text:?}"),
            Err(_) => write!(f, "{:?}", self.data.as_ref()),
        }
    }
}

impl Serialize for Varlen {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.data)
    }
}

/// A nullable SQL scalar
///
/// Equality through `==` is structural (decimals compare by bit pattern) and
/// is what the serialization round-trip guarantees. SQL equality, with null
/// semantics and cross-width numeric comparison, is [`Value::compare`].
#[derive(Clone, Debug, Serialize)]
pub enum Value {
    /// Typed null
    Null(TypeId),
    /// BOOLEAN
    Boolean(bool),
    /// TINYINT
    TinyInt(i8),
    /// SMALLINT
    SmallInt(i16),
    /// INTEGER
    Integer(i32),
    /// BIGINT
    BigInt(i64),
    /// DECIMAL
    Decimal(f64),
    /// TIMESTAMP in microseconds since the Unix epoch
    Timestamp(u64),
    /// VARCHAR
    Varchar(Varlen),
    /// VARBINARY
    Varbinary(Varlen),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null(a), Value::Null(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::TinyInt(a), Value::TinyInt(b)) => a == b,
            (Value::SmallInt(a), Value::SmallInt(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a.to_bits() == b.to_bits(),
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Varchar(a), Value::Varchar(b)) => a == b,
            (Value::Varbinary(a), Value::Varbinary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

// Factories. Inputs equal to a type's null sentinel produce that type's null.
impl Value {
    /// Null of the given type
    pub fn null(type_id: TypeId) -> Self {
        Value::Null(type_id)
    }

    /// BOOLEAN value
    pub fn boolean(v: bool) -> Self {
        Value::Boolean(v)
    }

    /// TINYINT value
    pub fn tinyint(v: i8) -> Self {
        if v == limits::TINYINT_NULL {
            Value::Null(TypeId::TinyInt)
        } else {
            Value::TinyInt(v)
        }
    }

    /// SMALLINT value
    pub fn smallint(v: i16) -> Self {
        if v == limits::SMALLINT_NULL {
            Value::Null(TypeId::SmallInt)
        } else {
            Value::SmallInt(v)
        }
    }

    /// INTEGER value
    pub fn integer(v: i32) -> Self {
        if v == limits::INTEGER_NULL {
            Value::Null(TypeId::Integer)
        } else {
            Value::Integer(v)
        }
    }

    /// BIGINT value
    pub fn bigint(v: i64) -> Self {
        if v == limits::BIGINT_NULL {
            Value::Null(TypeId::BigInt)
        } else {
            Value::BigInt(v)
        }
    }

    /// DECIMAL value
    pub fn decimal(v: f64) -> Self {
        if v.to_bits() == limits::DECIMAL_NULL.to_bits() {
            Value::Null(TypeId::Decimal)
        } else {
            Value::Decimal(v)
        }
    }

    /// TIMESTAMP value
    pub fn timestamp(micros: u64) -> Self {
        if micros == limits::TIMESTAMP_NULL {
            Value::Null(TypeId::Timestamp)
        } else {
            Value::Timestamp(micros)
        }
    }

    /// Owned VARCHAR value
    pub fn varchar(text: impl Into<String>) -> Self {
        Value::Varchar(Varlen::owned(text.into().into_bytes()))
    }

    /// VARCHAR referencing static text (not managed by the value)
    pub fn varchar_static(text: &'static str) -> Self {
        Value::Varchar(Varlen::from_static(text.as_bytes()))
    }

    /// Owned VARBINARY value
    pub fn varbinary(data: impl Into<Vec<u8>>) -> Self {
        Value::Varbinary(Varlen::owned(data.into()))
    }

    /// VARCHAR or VARBINARY over shared bytes (not managed by the value)
    pub fn varlen_external(type_id: TypeId, data: Bytes) -> Result<Self> {
        match type_id {
            TypeId::Varchar => Ok(Value::Varchar(Varlen::external(data))),
            TypeId::Varbinary => Ok(Value::Varbinary(Varlen::external(data))),
            other => Err(Error::type_mismatch("VARCHAR or VARBINARY", other.name())),
        }
    }

    /// Zero of a numeric type
    pub fn zero(type_id: TypeId) -> Result<Self> {
        match type_id {
            TypeId::TinyInt => Ok(Value::TinyInt(0)),
            TypeId::SmallInt => Ok(Value::SmallInt(0)),
            TypeId::Integer => Ok(Value::Integer(0)),
            TypeId::BigInt => Ok(Value::BigInt(0)),
            TypeId::Decimal => Ok(Value::Decimal(0.0)),
            other => Err(Error::incompatible(format!("no zero value for {other}"))),
        }
    }

    /// Smallest valid value of a type
    pub fn min_value(type_id: TypeId) -> Result<Self> {
        match type_id {
            TypeId::Boolean => Ok(Value::Boolean(false)),
            TypeId::TinyInt => Ok(Value::TinyInt(limits::TINYINT_MIN)),
            TypeId::SmallInt => Ok(Value::SmallInt(limits::SMALLINT_MIN)),
            TypeId::Integer => Ok(Value::Integer(limits::INTEGER_MIN)),
            TypeId::BigInt => Ok(Value::BigInt(limits::BIGINT_MIN)),
            TypeId::Decimal => Ok(Value::Decimal(f32::MIN as f64)),
            TypeId::Timestamp => Ok(Value::Timestamp(0)),
            TypeId::Varchar => Ok(Value::varchar("")),
            TypeId::Varbinary => Ok(Value::varbinary(Vec::new())),
        }
    }

    /// Largest valid value of a fixed-width type
    pub fn max_value(type_id: TypeId) -> Result<Self> {
        match type_id {
            TypeId::Boolean => Ok(Value::Boolean(true)),
            TypeId::TinyInt => Ok(Value::TinyInt(limits::TINYINT_MAX)),
            TypeId::SmallInt => Ok(Value::SmallInt(limits::SMALLINT_MAX)),
            TypeId::Integer => Ok(Value::Integer(limits::INTEGER_MAX)),
            TypeId::BigInt => Ok(Value::BigInt(limits::BIGINT_MAX)),
            TypeId::Decimal => Ok(Value::Decimal(f64::MAX)),
            TypeId::Timestamp => Ok(Value::Timestamp(limits::TIMESTAMP_MAX)),
            other => Err(Error::incompatible(format!("{other} has no maximum value"))),
        }
    }
}

// Accessors
impl Value {
    /// Type of the value (for nulls, the type of the null)
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null(t) => *t,
            Value::Boolean(_) => TypeId::Boolean,
            Value::TinyInt(_) => TypeId::TinyInt,
            Value::SmallInt(_) => TypeId::SmallInt,
            Value::Integer(_) => TypeId::Integer,
            Value::BigInt(_) => TypeId::BigInt,
            Value::Decimal(_) => TypeId::Decimal,
            Value::Timestamp(_) => TypeId::Timestamp,
            Value::Varchar(_) => TypeId::Varchar,
            Value::Varbinary(_) => TypeId::Varbinary,
        }
    }

    /// Whether the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null(_))
    }

    /// Non-null TRUE
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    /// Non-null FALSE
    pub fn is_false(&self) -> bool {
        matches!(self, Value::Boolean(false))
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral payload widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Decimal(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Timestamp payload
    pub fn as_timestamp(&self) -> Option<u64> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Variable-length payload
    pub fn as_varlen(&self) -> Option<&Varlen> {
        match self {
            Value::Varchar(v) | Value::Varbinary(v) => Some(v),
            _ => None,
        }
    }

    /// Raw bytes of a variable-length value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.as_varlen().map(Varlen::as_bytes)
    }

    /// VARCHAR payload as UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(v) => std::str::from_utf8(v.as_bytes()).ok(),
            _ => None,
        }
    }

    /// Integral payload, failing with a type error for other values
    pub fn expect_i64(&self) -> Result<i64> {
        self.as_i64()
            .ok_or_else(|| Error::type_mismatch("integral value", self.type_id().name()))
    }

    /// Numeric payload, failing with a type error for other values
    pub fn expect_f64(&self) -> Result<f64> {
        self.as_f64()
            .ok_or_else(|| Error::type_mismatch("numeric value", self.type_id().name()))
    }

    /// Deep copy; variable-length payloads become owned
    pub fn copy(&self) -> Self {
        match self {
            Value::Varchar(v) => Value::Varchar(v.deep_copy()),
            Value::Varbinary(v) => Value::Varbinary(v.deep_copy()),
            other => other.clone(),
        }
    }

    /// Whether the value is a numeric zero
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Decimal(v) => *v == 0.0,
            other => other.as_i64() == Some(0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null(t) => write!(f, "{}_null", t.name().to_ascii_lowercase()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::TinyInt(v) => write!(f, "{v}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Timestamp(t) => f.write_str(&timestamp::format(*t)),
            Value::Varchar(v) => f.write_str(&v.to_text()),
            Value::Varbinary(v) => {
                f.write_str("\\x")?;
                for byte in v.as_bytes() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::boolean(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::tinyint(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::smallint(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::bigint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::varchar(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::varchar(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_become_nulls() {
        assert_eq!(Value::integer(i32::MIN), Value::Null(TypeId::Integer));
        assert_eq!(Value::tinyint(i8::MIN), Value::Null(TypeId::TinyInt));
        assert_eq!(Value::decimal(f64::MIN), Value::Null(TypeId::Decimal));
        assert_eq!(Value::timestamp(u64::MAX), Value::Null(TypeId::Timestamp));
        assert_eq!(Value::integer(i32::MIN + 1), Value::Integer(i32::MIN + 1));
    }

    #[test]
    fn test_null_vs_empty_varchar() {
        let empty = Value::varchar("");
        let null = Value::null(TypeId::Varchar);
        assert!(!empty.is_null());
        assert!(null.is_null());
        assert_ne!(empty, null);
        assert_eq!(empty.as_bytes().map(<[u8]>::len), Some(0));
    }

    #[test]
    fn test_copy_takes_ownership() {
        let external = Value::varchar_static("shared");
        assert!(!external.as_varlen().unwrap().is_managed());
        let copied = external.copy();
        assert!(copied.as_varlen().unwrap().is_managed());
        assert_eq!(copied, external);
    }

    #[test]
    fn test_to_string() {
        assert_eq!(Value::Null(TypeId::SmallInt).to_string(), "smallint_null");
        assert_eq!(Value::integer(-42).to_string(), "-42");
        assert_eq!(Value::decimal(1.5).to_string(), "1.5");
        assert_eq!(Value::boolean(true).to_string(), "true");
        assert_eq!(Value::varbinary(vec![0xde, 0xad]).to_string(), "\\xdead");
    }

    #[test]
    fn test_structural_equality_of_decimals() {
        assert_eq!(Value::decimal(f64::NAN), Value::decimal(f64::NAN));
        assert_ne!(Value::decimal(0.0), Value::decimal(-0.0));
        assert_ne!(Value::integer(1), Value::bigint(1));
    }
}
