//! Three-valued comparison

use super::{TypeId, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Result of a SQL comparison: true, false or null
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpBool {
    /// Comparison is false
    False,
    /// Comparison is true
    True,
    /// At least one operand was null
    Null,
}

impl CmpBool {
    /// Lift a Rust bool
    pub fn from_bool(b: bool) -> Self {
        if b { CmpBool::True } else { CmpBool::False }
    }

    /// Definitely true
    pub fn is_true(self) -> bool {
        self == CmpBool::True
    }

    /// Definitely false
    pub fn is_false(self) -> bool {
        self == CmpBool::False
    }

    /// Null result
    pub fn is_null(self) -> bool {
        self == CmpBool::Null
    }

    /// SQL three-valued AND
    pub fn and(self, other: CmpBool) -> CmpBool {
        match (self, other) {
            (CmpBool::False, _) | (_, CmpBool::False) => CmpBool::False,
            (CmpBool::True, CmpBool::True) => CmpBool::True,
            _ => CmpBool::Null,
        }
    }

    /// SQL three-valued OR
    pub fn or(self, other: CmpBool) -> CmpBool {
        match (self, other) {
            (CmpBool::True, _) | (_, CmpBool::True) => CmpBool::True,
            (CmpBool::False, CmpBool::False) => CmpBool::False,
            _ => CmpBool::Null,
        }
    }

    /// SQL three-valued NOT
    pub fn not(self) -> CmpBool {
        match self {
            CmpBool::True => CmpBool::False,
            CmpBool::False => CmpBool::True,
            CmpBool::Null => CmpBool::Null,
        }
    }

    /// Convert to a BOOLEAN value (null for [`CmpBool::Null`])
    pub fn to_value(self) -> Value {
        match self {
            CmpBool::True => Value::Boolean(true),
            CmpBool::False => Value::Boolean(false),
            CmpBool::Null => Value::Null(TypeId::Boolean),
        }
    }

    /// Interpret a BOOLEAN value
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(CmpBool::from_bool(*b)),
            Value::Null(TypeId::Boolean) => Ok(CmpBool::Null),
            other => Err(Error::type_mismatch("BOOLEAN", other.type_id().name())),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Equal,
    /// `<>`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::LessThan => ordering == Ordering::Less,
            CompareOp::LessThanOrEqual => ordering != Ordering::Greater,
            CompareOp::GreaterThan => ordering == Ordering::Greater,
            CompareOp::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }

    /// Operator symbol
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "<>",
            CompareOp::LessThan => "<",
            CompareOp::LessThanOrEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterThanOrEqual => ">=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

fn decimal_cmp(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl Value {
    /// Fail unless the two values may be compared
    pub fn check_comparable(&self, other: &Value) -> Result<()> {
        let (lt, rt) = (self.type_id(), other.type_id());
        if lt.is_comparable_with(rt) {
            Ok(())
        } else {
            Err(Error::type_mismatch(lt.name(), rt.name()))
        }
    }

    /// Order two comparable non-null values; `None` if either is null
    pub fn sql_cmp(&self, other: &Value) -> Result<Option<Ordering>> {
        self.check_comparable(other)?;
        let ordering = match (self, other) {
            (Value::Null(_), _) | (_, Value::Null(_)) => return Ok(None),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) | (Value::Varbinary(a), Value::Varbinary(b)) => {
                a.as_bytes().cmp(b.as_bytes())
            }
            (Value::Decimal(_), _) | (_, Value::Decimal(_)) => {
                decimal_cmp(self.expect_f64()?, other.expect_f64()?)
            }
            _ => self.expect_i64()?.cmp(&other.expect_i64()?),
        };
        Ok(Some(ordering))
    }

    /// Apply a comparison operator with SQL null semantics
    pub fn compare(&self, op: CompareOp, other: &Value) -> Result<CmpBool> {
        Ok(match self.sql_cmp(other)? {
            None => CmpBool::Null,
            Some(ordering) => CmpBool::from_bool(op.holds(ordering)),
        })
    }

    /// `self = other`
    pub fn compare_equals(&self, other: &Value) -> Result<CmpBool> {
        self.compare(CompareOp::Equal, other)
    }

    /// `self <> other`
    pub fn compare_not_equals(&self, other: &Value) -> Result<CmpBool> {
        self.compare(CompareOp::NotEqual, other)
    }

    /// `self < other`
    pub fn compare_less_than(&self, other: &Value) -> Result<CmpBool> {
        self.compare(CompareOp::LessThan, other)
    }

    /// `self <= other`
    pub fn compare_less_than_equals(&self, other: &Value) -> Result<CmpBool> {
        self.compare(CompareOp::LessThanOrEqual, other)
    }

    /// `self > other`
    pub fn compare_greater_than(&self, other: &Value) -> Result<CmpBool> {
        self.compare(CompareOp::GreaterThan, other)
    }

    /// `self >= other`
    pub fn compare_greater_than_equals(&self, other: &Value) -> Result<CmpBool> {
        self.compare(CompareOp::GreaterThanOrEqual, other)
    }

    /// Total order used for sorting and index keys
    ///
    /// Nulls sort first. Comparable values use SQL ordering; values of
    /// incomparable types order by type id.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        match self.sql_cmp(other) {
            Ok(Some(ordering)) => ordering,
            _ => self.type_id().cmp(&other.type_id()),
        }
    }
}

/// A list of values ordered by [`Value::sort_cmp`], usable as a map key
#[derive(Debug, Clone)]
pub struct SortKey(pub Vec<Value>);

impl SortKey {
    /// Key over the given values
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Key columns
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.sort_cmp(b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}
