//! Arithmetic on numeric values
//!
//! Integer operands promote to the wider width and the operation is carried
//! out in `i128`, which cannot overflow for any pair of 64-bit operands. The
//! exact result is then range-checked against the promoted type. Decimal
//! arithmetic follows IEEE semantics with no overflow check.

use super::{TypeId, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
}

impl ArithOp {
    /// Operator symbol
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Subtract => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
            ArithOp::Modulo => "%",
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Value {
    /// Apply an arithmetic operator
    pub fn arith(&self, op: ArithOp, rhs: &Value) -> Result<Value> {
        let (lt, rt) = (self.type_id(), rhs.type_id());
        let result_type = lt.promote(rt).ok_or_else(|| {
            let offender = if lt.is_numeric() { rt } else { lt };
            Error::type_mismatch("numeric operand", offender.name())
        })?;

        if self.is_null() || rhs.is_null() {
            return Ok(Value::Null(result_type));
        }

        if result_type == TypeId::Decimal {
            let (a, b) = (self.expect_f64()?, rhs.expect_f64()?);
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Subtract => a - b,
                ArithOp::Multiply => a * b,
                ArithOp::Divide | ArithOp::Modulo if b == 0.0 => return Err(Error::DivideByZero),
                ArithOp::Divide => a / b,
                ArithOp::Modulo => a % b,
            };
            return Ok(Value::Decimal(result));
        }

        let (a, b) = (self.expect_i64()? as i128, rhs.expect_i64()? as i128);
        let exact = match op {
            ArithOp::Add => a + b,
            ArithOp::Subtract => a - b,
            ArithOp::Multiply => a * b,
            ArithOp::Divide | ArithOp::Modulo if b == 0 => return Err(Error::DivideByZero),
            ArithOp::Divide => a / b,
            ArithOp::Modulo => a % b,
        };
        Value::integral_checked(result_type, exact).map_err(|_| {
            Error::out_of_range(format!("{self} {op} {rhs} does not fit {result_type}"))
        })
    }

    /// `self + rhs`
    pub fn add(&self, rhs: &Value) -> Result<Value> {
        self.arith(ArithOp::Add, rhs)
    }

    /// `self - rhs`
    pub fn subtract(&self, rhs: &Value) -> Result<Value> {
        self.arith(ArithOp::Subtract, rhs)
    }

    /// `self * rhs`
    pub fn multiply(&self, rhs: &Value) -> Result<Value> {
        self.arith(ArithOp::Multiply, rhs)
    }

    /// `self / rhs`
    pub fn divide(&self, rhs: &Value) -> Result<Value> {
        self.arith(ArithOp::Divide, rhs)
    }

    /// `self % rhs`
    pub fn modulo(&self, rhs: &Value) -> Result<Value> {
        self.arith(ArithOp::Modulo, rhs)
    }

    /// Build an integral value of `type_id` from an exact result
    pub(crate) fn integral_checked(type_id: TypeId, exact: i128) -> Result<Value> {
        let (min, max) = type_id
            .integral_bounds()
            .ok_or_else(|| Error::type_mismatch("integral type", type_id.name()))?;
        if exact < min || exact > max {
            return Err(Error::out_of_range(format!("{exact} does not fit {type_id}")));
        }
        Ok(match type_id {
            TypeId::TinyInt => Value::TinyInt(exact as i8),
            TypeId::SmallInt => Value::SmallInt(exact as i16),
            TypeId::Integer => Value::Integer(exact as i32),
            _ => Value::BigInt(exact as i64),
        })
    }

    /// Square root, always a decimal
    pub fn sqrt(&self) -> Result<Value> {
        if !self.type_id().is_numeric() {
            return Err(Error::type_mismatch("numeric operand", self.type_id().name()));
        }
        if self.is_null() {
            return Ok(Value::Null(TypeId::Decimal));
        }
        let v = self.expect_f64()?;
        if v < 0.0 {
            return Err(Error::out_of_range(format!("cannot take square root of {v}")));
        }
        Ok(Value::Decimal(v.sqrt()))
    }

    /// Negation
    pub fn negate(&self) -> Result<Value> {
        let zero = Value::zero(self.type_id())?;
        zero.subtract(self)
    }

    /// Smaller of two comparable values (null if either is null)
    pub fn min(&self, other: &Value) -> Result<Value> {
        self.check_comparable(other)?;
        if self.is_null() || other.is_null() {
            return Ok(Value::Null(self.type_id()));
        }
        let keep_self = self.compare_less_than_equals(other)?.is_true();
        Ok(if keep_self { self.clone() } else { other.clone() })
    }

    /// Larger of two comparable values (null if either is null)
    pub fn max(&self, other: &Value) -> Result<Value> {
        self.check_comparable(other)?;
        if self.is_null() || other.is_null() {
            return Ok(Value::Null(self.type_id()));
        }
        let keep_self = self.compare_greater_than_equals(other)?.is_true();
        Ok(if keep_self { self.clone() } else { other.clone() })
    }
}
