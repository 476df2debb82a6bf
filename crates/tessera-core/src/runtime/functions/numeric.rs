//! Numeric builtins

use super::null_if_any;
use crate::error::{Error, Result};
use crate::types::{TypeId, Value};

fn numeric_input(v: &Value, function: &str) -> Result<f64> {
    if !v.type_id().is_numeric() {
        return Err(Error::type_mismatch(
            format!("numeric argument to {function}"),
            v.type_id().name(),
        ));
    }
    v.expect_f64()
}

/// Absolute value, keeping the input type
pub fn abs(v: Value) -> Result<Value> {
    if v.is_null() {
        return Ok(Value::null(if v.type_id().is_numeric() {
            v.type_id()
        } else {
            TypeId::Decimal
        }));
    }
    match v {
        Value::Decimal(d) => Ok(Value::decimal(d.abs())),
        ref integral if integral.type_id().is_integral() => {
            let exact = (integral.expect_i64()? as i128).abs();
            Value::integral_checked(integral.type_id(), exact)
        }
        other => Err(Error::type_mismatch("numeric argument to abs", other.type_id().name())),
    }
}

/// Smallest integral decimal not below the input
pub fn ceil(v: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&v], TypeId::Decimal) {
        return Ok(null);
    }
    Ok(Value::decimal(numeric_input(&v, "ceil")?.ceil()))
}

/// Largest integral decimal not above the input
pub fn floor(v: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&v], TypeId::Decimal) {
        return Ok(null);
    }
    Ok(Value::decimal(numeric_input(&v, "floor")?.floor()))
}

/// Nearest integral decimal, halves away from zero
pub fn round(v: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&v], TypeId::Decimal) {
        return Ok(null);
    }
    Ok(Value::decimal(numeric_input(&v, "round")?.round()))
}

/// Square root as a decimal
pub fn sqrt(v: Value) -> Result<Value> {
    v.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abs_keeps_type() {
        assert_eq!(abs(Value::integer(-4)).unwrap(), Value::integer(4));
        assert_eq!(abs(Value::tinyint(-127)).unwrap(), Value::tinyint(127));
        assert_eq!(abs(Value::decimal(-1.5)).unwrap(), Value::decimal(1.5));
        assert_eq!(abs(Value::null(TypeId::BigInt)).unwrap(), Value::null(TypeId::BigInt));
        assert!(abs(Value::varchar("x")).is_err());
    }

    #[test]
    fn test_rounding_family() {
        assert_eq!(ceil(Value::decimal(1.2)).unwrap(), Value::decimal(2.0));
        assert_eq!(floor(Value::decimal(-1.2)).unwrap(), Value::decimal(-2.0));
        assert_eq!(round(Value::decimal(2.5)).unwrap(), Value::decimal(3.0));
        assert_eq!(ceil(Value::integer(7)).unwrap(), Value::decimal(7.0));
        assert!(round(Value::null(TypeId::Integer)).unwrap().is_null());
        assert!(sqrt(Value::integer(-1)).is_err());
    }
}
