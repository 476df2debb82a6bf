//! Property tests for the SQL value model

use approx::assert_relative_eq;
use proptest::prelude::*;
use std::cmp::Ordering;
use tessera_core::types::{
    CompareOp, SerializeInput, SerializeOutput, deserialize_tuple, hash_values, limits,
    serialize_tuple,
};
use tessera_core::{Error, TypeId, Value};

fn nullable<T: Clone + std::fmt::Debug>(value: impl Strategy<Value = T>) -> impl Strategy<Value = Option<T>> {
    prop_oneof![1 => Just(None), 4 => value.prop_map(Some)]
}

fn typed<T: Clone + std::fmt::Debug>(
    type_id: TypeId,
    value: impl Strategy<Value = T>,
    make: fn(T) -> Value,
) -> impl Strategy<Value = Value> {
    nullable(value).prop_map(move |v| v.map_or(Value::null(type_id), make))
}

/// Doubles including signed zeros, infinities and arbitrary NaN payloads
fn decimal_bits() -> impl Strategy<Value = f64> {
    prop_oneof![
        any::<f64>(),
        any::<u64>().prop_map(f64::from_bits),
        Just(0.0),
        Just(-0.0),
        Just(f64::NAN),
        Just(-f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        Just(f64::MAX),
    ]
}

/// A null or non-null value of any of the nine types
fn sql_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        typed(TypeId::Boolean, any::<bool>(), Value::boolean),
        typed(TypeId::TinyInt, limits::TINYINT_MIN..=limits::TINYINT_MAX, Value::tinyint),
        typed(TypeId::SmallInt, limits::SMALLINT_MIN..=limits::SMALLINT_MAX, Value::smallint),
        typed(TypeId::Integer, limits::INTEGER_MIN..=limits::INTEGER_MAX, Value::integer),
        typed(TypeId::BigInt, limits::BIGINT_MIN..=limits::BIGINT_MAX, Value::bigint),
        typed(TypeId::Decimal, decimal_bits(), Value::decimal),
        typed(TypeId::Timestamp, 0..=limits::TIMESTAMP_MAX, Value::timestamp),
        typed(TypeId::Varchar, "\\PC{0,48}", |s: String| Value::varchar(s)),
        typed(
            TypeId::Varbinary,
            proptest::collection::vec(any::<u8>(), 0..64),
            |b: Vec<u8>| Value::varbinary(b),
        ),
    ]
}

fn round_trip(values: &[Value]) -> Result<Vec<Value>, Error> {
    let mut out = SerializeOutput::new(Vec::new());
    serialize_tuple(values, &mut out)?;
    let bytes = out.into_inner();
    deserialize_tuple(&mut SerializeInput::new(&bytes))
}

const INTEGER: std::ops::RangeInclusive<i32> = limits::INTEGER_MIN..=limits::INTEGER_MAX;
const SMALLINT: std::ops::RangeInclusive<i16> = limits::SMALLINT_MIN..=limits::SMALLINT_MAX;
const BIGINT: std::ops::RangeInclusive<i64> = limits::BIGINT_MIN..=limits::BIGINT_MAX;

proptest! {
    #[test]
    fn test_serialized_tuple_reads_back(values in proptest::collection::vec(sql_value(), 0..12)) {
        prop_assert_eq!(round_trip(&values)?, values);
    }

    #[test]
    fn test_integer_add_is_checked(a in INTEGER, b in INTEGER) {
        let result = Value::integer(a).add(&Value::integer(b));
        // the type minimum is the null sentinel, never a result
        match a.checked_add(b).filter(|&sum| sum != i32::MIN) {
            Some(sum) => prop_assert_eq!(result, Ok(Value::integer(sum))),
            None => prop_assert!(matches!(result, Err(Error::OutOfRange(_)))),
        }
    }

    #[test]
    fn test_smallint_multiply_is_checked(a in SMALLINT, b in SMALLINT) {
        let result = Value::smallint(a).multiply(&Value::smallint(b));
        match a.checked_mul(b).filter(|&product| product != i16::MIN) {
            Some(product) => prop_assert_eq!(result, Ok(Value::smallint(product))),
            None => prop_assert!(matches!(result, Err(Error::OutOfRange(_)))),
        }
    }

    #[test]
    fn test_mixed_width_arithmetic_promotes(a in SMALLINT, b in BIGINT) {
        let result = Value::smallint(a).subtract(&Value::bigint(b));
        match i64::from(a).checked_sub(b).filter(|&diff| diff != i64::MIN) {
            Some(diff) => prop_assert_eq!(result, Ok(Value::bigint(diff))),
            None => prop_assert!(matches!(result, Err(Error::OutOfRange(_)))),
        }
    }

    #[test]
    fn test_equal_values_hash_equally_across_widths(v in SMALLINT) {
        let small = Value::smallint(v);
        let big = Value::bigint(i64::from(v));
        prop_assert!(small.compare(CompareOp::Equal, &big)?.is_true());
        prop_assert_eq!(small.hash_code(), big.hash_code());
        prop_assert_eq!(
            hash_values(&[small, Value::varchar("k")]),
            hash_values(&[big, Value::varchar("k")])
        );
    }

    #[test]
    fn test_sort_order_matches_integers(a in BIGINT, b in BIGINT) {
        prop_assert_eq!(Value::bigint(a).sort_cmp(&Value::bigint(b)), a.cmp(&b));
        prop_assert_eq!(
            Value::null(TypeId::BigInt).sort_cmp(&Value::bigint(a)),
            Ordering::Less
        );
    }

    #[test]
    fn test_null_propagates_through_arithmetic(v in INTEGER) {
        let result = Value::null(TypeId::Integer).add(&Value::integer(v))?;
        prop_assert!(result.is_null());
        prop_assert_eq!(result.type_id(), TypeId::Integer);
        prop_assert!(Value::null(TypeId::Integer)
            .compare(CompareOp::Equal, &Value::integer(v))?
            .is_null());
    }

    #[test]
    fn test_integral_division_by_zero(v in INTEGER) {
        prop_assert_eq!(Value::integer(v).divide(&Value::integer(0)), Err(Error::DivideByZero));
        prop_assert_eq!(Value::integer(v).modulo(&Value::integer(0)), Err(Error::DivideByZero));
    }
}

#[test]
fn test_decimal_bit_patterns_survive_serialization() -> Result<(), Error> {
    let values = vec![
        Value::decimal(-0.0),
        Value::decimal(f64::NAN),
        Value::decimal(f64::from_bits(0x7ff0_0000_0000_0001)),
        Value::null(TypeId::Decimal),
    ];
    let read = round_trip(&values)?;
    assert_eq!(read, values);
    assert_eq!(read[0].as_f64().map(f64::to_bits), Some((-0.0f64).to_bits()));
    Ok(())
}

#[test]
fn test_empty_and_long_varlen_survive_serialization() -> Result<(), Error> {
    let long = "x".repeat(1 << 16);
    let values = vec![
        Value::varchar(""),
        Value::varchar(long),
        Value::varbinary(Vec::new()),
        Value::varbinary(vec![0u8; 1 << 16]),
        Value::null(TypeId::Varchar),
        Value::null(TypeId::Varbinary),
    ];
    assert_eq!(round_trip(&values)?, values);
    Ok(())
}

#[test]
fn test_decimal_arithmetic() -> Result<(), Error> {
    let third = Value::decimal(1.0).divide(&Value::integer(3))?;
    assert_relative_eq!(third.as_f64().unwrap_or_default(), 1.0 / 3.0);
    let sum = Value::decimal(0.1).add(&Value::decimal(0.2))?;
    assert_relative_eq!(sum.as_f64().unwrap_or_default(), 0.3, epsilon = 1e-12);
    assert_eq!(Value::decimal(1.5).divide(&Value::decimal(0.0)), Err(Error::DivideByZero));
    Ok(())
}

#[test]
fn test_varchar_is_not_numeric() {
    assert!(matches!(
        Value::varchar("1").add(&Value::integer(1)),
        Err(Error::TypeMismatch { .. })
    ));
}
