//! Casting between types

use super::{TypeId, Value, Varlen, timestamp};
use crate::error::{Error, Result};

impl Value {
    /// Cast to another type
    ///
    /// Numeric narrowing is range-checked; decimals truncate toward zero when
    /// cast to an integral type. Text conversions are locale independent.
    pub fn cast_as(&self, target: TypeId) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null(target));
        }
        if self.type_id() == target {
            return Ok(self.clone());
        }

        match (self, target) {
            (_, TypeId::Varchar) if !matches!(self, Value::Varbinary(_)) => {
                Ok(Value::varchar(self.to_string()))
            }
            (Value::Varbinary(v), TypeId::Varchar) => Ok(Value::Varchar(v.deep_copy())),
            (Value::Varchar(v), TypeId::Varbinary) => Ok(Value::Varbinary(v.deep_copy())),
            (Value::Varchar(v), _) => parse_text(v, target),
            (Value::Decimal(d), t) if t.is_integral() => {
                let (min, max) = integral_bounds(t)?;
                if d.is_nan() || d.trunc() < min as f64 || d.trunc() > max as f64 {
                    return Err(Error::out_of_range(format!("{d} does not fit {t}")));
                }
                Value::integral_checked(t, d.trunc() as i128)
            }
            (v, t) if v.type_id().is_integral() && t.is_integral() => {
                Value::integral_checked(t, v.expect_i64()? as i128)
                    .map_err(|_| Error::out_of_range(format!("{v} does not fit {t}")))
            }
            (v, TypeId::Decimal) if v.type_id().is_integral() => Ok(Value::Decimal(v.expect_f64()?)),
            (v, t) => Err(Error::incompatible(format!(
                "cannot cast {} to {}",
                v.type_id(),
                t
            ))),
        }
    }
}

fn integral_bounds(t: TypeId) -> Result<(i128, i128)> {
    t.integral_bounds()
        .ok_or_else(|| Error::type_mismatch("integral type", t.name()))
}

fn parse_text(text: &Varlen, target: TypeId) -> Result<Value> {
    let raw = text.to_text();
    let trimmed = raw.trim();
    match target {
        TypeId::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Boolean(true)),
            "false" | "f" | "0" => Ok(Value::Boolean(false)),
            _ => Err(Error::invalid_input(format!("'{raw}' is not a boolean"))),
        },
        t if t.is_integral() => {
            let parsed: i128 = trimmed
                .parse()
                .map_err(|_| Error::invalid_input(format!("'{raw}' is not an integer")))?;
            Value::integral_checked(t, parsed)
                .map_err(|_| Error::out_of_range(format!("'{raw}' does not fit {t}")))
        }
        TypeId::Decimal => trimmed
            .parse::<f64>()
            .map(Value::Decimal)
            .map_err(|_| Error::invalid_input(format!("'{raw}' is not a decimal"))),
        TypeId::Timestamp => timestamp::parse(trimmed).map(Value::Timestamp),
        other => Err(Error::incompatible(format!("cannot cast VARCHAR to {other}"))),
    }
}
