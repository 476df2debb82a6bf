//! Date builtins

use super::{null_if_any, text_of};
use crate::error::{Error, Result};
use crate::types::timestamp::{self, DatePart};
use crate::types::{TypeId, Value};

/// `EXTRACT(part FROM ts)` / `date_part(part, ts)` as a decimal
pub fn date_part(part: Value, ts: Value) -> Result<Value> {
    if let Some(null) = null_if_any(&[&part, &ts], TypeId::Decimal) {
        return Ok(null);
    }
    let part = DatePart::parse(&text_of(&part)?)?;
    let micros = ts
        .as_timestamp()
        .ok_or_else(|| Error::type_mismatch("TIMESTAMP", ts.type_id().name()))?;
    Ok(Value::decimal(timestamp::extract(part, micros)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_part() {
        let ts = Value::timestamp(timestamp::parse("2017-03-04 05:06:07.000000+00").unwrap());
        let part = |p: &str| date_part(Value::varchar(p), ts.clone()).unwrap();
        assert_eq!(part("year"), Value::decimal(2017.0));
        assert_eq!(part("month"), Value::decimal(3.0));
        assert_eq!(part("DAYS"), Value::decimal(4.0));
        assert_eq!(part("hour"), Value::decimal(5.0));
        assert!(date_part(Value::varchar("fortnight"), ts).is_err());
        assert!(date_part(Value::varchar("year"), Value::integer(3)).is_err());
    }
}
