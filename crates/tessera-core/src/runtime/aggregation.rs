//! Aggregate accumulators used by compiled group-by pipelines
//!
//! An accumulator row holds one column per aggregate, except `AVG` which
//! keeps a decimal running sum and a bigint count. Grouped aggregation stores
//! `keys ++ accumulators` as one [`CCHashTable`] entry per group.

use super::CCHashTable;
use super::hash::hash_key;
use crate::error::{Error, Result};
use crate::proxy::Tuple;
use crate::types::{TypeId, Value};
use serde::{Deserialize, Serialize};

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    /// `COUNT(*)`
    CountStar,
    /// `COUNT(expr)`, skipping nulls
    Count,
    /// `SUM(expr)`
    Sum,
    /// `MIN(expr)`
    Min,
    /// `MAX(expr)`
    Max,
    /// `AVG(expr)`
    Avg,
}

impl AggregateKind {
    /// Code passed to runtime functions
    pub fn code(self) -> u32 {
        match self {
            AggregateKind::CountStar => 0,
            AggregateKind::Count => 1,
            AggregateKind::Sum => 2,
            AggregateKind::Min => 3,
            AggregateKind::Max => 4,
            AggregateKind::Avg => 5,
        }
    }

    /// Inverse of [`AggregateKind::code`]
    pub fn from_code(code: u32) -> Result<Self> {
        Ok(match code {
            0 => AggregateKind::CountStar,
            1 => AggregateKind::Count,
            2 => AggregateKind::Sum,
            3 => AggregateKind::Min,
            4 => AggregateKind::Max,
            5 => AggregateKind::Avg,
            _ => return Err(Error::codegen(format!("unknown aggregate code {code}"))),
        })
    }

    /// SQL name
    pub fn name(self) -> &'static str {
        match self {
            AggregateKind::CountStar => "COUNT(*)",
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Avg => "AVG",
        }
    }

    /// Output type for an input of `input`
    pub fn output_type(self, input: TypeId) -> Result<TypeId> {
        match self {
            AggregateKind::CountStar | AggregateKind::Count => Ok(TypeId::BigInt),
            AggregateKind::Avg if input.is_numeric() => Ok(TypeId::Decimal),
            AggregateKind::Sum if input.is_integral() => Ok(TypeId::BigInt),
            AggregateKind::Sum if input == TypeId::Decimal => Ok(TypeId::Decimal),
            AggregateKind::Min | AggregateKind::Max => Ok(input),
            kind => Err(Error::type_mismatch(
                format!("numeric input for {}", kind.name()),
                input.name(),
            )),
        }
    }

    fn width(self) -> usize {
        if self == AggregateKind::Avg { 2 } else { 1 }
    }
}

fn decode(kinds: &[u32]) -> Result<Vec<AggregateKind>> {
    kinds.iter().map(|&c| AggregateKind::from_code(c)).collect()
}

fn check_inputs(kinds: &[AggregateKind], inputs: &Tuple) -> Result<()> {
    if inputs.values().len() != kinds.len() {
        return Err(Error::codegen(format!(
            "{} aggregates received {} inputs",
            kinds.len(),
            inputs.values().len()
        )));
    }
    Ok(())
}

fn count_of(value: &Value) -> i64 {
    if value.is_null() { 0 } else { 1 }
}

fn sum_start(value: &Value) -> Result<Value> {
    if value.type_id().is_integral() {
        value.cast_as(TypeId::BigInt)
    } else {
        Ok(value.clone())
    }
}

fn init_into(kinds: &[AggregateKind], inputs: &[Value], acc: &mut Vec<Value>) -> Result<()> {
    for (kind, input) in kinds.iter().zip(inputs) {
        match kind {
            AggregateKind::CountStar => acc.push(Value::bigint(1)),
            AggregateKind::Count => acc.push(Value::bigint(count_of(input))),
            AggregateKind::Sum => acc.push(sum_start(input)?),
            AggregateKind::Min | AggregateKind::Max => acc.push(input.clone()),
            AggregateKind::Avg => {
                if input.is_null() {
                    acc.push(Value::decimal(0.0));
                } else {
                    acc.push(input.cast_as(TypeId::Decimal)?);
                }
                acc.push(Value::bigint(count_of(input)));
            }
        }
    }
    Ok(())
}

/// Combine a running value with a new input, ignoring nulls on either side
fn fold_non_null(acc: &Value, input: &Value, f: impl FnOnce(&Value, &Value) -> Result<Value>) -> Result<Value> {
    match (acc.is_null(), input.is_null()) {
        (_, true) => Ok(acc.clone()),
        (true, false) => Ok(input.clone()),
        (false, false) => f(acc, input),
    }
}

fn advance_in_place(kinds: &[AggregateKind], acc: &mut [Value], inputs: &[Value]) -> Result<()> {
    let mut col = 0;
    for (kind, input) in kinds.iter().zip(inputs) {
        match kind {
            AggregateKind::CountStar => acc[col] = acc[col].add(&Value::bigint(1))?,
            AggregateKind::Count => acc[col] = acc[col].add(&Value::bigint(count_of(input)))?,
            AggregateKind::Sum => {
                let input = sum_start(input)?;
                acc[col] = fold_non_null(&acc[col], &input, |a, b| a.add(b))?;
            }
            AggregateKind::Min => acc[col] = fold_non_null(&acc[col], input, |a, b| a.min(b))?,
            AggregateKind::Max => acc[col] = fold_non_null(&acc[col], input, |a, b| a.max(b))?,
            AggregateKind::Avg => {
                if !input.is_null() {
                    acc[col] = acc[col].add(&input.cast_as(TypeId::Decimal)?)?;
                    acc[col + 1] = acc[col + 1].add(&Value::bigint(1))?;
                }
            }
        }
        col += kind.width();
    }
    Ok(())
}

fn finalize_into(kinds: &[AggregateKind], acc: &[Value], out: &mut Vec<Value>) -> Result<()> {
    let width: usize = kinds.iter().map(|k| k.width()).sum();
    if acc.len() != width {
        return Err(Error::internal(format!(
            "accumulator row has {} columns, expected {width}",
            acc.len()
        )));
    }
    let mut col = 0;
    for kind in kinds {
        match kind {
            AggregateKind::Avg => {
                let count = acc[col + 1].expect_i64()?;
                if count == 0 {
                    out.push(Value::null(TypeId::Decimal));
                } else {
                    out.push(acc[col].divide(&Value::bigint(count))?);
                }
            }
            _ => out.push(acc[col].clone()),
        }
        col += kind.width();
    }
    Ok(())
}

/// Accumulator row for the first input of a group
pub fn agg_init(kinds: Vec<u32>, inputs: Tuple) -> Result<Tuple> {
    let kinds = decode(&kinds)?;
    check_inputs(&kinds, &inputs)?;
    let mut acc = Vec::new();
    init_into(&kinds, inputs.values(), &mut acc)?;
    Ok(Tuple::new(acc))
}

/// Accumulator row after folding in one more input
pub fn agg_advance(kinds: Vec<u32>, acc: Tuple, inputs: Tuple) -> Result<Tuple> {
    let kinds = decode(&kinds)?;
    check_inputs(&kinds, &inputs)?;
    let mut acc = acc.to_vec();
    advance_in_place(&kinds, &mut acc, inputs.values())?;
    Ok(Tuple::new(acc))
}

/// Aggregate results from an accumulator row
pub fn agg_finalize(kinds: Vec<u32>, acc: Tuple) -> Result<Tuple> {
    let kinds = decode(&kinds)?;
    let mut out = Vec::with_capacity(kinds.len());
    finalize_into(&kinds, acc.values(), &mut out)?;
    Ok(Tuple::new(out))
}

/// Result of a global aggregation over no input rows: counts are zero,
/// everything else is null
pub fn agg_empty(kinds: Vec<u32>, input_types: Vec<u32>) -> Result<Tuple> {
    let kinds = decode(&kinds)?;
    if kinds.len() != input_types.len() {
        return Err(Error::codegen("every aggregate needs an input type"));
    }
    let mut out = Vec::with_capacity(kinds.len());
    for (kind, tag) in kinds.iter().zip(input_types) {
        let input = u8::try_from(tag)
            .ok()
            .and_then(TypeId::from_tag)
            .ok_or_else(|| Error::codegen(format!("unknown type tag {tag}")))?;
        out.push(match kind {
            AggregateKind::CountStar | AggregateKind::Count => Value::bigint(0),
            other => Value::null(other.output_type(input)?),
        });
    }
    Ok(Tuple::new(out))
}

impl CCHashTable {
    /// Fold `inputs` into the group of `keys`, creating the group on first
    /// sight
    pub fn advance_group(&mut self, kinds: Vec<u32>, keys: Tuple, inputs: Tuple) -> Result<()> {
        let kinds = decode(&kinds)?;
        check_inputs(&kinds, &inputs)?;
        let hash = hash_key(keys.values());
        let id = self.find_group(hash, keys.clone())?;
        let num_keys = keys.values().len();
        if id < 0 {
            let mut entry = keys.to_vec();
            init_into(&kinds, inputs.values(), &mut entry)?;
            self.insert(hash, Tuple::new(entry))?;
        } else {
            let mut entry = self.entry(id)?.to_vec();
            advance_in_place(&kinds, &mut entry[num_keys..], inputs.values())?;
            self.update_entry(id, Tuple::new(entry))?;
        }
        Ok(())
    }

    /// `keys ++ results` for every group, in group creation order
    pub fn group_results(&self, kinds: Vec<u32>, num_keys: u32) -> Result<Vec<Tuple>> {
        let kinds = decode(&kinds)?;
        let num_keys = num_keys as usize;
        self.entries()?
            .into_iter()
            .map(|entry| {
                let values = entry.values();
                if values.len() < num_keys {
                    return Err(Error::internal("group entry shorter than its key"));
                }
                let mut out = values[..num_keys].to_vec();
                finalize_into(&kinds, &values[num_keys..], &mut out)?;
                Ok(Tuple::new(out))
            })
            .collect()
    }
}

/// Running aggregation without grouping keys
#[derive(Debug, Default)]
pub struct GlobalAggregator {
    kinds: Vec<u32>,
    input_types: Vec<u32>,
    acc: Option<Tuple>,
}

crate::proxy_opaque!(GlobalAggregator => "GlobalAggregator");

impl GlobalAggregator {
    /// Set the aggregates and their input type tags
    pub fn init(&mut self, kinds: Vec<u32>, input_types: Vec<u32>) {
        self.kinds = kinds;
        self.input_types = input_types;
        self.acc = None;
    }

    /// Fold in one input row
    pub fn advance(&mut self, inputs: Tuple) -> Result<()> {
        let next = match self.acc.take() {
            None => agg_init(self.kinds.clone(), inputs)?,
            Some(acc) => agg_advance(self.kinds.clone(), acc, inputs)?,
        };
        self.acc = Some(next);
        Ok(())
    }

    /// Final aggregate row
    pub fn result(&self) -> Result<Tuple> {
        match &self.acc {
            Some(acc) => agg_finalize(self.kinds.clone(), acc.clone()),
            None => agg_empty(self.kinds.clone(), self.input_types.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn codes(kinds: &[AggregateKind]) -> Vec<u32> {
        kinds.iter().map(|k| k.code()).collect()
    }

    #[test]
    fn test_grouped_aggregation() {
        let kinds = codes(&[AggregateKind::CountStar, AggregateKind::Sum, AggregateKind::Avg]);
        let mut table = CCHashTable::default();
        table.init(8);
        for (group, v) in [("a", 1), ("b", 10), ("a", 3), ("a", 5)] {
            let value = Value::integer(v);
            table
                .advance_group(
                    kinds.clone(),
                    Tuple::new(vec![Value::varchar(group)]),
                    Tuple::new(vec![Value::boolean(true), value.clone(), value]),
                )
                .unwrap();
        }
        let results = table.group_results(kinds, 1).unwrap();
        assert_eq!(results.len(), 2);
        let a = results.iter().find(|r| r.values()[0].as_str() == Some("a")).unwrap();
        assert_eq!(a.values()[1], Value::bigint(3));
        assert_eq!(a.values()[2], Value::bigint(9));
        assert_relative_eq!(a.values()[3].as_f64().unwrap(), 3.0);
    }

    #[test]
    fn test_nulls_are_skipped() {
        let kinds = codes(&[AggregateKind::Count, AggregateKind::Min, AggregateKind::Avg]);
        let null = Value::null(TypeId::Integer);
        let acc = agg_init(kinds.clone(), Tuple::new(vec![null.clone(), null.clone(), null])).unwrap();
        let acc = agg_advance(
            kinds.clone(),
            acc,
            Tuple::new(vec![Value::integer(4), Value::integer(4), Value::integer(4)]),
        )
        .unwrap();
        let out = agg_finalize(kinds, acc).unwrap();
        assert_eq!(out.values()[0], Value::bigint(1));
        assert_eq!(out.values()[1], Value::integer(4));
        assert_relative_eq!(out.values()[2].as_f64().unwrap(), 4.0);
    }

    #[test]
    fn test_empty_global_aggregate() {
        let mut agg = GlobalAggregator::default();
        agg.init(
            codes(&[AggregateKind::CountStar, AggregateKind::Sum, AggregateKind::Max]),
            vec![TypeId::Boolean.tag() as u32, TypeId::Integer.tag() as u32, TypeId::Varchar.tag() as u32],
        );
        let out = agg.result().unwrap();
        assert_eq!(out.values()[0], Value::bigint(0));
        assert_eq!(out.values()[1], Value::null(TypeId::BigInt));
        assert_eq!(out.values()[2], Value::null(TypeId::Varchar));

        agg.advance(Tuple::new(vec![Value::boolean(true), Value::integer(2), Value::varchar("x")]))
            .unwrap();
        assert_eq!(agg.result().unwrap().values()[0], Value::bigint(1));
    }

    #[test]
    fn test_sum_rejects_text() {
        assert!(AggregateKind::Sum.output_type(TypeId::Varchar).is_err());
        assert!(AggregateKind::from_code(42).is_err());
    }
}
