//! Inner hash join
//!
//! The left pipeline runs first and materializes its rows into a
//! [`CCHashTable`] keyed by the hash of the join keys. The right pipeline
//! then probes the table; since distinct keys may share a hash, every
//! candidate's keys are compared again before the residual predicate.
//! An optional Bloom filter built alongside the table lets probes skip
//! keys that cannot match.

use super::expression::{and, check_predicate, compare, compile, compile_all};
use super::{Consume, OperatorTranslator, Row};
use crate::codegen::builder::FunctionBuilder;
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::ir::Reg;
use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::proxy::StateId;
use crate::runtime::{BloomFilter, CCHashTable};
use crate::types::{CompareOp, TypeId};

/// Translator for [`PlanNode::HashJoin`](crate::planner::PlanNode::HashJoin)
#[derive(Debug)]
pub struct HashJoinTranslator {
    left: Box<dyn OperatorTranslator>,
    right: Box<dyn OperatorTranslator>,
    left_keys: Vec<Expr>,
    right_keys: Vec<Expr>,
    predicate: Option<Expr>,
    output_types: Vec<TypeId>,
    hash_table: StateId,
    bloom: Option<StateId>,
}

impl HashJoinTranslator {
    /// Type-check the keys and predicate and reserve the join state
    pub fn new(
        cx: &mut CompilationContext,
        left: Box<dyn OperatorTranslator>,
        right: Box<dyn OperatorTranslator>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        predicate: Option<Expr>,
    ) -> Result<Self> {
        if left_keys.is_empty() || left_keys.len() != right_keys.len() {
            return Err(Error::invalid_input(format!(
                "hash join needs matching key lists, got {} and {}",
                left_keys.len(),
                right_keys.len()
            )));
        }
        let left_types = left.output_types();
        let right_types = right.output_types();
        for key in &left_keys {
            key.return_type(&[left_types])?;
        }
        for key in &right_keys {
            key.return_type(&[&[], right_types])?;
        }
        if let Some(predicate) = &predicate {
            check_predicate(predicate, &[left_types, right_types])?;
        }
        let output_types = left_types.iter().chain(right_types).copied().collect();
        let hash_table = cx.register_state::<CCHashTable>("join_hash_table");
        let bloom = cx
            .config()
            .bloom_filter_enabled
            .then(|| cx.register_state::<BloomFilter>("join_bloom_filter"));
        Ok(Self {
            left,
            right,
            left_keys,
            right_keys,
            predicate,
            output_types,
            hash_table,
            bloom,
        })
    }

    fn build_side(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        let hash_tuple = cx.code().hash_tuple_fn();
        let insert = cx.code().hash_table_insert_fn();
        self.left.produce(cx, b, &mut |cx, b, row| {
            let keys = compile_all(cx, b, &self.left_keys, &[&row.columns])?;
            let key = b.make_tuple(&keys);
            let hash = b.call(hash_tuple, &[key]);
            let entry = b.make_tuple(&row.columns);
            let table = b.state_addr(self.hash_table);
            b.call_void(insert, &[table, hash, entry]);
            if let Some(bloom) = self.bloom {
                let filter = b.state_addr(bloom);
                let add = cx.code().bloom_add_fn();
                b.call_void(add, &[filter, key]);
            }
            Ok(())
        })
    }

    /// Emit the match loop for one probe row
    fn probe_row(
        &self,
        cx: &mut CompilationContext,
        b: &mut FunctionBuilder,
        row: &Row,
        probe_keys: &[Reg],
        hash: Reg,
        consume: &mut Consume<'_>,
    ) -> Result<()> {
        let table = b.state_addr(self.hash_table);
        let probe = cx.code().hash_table_probe_fn();
        let matches = b.call(probe, &[table, hash]);
        let left_width = self.left.output_types().len();
        b.for_each(matches, |b, entry| {
            let left = b.unpack_tuple(entry, left_width);
            let build_keys = compile_all(cx, b, &self.left_keys, &[&left])?;
            let mut cond: Option<Reg> = None;
            for (&l, &r) in build_keys.iter().zip(probe_keys) {
                let eq = compare(b, CompareOp::Equal, l, r);
                cond = Some(match cond {
                    Some(acc) => and(b, acc, eq),
                    None => eq,
                });
            }
            if let Some(predicate) = &self.predicate {
                let residual = compile(cx, b, predicate, &[&left, &row.columns])?;
                cond = Some(match cond {
                    Some(acc) => and(b, acc, residual),
                    None => residual,
                });
            }
            let cond = cond.ok_or_else(|| Error::internal("hash join without keys"))?;
            let matched = b.truthy(cond);
            b.if_then(matched, |b| {
                let columns = left.iter().chain(&row.columns).copied().collect();
                consume(cx, b, &Row::values(columns))
            })
        })
    }
}

impl OperatorTranslator for HashJoinTranslator {
    fn name(&self) -> &'static str {
        "HashJoin"
    }

    fn output_types(&self) -> &[TypeId] {
        &self.output_types
    }

    fn initialize_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        self.left.initialize_state(cx, b)?;
        self.right.initialize_state(cx, b)?;
        let buckets = cx.config().hash_table_buckets;
        let table = b.state_addr(self.hash_table);
        let num_buckets = b.constant(buckets);
        let init = cx.code().hash_table_init_fn();
        b.call_void(init, &[table, num_buckets]);
        if let Some(bloom) = self.bloom {
            let bits = BloomFilter::bits_for(buckets, cx.config().bloom_filter_bits_per_key);
            let filter = b.state_addr(bloom);
            let bits = b.constant(bits);
            let init = cx.code().bloom_init_fn();
            b.call_void(init, &[filter, bits]);
        }
        Ok(())
    }

    fn produce(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder, consume: &mut Consume<'_>) -> Result<()> {
        self.build_side(cx, b)?;
        let hash_tuple = cx.code().hash_tuple_fn();
        self.right.produce(cx, b, &mut |cx, b, row| {
            let no_row: &[Reg] = &[];
            let keys = compile_all(cx, b, &self.right_keys, &[no_row, &row.columns])?;
            let key = b.make_tuple(&keys);
            let hash = b.call(hash_tuple, &[key]);
            match self.bloom {
                Some(bloom) => {
                    let filter = b.state_addr(bloom);
                    let contains = cx.code().bloom_contains_fn();
                    let maybe = b.call(contains, &[filter, key]);
                    b.if_then(maybe, |b| self.probe_row(cx, b, row, &keys, hash, consume))
                }
                None => self.probe_row(cx, b, row, &keys, hash, consume),
            }
        })
    }

    fn tear_down_state(&self, cx: &mut CompilationContext, b: &mut FunctionBuilder) -> Result<()> {
        let table = b.state_addr(self.hash_table);
        let destroy = cx.code().hash_table_destroy_fn();
        b.call_void(destroy, &[table]);
        if let Some(bloom) = self.bloom {
            let filter = b.state_addr(bloom);
            let destroy = cx.code().bloom_destroy_fn();
            b.call_void(destroy, &[filter]);
        }
        self.left.tear_down_state(cx, b)?;
        self.right.tear_down_state(cx, b)
    }
}
