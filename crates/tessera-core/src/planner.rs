//! Bound physical plans consumed by the query compiler
//!
//! Plans arrive already bound and optimized; this module only describes
//! their shape and derives output schemas and fingerprints.

use crate::error::{Error, Result};
use crate::expression::Expr;
use crate::runtime::AggregateKind;
use crate::storage::{Oid, StorageManager};
use crate::types::TypeId;
use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64;

/// How an index scan selects keys
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum IndexLookup {
    /// Every entry in key order
    Full,
    /// Entries equal to one key
    Point(Vec<Expr>),
    /// Entries between optional inclusive bounds
    Range {
        /// Lower bound
        low: Option<Vec<Expr>>,
        /// Upper bound
        high: Option<Vec<Expr>>,
    },
}

/// One aggregate of an aggregation node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateTerm {
    /// Function
    pub kind: AggregateKind,
    /// Input; `None` only for `COUNT(*)`
    pub input: Option<Expr>,
}

impl AggregateTerm {
    /// `COUNT(*)`
    pub fn count_star() -> Self {
        Self {
            kind: AggregateKind::CountStar,
            input: None,
        }
    }

    /// `kind(input)`
    pub fn of(kind: AggregateKind, input: Expr) -> Self {
        Self {
            kind,
            input: Some(input),
        }
    }
}

/// One ORDER BY key over the child's output columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortSpec {
    /// Output column of the child
    pub column: u32,
    /// Descending order
    pub descending: bool,
}

/// Rows an insert writes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InsertSource {
    /// Literal rows
    Values(Vec<Vec<Expr>>),
    /// Output of a child plan
    Child(Box<PlanNode>),
}

/// Physical plan operator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlanNode {
    /// Sequential scan; the predicate and output columns use table column ids
    SeqScan {
        /// Scanned table
        table_oid: Oid,
        /// Filter over the table row
        predicate: Option<Expr>,
        /// Table columns produced, in order
        columns: Vec<u32>,
    },
    /// Scan through one of the table's indexes
    IndexScan {
        /// Scanned table
        table_oid: Oid,
        /// Position of the index within the table
        index_offset: u32,
        /// Key selection
        lookup: IndexLookup,
        /// Residual filter over the table row
        predicate: Option<Expr>,
        /// Table columns produced, in order
        columns: Vec<u32>,
    },
    /// Computed output columns
    Projection {
        /// Input
        child: Box<PlanNode>,
        /// Output expressions
        targets: Vec<Expr>,
    },
    /// Insert rows into a table
    Insert {
        /// Target table
        table_oid: Oid,
        /// Rows to insert
        source: InsertSource,
    },
    /// Delete the rows a scan of the same table produces
    Delete {
        /// Target table
        table_oid: Oid,
        /// Scan locating the rows
        child: Box<PlanNode>,
    },
    /// Update the rows a scan of the same table produces
    Update {
        /// Target table
        table_oid: Oid,
        /// Scan locating the rows
        child: Box<PlanNode>,
        /// `(table column, new value over the scan's output)`; every other
        /// column is copied unchanged
        targets: Vec<(u32, Expr)>,
    },
    /// Inner equi-join building on the left input
    HashJoin {
        /// Build side
        left: Box<PlanNode>,
        /// Probe side
        right: Box<PlanNode>,
        /// Build keys over the left row (tuple 0)
        left_keys: Vec<Expr>,
        /// Probe keys over the right row (tuple 1)
        right_keys: Vec<Expr>,
        /// Residual predicate over both rows
        predicate: Option<Expr>,
    },
    /// Grouped or global aggregation; output is `group keys ++ aggregates`
    Aggregate {
        /// Input
        child: Box<PlanNode>,
        /// Grouping expressions; empty for a global aggregate
        group_by: Vec<Expr>,
        /// Aggregates
        aggregates: Vec<AggregateTerm>,
    },
    /// Sort on child output columns, nulls first
    OrderBy {
        /// Input
        child: Box<PlanNode>,
        /// Sort keys, most significant first
        keys: Vec<SortSpec>,
    },
    /// Skip `offset` rows, then emit at most `limit`
    Limit {
        /// Input
        child: Box<PlanNode>,
        /// Maximum rows emitted
        limit: u64,
        /// Rows skipped first
        offset: u64,
    },
}

impl PlanNode {
    /// Operator name
    pub fn name(&self) -> &'static str {
        match self {
            PlanNode::SeqScan { .. } => "SeqScan",
            PlanNode::IndexScan { .. } => "IndexScan",
            PlanNode::Projection { .. } => "Projection",
            PlanNode::Insert { .. } => "Insert",
            PlanNode::Delete { .. } => "Delete",
            PlanNode::Update { .. } => "Update",
            PlanNode::HashJoin { .. } => "HashJoin",
            PlanNode::Aggregate { .. } => "Aggregate",
            PlanNode::OrderBy { .. } => "OrderBy",
            PlanNode::Limit { .. } => "Limit",
        }
    }

    /// Child operators, left to right
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } => Vec::new(),
            PlanNode::Insert { source, .. } => match source {
                InsertSource::Values(_) => Vec::new(),
                InsertSource::Child(child) => vec![child],
            },
            PlanNode::Projection { child, .. }
            | PlanNode::Delete { child, .. }
            | PlanNode::Update { child, .. }
            | PlanNode::Aggregate { child, .. }
            | PlanNode::OrderBy { child, .. }
            | PlanNode::Limit { child, .. } => vec![child],
            PlanNode::HashJoin { left, right, .. } => vec![left, right],
        }
    }

    /// Whether the plan modifies a table
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            PlanNode::Insert { .. } | PlanNode::Delete { .. } | PlanNode::Update { .. }
        ) || self.children().iter().any(|c| c.is_mutating())
    }

    /// Column types of the rows this operator emits
    pub fn output_types(&self, storage: &StorageManager) -> Result<Vec<TypeId>> {
        match self {
            PlanNode::SeqScan {
                table_oid, columns, ..
            }
            | PlanNode::IndexScan {
                table_oid, columns, ..
            } => {
                let table = storage.table(*table_oid)?;
                columns
                    .iter()
                    .map(|&c| {
                        table
                            .schema()
                            .column(c as usize)
                            .map(|col| col.type_id)
                            .ok_or_else(|| {
                                Error::catalog(format!(
                                    "table '{}' has no column {c}",
                                    table.name()
                                ))
                            })
                    })
                    .collect()
            }
            PlanNode::Projection { child, targets } => {
                let input = child.output_types(storage)?;
                targets.iter().map(|t| t.return_type(&[&input])).collect()
            }
            PlanNode::Insert { .. } | PlanNode::Delete { .. } | PlanNode::Update { .. } => {
                Ok(Vec::new())
            }
            PlanNode::HashJoin { left, right, .. } => {
                let mut out = left.output_types(storage)?;
                out.extend(right.output_types(storage)?);
                Ok(out)
            }
            PlanNode::Aggregate {
                child,
                group_by,
                aggregates,
            } => {
                let input = child.output_types(storage)?;
                let mut out = group_by
                    .iter()
                    .map(|g| g.return_type(&[&input]))
                    .collect::<Result<Vec<_>>>()?;
                for term in aggregates {
                    out.push(term.kind.output_type(term.input_type(&input)?)?);
                }
                Ok(out)
            }
            PlanNode::OrderBy { child, .. } | PlanNode::Limit { child, .. } => {
                child.output_types(storage)
            }
        }
    }

    /// Structural hash identifying equivalent plans
    pub fn fingerprint(&self) -> Result<u64> {
        let bytes = bincode::serialize(self).map_err(|e| Error::serialization(e.to_string()))?;
        Ok(xxh3_64(&bytes))
    }

    /// Indented operator tree for logs
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(0, &mut out);
        out
    }

    fn explain_into(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(self.name());
        match self {
            PlanNode::SeqScan {
                table_oid,
                predicate,
                ..
            }
            | PlanNode::IndexScan {
                table_oid,
                predicate,
                ..
            } => {
                out.push_str(&format!(" table={table_oid}"));
                if let Some(p) = predicate {
                    out.push_str(&format!(" filter={p}"));
                }
            }
            PlanNode::Insert { table_oid, .. }
            | PlanNode::Delete { table_oid, .. }
            | PlanNode::Update { table_oid, .. } => out.push_str(&format!(" table={table_oid}")),
            PlanNode::Limit { limit, offset, .. } => {
                out.push_str(&format!(" limit={limit} offset={offset}"))
            }
            _ => {}
        }
        out.push('\n');
        for child in self.children() {
            child.explain_into(depth + 1, out);
        }
    }
}

impl AggregateTerm {
    /// Type of the aggregate's input (BOOLEAN stands in for `COUNT(*)`)
    pub fn input_type(&self, input: &[TypeId]) -> Result<TypeId> {
        match (&self.input, self.kind) {
            (None, AggregateKind::CountStar) => Ok(TypeId::Boolean),
            (Some(expr), _) => expr.return_type(&[input]),
            (None, kind) => Err(Error::codegen(format!("{} needs an input", kind.name()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Column, Schema};
    use crate::types::{CompareOp, Value};

    fn storage() -> (StorageManager, Oid) {
        let storage = StorageManager::new(1, 16);
        let table = storage
            .create_table(
                "t",
                Schema::new(vec![
                    Column::not_null("id", TypeId::Integer),
                    Column::new("name", TypeId::Varchar),
                    Column::new("score", TypeId::Decimal),
                ]),
            )
            .unwrap();
        (storage, table.oid())
    }

    fn scan(oid: Oid) -> PlanNode {
        PlanNode::SeqScan {
            table_oid: oid,
            predicate: None,
            columns: vec![0, 1, 2],
        }
    }

    #[test]
    fn test_output_types() {
        let (storage, oid) = storage();
        let agg = PlanNode::Aggregate {
            child: Box::new(scan(oid)),
            group_by: vec![Expr::col(1)],
            aggregates: vec![
                AggregateTerm::count_star(),
                AggregateTerm::of(AggregateKind::Sum, Expr::col(0)),
                AggregateTerm::of(AggregateKind::Avg, Expr::col(2)),
            ],
        };
        assert_eq!(
            agg.output_types(&storage).unwrap(),
            vec![TypeId::Varchar, TypeId::BigInt, TypeId::BigInt, TypeId::Decimal]
        );
        let bad = PlanNode::SeqScan {
            table_oid: oid,
            predicate: None,
            columns: vec![7],
        };
        assert!(bad.output_types(&storage).is_err());
    }

    #[test]
    fn test_fingerprint_is_structural() {
        let (_, oid) = storage();
        let filtered = |v: i32| PlanNode::SeqScan {
            table_oid: oid,
            predicate: Some(Expr::compare(
                CompareOp::GreaterThan,
                Expr::col(0),
                Expr::lit(Value::integer(v)),
            )),
            columns: vec![0],
        };
        assert_eq!(filtered(1).fingerprint().unwrap(), filtered(1).fingerprint().unwrap());
        assert_ne!(filtered(1).fingerprint().unwrap(), filtered(2).fingerprint().unwrap());
    }

    #[test]
    fn test_mutating_and_explain() {
        let (_, oid) = storage();
        let delete = PlanNode::Delete {
            table_oid: oid,
            child: Box::new(scan(oid)),
        };
        assert!(delete.is_mutating());
        assert!(!scan(oid).is_mutating());
        assert_eq!(delete.explain(), format!("Delete table={oid}\n  SeqScan table={oid}\n"));
    }
}
