//! Scalar expressions of a bound plan
//!
//! Column references address the rows an operator receives: tuple 0 is the
//! only input of unary operators; a join predicate sees the left row as
//! tuple 0 and the right row as tuple 1. Everything above a join sees the
//! concatenated row as tuple 0.

use crate::error::{Error, Result};
use crate::runtime::BuiltinFunction;
use crate::types::{ArithOp, CompareOp, TypeId, Value};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// A bound scalar expression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// Column `column` of input row `tuple`
    Column {
        /// Input row index
        tuple: u32,
        /// Column index within that row
        column: u32,
    },
    /// Literal
    Constant(Value),
    /// Bound parameter `$index+1` of declared type
    Parameter {
        /// Zero-based parameter index
        index: u32,
        /// Declared type
        type_id: TypeId,
    },
    /// Arithmetic
    Arith {
        /// Operator
        op: ArithOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Unary minus
    Negate(Box<Expr>),
    /// Comparison producing a SQL boolean
    Compare {
        /// Operator
        op: CompareOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Three-valued AND
    And(Box<Expr>, Box<Expr>),
    /// Three-valued OR
    Or(Box<Expr>, Box<Expr>),
    /// Three-valued NOT
    Not(Box<Expr>),
    /// `IS NULL` (or `IS NOT NULL` when negated)
    IsNull {
        /// Operand
        expr: Box<Expr>,
        /// `IS NOT NULL`
        negated: bool,
    },
    /// Explicit cast
    Cast {
        /// Operand
        expr: Box<Expr>,
        /// Target type
        to: TypeId,
    },
    /// Builtin function call; missing trailing arguments take defaults
    Function {
        /// Function
        func: BuiltinFunction,
        /// Arguments
        args: Vec<Expr>,
    },
    /// `expr LIKE pattern`
    Like {
        /// Matched text
        expr: Box<Expr>,
        /// Pattern
        pattern: Box<Expr>,
    },
}

impl Expr {
    /// Column of the only (or left) input row
    pub fn col(column: u32) -> Self {
        Expr::Column { tuple: 0, column }
    }

    /// Column of input row `tuple`
    pub fn col_of(tuple: u32, column: u32) -> Self {
        Expr::Column { tuple, column }
    }

    /// Literal
    pub fn lit(value: Value) -> Self {
        Expr::Constant(value)
    }

    /// Bound parameter
    pub fn param(index: u32, type_id: TypeId) -> Self {
        Expr::Parameter { index, type_id }
    }

    /// Arithmetic
    pub fn arith(op: ArithOp, left: Expr, right: Expr) -> Self {
        Expr::Arith {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Comparison
    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left = right`
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::compare(CompareOp::Equal, left, right)
    }

    /// `left AND right`
    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    /// `left OR right`
    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    /// `NOT expr`
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// `expr IS NULL`
    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    /// `expr IS NOT NULL`
    pub fn is_not_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    /// `CAST(expr AS to)`
    pub fn cast(expr: Expr, to: TypeId) -> Self {
        Expr::Cast {
            expr: Box::new(expr),
            to,
        }
    }

    /// `expr LIKE pattern`
    pub fn like(expr: Expr, pattern: Expr) -> Self {
        Expr::Like {
            expr: Box::new(expr),
            pattern: Box::new(pattern),
        }
    }

    /// Call a builtin by name
    pub fn call(name: &str, args: Vec<Expr>) -> Result<Self> {
        let func = BuiltinFunction::lookup(name)
            .ok_or_else(|| Error::invalid_input(format!("unknown function '{name}'")))?;
        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            return Err(Error::invalid_input(format!(
                "{name} takes {min}..={max} arguments, got {}",
                args.len()
            )));
        }
        Ok(Expr::Function { func, args })
    }

    /// Result type given the column types of each input row
    pub fn return_type(&self, inputs: &[&[TypeId]]) -> Result<TypeId> {
        match self {
            Expr::Column { tuple, column } => inputs
                .get(*tuple as usize)
                .and_then(|row| row.get(*column as usize))
                .copied()
                .ok_or_else(|| {
                    Error::codegen(format!("column ({tuple}, {column}) is not in the input"))
                }),
            Expr::Constant(value) => Ok(value.type_id()),
            Expr::Parameter { type_id, .. } => Ok(*type_id),
            Expr::Arith { op, left, right } => {
                let (lt, rt) = (left.return_type(inputs)?, right.return_type(inputs)?);
                lt.promote(rt).ok_or_else(|| {
                    Error::incompatible(format!("{lt} {op} {rt} is not defined"))
                })
            }
            Expr::Negate(expr) => {
                let t = expr.return_type(inputs)?;
                if !t.is_numeric() {
                    return Err(Error::type_mismatch("numeric operand", t.name()));
                }
                Ok(t)
            }
            Expr::Compare { left, right, .. } => {
                let (lt, rt) = (left.return_type(inputs)?, right.return_type(inputs)?);
                if !lt.is_comparable_with(rt) {
                    return Err(Error::incompatible(format!("cannot compare {lt} with {rt}")));
                }
                Ok(TypeId::Boolean)
            }
            Expr::And(left, right) | Expr::Or(left, right) => {
                expect_boolean(left, inputs)?;
                expect_boolean(right, inputs)?;
                Ok(TypeId::Boolean)
            }
            Expr::Not(expr) => {
                expect_boolean(expr, inputs)?;
                Ok(TypeId::Boolean)
            }
            Expr::IsNull { expr, .. } => {
                expr.return_type(inputs)?;
                Ok(TypeId::Boolean)
            }
            Expr::Cast { expr, to } => {
                expr.return_type(inputs)?;
                Ok(*to)
            }
            Expr::Function { func, args } => {
                let types = args
                    .iter()
                    .map(|a| a.return_type(inputs))
                    .collect::<Result<Vec<_>>>()?;
                Ok(func.return_type(&types))
            }
            Expr::Like { expr, pattern } => {
                expr.return_type(inputs)?;
                pattern.return_type(inputs)?;
                Ok(TypeId::Boolean)
            }
        }
    }

    /// Children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. } | Expr::Constant(_) | Expr::Parameter { .. } => Vec::new(),
            Expr::Arith { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right) => vec![left, right],
            Expr::Negate(expr)
            | Expr::Not(expr)
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. } => vec![expr],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Like { expr, pattern } => vec![expr, pattern],
        }
    }

    /// Every `(tuple, column)` the expression reads
    pub fn referenced_columns(&self) -> BTreeSet<(u32, u32)> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<(u32, u32)>) {
        if let Expr::Column { tuple, column } = self {
            out.insert((*tuple, *column));
        }
        for child in self.children() {
            child.collect_columns(out);
        }
    }

    /// Whether the value is fixed at compile time or bound per execution
    pub fn is_row_independent(&self) -> bool {
        !matches!(self, Expr::Column { .. })
            && self.children().iter().all(|c| c.is_row_independent())
    }
}

fn expect_boolean(expr: &Expr, inputs: &[&[TypeId]]) -> Result<()> {
    match expr.return_type(inputs)? {
        TypeId::Boolean => Ok(()),
        other => Err(Error::type_mismatch("BOOLEAN", other.name())),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { tuple, column } => write!(f, "#{tuple}.{column}"),
            Expr::Constant(Value::Varchar(v)) => write!(f, "'{}'", v.to_text()),
            Expr::Constant(v) => write!(f, "{v}"),
            Expr::Parameter { index, .. } => write!(f, "${}", index + 1),
            Expr::Arith { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Negate(expr) => write!(f, "-{expr}"),
            Expr::Compare { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::And(l, r) => write!(f, "({l} AND {r})"),
            Expr::Or(l, r) => write!(f, "({l} OR {r})"),
            Expr::Not(expr) => write!(f, "NOT {expr}"),
            Expr::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Expr::Cast { expr, to } => write!(f, "CAST({expr} AS {to})"),
            Expr::Function { func, args } => {
                let name = func.symbol().trim_start_matches("builtin::");
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Like { expr, pattern } => write!(f, "({expr} LIKE {pattern})"),
        }
    }
}
