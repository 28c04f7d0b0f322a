//! Compiles logical expressions into bitmap evaluators over record batches.
//!
//! Compilation happens once per query and fails fast on unsupported shapes;
//! the resulting [`BooleanExpression`] is immutable and safe to evaluate
//! concurrently against different batches. Element-wise comparison work is
//! delegated to arrow's `cmp` kernels; this module only orchestrates them and
//! folds the per-leaf results into one bitmap of matching row positions.

use std::{fmt, sync::Arc};

use arrow::{
    array::{
        new_null_array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array,
        Int16Array, Int32Array, Int64Array, Int8Array, Scalar, StringArray, UInt16Array,
        UInt32Array, UInt64Array, UInt8Array,
    },
    compute::kernels::cmp,
    datatypes::DataType,
    error::ArrowError,
    record_batch::RecordBatch,
};
use regex::Regex;
use roaring::RoaringBitmap;
use thiserror::Error;

use crate::query::{Expr, Operator, ScalarValue};

/// Errors raised while compiling a logical expression into an evaluator.
///
/// All of these surface at plan time; a badly-compiled filter never processes
/// a batch.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The expression root is not a boolean-producing shape.
    #[error("unsupported boolean expression")]
    UnsupportedExpression,
    /// A comparison did not resolve to a column on the left and a literal on
    /// the right.
    #[error("comparison operands must resolve to a column and a literal")]
    InvalidOperand,
    /// A pattern operator was paired with a non-string literal.
    #[error("pattern operand must be a string literal")]
    InvalidRegexOperand,
    /// The pattern string failed to parse.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    /// The operator is known to the logical layer but not to the filter.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(Operator),
}

/// Errors raised while evaluating a compiled predicate against one batch.
///
/// These abort only the offending batch and propagate to the pipeline's
/// caller; there is no retry at this layer.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The predicate references a column the batch does not carry.
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    /// The literal cannot be represented in the column's data type.
    #[error("type mismatch on column '{column}': cannot apply {literal} to {data_type:?}")]
    TypeMismatch {
        /// Column the predicate targets.
        column: String,
        /// The column's actual data type.
        data_type: DataType,
        /// The literal that could not be applied.
        literal: ScalarValue,
    },
    /// A comparison kernel rejected its inputs.
    #[error("comparison kernel failed: {0}")]
    Compute(#[source] ArrowError),
    /// Row selection failed while building the reduced batch.
    #[error("row projection failed: {0}")]
    Projection(#[source] ArrowError),
    /// The query was cancelled before this batch was evaluated.
    #[error("evaluation cancelled")]
    Cancelled,
}

/// Comparison operator preserved in compiled predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    /// Equals (`=`).
    Eq,
    /// Not equals (`!=`).
    NotEq,
    /// Less than (`<`).
    Lt,
    /// Less than or equal to (`<=`).
    LtEq,
    /// Greater than (`>`).
    Gt,
    /// Greater than or equal to (`>=`).
    GtEq,
}

impl ComparisonOp {
    fn from_operator(op: Operator) -> Option<Self> {
        match op {
            Operator::Eq => Some(ComparisonOp::Eq),
            Operator::NotEq => Some(ComparisonOp::NotEq),
            Operator::Lt => Some(ComparisonOp::Lt),
            Operator::LtEq => Some(ComparisonOp::LtEq),
            Operator::Gt => Some(ComparisonOp::Gt),
            Operator::GtEq => Some(ComparisonOp::GtEq),
            _ => None,
        }
    }

    /// Returns a textual representation of the operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled predicate: a closed evaluator tree producing row bitmaps.
#[derive(Clone, Debug)]
pub enum BooleanExpression {
    /// Column-to-literal comparison backed by arrow's `cmp` kernels.
    Compare {
        /// Column the comparison targets.
        column: String,
        /// Operator.
        op: ComparisonOp,
        /// Right-hand literal.
        literal: ScalarValue,
    },
    /// Regex test over a string column.
    Pattern {
        /// Column the pattern applies to.
        column: String,
        /// Compiled pattern.
        pattern: Regex,
        /// When set, the bitmap holds the non-matching rows instead.
        negate: bool,
    },
    /// Conjunction; both sides always evaluate.
    And {
        /// Left subtree.
        left: Box<BooleanExpression>,
        /// Right subtree.
        right: Box<BooleanExpression>,
    },
    /// Disjunction; both sides always evaluate.
    Or {
        /// Left subtree.
        left: Box<BooleanExpression>,
        /// Right subtree.
        right: Box<BooleanExpression>,
    },
}

impl BooleanExpression {
    /// Evaluates the predicate against `batch`, returning the bitmap of
    /// matching 0-based row positions.
    ///
    /// `And`/`Or` consume and return ownership of the left operand's bitmap:
    /// the fold writes into its storage in place while the right operand is
    /// borrowed read-only and dropped afterwards.
    pub fn eval(&self, batch: &RecordBatch) -> Result<RoaringBitmap, EvalError> {
        match self {
            BooleanExpression::Compare {
                column,
                op,
                literal,
            } => eval_compare(batch, column, *op, literal),
            BooleanExpression::Pattern {
                column,
                pattern,
                negate,
            } => eval_pattern(batch, column, pattern, *negate),
            BooleanExpression::And { left, right } => {
                let mut left = left.eval(batch)?;
                let right = right.eval(batch)?;
                left &= &right;
                Ok(left)
            }
            BooleanExpression::Or { left, right } => {
                let mut left = left.eval(batch)?;
                let right = right.eval(batch)?;
                left |= &right;
                Ok(left)
            }
        }
    }
}

impl fmt::Display for BooleanExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanExpression::Compare {
                column,
                op,
                literal,
            } => write!(f, "{column} {op} {literal}"),
            BooleanExpression::Pattern {
                column,
                pattern,
                negate,
            } => {
                let verb = if *negate { "not matches" } else { "matches" };
                write!(f, "{column} {verb} {:?}", pattern.as_str())
            }
            BooleanExpression::And { left, right } => write!(f, "({left} AND {right})"),
            BooleanExpression::Or { left, right } => write!(f, "({left} OR {right})"),
        }
    }
}

/// Compiles a logical expression into a bitmap evaluator.
pub fn compile(expr: &Expr) -> Result<BooleanExpression, CompileError> {
    let Expr::Binary { left, op, right } = expr else {
        return Err(CompileError::UnsupportedExpression);
    };

    match op {
        Operator::And | Operator::Or => {
            let compiled_left = Box::new(compile(left)?);
            let compiled_right = Box::new(compile(right)?);
            Ok(match op {
                Operator::And => BooleanExpression::And {
                    left: compiled_left,
                    right: compiled_right,
                },
                _ => BooleanExpression::Or {
                    left: compiled_left,
                    right: compiled_right,
                },
            })
        }
        Operator::PatternMatch | Operator::PatternNotMatch => {
            let column = first_column(left).ok_or(CompileError::InvalidOperand)?;
            let literal = first_literal(right).ok_or(CompileError::InvalidOperand)?;
            let ScalarValue::Utf8(pattern) = literal else {
                return Err(CompileError::InvalidRegexOperand);
            };
            Ok(BooleanExpression::Pattern {
                column,
                pattern: Regex::new(&pattern)?,
                negate: *op == Operator::PatternNotMatch,
            })
        }
        op => match ComparisonOp::from_operator(*op) {
            Some(compare) => {
                let column = first_column(left).ok_or(CompileError::InvalidOperand)?;
                let literal = first_literal(right).ok_or(CompileError::InvalidOperand)?;
                Ok(BooleanExpression::Compare {
                    column,
                    op: compare,
                    literal,
                })
            }
            None => Err(CompileError::UnsupportedOperator(*op)),
        },
    }
}

/// First column reference in pre-order; the search stops at the first hit.
fn first_column(expr: &Expr) -> Option<String> {
    let mut column = None;
    expr.visit_pre(&mut |node| {
        if let Expr::Column(name) = node {
            column = Some(name.clone());
            return false;
        }
        true
    });
    column
}

/// First literal in pre-order; the search stops at the first hit.
fn first_literal(expr: &Expr) -> Option<ScalarValue> {
    let mut literal = None;
    expr.visit_pre(&mut |node| {
        if let Expr::Literal(value) = node {
            literal = Some(value.clone());
            return false;
        }
        true
    });
    literal
}

fn lookup_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, EvalError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| EvalError::ColumnNotFound(name.to_string()))
}

fn eval_compare(
    batch: &RecordBatch,
    name: &str,
    op: ComparisonOp,
    literal: &ScalarValue,
) -> Result<RoaringBitmap, EvalError> {
    let column = lookup_column(batch, name)?;
    let scalar =
        literal_scalar(literal, column.data_type()).ok_or_else(|| EvalError::TypeMismatch {
            column: name.to_string(),
            data_type: column.data_type().clone(),
            literal: literal.clone(),
        })?;

    let matched = match op {
        ComparisonOp::Eq => cmp::eq(column, &scalar),
        ComparisonOp::NotEq => cmp::neq(column, &scalar),
        ComparisonOp::Lt => cmp::lt(column, &scalar),
        ComparisonOp::LtEq => cmp::lt_eq(column, &scalar),
        ComparisonOp::Gt => cmp::gt(column, &scalar),
        ComparisonOp::GtEq => cmp::gt_eq(column, &scalar),
    }
    .map_err(EvalError::Compute)?;

    Ok(collect_matches(&matched))
}

fn eval_pattern(
    batch: &RecordBatch,
    name: &str,
    pattern: &Regex,
    negate: bool,
) -> Result<RoaringBitmap, EvalError> {
    let column = lookup_column(batch, name)?;
    let values = column
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| EvalError::TypeMismatch {
            column: name.to_string(),
            data_type: column.data_type().clone(),
            literal: ScalarValue::Utf8(pattern.as_str().to_string()),
        })?;

    let mut bitmap = RoaringBitmap::new();
    for (row, value) in values.iter().enumerate() {
        // NULL satisfies neither polarity.
        let Some(value) = value else { continue };
        if pattern.is_match(value) != negate {
            bitmap.insert(row as u32);
        }
    }
    Ok(bitmap)
}

/// Set bits of the kernel's boolean output as row positions; nulls never
/// satisfy a comparison.
fn collect_matches(matched: &BooleanArray) -> RoaringBitmap {
    let mut bitmap = RoaringBitmap::new();
    for (row, value) in matched.iter().enumerate() {
        if value == Some(true) {
            bitmap.insert(row as u32);
        }
    }
    bitmap
}

/// One-element arrow scalar of the column's data type, or `None` when the
/// literal cannot represent that type.
fn literal_scalar(literal: &ScalarValue, data_type: &DataType) -> Option<Scalar<ArrayRef>> {
    let array: ArrayRef = match (data_type, literal) {
        (_, ScalarValue::Null) => new_null_array(data_type, 1),
        (DataType::Boolean, ScalarValue::Boolean(v)) => Arc::new(BooleanArray::from(vec![*v])),
        (DataType::Int8, ScalarValue::Int64(v)) => {
            Arc::new(Int8Array::from(vec![i8::try_from(*v).ok()?]))
        }
        (DataType::Int16, ScalarValue::Int64(v)) => {
            Arc::new(Int16Array::from(vec![i16::try_from(*v).ok()?]))
        }
        (DataType::Int32, ScalarValue::Int64(v)) => {
            Arc::new(Int32Array::from(vec![i32::try_from(*v).ok()?]))
        }
        (DataType::Int64, ScalarValue::Int64(v)) => Arc::new(Int64Array::from(vec![*v])),
        (DataType::Int64, ScalarValue::UInt64(v)) => {
            Arc::new(Int64Array::from(vec![i64::try_from(*v).ok()?]))
        }
        (DataType::UInt8, ScalarValue::UInt64(v)) => {
            Arc::new(UInt8Array::from(vec![u8::try_from(*v).ok()?]))
        }
        (DataType::UInt16, ScalarValue::UInt64(v)) => {
            Arc::new(UInt16Array::from(vec![u16::try_from(*v).ok()?]))
        }
        (DataType::UInt32, ScalarValue::UInt64(v)) => {
            Arc::new(UInt32Array::from(vec![u32::try_from(*v).ok()?]))
        }
        (DataType::UInt64, ScalarValue::UInt64(v)) => Arc::new(UInt64Array::from(vec![*v])),
        (DataType::UInt8, ScalarValue::Int64(v)) => {
            Arc::new(UInt8Array::from(vec![u8::try_from(*v).ok()?]))
        }
        (DataType::UInt16, ScalarValue::Int64(v)) => {
            Arc::new(UInt16Array::from(vec![u16::try_from(*v).ok()?]))
        }
        (DataType::UInt32, ScalarValue::Int64(v)) => {
            Arc::new(UInt32Array::from(vec![u32::try_from(*v).ok()?]))
        }
        (DataType::UInt64, ScalarValue::Int64(v)) => {
            Arc::new(UInt64Array::from(vec![u64::try_from(*v).ok()?]))
        }
        (DataType::Float32, ScalarValue::Float64(v)) => {
            Arc::new(Float32Array::from(vec![*v as f32]))
        }
        (DataType::Float64, ScalarValue::Float64(v)) => Arc::new(Float64Array::from(vec![*v])),
        (DataType::Utf8, ScalarValue::Utf8(v)) => Arc::new(StringArray::from(vec![v.as_str()])),
        (DataType::Binary, ScalarValue::Binary(v)) => {
            Arc::new(BinaryArray::from(vec![v.as_slice()]))
        }
        _ => return None,
    };
    Some(Scalar::new(array))
}
