#![deny(missing_docs)]
//! Consistency and execution core for an Arrow-native columnar engine.
//!
//! Two independent building blocks live here. The [`oracle`] module issues
//! transaction timestamps from one per-database clock and answers snapshot
//! visibility, so readers get a consistent non-blocking view under concurrent
//! writers. The [`exec`] module compiles a logical boolean expression into a
//! bitmap evaluator and applies it to `RecordBatch` values, forwarding only
//! matching rows through a push-based pipeline stage.

pub mod db;
pub mod exec;
mod logging;
pub mod mvcc;
pub mod oracle;
pub mod query;

#[cfg(test)]
mod test_util;

pub use crate::{
    db::{ColumnStore, Database},
    exec::{
        filter::{index_ranges, Diagram, ExecContext, FilterOperator, IndexRange, PhysicalOperator},
        predicate::{compile, BooleanExpression, CompileError, ComparisonOp, EvalError},
    },
    mvcc::Timestamp,
    oracle::{Oracle, ReadGuard, WriteTxn},
    query::{Expr, Operator, ScalarValue},
};
