//! Push-based filter stage: bitmap evaluation, row projection, and plan
//! diagrams.
//!
//! The pipeline is synchronous: a stage's callback invokes its downstream's
//! callback directly, so a slow consumer applies backpressure by occupying
//! the calling thread. Cancellation is cooperative and checked at batch
//! granularity.

use std::fmt;

use arrow::{array::UInt32Array, compute, error::ArrowError, record_batch::RecordBatch};
use tokio_util::sync::CancellationToken;

use crate::{
    exec::predicate::{self, BooleanExpression, CompileError, EvalError},
    logging::tundra_log,
    query::Expr,
};

/// Per-query execution context threaded through operator callbacks.
#[derive(Clone, Debug, Default)]
pub struct ExecContext {
    cancel: CancellationToken,
}

impl ExecContext {
    /// Creates a context with a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token callers cancel to stop the query between batches.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns true once the query has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A synchronous, push-based pipeline stage.
pub trait PhysicalOperator: Send {
    /// Receives one batch and pushes derived batches downstream.
    ///
    /// The batch is moved into the call; a stage wanting to retain it beyond
    /// the call keeps its own handle (record batches are cheaply clonable
    /// Arc-backed buffers).
    fn callback(&mut self, ctx: &ExecContext, batch: RecordBatch) -> Result<(), EvalError>;

    /// Signals that no more batches will arrive.
    fn finish(&mut self, ctx: &ExecContext) -> Result<(), EvalError>;

    /// Explain-only description of this stage and its downstream chain.
    fn draw(&self) -> Diagram;
}

/// Explain node: a stage description plus its downstream chain.
///
/// Used for human-readable plan inspection, never for execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagram {
    /// Textual description of the stage.
    pub details: String,
    /// Downstream stage's diagram, if any.
    pub child: Option<Box<Diagram>>,
}

impl fmt::Display for Diagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut node = Some(self);
        let mut depth = 0_usize;
        while let Some(diagram) = node {
            if depth > 0 {
                writeln!(f)?;
            }
            write!(f, "{:indent$}{}", "", diagram.details, indent = depth * 2)?;
            node = diagram.child.as_deref();
            depth += 1;
        }
        Ok(())
    }
}

/// Streaming filter stage: evaluates a compiled predicate per batch and
/// forwards only the matching rows.
pub struct FilterOperator {
    predicate: BooleanExpression,
    next: Option<Box<dyn PhysicalOperator>>,
}

impl FilterOperator {
    /// Compiles `expr` and builds the stage.
    ///
    /// Compile errors surface here, before any batch is processed.
    pub fn compile(expr: &Expr) -> Result<Self, CompileError> {
        let predicate = predicate::compile(expr)?;
        tundra_log!(
            log::Level::Debug,
            "filter_compiled",
            "predicate={predicate}"
        );
        Ok(Self {
            predicate,
            next: None,
        })
    }

    /// Installs the downstream stage.
    pub fn set_next(&mut self, next: Box<dyn PhysicalOperator>) {
        self.next = Some(next);
    }

    /// The compiled predicate backing this stage.
    pub fn predicate(&self) -> &BooleanExpression {
        &self.predicate
    }
}

impl PhysicalOperator for FilterOperator {
    fn callback(&mut self, ctx: &ExecContext, batch: RecordBatch) -> Result<(), EvalError> {
        if ctx.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let Some(filtered) = filter_batch(&self.predicate, &batch)? else {
            // Nothing matched: the batch is dropped, downstream is not
            // invoked, and this is not an error.
            return Ok(());
        };
        match &mut self.next {
            Some(next) => next.callback(ctx, filtered),
            None => Ok(()),
        }
    }

    fn finish(&mut self, ctx: &ExecContext) -> Result<(), EvalError> {
        match &mut self.next {
            Some(next) => next.finish(ctx),
            None => Ok(()),
        }
    }

    fn draw(&self) -> Diagram {
        Diagram {
            details: format!("Filter ({})", self.predicate),
            child: self.next.as_ref().map(|next| Box::new(next.draw())),
        }
    }
}

/// Applies `predicate` to `batch` and projects the matching rows into a
/// reduced batch with identical schema and column order.
///
/// Returns `None` when no row matches. A selection that forms one contiguous
/// run is projected as a zero-copy slice; anything else goes through the
/// `take` kernel with an index list sized exactly to the bitmap cardinality.
pub fn filter_batch(
    predicate: &BooleanExpression,
    batch: &RecordBatch,
) -> Result<Option<RecordBatch>, EvalError> {
    let bitmap = predicate.eval(batch)?;
    if bitmap.is_empty() {
        return Ok(None);
    }

    let mut indices = Vec::with_capacity(bitmap.len() as usize);
    indices.extend(bitmap.iter());

    let ranges = index_ranges(&indices);
    if let [range] = ranges.as_slice() {
        return Ok(Some(batch.slice(range.start as usize, range.len())));
    }

    take_batch(batch, &indices)
        .map(Some)
        .map_err(EvalError::Projection)
}

/// Row selection via the `take` kernel, column by column.
fn take_batch(batch: &RecordBatch, indices: &[u32]) -> Result<RecordBatch, ArrowError> {
    let idx_array = UInt32Array::from(indices.to_vec());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        columns.push(compute::take(column.as_ref(), &idx_array, None)?);
    }
    RecordBatch::try_new(batch.schema(), columns)
}

/// Half-open run of consecutive selected row positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexRange {
    /// First position in the run.
    pub start: u32,
    /// One past the last position in the run.
    pub end: u32,
}

impl IndexRange {
    /// Number of positions covered by the run.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Returns true when the run covers no positions.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Groups a non-empty, strictly increasing index list into maximal
/// contiguous runs; callers must special-case the empty input.
///
/// `[1,2,7,8,9]` yields `[{1,3},{7,10}]`.
pub fn index_ranges(indices: &[u32]) -> Vec<IndexRange> {
    debug_assert!(!indices.is_empty(), "index_ranges requires input");

    let mut ranges = Vec::new();
    let mut current = IndexRange {
        start: indices[0],
        end: indices[0] + 1,
    };
    for &index in &indices[1..] {
        if index == current.end {
            current.end += 1;
        } else {
            ranges.push(current);
            current = IndexRange {
                start: index,
                end: index + 1,
            };
        }
    }
    ranges.push(current);
    ranges
}
