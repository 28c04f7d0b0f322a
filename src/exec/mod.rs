//! Physical execution: compiled predicates, bitmap evaluation, and the
//! push-based filter stage.

pub mod filter;
pub mod predicate;
