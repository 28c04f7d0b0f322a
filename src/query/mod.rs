//! Logical expression input for predicate pushdown.
//!
//! Queries hand the engine a small immutable tree of columns, literals, and
//! binary operators; [`crate::exec::predicate::compile`] lowers it into a
//! bitmap evaluator. The tree is built once per query and shared read-only
//! across every batch evaluation.

use std::fmt;

/// Literal values accepted by predicate operands.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    /// Represents SQL/Arrow `NULL`.
    Null,
    /// Boolean literal.
    Boolean(bool),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Binary blob.
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// Returns true when the literal is the `Null` variant.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<u64> for ScalarValue {
    fn from(value: u64) -> Self {
        Self::UInt64(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        Self::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("NULL"),
            ScalarValue::Boolean(value) => write!(f, "{value}"),
            ScalarValue::Int64(value) => write!(f, "{value}"),
            ScalarValue::UInt64(value) => write!(f, "{value}"),
            ScalarValue::Float64(value) => write!(f, "{value}"),
            ScalarValue::Utf8(value) => write!(f, "{value:?}"),
            ScalarValue::Binary(value) => {
                f.write_str("0x")?;
                for byte in value {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Binary operator in the logical expression tree.
///
/// The boolean compiler recognizes the comparison, pattern, and logical
/// operators; the arithmetic ones belong to projection expressions and are
/// rejected with a typed error when they reach the filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
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
    /// Regex match.
    PatternMatch,
    /// Negated regex match.
    PatternNotMatch,
    /// Logical conjunction.
    And,
    /// Logical disjunction.
    Or,
    /// Addition (`+`).
    Add,
    /// Subtraction (`-`).
    Sub,
    /// Multiplication (`*`).
    Mul,
    /// Division (`/`).
    Div,
}

impl Operator {
    /// Returns a textual representation of the operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::PatternMatch => "matches",
            Operator::PatternNotMatch => "not matches",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node in the logical expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Reference to a named column.
    Column(String),
    /// Literal value.
    Literal(ScalarValue),
    /// Binary expression over two subtrees.
    Binary {
        /// Left subtree.
        left: Box<Expr>,
        /// Operator.
        op: Operator,
        /// Right subtree.
        right: Box<Expr>,
    },
}

impl Expr {
    /// Creates a column reference.
    pub fn column<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Self::Column(name.into())
    }

    /// Creates a literal node.
    pub fn literal<V>(value: V) -> Self
    where
        V: Into<ScalarValue>,
    {
        Self::Literal(value.into())
    }

    /// Creates a binary node over two subtrees.
    pub fn binary(left: Expr, op: Operator, right: Expr) -> Self {
        Self::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// `self = literal`.
    pub fn eq<V: Into<ScalarValue>>(self, value: V) -> Self {
        Self::binary(self, Operator::Eq, Expr::literal(value))
    }

    /// `self != literal`.
    pub fn not_eq<V: Into<ScalarValue>>(self, value: V) -> Self {
        Self::binary(self, Operator::NotEq, Expr::literal(value))
    }

    /// `self < literal`.
    pub fn lt<V: Into<ScalarValue>>(self, value: V) -> Self {
        Self::binary(self, Operator::Lt, Expr::literal(value))
    }

    /// `self <= literal`.
    pub fn lt_eq<V: Into<ScalarValue>>(self, value: V) -> Self {
        Self::binary(self, Operator::LtEq, Expr::literal(value))
    }

    /// `self > literal`.
    pub fn gt<V: Into<ScalarValue>>(self, value: V) -> Self {
        Self::binary(self, Operator::Gt, Expr::literal(value))
    }

    /// `self >= literal`.
    pub fn gt_eq<V: Into<ScalarValue>>(self, value: V) -> Self {
        Self::binary(self, Operator::GtEq, Expr::literal(value))
    }

    /// `self matches pattern`.
    pub fn matches<P: Into<String>>(self, pattern: P) -> Self {
        Self::binary(
            self,
            Operator::PatternMatch,
            Expr::literal(pattern.into()),
        )
    }

    /// `self not matches pattern`.
    pub fn not_matches<P: Into<String>>(self, pattern: P) -> Self {
        Self::binary(
            self,
            Operator::PatternNotMatch,
            Expr::literal(pattern.into()),
        )
    }

    /// `self AND other`.
    pub fn and(self, other: Expr) -> Self {
        Self::binary(self, Operator::And, other)
    }

    /// `self OR other`.
    pub fn or(self, other: Expr) -> Self {
        Self::binary(self, Operator::Or, other)
    }

    /// Depth-first pre-order walk; the visitor returns `false` to stop.
    ///
    /// Returns `false` when the walk was stopped early.
    pub fn visit_pre<F>(&self, visit: &mut F) -> bool
    where
        F: FnMut(&Expr) -> bool,
    {
        if !visit(self) {
            return false;
        }
        if let Expr::Binary { left, right, .. } = self {
            if !left.visit_pre(visit) {
                return false;
            }
            if !right.visit_pre(visit) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose_binary_nodes() {
        let expr = Expr::column("a").gt(1_i64).and(Expr::column("b").eq("x"));
        let Expr::Binary { op, left, right } = &expr else {
            panic!("expected a binary root");
        };
        assert_eq!(*op, Operator::And);
        assert!(matches!(**left, Expr::Binary { op: Operator::Gt, .. }));
        assert!(matches!(**right, Expr::Binary { op: Operator::Eq, .. }));
    }

    #[test]
    fn pre_order_walk_stops_on_first_hit() {
        let expr = Expr::column("a").gt(1_i64).and(Expr::column("b").eq("x"));
        let mut seen = Vec::new();
        expr.visit_pre(&mut |node| {
            if let Expr::Column(name) = node {
                seen.push(name.clone());
                return false;
            }
            true
        });
        assert_eq!(seen, vec!["a".to_string()]);
    }

    #[test]
    fn scalar_display_quotes_strings() {
        assert_eq!(ScalarValue::Int64(5).to_string(), "5");
        assert_eq!(ScalarValue::from("foo.*").to_string(), "\"foo.*\"");
        assert_eq!(ScalarValue::Null.to_string(), "NULL");
        assert_eq!(ScalarValue::Binary(vec![0xab, 0x01]).to_string(), "0xab01");
    }
}
