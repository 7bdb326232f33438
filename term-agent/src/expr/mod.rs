//! Typed column expressions and row conditions.
//!
//! Checks and preconditions are described by a small expression tree instead
//! of raw SQL text, so the same description can be lowered to a DataFusion
//! logical expression for in-memory evaluation or rendered as SQL for a
//! remote database ([`sql`] module).
//!
//! # Examples
//!
//! ```rust
//! use term_agent::expr::{col, lit, Condition};
//!
//! // a + b <= 10
//! let check = (col("a") + col("b")).lt_eq(lit(10));
//! assert_eq!(check.to_string(), "a + b <= 10");
//!
//! // only rows where region = 'EU' and amount is present
//! let filter = col("region").eq(lit("EU")).and(col("amount").is_not_null());
//! assert_eq!(filter.columns(), vec!["region", "amount"]);
//! # let _: Condition = filter;
//! ```

pub(crate) mod lowering;
pub mod sql;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use sql::SqlDialect;

/// A literal operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Literal {
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Text
    Utf8(String),
    /// Boolean
    Boolean(bool),
    /// Calendar date
    Date(NaiveDate),
    /// SQL NULL
    Null,
}

impl Literal {
    /// Returns true for integer and float literals.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Literal::Int(_) | Literal::Float(_))
    }

    /// Returns a short name for the literal's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Int(_) => "integer",
            Literal::Float(_) => "float",
            Literal::Utf8(_) => "text",
            Literal::Boolean(_) => "boolean",
            Literal::Date(_) => "date",
            Literal::Null => "null",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::Utf8(v) => write!(f, "'{v}'"),
            Literal::Boolean(v) => write!(f, "{v}"),
            Literal::Date(v) => write!(f, "{v}"),
            Literal::Null => write!(f, "NULL"),
        }
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Int(value.into())
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Utf8(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Utf8(value)
    }
}

impl From<NaiveDate> for Literal {
    fn from(value: NaiveDate) -> Self {
        Literal::Date(value)
    }
}

/// Arithmetic operators allowed in derived columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    /// Always evaluated in double precision
    Divide,
}

impl ArithmeticOp {
    /// Returns the operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
}

impl ComparisonOp {
    /// Returns the SQL operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Lt => "<",
            ComparisonOp::LtEq => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::GtEq => ">=",
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
        }
    }

    /// Returns true for the ordering operators (`<`, `<=`, `>`, `>=`).
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            ComparisonOp::Lt | ComparisonOp::LtEq | ComparisonOp::Gt | ComparisonOp::GtEq
        )
    }
}

/// A column reference, a literal, or arithmetic over them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnExpr {
    /// A column of the resolved table
    Column(String),
    /// A literal value
    Literal(Literal),
    /// `left op right`
    Arithmetic {
        left: Box<ColumnExpr>,
        op: ArithmeticOp,
        right: Box<ColumnExpr>,
    },
}

/// Creates a column reference.
pub fn col(name: impl Into<String>) -> ColumnExpr {
    ColumnExpr::Column(name.into())
}

/// Creates a literal operand.
pub fn lit(value: impl Into<Literal>) -> ColumnExpr {
    ColumnExpr::Literal(value.into())
}

impl ColumnExpr {
    /// Builds the row-wise sum of the given columns.
    ///
    /// Returns `None` when no column is given.
    ///
    /// ```rust
    /// use term_agent::expr::ColumnExpr;
    ///
    /// let total = ColumnExpr::sum(["a", "b", "c"]).unwrap();
    /// assert_eq!(total.to_string(), "a + b + c");
    /// ```
    pub fn sum<I, S>(columns: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        columns
            .into_iter()
            .map(col)
            .reduce(|acc, next| acc.arithmetic(ArithmeticOp::Add, next))
    }

    fn arithmetic(self, op: ArithmeticOp, right: ColumnExpr) -> Self {
        ColumnExpr::Arithmetic {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    /// Returns the distinct column names referenced, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ColumnExpr::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            ColumnExpr::Literal(_) => {}
            ColumnExpr::Arithmetic { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
        }
    }

    /// Visits every literal in the expression.
    pub(crate) fn literals(&self) -> Vec<&Literal> {
        match self {
            ColumnExpr::Column(_) => Vec::new(),
            ColumnExpr::Literal(l) => vec![l],
            ColumnExpr::Arithmetic { left, right, .. } => {
                let mut out = left.literals();
                out.extend(right.literals());
                out
            }
        }
    }

    /// Returns the column name if this is a bare column reference.
    pub fn as_column(&self) -> Option<&str> {
        match self {
            ColumnExpr::Column(name) => Some(name),
            _ => None,
        }
    }

    pub fn lt(self, other: impl Into<ColumnExpr>) -> Condition {
        Condition::compare(self, ComparisonOp::Lt, other)
    }

    pub fn lt_eq(self, other: impl Into<ColumnExpr>) -> Condition {
        Condition::compare(self, ComparisonOp::LtEq, other)
    }

    pub fn gt(self, other: impl Into<ColumnExpr>) -> Condition {
        Condition::compare(self, ComparisonOp::Gt, other)
    }

    pub fn gt_eq(self, other: impl Into<ColumnExpr>) -> Condition {
        Condition::compare(self, ComparisonOp::GtEq, other)
    }

    pub fn eq(self, other: impl Into<ColumnExpr>) -> Condition {
        Condition::compare(self, ComparisonOp::Eq, other)
    }

    pub fn not_eq(self, other: impl Into<ColumnExpr>) -> Condition {
        Condition::compare(self, ComparisonOp::NotEq, other)
    }

    /// `self BETWEEN low AND high` (inclusive).
    pub fn between(self, low: impl Into<ColumnExpr>, high: impl Into<ColumnExpr>) -> Condition {
        Condition::Between {
            expr: self,
            low: low.into(),
            high: high.into(),
            negated: false,
        }
    }

    /// `self IN (values...)`.
    pub fn in_set<I, L>(self, values: I) -> Condition
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        Condition::InSet {
            expr: self,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn is_null(self) -> Condition {
        Condition::IsNull {
            expr: self,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Condition {
        Condition::IsNull {
            expr: self,
            negated: true,
        }
    }
}

impl From<&str> for ColumnExpr {
    fn from(value: &str) -> Self {
        col(value)
    }
}

impl From<String> for ColumnExpr {
    fn from(value: String) -> Self {
        col(value)
    }
}

impl From<Literal> for ColumnExpr {
    fn from(value: Literal) -> Self {
        ColumnExpr::Literal(value)
    }
}

impl From<i64> for ColumnExpr {
    fn from(value: i64) -> Self {
        lit(value)
    }
}

impl From<i32> for ColumnExpr {
    fn from(value: i32) -> Self {
        lit(value)
    }
}

impl From<f64> for ColumnExpr {
    fn from(value: f64) -> Self {
        lit(value)
    }
}

macro_rules! impl_arithmetic {
    ($trait:ident, $method:ident, $op:expr) => {
        impl std::ops::$trait for ColumnExpr {
            type Output = ColumnExpr;

            fn $method(self, rhs: ColumnExpr) -> ColumnExpr {
                self.arithmetic($op, rhs)
            }
        }
    };
}

impl_arithmetic!(Add, add, ArithmeticOp::Add);
impl_arithmetic!(Sub, sub, ArithmeticOp::Subtract);
impl_arithmetic!(Mul, mul, ArithmeticOp::Multiply);
impl_arithmetic!(Div, div, ArithmeticOp::Divide);

impl fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnExpr::Column(name) => write!(f, "{name}"),
            ColumnExpr::Literal(l) => write!(f, "{l}"),
            ColumnExpr::Arithmetic { left, op, right } => {
                write_operand(f, left, *op, false)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right, *op, true)
            }
        }
    }
}

// Left-associative chains of the same additive operator print without parens.
fn write_operand(
    f: &mut fmt::Formatter<'_>,
    operand: &ColumnExpr,
    parent: ArithmeticOp,
    is_right: bool,
) -> fmt::Result {
    match operand {
        ColumnExpr::Arithmetic { op, .. } if !is_right && *op == parent => write!(f, "{operand}"),
        ColumnExpr::Arithmetic { .. } => write!(f, "({operand})"),
        _ => write!(f, "{operand}"),
    }
}

/// A boolean row condition, used both as the check of a step and as its
/// preconditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// `left op right`
    Compare {
        left: ColumnExpr,
        op: ComparisonOp,
        right: ColumnExpr,
    },
    /// `expr [NOT] BETWEEN low AND high`
    Between {
        expr: ColumnExpr,
        low: ColumnExpr,
        high: ColumnExpr,
        negated: bool,
    },
    /// `expr [NOT] IN (values)`
    InSet {
        expr: ColumnExpr,
        values: Vec<Literal>,
        negated: bool,
    },
    /// `expr IS [NOT] NULL`
    IsNull { expr: ColumnExpr, negated: bool },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Creates a comparison condition.
    pub fn compare(
        left: impl Into<ColumnExpr>,
        op: ComparisonOp,
        right: impl Into<ColumnExpr>,
    ) -> Self {
        Condition::Compare {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Joins conditions with AND. Returns `None` for an empty input.
    pub fn all<I>(conditions: I) -> Option<Self>
    where
        I: IntoIterator<Item = Condition>,
    {
        conditions.into_iter().reduce(Condition::and)
    }

    /// Returns the distinct column names referenced, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for expr in self.operands() {
            for name in expr.columns() {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// Returns every column expression appearing in the condition.
    pub(crate) fn operands(&self) -> Vec<&ColumnExpr> {
        match self {
            Condition::Compare { left, right, .. } => vec![left, right],
            Condition::Between {
                expr, low, high, ..
            } => vec![expr, low, high],
            Condition::InSet { expr, .. } | Condition::IsNull { expr, .. } => vec![expr],
            Condition::And(l, r) | Condition::Or(l, r) => {
                let mut out = l.operands();
                out.extend(r.operands());
                out
            }
            Condition::Not(inner) => inner.operands(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare { left, op, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Condition::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} {not}BETWEEN {low} AND {high}")
            }
            Condition::InSet {
                expr,
                values,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let list = values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{expr} {not}IN ({list})")
            }
            Condition::IsNull { expr, negated } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} IS {not}NULL")
            }
            Condition::And(l, r) => write!(f, "({l}) AND ({r})"),
            Condition::Or(l, r) => write!(f, "({l}) OR ({r})"),
            Condition::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}
