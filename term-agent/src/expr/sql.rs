//! SQL rendering of expressions and conditions.

use super::{ArithmeticOp, ColumnExpr, Condition, Literal};
use crate::prelude::*;
use crate::security::SqlSecurity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The SQL dialect a remote table speaks.
///
/// `Generic` is ANSI-style SQL with double-quoted identifiers; it is what
/// DataFusion's own SQL engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    Generic,
}

impl SqlDialect {
    /// Returns the dialect name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "PostgreSQL",
            SqlDialect::MySQL => "MySQL",
            SqlDialect::Generic => "generic",
        }
    }

    fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::MySQL => '`',
            SqlDialect::PostgreSQL | SqlDialect::Generic => '"',
        }
    }

    /// The double-precision type name used to force float division.
    pub fn double_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "DOUBLE PRECISION",
            SqlDialect::MySQL | SqlDialect::Generic => "DOUBLE",
        }
    }

    /// Quotes a column identifier.
    pub fn quote_identifier(&self, name: &str) -> Result<String> {
        SqlSecurity::quote_identifier(name, self.identifier_quote())
    }

    /// Quotes a possibly schema-qualified table name part by part.
    pub fn quote_table_name(&self, name: &str) -> Result<String> {
        SqlSecurity::validate_table_name(name)?;
        let parts = name
            .split('.')
            .map(|part| self.quote_identifier(part))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join("."))
    }

    /// Renders a literal.
    pub fn render_literal(&self, literal: &Literal) -> Result<String> {
        Ok(match literal {
            Literal::Int(v) => v.to_string(),
            Literal::Float(v) if v.is_finite() => format!("{v:?}"),
            Literal::Float(v) => {
                return Err(TermError::predicate(
                    v.to_string(),
                    "non-finite float literals cannot be rendered as SQL",
                ))
            }
            Literal::Utf8(v) => SqlSecurity::quote_string(v, *self == SqlDialect::MySQL)?,
            Literal::Boolean(true) => "TRUE".to_string(),
            Literal::Boolean(false) => "FALSE".to_string(),
            Literal::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
            Literal::Null => "NULL".to_string(),
        })
    }

    /// Renders a column expression.
    ///
    /// Arithmetic operands are cast to double so integer overflow cannot
    /// raise an error, and a zero divisor becomes NULL through `NULLIF`.
    pub fn render_expr(&self, expr: &ColumnExpr) -> Result<String> {
        match expr {
            ColumnExpr::Column(name) => self.quote_identifier(name),
            ColumnExpr::Literal(literal) => self.render_literal(literal),
            ColumnExpr::Arithmetic { left, op, right } => {
                let l = self.render_double(left)?;
                let r = self.render_double(right)?;
                Ok(match op {
                    ArithmeticOp::Divide => format!("({l} / NULLIF({r}, 0))"),
                    _ => format!("({l} {} {r})", op.symbol()),
                })
            }
        }
    }

    fn render_double(&self, operand: &ColumnExpr) -> Result<String> {
        let rendered = self.render_expr(operand)?;
        Ok(match operand {
            ColumnExpr::Arithmetic { .. } => rendered,
            _ => format!("CAST({rendered} AS {})", self.double_type()),
        })
    }

    /// Renders a boolean condition.
    pub fn render_condition(&self, condition: &Condition) -> Result<String> {
        match condition {
            Condition::Compare { left, op, right } => Ok(format!(
                "({} {} {})",
                self.render_expr(left)?,
                op.symbol(),
                self.render_expr(right)?
            )),
            Condition::Between {
                expr,
                low,
                high,
                negated,
            } => Ok(format!(
                "({} {}BETWEEN {} AND {})",
                self.render_expr(expr)?,
                if *negated { "NOT " } else { "" },
                self.render_expr(low)?,
                self.render_expr(high)?
            )),
            Condition::InSet {
                expr,
                values,
                negated,
            } => {
                let list = values
                    .iter()
                    .map(|v| self.render_literal(v))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");
                Ok(format!(
                    "({} {}IN ({list}))",
                    self.render_expr(expr)?,
                    if *negated { "NOT " } else { "" }
                ))
            }
            Condition::IsNull { expr, negated } => Ok(format!(
                "({} IS {}NULL)",
                self.render_expr(expr)?,
                if *negated { "NOT " } else { "" }
            )),
            Condition::And(l, r) => Ok(format!(
                "({} AND {})",
                self.render_condition(l)?,
                self.render_condition(r)?
            )),
            Condition::Or(l, r) => Ok(format!(
                "({} OR {})",
                self.render_condition(l)?,
                self.render_condition(r)?
            )),
            Condition::Not(inner) => Ok(format!("(NOT {})", self.render_condition(inner)?)),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
