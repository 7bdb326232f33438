//! Lowering of expressions and conditions to DataFusion logical expressions.

use super::{ArithmeticOp, ColumnExpr, ComparisonOp, Condition, Literal};
use chrono::Datelike;
use datafusion::arrow::datatypes::DataType;
use datafusion::functions::core::expr_fn::nullif;
use datafusion::logical_expr::{cast, ident, lit, Expr};
use datafusion::scalar::ScalarValue;

/// Days between 0001-01-01 (day 1 of the common era) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub(crate) fn lower_literal(literal: &Literal) -> Expr {
    match literal {
        Literal::Int(v) => lit(*v),
        Literal::Float(v) => lit(*v),
        Literal::Utf8(v) => lit(v.clone()),
        Literal::Boolean(v) => lit(*v),
        Literal::Date(d) => lit(ScalarValue::Date32(Some(
            d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE,
        ))),
        Literal::Null => lit(ScalarValue::Null),
    }
}

/// Lowers a column expression. Columns are referenced with [`ident`], so
/// names are taken verbatim (no case folding, dots allowed).
pub(crate) fn lower_expr(expr: &ColumnExpr) -> Expr {
    match expr {
        ColumnExpr::Column(name) => ident(name),
        ColumnExpr::Literal(literal) => lower_literal(literal),
        ColumnExpr::Arithmetic { left, op, right } => {
            let l = lower_double(left);
            let r = lower_double(right);
            match op {
                ArithmeticOp::Add => l + r,
                ArithmeticOp::Subtract => l - r,
                ArithmeticOp::Multiply => l * r,
                // a zero divisor yields NULL, never inf or NaN
                ArithmeticOp::Divide => l / nullif(r, lit(0.0)),
            }
        }
    }
}

/// Arithmetic runs in double precision so integer overflow cannot wrap.
/// Nested arithmetic is already double.
fn lower_double(operand: &ColumnExpr) -> Expr {
    let lowered = lower_expr(operand);
    match operand {
        ColumnExpr::Arithmetic { .. } => lowered,
        _ => cast(lowered, DataType::Float64),
    }
}

/// Lowers a condition to a boolean expression with SQL three-valued logic.
pub(crate) fn lower_condition(condition: &Condition) -> Expr {
    match condition {
        Condition::Compare { left, op, right } => {
            let l = lower_expr(left);
            let r = lower_expr(right);
            match op {
                ComparisonOp::Lt => l.lt(r),
                ComparisonOp::LtEq => l.lt_eq(r),
                ComparisonOp::Gt => l.gt(r),
                ComparisonOp::GtEq => l.gt_eq(r),
                ComparisonOp::Eq => l.eq(r),
                ComparisonOp::NotEq => l.not_eq(r),
            }
        }
        Condition::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let e = lower_expr(expr);
            if *negated {
                e.not_between(lower_expr(low), lower_expr(high))
            } else {
                e.between(lower_expr(low), lower_expr(high))
            }
        }
        Condition::InSet {
            expr,
            values,
            negated,
        } => lower_expr(expr).in_list(values.iter().map(lower_literal).collect(), *negated),
        Condition::IsNull { expr, negated } => {
            let e = lower_expr(expr);
            if *negated {
                e.is_not_null()
            } else {
                e.is_null()
            }
        }
        Condition::And(l, r) => lower_condition(l).and(lower_condition(r)),
        Condition::Or(l, r) => lower_condition(l).or(lower_condition(r)),
        Condition::Not(inner) => !lower_condition(inner),
    }
}
