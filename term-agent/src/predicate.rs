//! Predicate compilation.
//!
//! A [`Predicate`] is the executable form of a step: the check condition
//! built from the step's columns, assertion type and value, plus the
//! optional precondition filter and the `na_pass` flag. It has two
//! lowerings that implement the same three-valued semantics:
//!
//! - a row is *evaluated* iff the preconditions are TRUE (or absent),
//! - a row *fails* iff the check is NOT TRUE, or with `na_pass` iff the
//!   check is FALSE (so a NULL outcome passes).
//!
//! [`Predicate::failure_expr`] is consumed by in-memory tables,
//! [`Predicate::failure_sql`] by remote ones.

use crate::core::{AssertionType, StepValue};
use crate::expr::lowering::lower_condition;
use crate::expr::{ColumnExpr, Condition, Literal, SqlDialect};
use crate::prelude::*;
use datafusion::arrow::datatypes::{DataType, Schema};
use datafusion::logical_expr::Expr;

/// A compiled check plus its row filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    check: Condition,
    preconditions: Option<Condition>,
    na_pass: bool,
}

impl Predicate {
    /// Compiles a step description into a predicate.
    ///
    /// With several targets the check is the conjunction of the per-target
    /// checks: a row passes only if every target passes.
    ///
    /// # Errors
    ///
    /// Returns [`TermError::PlanBuild`] when there is no target, when the
    /// value shape does not fit the assertion type, when a value set is
    /// empty, or when a literal is a non-finite float.
    ///
    /// ```rust
    /// use term_agent::core::{AssertionType, StepValue};
    /// use term_agent::expr::{col, lit};
    /// use term_agent::predicate::Predicate;
    ///
    /// let predicate = Predicate::compile(
    ///     &[col("a") + col("b")],
    ///     AssertionType::LessThanOrEqual,
    ///     &StepValue::scalar(lit(10)),
    ///     None,
    ///     false,
    /// )
    /// .unwrap();
    /// assert_eq!(predicate.check().to_string(), "a + b <= 10");
    /// ```
    pub fn compile(
        targets: &[ColumnExpr],
        assertion_type: AssertionType,
        value: &StepValue,
        preconditions: Option<&Condition>,
        na_pass: bool,
    ) -> Result<Self> {
        let per_target = targets
            .iter()
            .map(|target| target_condition(target, assertion_type, value))
            .collect::<Result<Vec<_>>>()?;
        let check = Condition::all(per_target).ok_or_else(|| {
            TermError::plan_build(format!(
                "{assertion_type} step needs at least one column"
            ))
        })?;

        Self::new(check, preconditions.cloned(), na_pass)
    }

    /// Wraps an already-built check condition.
    pub fn new(check: Condition, preconditions: Option<Condition>, na_pass: bool) -> Result<Self> {
        ensure_finite_literals(&check)?;
        if let Some(pre) = &preconditions {
            ensure_finite_literals(pre)?;
        }
        Ok(Self {
            check,
            preconditions,
            na_pass,
        })
    }

    pub fn check(&self) -> &Condition {
        &self.check
    }

    pub fn preconditions(&self) -> Option<&Condition> {
        self.preconditions.as_ref()
    }

    pub fn na_pass(&self) -> bool {
        self.na_pass
    }

    /// Columns referenced by the check or the preconditions.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns = self.check.columns();
        if let Some(pre) = &self.preconditions {
            for name in pre.columns() {
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
        }
        columns
    }

    /// Row-wise pass/fail outcome: TRUE for a passing row, FALSE otherwise.
    /// Never NULL.
    pub fn row_outcomes(&self) -> Expr {
        let check = lower_condition(&self.check);
        if self.na_pass {
            check.is_not_false()
        } else {
            check.is_true()
        }
    }

    /// Boolean expression that is TRUE exactly for failing rows.
    pub fn failure_expr(&self) -> Expr {
        let check = lower_condition(&self.check);
        if self.na_pass {
            check.is_false()
        } else {
            check.is_not_true()
        }
    }

    /// Boolean expression that is TRUE exactly for evaluated rows.
    pub fn precondition_expr(&self) -> Option<Expr> {
        self.preconditions
            .as_ref()
            .map(|pre| lower_condition(pre).is_true())
    }

    /// SQL text that is TRUE exactly for failing rows.
    pub fn failure_sql(&self, dialect: SqlDialect) -> Result<String> {
        let check = dialect.render_condition(&self.check)?;
        Ok(if self.na_pass {
            format!("{check} IS FALSE")
        } else {
            format!("{check} IS NOT TRUE")
        })
    }

    /// Checks that every referenced column is present.
    ///
    /// Used for remote tables, where only the column names of the base
    /// query are known before execution.
    pub fn check_columns(&self, available: &[String]) -> Result<()> {
        for name in self.referenced_columns() {
            if !available.iter().any(|c| c == name) {
                return Err(missing_column(name, available.iter().map(String::as_str)));
            }
        }
        Ok(())
    }

    /// Checks column presence and operand type compatibility against an
    /// Arrow schema.
    pub fn check_schema(&self, schema: &Schema) -> Result<()> {
        check_condition(&self.check, schema)?;
        if let Some(pre) = &self.preconditions {
            check_condition(pre, schema)?;
        }
        Ok(())
    }
}

fn target_condition(
    target: &ColumnExpr,
    assertion_type: AssertionType,
    value: &StepValue,
) -> Result<Condition> {
    let target = target.clone();
    let condition = match (assertion_type, value) {
        (AssertionType::LessThan, StepValue::Scalar(v)) => target.lt(v.clone()),
        (AssertionType::LessThanOrEqual, StepValue::Scalar(v)) => target.lt_eq(v.clone()),
        (AssertionType::GreaterThan, StepValue::Scalar(v)) => target.gt(v.clone()),
        (AssertionType::GreaterThanOrEqual, StepValue::Scalar(v)) => target.gt_eq(v.clone()),
        (AssertionType::Equal, StepValue::Scalar(v)) => target.eq(v.clone()),
        (AssertionType::NotEqual, StepValue::Scalar(v)) => target.not_eq(v.clone()),
        (AssertionType::Between | AssertionType::NotBetween, StepValue::Range(low, high)) => {
            Condition::Between {
                expr: target,
                low: low.clone(),
                high: high.clone(),
                negated: assertion_type == AssertionType::NotBetween,
            }
        }
        (AssertionType::InSet | AssertionType::NotInSet, StepValue::Set(values)) => {
            if values.is_empty() {
                return Err(TermError::plan_build(format!(
                    "{assertion_type} step needs a non-empty value set"
                )));
            }
            Condition::InSet {
                expr: target,
                values: values.clone(),
                negated: assertion_type == AssertionType::NotInSet,
            }
        }
        (AssertionType::Null, StepValue::None) => target.is_null(),
        (AssertionType::NotNull, StepValue::None) => target.is_not_null(),
        (_, other) => {
            return Err(TermError::plan_build(format!(
                "{assertion_type} step expects {}, got {}",
                assertion_type.value_shape(),
                other.shape()
            )))
        }
    };
    Ok(condition)
}

fn ensure_finite_literals(condition: &Condition) -> Result<()> {
    let mut literals: Vec<&Literal> = condition
        .operands()
        .into_iter()
        .flat_map(ColumnExpr::literals)
        .collect();
    collect_set_literals(condition, &mut literals);

    match literals
        .into_iter()
        .find(|l| matches!(l, Literal::Float(v) if !v.is_finite()))
    {
        Some(l) => Err(TermError::plan_build(format!(
            "literal {l} is not a finite number"
        ))),
        None => Ok(()),
    }
}

fn collect_set_literals<'a>(condition: &'a Condition, out: &mut Vec<&'a Literal>) {
    match condition {
        Condition::InSet { values, .. } => out.extend(values.iter()),
        Condition::And(l, r) | Condition::Or(l, r) => {
            collect_set_literals(l, out);
            collect_set_literals(r, out);
        }
        Condition::Not(inner) => collect_set_literals(inner, out),
        _ => {}
    }
}

fn missing_column<'a>(name: &str, available: impl Iterator<Item = &'a str>) -> TermError {
    let available: Vec<&str> = available.collect();
    TermError::predicate(
        name,
        format!(
            "column not found in resolved table (available: {})",
            available.join(", ")
        ),
    )
}

/// Coarse operand classes used for compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeClass {
    Numeric,
    Text,
    Boolean,
    Temporal,
    /// NULL literals and types we do not reason about
    Unknown,
}

impl TypeClass {
    fn of_data_type(data_type: &DataType) -> Self {
        match data_type {
            dt if dt.is_numeric() => TypeClass::Numeric,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => TypeClass::Text,
            DataType::Boolean => TypeClass::Boolean,
            dt if dt.is_temporal() => TypeClass::Temporal,
            _ => TypeClass::Unknown,
        }
    }

    fn of_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Int(_) | Literal::Float(_) => TypeClass::Numeric,
            Literal::Utf8(_) => TypeClass::Text,
            Literal::Boolean(_) => TypeClass::Boolean,
            Literal::Date(_) => TypeClass::Temporal,
            Literal::Null => TypeClass::Unknown,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TypeClass::Numeric => "numeric",
            TypeClass::Text => "text",
            TypeClass::Boolean => "boolean",
            TypeClass::Temporal => "temporal",
            TypeClass::Unknown => "unknown",
        }
    }

    fn compatible(self, other: TypeClass) -> bool {
        use TypeClass::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => true,
            // date strings compare against temporal columns
            (Temporal, Text) | (Text, Temporal) => true,
            (a, b) => a == b,
        }
    }
}

fn infer_class(expr: &ColumnExpr, schema: &Schema) -> Result<TypeClass> {
    match expr {
        ColumnExpr::Column(name) => schema
            .field_with_name(name)
            .map(|field| TypeClass::of_data_type(field.data_type()))
            .map_err(|_| {
                missing_column(name, schema.fields().iter().map(|f| f.name().as_str()))
            }),
        ColumnExpr::Literal(literal) => Ok(TypeClass::of_literal(literal)),
        ColumnExpr::Arithmetic { left, right, .. } => {
            for operand in [left, right] {
                let class = infer_class(operand, schema)?;
                if !matches!(class, TypeClass::Numeric | TypeClass::Unknown) {
                    return Err(TermError::predicate(
                        operand.to_string(),
                        format!(
                            "arithmetic in '{expr}' requires numeric operands, found {}",
                            class.name()
                        ),
                    ));
                }
            }
            Ok(TypeClass::Numeric)
        }
    }
}

fn ensure_compatible(
    subject: &ColumnExpr,
    subject_class: TypeClass,
    operand: &ColumnExpr,
    schema: &Schema,
    op: &str,
) -> Result<()> {
    let operand_class = infer_class(operand, schema)?;
    if subject_class.compatible(operand_class) {
        Ok(())
    } else {
        Err(TermError::predicate(
            subject.to_string(),
            format!(
                "cannot apply '{op}' to a {} operand and {} operand '{operand}'",
                subject_class.name(),
                operand_class.name()
            ),
        ))
    }
}

fn check_condition(condition: &Condition, schema: &Schema) -> Result<()> {
    match condition {
        Condition::Compare { left, op, right } => {
            let left_class = infer_class(left, schema)?;
            if op.is_ordering() && left_class == TypeClass::Boolean {
                return Err(TermError::predicate(
                    left.to_string(),
                    format!("ordering comparison '{}' on a boolean operand", op.symbol()),
                ));
            }
            ensure_compatible(left, left_class, right, schema, op.symbol())
        }
        Condition::Between {
            expr, low, high, ..
        } => {
            let class = infer_class(expr, schema)?;
            ensure_compatible(expr, class, low, schema, "BETWEEN")?;
            ensure_compatible(expr, class, high, schema, "BETWEEN")
        }
        Condition::InSet { expr, values, .. } => {
            let class = infer_class(expr, schema)?;
            for value in values {
                ensure_compatible(expr, class, &ColumnExpr::Literal(value.clone()), schema, "IN")?;
            }
            Ok(())
        }
        Condition::IsNull { expr, .. } => infer_class(expr, schema).map(|_| ()),
        Condition::And(l, r) | Condition::Or(l, r) => {
            check_condition(l, schema)?;
            check_condition(r, schema)
        }
        Condition::Not(inner) => check_condition(inner, schema),
    }
}
