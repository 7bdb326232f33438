//! Validation steps and the shared step-creation contract.
//!
//! Every kind of check funnels through [`StepSpec`]: an [`AssertionType`]
//! tag, a [`ColumnSpec`] naming what is checked, and a [`StepValue`] whose
//! shape must match the tag. [`Agent::add_step`](super::Agent::add_step)
//! turns a spec into a [`ValidationStep`].

use super::Thresholds;
use crate::expr::{ColumnExpr, Condition, Literal};
use crate::predicate::Predicate;
use crate::prelude::*;
use crate::sources::DataSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of check a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssertionType {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    Between,
    NotBetween,
    InSet,
    NotInSet,
    Null,
    NotNull,
}

impl AssertionType {
    pub const ALL: [AssertionType; 12] = [
        AssertionType::LessThan,
        AssertionType::LessThanOrEqual,
        AssertionType::GreaterThan,
        AssertionType::GreaterThanOrEqual,
        AssertionType::Equal,
        AssertionType::NotEqual,
        AssertionType::Between,
        AssertionType::NotBetween,
        AssertionType::InSet,
        AssertionType::NotInSet,
        AssertionType::Null,
        AssertionType::NotNull,
    ];

    /// Returns the tag used in reports, e.g. `less-than-or-equal`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionType::LessThan => "less-than",
            AssertionType::LessThanOrEqual => "less-than-or-equal",
            AssertionType::GreaterThan => "greater-than",
            AssertionType::GreaterThanOrEqual => "greater-than-or-equal",
            AssertionType::Equal => "equal",
            AssertionType::NotEqual => "not-equal",
            AssertionType::Between => "between",
            AssertionType::NotBetween => "not-between",
            AssertionType::InSet => "in-set",
            AssertionType::NotInSet => "not-in-set",
            AssertionType::Null => "null",
            AssertionType::NotNull => "not-null",
        }
    }

    /// Describes the value shape this assertion expects.
    pub fn value_shape(&self) -> &'static str {
        match self {
            AssertionType::Between | AssertionType::NotBetween => "a (low, high) range",
            AssertionType::InSet | AssertionType::NotInSet => "a value set",
            AssertionType::Null | AssertionType::NotNull => "no value",
            _ => "a single value",
        }
    }

    fn brief_phrase(&self) -> &'static str {
        match self {
            AssertionType::LessThan => "should be <",
            AssertionType::LessThanOrEqual => "should be <=",
            AssertionType::GreaterThan => "should be >",
            AssertionType::GreaterThanOrEqual => "should be >=",
            AssertionType::Equal => "should be ==",
            AssertionType::NotEqual => "should be !=",
            AssertionType::Between => "should be between",
            AssertionType::NotBetween => "should not be between",
            AssertionType::InSet => "should be in the set",
            AssertionType::NotInSet => "should not be in the set",
            AssertionType::Null => "should be NULL",
            AssertionType::NotNull => "should not be NULL",
        }
    }
}

impl fmt::Display for AssertionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssertionType {
    type Err = TermError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        AssertionType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| TermError::plan_build(format!("unknown assertion type '{s}'")))
    }
}

/// The comparison operand of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    /// Null checks take no value
    None,
    /// A literal or a column-derived expression
    Scalar(ColumnExpr),
    /// Inclusive bounds
    Range(ColumnExpr, ColumnExpr),
    /// Literal members
    Set(Vec<Literal>),
}

impl StepValue {
    /// A single operand. Strings become column references; use
    /// [`lit`](crate::expr::lit) for text literals.
    pub fn scalar(value: impl Into<ColumnExpr>) -> Self {
        StepValue::Scalar(value.into())
    }

    pub fn range(low: impl Into<ColumnExpr>, high: impl Into<ColumnExpr>) -> Self {
        StepValue::Range(low.into(), high.into())
    }

    pub fn set<I, L>(values: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        StepValue::Set(values.into_iter().map(Into::into).collect())
    }

    /// Describes this value's shape, for error messages.
    pub fn shape(&self) -> &'static str {
        match self {
            StepValue::None => "no value",
            StepValue::Scalar(_) => "a single value",
            StepValue::Range(..) => "a (low, high) range",
            StepValue::Set(_) => "a value set",
        }
    }
}

impl fmt::Display for StepValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepValue::None => Ok(()),
            StepValue::Scalar(v) => write!(f, "{v}"),
            StepValue::Range(low, high) => write!(f, "[{low}, {high}]"),
            StepValue::Set(values) => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{{{}}}", items.join(", "))
            }
        }
    }
}

/// What a step checks.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSpec {
    Column(String),
    /// Every listed column must pass
    Columns(Vec<String>),
    /// A derived value such as `a + b`
    Expr(ColumnExpr),
    /// Every column of the table the step will read, expanded when the step
    /// is added.
    ///
    /// The columns come from the step's own data source when it sets one,
    /// and only otherwise from the agent's default data source. A step that
    /// reads `orders.csv` while the default is `small_table` therefore
    /// checks the file's columns, not `a` and `b`.
    Everything,
}

impl ColumnSpec {
    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnSpec::Columns(names.into_iter().map(Into::into).collect())
    }

    /// Expands the column selection into check targets.
    ///
    /// `everything` is only called for [`ColumnSpec::Everything`].
    pub(crate) fn targets<F>(&self, everything: F) -> Result<Vec<ColumnExpr>>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        let names = match self {
            ColumnSpec::Column(name) => vec![name.clone()],
            ColumnSpec::Columns(names) => names.clone(),
            ColumnSpec::Expr(expr) => return Ok(vec![expr.clone()]),
            ColumnSpec::Everything => everything()?,
        };
        if names.is_empty() {
            return Err(TermError::plan_build("column specification names no column"));
        }
        if let Some(blank) = names.iter().find(|n| n.trim().is_empty()) {
            return Err(TermError::plan_build(format!(
                "invalid empty column name '{blank}'"
            )));
        }
        Ok(names.into_iter().map(ColumnExpr::Column).collect())
    }
}

impl From<&str> for ColumnSpec {
    fn from(value: &str) -> Self {
        ColumnSpec::Column(value.to_string())
    }
}

impl From<String> for ColumnSpec {
    fn from(value: String) -> Self {
        ColumnSpec::Column(value)
    }
}

impl From<ColumnExpr> for ColumnSpec {
    fn from(value: ColumnExpr) -> Self {
        match value {
            ColumnExpr::Column(name) => ColumnSpec::Column(name),
            other => ColumnSpec::Expr(other),
        }
    }
}

impl<S: Into<String>> From<Vec<S>> for ColumnSpec {
    fn from(value: Vec<S>) -> Self {
        ColumnSpec::columns(value)
    }
}

/// Parameters of one step, before it is added to a plan.
///
/// # Examples
///
/// ```rust
/// use term_agent::core::{AssertionType, StepSpec, StepValue, Thresholds};
/// use term_agent::expr::{col, lit};
///
/// let spec = StepSpec::new(AssertionType::LessThanOrEqual, "a", StepValue::scalar(lit(3)))
///     .with_preconditions(col("b").gt(lit(2)))
///     .with_thresholds(Thresholds::new().notify_at_fraction(0.5));
/// assert_eq!(spec.assertion_type, AssertionType::LessThanOrEqual);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub assertion_type: AssertionType,
    pub column: ColumnSpec,
    pub value: StepValue,
    pub preconditions: Option<Condition>,
    pub brief: Option<String>,
    pub thresholds: Option<Thresholds>,
    pub data_source: Option<DataSource>,
    pub na_pass: bool,
    pub active: bool,
}

impl StepSpec {
    pub fn new(assertion_type: AssertionType, column: impl Into<ColumnSpec>, value: StepValue) -> Self {
        Self {
            assertion_type,
            column: column.into(),
            value,
            preconditions: None,
            brief: None,
            thresholds: None,
            data_source: None,
            na_pass: false,
            active: true,
        }
    }

    pub fn with_preconditions(mut self, preconditions: Condition) -> Self {
        self.preconditions = Some(preconditions);
        self
    }

    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn with_data_source(mut self, data_source: DataSource) -> Self {
        self.data_source = Some(data_source);
        self
    }

    /// Counts a NULL comparison outcome as a pass.
    pub fn with_na_pass(mut self, na_pass: bool) -> Self {
        self.na_pass = na_pass;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// One declared check of a plan.
///
/// Built by [`Agent::add_step`](super::Agent::add_step); the data source is
/// captured at that point and the predicate is already compiled.
#[derive(Debug, Clone)]
pub struct ValidationStep {
    index: usize,
    assertion_type: AssertionType,
    targets: Vec<ColumnExpr>,
    value: StepValue,
    brief: String,
    thresholds: Option<Thresholds>,
    data_source: DataSource,
    active: bool,
    predicate: Predicate,
}

impl ValidationStep {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        assertion_type: AssertionType,
        targets: Vec<ColumnExpr>,
        value: StepValue,
        brief: Option<String>,
        thresholds: Option<Thresholds>,
        data_source: DataSource,
        active: bool,
        predicate: Predicate,
    ) -> Self {
        let brief = brief.unwrap_or_else(|| default_brief(assertion_type, &targets, &value));
        Self {
            index,
            assertion_type,
            targets,
            value,
            brief,
            thresholds,
            data_source,
            active,
            predicate,
        }
    }

    /// Position in the plan, starting at 1.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn assertion_type(&self) -> AssertionType {
        self.assertion_type
    }

    pub fn targets(&self) -> &[ColumnExpr] {
        &self.targets
    }

    /// Targets rendered as text, for reports.
    pub fn column_labels(&self) -> Vec<String> {
        self.targets.iter().map(ToString::to_string).collect()
    }

    pub fn value(&self) -> &StepValue {
        &self.value
    }

    pub fn preconditions(&self) -> Option<&Condition> {
        self.predicate.preconditions()
    }

    pub fn na_pass(&self) -> bool {
        self.predicate.na_pass()
    }

    pub fn brief(&self) -> &str {
        &self.brief
    }

    /// The step's own thresholds, or the agent defaults captured when the
    /// step was added. `None` means the default policy.
    pub fn thresholds(&self) -> Option<&Thresholds> {
        self.thresholds.as_ref()
    }

    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

fn default_brief(assertion_type: AssertionType, targets: &[ColumnExpr], value: &StepValue) -> String {
    let columns: Vec<String> = targets.iter().map(|t| format!("`{t}`")).collect();
    let value = value.to_string();
    let mut brief = format!(
        "Expect that values in {} {}",
        columns.join(", "),
        assertion_type.brief_phrase()
    );
    if !value.is_empty() {
        brief.push(' ');
        brief.push_str(&value);
    }
    brief.push('.');
    brief
}
