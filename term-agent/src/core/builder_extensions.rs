//! Convenience step constructors.
//!
//! Each `col_vals_*` method is a thin front end over
//! [`Agent::add_step`]: it fixes the [`AssertionType`], packs the value
//! into the right [`StepValue`] shape and applies the shared
//! [`StepOptions`].

use super::{Agent, AssertionType, ColumnSpec, StepSpec, StepValue, Thresholds};
use crate::expr::{ColumnExpr, Condition, Literal};
use crate::prelude::*;
use crate::sources::DataSource;

/// Optional step parameters shared by every convenience constructor.
///
/// # Examples
///
/// ```rust
/// use term_agent::core::{StepOptions, Thresholds};
/// use term_agent::expr::{col, lit};
///
/// let options = StepOptions::new()
///     .preconditions(col("status").eq(lit("open")))
///     .thresholds(Thresholds::new().warn_at_fraction(0.05))
///     .brief("Open orders have a positive amount");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StepOptions {
    preconditions: Option<Condition>,
    brief: Option<String>,
    thresholds: Option<Thresholds>,
    data_source: Option<DataSource>,
    na_pass: bool,
    active: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            preconditions: None,
            brief: None,
            thresholds: None,
            data_source: None,
            na_pass: false,
            active: true,
        }
    }
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only rows where `condition` is TRUE are evaluated.
    pub fn preconditions(mut self, condition: Condition) -> Self {
        self.preconditions = Some(condition);
        self
    }

    pub fn brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }

    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    /// Evaluates the step against this source instead of the default one.
    pub fn data_source(mut self, source: DataSource) -> Self {
        self.data_source = Some(source);
        self
    }

    /// Counts a NULL comparison outcome as a pass.
    pub fn na_pass(mut self, na_pass: bool) -> Self {
        self.na_pass = na_pass;
        self
    }

    /// Keeps the step in the plan without evaluating it.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    fn apply(self, mut spec: StepSpec) -> StepSpec {
        spec.preconditions = self.preconditions;
        spec.brief = self.brief;
        spec.thresholds = self.thresholds;
        spec.data_source = self.data_source;
        spec.na_pass = self.na_pass;
        spec.active = self.active;
        spec
    }
}

impl Agent {
    fn add_with_options(
        self,
        assertion_type: AssertionType,
        columns: impl Into<ColumnSpec>,
        value: StepValue,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_step(options.apply(StepSpec::new(assertion_type, columns, value)))
    }

    /// Values must be `< value`.
    pub fn col_vals_lt(
        self,
        columns: impl Into<ColumnSpec>,
        value: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(
            AssertionType::LessThan,
            columns,
            StepValue::scalar(value),
            options,
        )
    }

    /// Values must be `<= value`.
    pub fn col_vals_lte(
        self,
        columns: impl Into<ColumnSpec>,
        value: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(
            AssertionType::LessThanOrEqual,
            columns,
            StepValue::scalar(value),
            options,
        )
    }

    /// Values must be `> value`.
    pub fn col_vals_gt(
        self,
        columns: impl Into<ColumnSpec>,
        value: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(
            AssertionType::GreaterThan,
            columns,
            StepValue::scalar(value),
            options,
        )
    }

    /// Values must be `>= value`.
    pub fn col_vals_gte(
        self,
        columns: impl Into<ColumnSpec>,
        value: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(
            AssertionType::GreaterThanOrEqual,
            columns,
            StepValue::scalar(value),
            options,
        )
    }

    pub fn col_vals_equal(
        self,
        columns: impl Into<ColumnSpec>,
        value: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(AssertionType::Equal, columns, StepValue::scalar(value), options)
    }

    pub fn col_vals_not_equal(
        self,
        columns: impl Into<ColumnSpec>,
        value: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(
            AssertionType::NotEqual,
            columns,
            StepValue::scalar(value),
            options,
        )
    }

    /// Values must lie in `[low, high]`.
    pub fn col_vals_between(
        self,
        columns: impl Into<ColumnSpec>,
        low: impl Into<ColumnExpr>,
        high: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(
            AssertionType::Between,
            columns,
            StepValue::range(low, high),
            options,
        )
    }

    /// Values must lie outside `[low, high]`.
    pub fn col_vals_not_between(
        self,
        columns: impl Into<ColumnSpec>,
        low: impl Into<ColumnExpr>,
        high: impl Into<ColumnExpr>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(
            AssertionType::NotBetween,
            columns,
            StepValue::range(low, high),
            options,
        )
    }

    pub fn col_vals_in_set<I, L>(
        self,
        columns: impl Into<ColumnSpec>,
        values: I,
        options: StepOptions,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        self.add_with_options(AssertionType::InSet, columns, StepValue::set(values), options)
    }

    pub fn col_vals_not_in_set<I, L>(
        self,
        columns: impl Into<ColumnSpec>,
        values: I,
        options: StepOptions,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = L>,
        L: Into<Literal>,
    {
        self.add_with_options(
            AssertionType::NotInSet,
            columns,
            StepValue::set(values),
            options,
        )
    }

    pub fn col_vals_null(self, columns: impl Into<ColumnSpec>, options: StepOptions) -> Result<Self> {
        self.add_with_options(AssertionType::Null, columns, StepValue::None, options)
    }

    pub fn col_vals_not_null(
        self,
        columns: impl Into<ColumnSpec>,
        options: StepOptions,
    ) -> Result<Self> {
        self.add_with_options(AssertionType::NotNull, columns, StepValue::None, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, lit};
    use crate::test_utils::small_table_registry;

    fn agent() -> Agent {
        Agent::builder("extensions")
            .registry(small_table_registry())
            .default_source(DataSource::local("small_table"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_constructors_set_assertion_types() {
        let agent = agent()
            .col_vals_lt("a", 1, StepOptions::new())
            .unwrap()
            .col_vals_between("a", 1, 3, StepOptions::new())
            .unwrap()
            .col_vals_not_in_set("b", [1, 2], StepOptions::new())
            .unwrap()
            .col_vals_null(vec!["a", "b"], StepOptions::new())
            .unwrap();

        let types: Vec<AssertionType> = agent.steps().iter().map(|s| s.assertion_type()).collect();
        assert_eq!(
            types,
            vec![
                AssertionType::LessThan,
                AssertionType::Between,
                AssertionType::NotInSet,
                AssertionType::Null
            ]
        );
        assert_eq!(agent.steps()[3].column_labels(), vec!["a", "b"]);
    }

    #[test]
    fn test_options_are_applied() {
        let agent = agent()
            .col_vals_gte(
                "a",
                lit(2),
                StepOptions::new()
                    .preconditions(col("b").lt(lit(5)))
                    .brief("a is at least 2")
                    .na_pass(true)
                    .inactive(),
            )
            .unwrap();

        let step = &agent.steps()[0];
        assert_eq!(step.brief(), "a is at least 2");
        assert!(step.na_pass());
        assert!(!step.is_active());
        assert_eq!(step.preconditions(), Some(&col("b").lt(lit(5))));
    }

    #[test]
    fn test_empty_set_is_rejected() {
        let err = agent()
            .col_vals_in_set("a", Vec::<i64>::new(), StepOptions::new())
            .unwrap_err();
        assert!(matches!(err, TermError::PlanBuild { .. }));
    }
}
