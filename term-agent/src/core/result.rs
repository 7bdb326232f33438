//! Step results and interrogation reports.

use super::{AssertionType, Severity, ValidationStep};
use crate::error::{StepErrorKind, TermError};
use crate::sources::RowCounts;
use serde::{Deserialize, Serialize};

/// How far a step got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Counts were computed
    Evaluated,
    /// The table could not be resolved or the predicate did not fit it
    Errored,
    /// The step is switched off
    Inactive,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Evaluated => "evaluated",
            StepStatus::Errored => "errored",
            StepStatus::Inactive => "inactive",
        }
    }
}

/// The error recorded on an errored step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl From<&TermError> for StepError {
    fn from(error: &TermError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// The outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Position of the step in the plan, starting at 1
    pub step_index: usize,
    pub assertion_type: AssertionType,
    /// Checked columns or expressions
    pub columns: Vec<String>,
    pub brief: String,
    pub status: StepStatus,
    /// Rows that survived the preconditions
    pub n_evaluated: u64,
    pub n_passed: u64,
    pub n_failed: u64,
    /// Passing share of evaluated rows; absent when nothing was evaluated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_passed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f_failed: Option<f64>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
}

impl StepResult {
    fn blank(step: &ValidationStep, status: StepStatus) -> Self {
        Self {
            step_index: step.index(),
            assertion_type: step.assertion_type(),
            columns: step.column_labels(),
            brief: step.brief().to_string(),
            status,
            n_evaluated: 0,
            n_passed: 0,
            n_failed: 0,
            f_passed: None,
            f_failed: None,
            severity: Severity::None,
            error: None,
            duration_ms: 0,
        }
    }

    /// A step whose counts were computed.
    pub fn evaluated(
        step: &ValidationStep,
        counts: RowCounts,
        severity: Severity,
        duration_ms: u64,
    ) -> Self {
        let RowCounts {
            n_evaluated,
            n_failed,
        } = counts;
        let n_passed = n_evaluated.saturating_sub(n_failed);
        let fraction = |n: u64| (n_evaluated > 0).then(|| n as f64 / n_evaluated as f64);
        Self {
            n_evaluated,
            n_passed,
            n_failed,
            f_passed: fraction(n_passed),
            f_failed: fraction(n_failed),
            severity,
            duration_ms,
            ..Self::blank(step, StepStatus::Evaluated)
        }
    }

    /// A step that could not be evaluated. Counts stay zero.
    pub fn errored(step: &ValidationStep, error: &TermError, duration_ms: u64) -> Self {
        Self {
            error: Some(StepError::from(error)),
            duration_ms,
            ..Self::blank(step, StepStatus::Errored)
        }
    }

    /// A step that is switched off.
    pub fn inactive(step: &ValidationStep) -> Self {
        Self::blank(step, StepStatus::Inactive)
    }

    /// True when the step was evaluated and no evaluated row failed.
    pub fn passed(&self) -> bool {
        self.status == StepStatus::Evaluated && self.n_failed == 0
    }

    pub fn is_errored(&self) -> bool {
        self.status == StepStatus::Errored
    }
}

/// Everything one interrogation produced.
///
/// # Examples
///
/// ```rust
/// use term_agent::core::{InterrogationReport, Severity};
///
/// let report = InterrogationReport::new("empty_plan", vec![], 0);
/// assert!(report.all_passed());
/// assert_eq!(report.max_severity(), Severity::None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterrogationReport {
    pub agent_name: String,
    /// Start of the interrogation (RFC 3339)
    pub timestamp: String,
    /// One result per step, in plan order
    pub results: Vec<StepResult>,
    pub duration_ms: u64,
}

impl InterrogationReport {
    pub fn new(agent_name: impl Into<String>, results: Vec<StepResult>, duration_ms: u64) -> Self {
        Self {
            agent_name: agent_name.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            results,
            duration_ms,
        }
    }

    /// True when no step errored and every evaluated step stayed at
    /// [`Severity::None`]. Failing rows below every threshold still pass.
    /// Inactive steps are ignored.
    pub fn all_passed(&self) -> bool {
        self.results
            .iter()
            .filter(|r| r.status != StepStatus::Inactive)
            .all(|r| r.status == StepStatus::Evaluated && r.severity == Severity::None)
    }

    /// True when no step errored and no evaluated row failed anywhere.
    pub fn no_failures(&self) -> bool {
        self.results
            .iter()
            .filter(|r| r.status != StepStatus::Inactive)
            .all(StepResult::passed)
    }

    /// Highest severity over all steps.
    pub fn max_severity(&self) -> Severity {
        self.results
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or_default()
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(StepResult::is_errored)
    }

    pub fn errored(&self) -> Vec<&StepResult> {
        self.results.iter().filter(|r| r.is_errored()).collect()
    }

    /// Results that reached exactly the given severity.
    pub fn with_severity(&self, severity: Severity) -> Vec<&StepResult> {
        self.results
            .iter()
            .filter(|r| r.severity == severity)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&StepResult> {
        self.with_severity(Severity::Warn)
    }

    pub fn notifications(&self) -> Vec<&StepResult> {
        self.with_severity(Severity::Notify)
    }

    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> crate::prelude::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TermError::Internal(format!("failed to serialize report: {e}")))
    }
}
