//! Prelude for commonly used types and traits in term-agent.

pub use crate::core::{
    Agent, AssertionType, InterrogationReport, Severity, StepOptions, StepResult, StepSpec,
    StepStatus, StepValue, Thresholds,
};
pub use crate::error::{ErrorContext, Result, TermError};
pub use crate::logging::LogConfig;
pub use crate::telemetry::{TermSpan, TermTelemetry};
