//! Error types for the term-agent interrogation library.
//!
//! All fallible operations return [`TermError`]. The three domain variants
//! mirror the three stages at which a validation step can go wrong:
//!
//! - [`TermError::PlanBuild`] - malformed step parameters, raised while the plan
//!   is being assembled and never deferred to run time.
//! - [`TermError::DataSource`] - a table, file, or connection could not be
//!   resolved for a step.
//! - [`TermError::Predicate`] - the declared check is incompatible with the
//!   columns of the resolved table.
//!
//! During interrogation the last two are recorded on the step's result instead
//! of aborting the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for the term-agent library.
#[derive(Error, Debug)]
pub enum TermError {
    /// A step could not be added to the plan.
    #[error("Plan build error: {message}")]
    PlanBuild {
        /// Human-readable error message
        message: String,
    },

    /// A data source could not be resolved into a table handle.
    #[error("Data source error ({source_type}): {message}")]
    DataSource {
        /// Type of data source (e.g., "local", "file", "PostgreSQL")
        source_type: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A predicate could not be compiled or applied to a resolved table.
    #[error("Predicate error on '{column}': {message}")]
    Predicate {
        /// Column (or expression) the predicate refers to
        column: String,
        /// Detailed error message
        message: String,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Security-related error.
    #[error("Security error: {0}")]
    SecurityError(String),
}

/// A type alias for `Result<T, TermError>`.
pub type Result<T> = std::result::Result<T, TermError>;

/// Coarse classification of an error recorded on a step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The step's table could not be resolved
    DataSource,
    /// The step's predicate did not fit the resolved table
    Predicate,
    /// Anything else (engine failures, internal invariants)
    Internal,
}

impl StepErrorKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepErrorKind::DataSource => "data_source",
            StepErrorKind::Predicate => "predicate",
            StepErrorKind::Internal => "internal",
        }
    }
}

impl TermError {
    /// Creates a new plan build error.
    pub fn plan_build(message: impl Into<String>) -> Self {
        Self::PlanBuild {
            message: message.into(),
        }
    }

    /// Creates a new data source error.
    pub fn data_source(source_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new data source error with a source error.
    pub fn data_source_with_source(
        source_type: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::DataSource {
            source_type: source_type.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a new predicate error.
    pub fn predicate(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Predicate {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Classifies this error for recording on a step result.
    ///
    /// Arrow parse failures only arise while loading typed file columns, so they
    /// count as data source failures.
    pub fn kind(&self) -> StepErrorKind {
        match self {
            TermError::DataSource { .. } | TermError::Io(_) | TermError::Arrow(_) => {
                StepErrorKind::DataSource
            }
            TermError::Predicate { .. } => StepErrorKind::Predicate,
            _ => StepErrorKind::Internal,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<TermError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.with_context(|| msg.to_string())
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                TermError::PlanBuild { message } => TermError::PlanBuild {
                    message: format!("{msg}: {message}"),
                },
                TermError::DataSource {
                    source_type,
                    message,
                    source,
                } => TermError::DataSource {
                    source_type,
                    message: format!("{msg}: {message}"),
                    source,
                },
                TermError::Predicate { column, message } => TermError::Predicate {
                    column,
                    message: format!("{msg}: {message}"),
                },
                TermError::Internal(inner) => TermError::Internal(format!("{msg}: {inner}")),
                other => TermError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_plan_build_error() {
        let err = TermError::plan_build("col_types given without file_path");
        assert_eq!(
            err.to_string(),
            "Plan build error: col_types given without file_path"
        );
    }

    #[test]
    fn test_data_source_error() {
        let err = TermError::data_source("file", "missing.csv does not exist");
        assert_eq!(
            err.to_string(),
            "Data source error (file): missing.csv does not exist"
        );
        assert_eq!(err.kind(), StepErrorKind::DataSource);
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err = TermError::data_source_with_source("file", "Could not open", Box::new(source));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_predicate_error_kind() {
        let err = TermError::predicate("a", "column not found");
        assert_eq!(err.kind(), StepErrorKind::Predicate);
        assert_eq!(err.to_string(), "Predicate error on 'a': column not found");
    }

    #[test]
    fn test_internal_kind() {
        assert_eq!(
            TermError::Internal("boom".to_string()).kind(),
            StepErrorKind::Internal
        );
    }

    #[test]
    fn test_error_context_keeps_domain_variant() {
        fn failing() -> Result<()> {
            Err(TermError::data_source("PostgreSQL", "connection refused"))
        }

        let err = failing().context("While resolving step 3").unwrap_err();
        assert_eq!(err.kind(), StepErrorKind::DataSource);
        assert!(err.to_string().contains("While resolving step 3"));
    }

    #[test]
    fn test_error_context_wraps_foreign_errors() {
        let io: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        ));
        let err = io.context("Reading fixture").unwrap_err();
        assert!(err.to_string().contains("Reading fixture"));
        assert!(err.to_string().contains("disk on fire"));
    }
}
