//! Step outcome severity levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The escalation level assigned to a step's outcome by threshold comparison.
///
/// Severities are ordered: `Notify > Warn > None`. An interrogation can be
/// summarized by taking the maximum severity over all of its steps.
///
/// # Examples
///
/// ```rust
/// use term_agent::core::Severity;
///
/// assert!(Severity::Notify > Severity::Warn);
/// assert!(Severity::Warn > Severity::None);
/// assert_eq!(Severity::default(), Severity::None);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No threshold was reached
    #[default]
    None = 0,
    /// A warning threshold was reached
    Warn = 1,
    /// A notification threshold was reached
    Notify = 2,
}

impl Severity {
    /// Returns the string representation of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Warn => "warn",
            Severity::Notify => "notify",
        }
    }

    /// Checks if this severity is at least as high as another one.
    ///
    /// ```rust
    /// use term_agent::core::Severity;
    ///
    /// assert!(Severity::Notify.is_at_least(Severity::Warn));
    /// assert!(!Severity::None.is_at_least(Severity::Warn));
    /// ```
    pub fn is_at_least(&self, other: Severity) -> bool {
        *self >= other
    }

    /// Returns true when some threshold was reached.
    pub fn is_triggered(&self) -> bool {
        *self != Severity::None
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Notify > Severity::Warn);
        assert!(Severity::Warn > Severity::None);
        assert_eq!(
            [Severity::Warn, Severity::Notify, Severity::None]
                .into_iter()
                .max(),
            Some(Severity::Notify)
        );
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::None.to_string(), "none");
        assert_eq!(Severity::Warn.to_string(), "warn");
        assert_eq!(Severity::Notify.to_string(), "notify");
    }

    #[test]
    fn test_severity_is_triggered() {
        assert!(!Severity::None.is_triggered());
        assert!(Severity::Warn.is_triggered());
        assert!(Severity::Notify.is_triggered());
    }

    #[test]
    fn test_severity_serde() {
        let json = serde_json::to_string(&Severity::Notify).unwrap();
        assert_eq!(json, "\"notify\"");

        let severity: Severity = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(severity, Severity::Warn);
    }
}
