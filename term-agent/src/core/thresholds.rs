//! Threshold configuration and the severity policy applied to step outcomes.

use super::Severity;
use crate::prelude::*;
use serde::{Deserialize, Serialize};

/// Failure thresholds for a validation step.
///
/// Every field is optional. An unset field disables that escalation path
/// entirely; it is never treated as zero. When no field is set at all the
/// default policy applies: warn as soon as one row fails.
///
/// # Examples
///
/// ```rust
/// use term_agent::core::{Severity, Thresholds};
///
/// let thresholds = Thresholds::new()
///     .warn_at_count(1)
///     .notify_at_fraction(0.5);
///
/// assert_eq!(thresholds.evaluate(6, 0), Severity::None);
/// assert_eq!(thresholds.evaluate(6, 1), Severity::Warn);
/// assert_eq!(thresholds.evaluate(6, 4), Severity::Notify);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Thresholds {
    /// Warn when at least this many rows fail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn_count: Option<u64>,
    /// Notify when at least this many rows fail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_count: Option<u64>,
    /// Warn when at least this fraction of evaluated rows fail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warn_fraction: Option<f64>,
    /// Notify when at least this fraction of evaluated rows fail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_fraction: Option<f64>,
}

impl Thresholds {
    /// Warning count used when nothing else is configured.
    pub const DEFAULT_WARN_COUNT: u64 = 1;

    /// Creates a threshold set with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates thresholds from mixed levels.
    ///
    /// A level of 1 or more is a row count (truncated), a level in `[0, 1)`
    /// is a fraction of evaluated rows. `None` leaves that path unset.
    ///
    /// ```rust
    /// use term_agent::core::Thresholds;
    ///
    /// let t = Thresholds::from_levels(Some(0.1), Some(25.0)).unwrap();
    /// assert_eq!(t.warn_fraction, Some(0.1));
    /// assert_eq!(t.notify_count, Some(25));
    /// ```
    pub fn from_levels(warn_at: Option<f64>, notify_at: Option<f64>) -> Result<Self> {
        fn split(level: Option<f64>, name: &str) -> Result<(Option<u64>, Option<f64>)> {
            match level {
                None => Ok((None, None)),
                Some(v) if !v.is_finite() || v < 0.0 => Err(TermError::plan_build(format!(
                    "{name} threshold must be a non-negative finite number, got {v}"
                ))),
                Some(v) if v >= 1.0 => Ok((Some(v.trunc() as u64), None)),
                Some(v) => Ok((None, Some(v))),
            }
        }

        let (warn_count, warn_fraction) = split(warn_at, "warn")?;
        let (notify_count, notify_fraction) = split(notify_at, "notify")?;
        Ok(Self {
            warn_count,
            notify_count,
            warn_fraction,
            notify_fraction,
        })
    }

    /// Sets the warning row count.
    pub fn warn_at_count(mut self, count: u64) -> Self {
        self.warn_count = Some(count);
        self
    }

    /// Sets the notification row count.
    pub fn notify_at_count(mut self, count: u64) -> Self {
        self.notify_count = Some(count);
        self
    }

    /// Sets the warning failure fraction.
    pub fn warn_at_fraction(mut self, fraction: f64) -> Self {
        self.warn_fraction = Some(fraction);
        self
    }

    /// Sets the notification failure fraction.
    pub fn notify_at_fraction(mut self, fraction: f64) -> Self {
        self.notify_fraction = Some(fraction);
        self
    }

    /// Returns true when no threshold field is set.
    pub fn is_unset(&self) -> bool {
        self.warn_count.is_none()
            && self.notify_count.is_none()
            && self.warn_fraction.is_none()
            && self.notify_fraction.is_none()
    }

    /// Checks that configured fractions lie in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        for (name, fraction) in [
            ("warn_fraction", self.warn_fraction),
            ("notify_fraction", self.notify_fraction),
        ] {
            if let Some(f) = fraction {
                if !(0.0..=1.0).contains(&f) {
                    return Err(TermError::plan_build(format!(
                        "{name} must lie in [0, 1], got {f}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns the thresholds actually applied at evaluation time.
    ///
    /// This is `self` unless nothing is set, in which case it is the default
    /// policy (`warn_count = 1`).
    pub fn effective(&self) -> Self {
        if self.is_unset() {
            Self::new().warn_at_count(Self::DEFAULT_WARN_COUNT)
        } else {
            *self
        }
    }

    /// Assigns a severity to a step outcome.
    ///
    /// Count thresholds trigger when `n_failed >= count`. Fraction thresholds
    /// trigger when at least one row was evaluated and
    /// `n_failed / n_evaluated >= fraction`; with nothing evaluated they never
    /// trigger. The highest triggered level wins.
    pub fn evaluate(&self, n_evaluated: u64, n_failed: u64) -> Severity {
        let t = self.effective();
        let fraction = (n_evaluated > 0).then(|| n_failed as f64 / n_evaluated as f64);

        let reached = |count: Option<u64>, frac: Option<f64>| {
            let by_count = count.is_some_and(|c| n_failed >= c);
            let by_fraction = matches!((frac, fraction), (Some(limit), Some(f)) if f >= limit);
            by_count || by_fraction
        };

        if reached(t.notify_count, t.notify_fraction) {
            Severity::Notify
        } else if reached(t.warn_count, t.warn_fraction) {
            Severity::Warn
        } else {
            Severity::None
        }
    }
}

/// Free-function form of [`Thresholds::evaluate`].
pub fn evaluate(n_evaluated: u64, n_failed: u64, thresholds: &Thresholds) -> Severity {
    thresholds.evaluate(n_evaluated, n_failed)
}
