//! OpenTelemetry integration following the bring-your-own-tracer pattern.
//!
//! The agent never initializes an OpenTelemetry SDK. Callers configure their
//! own tracer and hand it to [`TermTelemetry::new`]; the interrogation engine
//! then opens one span per interrogation, per step, and per data-source
//! resolution.
//!
//! Everything here is behind the `telemetry` feature. Without it the types
//! still exist, but spans are no-ops, so call sites need no `cfg` guards.
//!
//! ```rust,ignore
//! use term_agent::core::Agent;
//! use term_agent::telemetry::TermTelemetry;
//!
//! let telemetry = TermTelemetry::new(opentelemetry::global::tracer("quality-jobs"))
//!     .with_attribute("deployment.environment", "staging");
//!
//! let agent = Agent::builder("orders").with_telemetry(telemetry).build()?;
//! ```

#[cfg(feature = "telemetry")]
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    trace::{Span, Status, Tracer},
    KeyValue,
};
use std::collections::HashMap;

/// Tracer handle plus attributes stamped on every span.
pub struct TermTelemetry {
    #[cfg(feature = "telemetry")]
    tracer: Option<BoxedTracer>,

    /// Attributes added to every span
    pub custom_attributes: HashMap<String, String>,
}

impl std::fmt::Debug for TermTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermTelemetry")
            .field("enabled", &self.is_enabled())
            .field("custom_attributes", &self.custom_attributes)
            .finish()
    }
}

impl TermTelemetry {
    /// Wraps a user-configured tracer.
    #[cfg(feature = "telemetry")]
    pub fn new(tracer: BoxedTracer) -> Self {
        Self {
            tracer: Some(tracer),
            custom_attributes: HashMap::new(),
        }
    }

    /// Creates a handle whose spans are all no-ops.
    pub fn disabled() -> Self {
        Self {
            #[cfg(feature = "telemetry")]
            tracer: None,
            custom_attributes: HashMap::new(),
        }
    }

    /// Returns true when spans are exported to a tracer.
    pub fn is_enabled(&self) -> bool {
        #[cfg(feature = "telemetry")]
        {
            self.tracer.is_some()
        }
        #[cfg(not(feature = "telemetry"))]
        {
            false
        }
    }

    /// Adds an attribute stamped on every span.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    /// Adds several attributes at once.
    pub fn with_attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in attributes {
            self.custom_attributes.insert(key.into(), value.into());
        }
        self
    }

    #[cfg(feature = "telemetry")]
    fn start_span(&self, name: String, attributes: Vec<KeyValue>) -> TermSpan {
        let Some(tracer) = &self.tracer else {
            return TermSpan::noop();
        };
        let mut span = tracer.start(name);
        for kv in attributes {
            span.set_attribute(kv);
        }
        for (key, value) in &self.custom_attributes {
            span.set_attribute(KeyValue::new(key.clone(), value.clone()));
        }
        TermSpan::new(span)
    }

    /// Opens the span covering a whole interrogation.
    #[cfg(feature = "telemetry")]
    pub fn start_interrogation_span(&self, agent_name: &str, step_count: usize) -> TermSpan {
        self.start_span(
            format!("interrogation.{agent_name}"),
            vec![
                KeyValue::new("agent.name", agent_name.to_string()),
                KeyValue::new("agent.step_count", step_count as i64),
            ],
        )
    }

    #[cfg(not(feature = "telemetry"))]
    pub fn start_interrogation_span(&self, _agent_name: &str, _step_count: usize) -> TermSpan {
        TermSpan::noop()
    }

    /// Opens the span covering one step.
    #[cfg(feature = "telemetry")]
    pub fn start_step_span(&self, step_index: usize, assertion: &str) -> TermSpan {
        self.start_span(
            format!("step.{assertion}"),
            vec![
                KeyValue::new("step.index", step_index as i64),
                KeyValue::new("step.assertion", assertion.to_string()),
            ],
        )
    }

    #[cfg(not(feature = "telemetry"))]
    pub fn start_step_span(&self, _step_index: usize, _assertion: &str) -> TermSpan {
        TermSpan::noop()
    }

    /// Opens the span covering one data-source resolution.
    #[cfg(feature = "telemetry")]
    pub fn start_datasource_span(&self, source_type: &str, label: &str) -> TermSpan {
        self.start_span(
            format!("data_source.{source_type}"),
            vec![
                KeyValue::new("data_source.type", source_type.to_string()),
                KeyValue::new("data_source.label", label.to_string()),
            ],
        )
    }

    #[cfg(not(feature = "telemetry"))]
    pub fn start_datasource_span(&self, _source_type: &str, _label: &str) -> TermSpan {
        TermSpan::noop()
    }
}

/// A span that is ended on drop; a no-op without the `telemetry` feature.
pub struct TermSpan {
    #[cfg(feature = "telemetry")]
    span: Option<BoxedSpan>,
}

impl TermSpan {
    #[cfg(feature = "telemetry")]
    fn new(span: BoxedSpan) -> Self {
        Self { span: Some(span) }
    }

    /// Creates a span that records nothing.
    pub fn noop() -> Self {
        Self {
            #[cfg(feature = "telemetry")]
            span: None,
        }
    }

    /// Sets an integer attribute.
    pub fn set_i64(&mut self, key: &'static str, value: i64) {
        #[cfg(feature = "telemetry")]
        if let Some(span) = self.span.as_mut() {
            span.set_attribute(KeyValue::new(key, value));
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = (key, value);
    }

    /// Sets a string attribute.
    pub fn set_str(&mut self, key: &'static str, value: &str) {
        #[cfg(feature = "telemetry")]
        if let Some(span) = self.span.as_mut() {
            span.set_attribute(KeyValue::new(key, value.to_string()));
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = (key, value);
    }

    /// Records an error and marks the span as failed.
    pub fn record_error(&mut self, error: &dyn std::error::Error) {
        #[cfg(feature = "telemetry")]
        if let Some(span) = self.span.as_mut() {
            span.record_error(error);
            span.set_status(Status::Error {
                description: error.to_string().into(),
            });
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = error;
    }
}

impl Drop for TermSpan {
    fn drop(&mut self) {
        #[cfg(feature = "telemetry")]
        if let Some(span) = self.span.as_mut() {
            span.end();
        }
    }
}

/// Span helpers shared by the interrogation engine.
pub mod utils {
    use super::TermSpan;
    use crate::core::StepResult;

    /// Records a step outcome as span attributes.
    pub fn record_step_result(span: &mut TermSpan, result: &StepResult) {
        span.set_str("step.status", result.status.as_str());
        span.set_i64("result.n_evaluated", result.n_evaluated as i64);
        span.set_i64("result.n_failed", result.n_failed as i64);
        span.set_str("result.severity", result.severity.as_str());
        if let Some(error) = &result.error {
            span.set_str("result.error_kind", error.kind.as_str());
        }
    }
}

/// Builds a `tracing` layer that forwards spans to an SDK tracer.
///
/// Combine it with [`crate::logging::setup`] or any other subscriber stack
/// so that the `tracing` spans emitted by the agent are exported too.
#[cfg(feature = "telemetry")]
pub fn tracing_layer<S>(
    tracer: opentelemetry_sdk::trace::SdkTracer,
) -> tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::SdkTracer>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    tracing_opentelemetry::layer().with_tracer(tracer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_telemetry() {
        let telemetry = TermTelemetry::disabled();
        assert!(!telemetry.is_enabled());
        assert!(telemetry.custom_attributes.is_empty());
    }

    #[test]
    fn test_attributes() {
        let telemetry = TermTelemetry::disabled()
            .with_attribute("service.name", "quality")
            .with_attributes([("env", "test")]);
        assert_eq!(
            telemetry.custom_attributes.get("service.name"),
            Some(&"quality".to_string())
        );
        assert_eq!(telemetry.custom_attributes.len(), 2);
    }

    #[test]
    fn test_noop_span_operations() {
        let telemetry = TermTelemetry::disabled();
        let mut span = telemetry.start_interrogation_span("orders", 3);
        span.set_i64("agent.step_count", 3);
        span.set_str("agent.name", "orders");
        span.record_error(&std::io::Error::new(std::io::ErrorKind::Other, "boom"));

        let _step = telemetry.start_step_span(0, "less-than");
        let _source = telemetry.start_datasource_span("file", "orders.csv");
    }

    #[cfg(feature = "telemetry")]
    #[test]
    fn test_spans_with_global_tracer() {
        let telemetry = TermTelemetry::new(opentelemetry::global::tracer("test"));
        assert!(telemetry.is_enabled());
        let mut span = telemetry.start_step_span(1, "between");
        span.set_i64("result.n_failed", 0);
    }
}
