//! The validation plan and its builder.

use super::interrogate;
use super::{AgentConfig, InterrogationReport, StepSpec, Thresholds, ValidationStep};
use crate::log_step;
use crate::predicate::Predicate;
use crate::prelude::*;
use crate::sources::{Connector, DataSource, NativeConnector, TableRegistry};
use crate::telemetry::TermTelemetry;
use std::sync::Arc;
use tracing::{debug, instrument};

/// An ordered, append-only validation plan.
///
/// Steps are added by value: [`Agent::add_step`] consumes the agent and
/// returns it with one more step, so a plan is never changed behind the
/// back of code holding an earlier value.
///
/// # Examples
///
/// ```rust
/// use term_agent::core::{Agent, StepOptions, Severity};
/// use term_agent::expr::col;
/// use term_agent::sources::{DataSource, TableRegistry};
/// # use std::sync::Arc;
/// # use datafusion::arrow::array::Int64Array;
/// # use datafusion::arrow::datatypes::{DataType, Field, Schema};
/// # use datafusion::arrow::record_batch::RecordBatch;
///
/// # async fn example() -> term_agent::prelude::Result<()> {
/// # let schema = Arc::new(Schema::new(vec![
/// #     Field::new("a", DataType::Int64, true),
/// #     Field::new("b", DataType::Int64, true),
/// # ]));
/// # let batch = RecordBatch::try_new(schema, vec![
/// #     Arc::new(Int64Array::from(vec![5, 4, 3, 5, 1, 2])),
/// #     Arc::new(Int64Array::from(vec![3, 2, 4, 3, 5, 6])),
/// # ]).unwrap();
/// let mut registry = TableRegistry::new();
/// registry.register_batch("small_table", batch)?;
///
/// let agent = Agent::builder("small_table_checks")
///     .registry(registry)
///     .default_source(DataSource::local("small_table"))
///     .build()?
///     .col_vals_lte(col("a") + col("b"), 10, StepOptions::new())?
///     .col_vals_lte("a", 3, StepOptions::new())?;
///
/// let report = agent.interrogate().await;
/// assert_eq!(report.results[0].n_failed, 0);
/// assert_eq!(report.results[1].n_failed, 3);
/// assert_eq!(report.results[1].severity, Severity::Warn);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Agent {
    name: String,
    steps: Vec<Arc<ValidationStep>>,
    default_source: DataSource,
    registry: Arc<TableRegistry>,
    thresholds: Option<Thresholds>,
    config: AgentConfig,
    connector: Arc<dyn Connector>,
    telemetry: Option<Arc<TermTelemetry>>,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<ValidationStep>] {
        &self.steps
    }

    /// The data source used by steps added from now on.
    pub fn default_source(&self) -> &DataSource {
        &self.default_source
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// Agent-wide default thresholds.
    pub fn thresholds(&self) -> Option<&Thresholds> {
        self.thresholds.as_ref()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub(crate) fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn telemetry(&self) -> Option<&Arc<TermTelemetry>> {
        self.telemetry.as_ref()
    }

    /// Appends one step.
    ///
    /// The step's data source (or the current default) is captured, an
    /// "everything" column spec is expanded against it, and the predicate is
    /// compiled. Thresholds left unset fall back to the agent defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TermError::PlanBuild`] for inconsistent data-source fields,
    /// a missing data source, empty column or value sets, a value whose
    /// shape does not fit the assertion type, or invalid thresholds.
    #[instrument(skip_all, fields(agent.name = %self.name, step.assertion = %spec.assertion_type))]
    pub fn add_step(mut self, spec: StepSpec) -> Result<Self> {
        let StepSpec {
            assertion_type,
            column,
            value,
            preconditions,
            brief,
            thresholds,
            data_source,
            na_pass,
            active,
        } = spec;

        if let Some(t) = &thresholds {
            t.validate()?;
        }

        let source = data_source.unwrap_or_else(|| self.default_source.clone());
        if source.is_empty() {
            return Err(TermError::plan_build(
                "step has no data source and the agent has no default data source",
            ));
        }
        source.validate()?;

        let targets = column.targets(|| source.column_names(&self.registry))?;
        let predicate = Predicate::compile(
            &targets,
            assertion_type,
            &value,
            preconditions.as_ref(),
            na_pass,
        )?;

        let step = ValidationStep::new(
            self.steps.len() + 1,
            assertion_type,
            targets,
            value,
            brief,
            thresholds.or(self.thresholds),
            source,
            active,
            predicate,
        );

        log_step!(
            self.config.log,
            step.index = step.index(),
            step.assertion = %assertion_type,
            step.columns = ?step.column_labels(),
            data_source.type = step.data_source().source_type(),
            "Added validation step"
        );

        self.steps.push(Arc::new(step));
        Ok(self)
    }

    /// Changes the default data source for steps added afterwards. Steps
    /// already in the plan keep theirs.
    pub fn set_default_source(mut self, source: DataSource) -> Result<Self> {
        if !source.is_empty() {
            source.validate()?;
        }
        debug!(
            agent.name = %self.name,
            data_source.type = source.source_type(),
            data_source.label = %source.label(),
            "Default data source changed"
        );
        self.default_source = source;
        Ok(self)
    }

    /// Runs every step and collects the results in plan order.
    ///
    /// Steps that cannot be resolved or checked produce errored results; they
    /// never abort the run.
    pub async fn interrogate(&self) -> InterrogationReport {
        interrogate::run(self).await
    }
}

/// Builder for [`Agent`].
#[derive(Debug)]
pub struct AgentBuilder {
    name: String,
    default_source: DataSource,
    registry: Arc<TableRegistry>,
    thresholds: Option<Thresholds>,
    config: AgentConfig,
    connector: Arc<dyn Connector>,
    telemetry: Option<Arc<TermTelemetry>>,
}

impl AgentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_source: DataSource::default(),
            registry: Arc::new(TableRegistry::new()),
            thresholds: None,
            config: AgentConfig::default(),
            connector: Arc::new(NativeConnector),
            telemetry: None,
        }
    }

    /// Sets the in-memory tables local data sources can name.
    pub fn registry(mut self, registry: impl Into<Arc<TableRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    pub fn default_source(mut self, source: DataSource) -> Self {
        self.default_source = source;
        self
    }

    /// Sets thresholds applied to steps that declare none.
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the way database connections are opened.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TermTelemetry) -> Self {
        self.telemetry = Some(Arc::new(telemetry));
        self
    }

    /// Validates the configuration and builds an empty plan.
    pub fn build(self) -> Result<Agent> {
        self.config.validate()?;
        if let Some(t) = &self.thresholds {
            t.validate()?;
        }
        if !self.default_source.is_empty() {
            self.default_source.validate()?;
        }
        Ok(Agent {
            name: self.name,
            steps: Vec::new(),
            default_source: self.default_source,
            registry: self.registry,
            thresholds: self.thresholds,
            config: self.config,
            connector: self.connector,
            telemetry: self.telemetry,
        })
    }
}
