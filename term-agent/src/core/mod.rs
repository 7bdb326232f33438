//! Validation plans and their interrogation.
//!
//! ## Overview
//!
//! - **[`Agent`]**: an ordered, append-only plan of validation steps plus a
//!   default data source
//! - **[`StepSpec`]** / **[`ValidationStep`]**: the shared step-creation
//!   contract and its compiled form
//! - **[`Thresholds`]** / **[`Severity`]**: the escalation policy applied to
//!   each step's failure counts
//! - **[`InterrogationReport`]**: ordered [`StepResult`]s of one run
//!
//! ## Flow
//!
//! ```text
//! Agent::add_step  ──►  ValidationStep (source captured, predicate compiled)
//!
//! Agent::interrogate
//!     └── per step, in order
//!         ├── sources::resolve       → ResolvedTable
//!         ├── check + precondition   → evaluated rows
//!         ├── count                  → n_evaluated, n_failed
//!         ├── Thresholds::evaluate   → Severity
//!         └── ResolvedTable::release
//! ```
//!
//! ## Example
//!
//! ```rust
//! use term_agent::core::{Agent, Severity, StepOptions, Thresholds};
//! use term_agent::sources::{DataSource, TableRegistry};
//! # use std::sync::Arc;
//! # use datafusion::arrow::array::Int64Array;
//! # use datafusion::arrow::datatypes::{DataType, Field, Schema};
//! # use datafusion::arrow::record_batch::RecordBatch;
//!
//! # async fn example() -> term_agent::prelude::Result<()> {
//! # let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)]));
//! # let batch = RecordBatch::try_new(schema, vec![
//! #     Arc::new(Int64Array::from(vec![5, 4, 3, 5, 1, 2])),
//! # ]).unwrap();
//! let mut registry = TableRegistry::new();
//! registry.register_batch("small_table", batch)?;
//!
//! let report = Agent::builder("checks")
//!     .registry(registry)
//!     .default_source(DataSource::local("small_table"))
//!     .build()?
//!     .col_vals_lt("a", 5, StepOptions::new().thresholds(Thresholds::new().notify_at_count(2)))?
//!     .interrogate()
//!     .await;
//!
//! assert_eq!(report.max_severity(), Severity::Notify);
//! # Ok(())
//! # }
//! ```

mod agent;
mod context;
mod interrogate;
mod result;
mod severity;
mod step;
mod thresholds;

pub mod builder_extensions;

pub use agent::{Agent, AgentBuilder};
pub use builder_extensions::StepOptions;
pub use context::AgentConfig;
pub use result::{InterrogationReport, StepError, StepResult, StepStatus};
pub use severity::Severity;
pub use step::{AssertionType, ColumnSpec, StepSpec, StepValue, ValidationStep};
pub use thresholds::{evaluate, Thresholds};
