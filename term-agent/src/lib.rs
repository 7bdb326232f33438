//! # term-agent - declarative data-quality interrogation
//!
//! term-agent lets you declare an ordered plan of data-quality checks and
//! run it once against a table that lives in memory, in a delimited file,
//! or in a PostgreSQL or MySQL database. The same step gives the same
//! counts on every substrate: in-memory and file tables are evaluated by
//! DataFusion, database tables by a single counting query sent to the
//! database.
//!
//! ## Quick Start
//!
//! ```rust
//! use term_agent::prelude::*;
//! use term_agent::core::{Agent, Severity, StepOptions, Thresholds};
//! use term_agent::expr::{col, lit};
//! use term_agent::sources::{DataSource, TableRegistry};
//! # use std::sync::Arc;
//! # use datafusion::arrow::array::Int64Array;
//! # use datafusion::arrow::datatypes::{DataType, Field, Schema};
//! # use datafusion::arrow::record_batch::RecordBatch;
//!
//! # async fn example() -> Result<()> {
//! # let schema = Arc::new(Schema::new(vec![
//! #     Field::new("a", DataType::Int64, true),
//! #     Field::new("b", DataType::Int64, true),
//! # ]));
//! # let batch = RecordBatch::try_new(schema, vec![
//! #     Arc::new(Int64Array::from(vec![5, 4, 3, 5, 1, 2])),
//! #     Arc::new(Int64Array::from(vec![3, 2, 4, 3, 5, 6])),
//! # ]).unwrap();
//! let mut registry = TableRegistry::new();
//! registry.register_batch("small_table", batch)?;
//!
//! let agent = Agent::builder("small_table_checks")
//!     .registry(registry)
//!     .default_source(DataSource::local("small_table"))
//!     .build()?
//!     // every row sum must stay within 10
//!     .col_vals_lte(col("a") + col("b"), 10, StepOptions::new())?
//!     // a <= 3, but only where b is above 2
//!     .col_vals_lte(
//!         "a",
//!         3,
//!         StepOptions::new()
//!             .preconditions(col("b").gt(lit(2)))
//!             .thresholds(Thresholds::new().notify_at_fraction(0.5)),
//!     )?;
//!
//! let report = agent.interrogate().await;
//! for result in &report.results {
//!     println!(
//!         "step {}: {} evaluated, {} failed, severity {}",
//!         result.step_index,
//!         result.n_evaluated,
//!         result.n_failed,
//!         result.severity.as_str()
//!     );
//! }
//! assert_eq!(report.results[0].severity, Severity::None);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **`core`**: the plan (`Agent`), steps, thresholds, and the interrogation
//!   engine
//! - **`sources`**: data-source descriptors and table resolution
//! - **`expr`**: typed column expressions and their SQL rendering
//! - **`predicate`**: compiled checks with three-valued semantics
//! - **`security`**: identifier validation, quoting, and credential handling
//! - **`logging`** / **`telemetry`**: structured logging and optional
//!   OpenTelemetry spans
//!
//! ## Databases
//!
//! Engines are opt-in Cargo features:
//!
//! ```toml
//! term-agent = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! ```rust,ignore
//! use term_agent::sources::{CredentialsRef, DataSource, DbType};
//!
//! let source = DataSource::database(DbType::PostgreSQL, CredentialsRef::Env("WAREHOUSE".into()))
//!     .with_table_name("orders")
//!     .with_initial_query("WHERE created_at >= DATE '2024-01-01'");
//! ```

pub mod core;
pub mod error;
pub mod expr;
pub mod logging;
pub mod predicate;
pub mod prelude;
pub mod security;
pub mod sources;
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
