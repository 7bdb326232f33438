//! Interrogates an in-memory orders table and prints the report.
//!
//! Run with `cargo run --example basic_interrogation`.

use datafusion::arrow::array::{Float64Array, Int64Array, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use std::sync::Arc;
use term_agent::core::{Agent, StepOptions, Thresholds};
use term_agent::expr::{col, lit};
use term_agent::logging::setup::{init_logging, LoggingConfig};
use term_agent::sources::{DataSource, TableRegistry};

fn orders() -> Result<RecordBatch, Box<dyn std::error::Error>> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("order_id", DataType::Int64, false),
        Field::new("quantity", DataType::Int64, true),
        Field::new("unit_price", DataType::Float64, true),
        Field::new("status", DataType::Utf8, true),
    ]));
    Ok(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5, 6])),
            Arc::new(Int64Array::from(vec![Some(2), Some(0), Some(5), None, Some(1), Some(12)])),
            Arc::new(Float64Array::from(vec![
                Some(9.99),
                Some(4.5),
                None,
                Some(120.0),
                Some(15.0),
                Some(2.25),
            ])),
            Arc::new(StringArray::from(vec![
                Some("shipped"),
                Some("pending"),
                Some("shipped"),
                Some("lost"),
                None,
                Some("delivered"),
            ])),
        ],
    )?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::development())?;

    let mut registry = TableRegistry::new();
    registry.register_batch("orders", orders()?)?;

    let agent = Agent::builder("orders_quality")
        .registry(registry)
        .default_source(DataSource::local("orders"))
        .thresholds(Thresholds::new().warn_at_count(1).notify_at_fraction(0.5))
        .build()?
        .col_vals_not_null("order_id", StepOptions::new())?
        .col_vals_between("quantity", 1, 10, StepOptions::new())?
        .col_vals_lte(
            col("quantity") * col("unit_price"),
            100.0,
            StepOptions::new()
                .na_pass(true)
                .brief("Order totals stay under 100"),
        )?
        .col_vals_in_set(
            "status",
            ["pending", "shipped", "delivered"],
            StepOptions::new().preconditions(col("quantity").gt(lit(0))),
        )?;

    let report = agent.interrogate().await;
    for result in &report.results {
        println!(
            "step {:>2} {:<22} {:>2}/{:<2} failed  {:<6} {}",
            result.step_index,
            result.assertion_type.as_str(),
            result.n_failed,
            result.n_evaluated,
            result.severity.as_str(),
            result.brief,
        );
    }
    println!("{}", report.to_json()?);
    Ok(())
}
