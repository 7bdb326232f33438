//! Property-based tests for counting and severity assignment.
//!
//! Counts are checked against a direct computation over the generated
//! column, and the in-memory and SQL paths are checked against each other.

use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use proptest::prelude::*;
use std::sync::Arc;
use term_agent::core::{Agent, InterrogationReport, Severity, StepOptions, Thresholds};
use term_agent::expr::{col, lit};
use term_agent::sources::{DataSource, TableRegistry};
use term_agent::test_utils::{remote_source, SessionConnector};

fn registry_for(values: &[Option<i64>]) -> TableRegistry {
    let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, true)]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values.to_vec()))])
        .unwrap();
    let mut registry = TableRegistry::new();
    registry.register_batch("generated", batch).unwrap();
    registry
}

fn steps(agent: Agent, bound: i64, floor: i64) -> Agent {
    agent
        .col_vals_lte("x", bound, StepOptions::new())
        .unwrap()
        .col_vals_lte("x", bound, StepOptions::new().na_pass(true))
        .unwrap()
        .col_vals_lte(
            "x",
            bound,
            StepOptions::new().preconditions(col("x").gt(lit(floor))),
        )
        .unwrap()
}

fn counts(report: &InterrogationReport) -> Vec<(u64, u64, u64)> {
    report
        .results
        .iter()
        .map(|r| (r.n_evaluated, r.n_passed, r.n_failed))
        .collect()
}

fn values_strategy() -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(prop::option::weighted(0.8, -50i64..50), 0..60)
}

fn thresholds_strategy() -> impl Strategy<Value = Thresholds> {
    (
        prop::option::of(0u64..20),
        prop::option::of(0u64..20),
        prop::option::of(0.0f64..=1.0),
        prop::option::of(0.0f64..=1.0),
    )
        .prop_map(|(warn_count, notify_count, warn_fraction, notify_fraction)| Thresholds {
            warn_count,
            notify_count,
            warn_fraction,
            notify_fraction,
        })
}

proptest! {
    /// More failures never lower the severity.
    #[test]
    fn test_severity_monotone_in_failures(
        thresholds in thresholds_strategy(),
        n_evaluated in 0u64..40,
        a in 0u64..40,
        b in 0u64..40,
    ) {
        let (lo, hi) = (a.min(b).min(n_evaluated), a.max(b).min(n_evaluated));
        let low = thresholds.evaluate(n_evaluated, lo);
        let high = thresholds.evaluate(n_evaluated, hi);
        prop_assert!(high.is_at_least(low), "{:?} then {:?}", low, high);
    }

    /// With nothing configured, the first failing row warns and nothing notifies.
    #[test]
    fn test_default_policy(n_evaluated in 1u64..100, n_failed in 0u64..100) {
        let n_failed = n_failed.min(n_evaluated);
        let expected = if n_failed == 0 { Severity::None } else { Severity::Warn };
        prop_assert_eq!(Thresholds::new().evaluate(n_evaluated, n_failed), expected);
    }

    #[test]
    fn test_counts_match_direct_computation(
        values in values_strategy(),
        bound in -60i64..60,
        floor in -60i64..60,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let agent = Agent::builder("generated")
                .registry(registry_for(&values))
                .default_source(DataSource::local("generated"))
                .build()
                .unwrap();
            let report = steps(agent, bound, floor).interrogate().await;
            prop_assert!(!report.has_errors(), "{:?}", report.errored());

            let total = values.len() as u64;
            let failing = |vs: &mut dyn Iterator<Item = &Option<i64>>, na_pass: bool| {
                vs.filter(|v| match v {
                    Some(v) => *v > bound,
                    None => !na_pass,
                })
                .count() as u64
            };
            let above_floor: Vec<Option<i64>> = values
                .iter()
                .filter(|v| matches!(v, Some(v) if *v > floor))
                .copied()
                .collect();

            let expected = [
                (total, failing(&mut values.iter(), false)),
                (total, failing(&mut values.iter(), true)),
                (above_floor.len() as u64, failing(&mut above_floor.iter(), false)),
            ];
            for (result, (n_evaluated, n_failed)) in report.results.iter().zip(expected) {
                prop_assert_eq!(result.n_evaluated, n_evaluated);
                prop_assert_eq!(result.n_failed, n_failed);
                prop_assert_eq!(result.n_passed + result.n_failed, result.n_evaluated);
                match result.f_failed {
                    Some(f) => prop_assert!((0.0..=1.0).contains(&f)),
                    None => prop_assert_eq!(result.n_evaluated, 0),
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_sql_path_matches_in_memory_path(
        values in values_strategy(),
        bound in -60i64..60,
        floor in -60i64..60,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let registry = Arc::new(registry_for(&values));
            let local = Agent::builder("local")
                .registry(registry.clone())
                .default_source(DataSource::local("generated"))
                .build()
                .unwrap();
            let connector = SessionConnector::new(registry);
            let remote = Agent::builder("remote")
                .default_source(remote_source("generated"))
                .connector(connector.clone())
                .build()
                .unwrap();

            let local = steps(local, bound, floor).interrogate().await;
            let remote = steps(remote, bound, floor).interrogate().await;

            prop_assert!(!remote.has_errors(), "{:?}", remote.errored());
            prop_assert_eq!(counts(&local), counts(&remote));
            prop_assert_eq!(connector.open_connections(), 0);
            Ok(())
        })?;
    }
}
