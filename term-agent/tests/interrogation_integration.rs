//! End-to-end interrogation tests over in-memory tables and the in-process
//! SQL backend.

use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use term_agent::core::{
    Agent, AgentConfig, AssertionType, ColumnSpec, InterrogationReport, Severity, StepOptions,
    StepSpec, StepStatus, StepValue, Thresholds,
};
use term_agent::error::StepErrorKind;
use term_agent::expr::{col, lit, ColumnExpr, SqlDialect};
use term_agent::predicate::Predicate;
use term_agent::sources::{DataSource, TableRegistry};
use term_agent::test_utils::{remote_source, small_table_registry, FailureMode, SessionConnector};

fn local_agent(table: &str) -> Agent {
    Agent::builder(format!("{table}_local"))
        .registry(small_table_registry())
        .default_source(DataSource::local(table))
        .build()
        .unwrap()
}

fn remote_agent(table: &str, connector: SessionConnector) -> Agent {
    Agent::builder(format!("{table}_remote"))
        .registry(small_table_registry())
        .default_source(remote_source(table))
        .connector(connector)
        .build()
        .unwrap()
}

fn counts(report: &InterrogationReport) -> Vec<(StepStatus, u64, u64, Severity)> {
    report
        .results
        .iter()
        .map(|r| (r.status, r.n_evaluated, r.n_failed, r.severity))
        .collect()
}

/// Adds the same steps to any agent.
fn nullable_table_steps(agent: Agent) -> Agent {
    agent
        .col_vals_gt("x", 2, StepOptions::new())
        .unwrap()
        .col_vals_gt("x", 2, StepOptions::new().na_pass(true))
        .unwrap()
        .col_vals_in_set("s", ["a", "c"], StepOptions::new())
        .unwrap()
        .col_vals_in_set("s", ["a", "c"], StepOptions::new().na_pass(true))
        .unwrap()
        .col_vals_gte(
            "d",
            lit(chrono::NaiveDate::from_ymd_opt(2024, 2, 15).unwrap()),
            StepOptions::new(),
        )
        .unwrap()
        .col_vals_lte(col("x") + col("y"), 5, StepOptions::new())
        .unwrap()
        .col_vals_not_null("y", StepOptions::new())
        .unwrap()
        .col_vals_gt(col("y") / col("x"), lit(0.4), StepOptions::new())
        .unwrap()
        .col_vals_between("id", 2, 4, StepOptions::new())
        .unwrap()
        .col_vals_not_equal("s", lit("b"), StepOptions::new().na_pass(true))
        .unwrap()
}

#[tokio::test]
async fn test_documented_scenarios() {
    let report = local_agent("small_table")
        .col_vals_lte(col("a") + col("b"), 10, StepOptions::new())
        .unwrap()
        .col_vals_lte("a", 3, StepOptions::new())
        .unwrap()
        .interrogate()
        .await;

    assert_eq!(
        counts(&report),
        vec![
            (StepStatus::Evaluated, 6, 0, Severity::None),
            (StepStatus::Evaluated, 6, 3, Severity::Warn),
        ]
    );
    assert_eq!(report.max_severity(), Severity::Warn);
    assert!(!report.all_passed());
}

#[tokio::test]
async fn test_sum_helper_matches_explicit_expression() {
    let sum = ColumnExpr::sum(["a", "b"]).unwrap();
    let report = local_agent("small_table")
        .col_vals_lte(sum, 7, StepOptions::new())
        .unwrap()
        .interrogate()
        .await;
    // sums are 8, 6, 7, 8, 6, 8
    assert_eq!(report.results[0].n_failed, 3);
}

#[tokio::test]
async fn test_nullable_table_counts() {
    let report = nullable_table_steps(local_agent("nullable_table"))
        .interrogate()
        .await;
    let failed: Vec<u64> = report.results.iter().map(|r| r.n_failed).collect();
    assert_eq!(failed, vec![3, 1, 2, 1, 3, 4, 2, 3, 2, 1]);
    assert!(report.results.iter().all(|r| r.n_evaluated == 5));
}

#[tokio::test]
async fn test_cross_backend_equivalence() {
    for table in ["small_table", "nullable_table"] {
        let build = |agent: Agent| {
            if table == "small_table" {
                agent
                    .col_vals_lte(col("a") + col("b"), 10, StepOptions::new())
                    .unwrap()
                    .col_vals_lte("a", 3, StepOptions::new())
                    .unwrap()
                    .col_vals_lt(vec!["a", "b"], 5, StepOptions::new())
                    .unwrap()
                    .col_vals_lte(
                        "a",
                        3,
                        StepOptions::new().preconditions(col("b").gt(lit(3))),
                    )
                    .unwrap()
                    .col_vals_not_between(col("a") * lit(2) - col("b"), 0, 4, StepOptions::new())
                    .unwrap()
                    .col_vals_equal("a", col("b"), StepOptions::new())
                    .unwrap()
            } else {
                nullable_table_steps(agent)
            }
        };

        let connector = SessionConnector::new(small_table_registry());
        let local = build(local_agent(table)).interrogate().await;
        let remote = build(remote_agent(table, connector.clone()))
            .interrogate()
            .await;

        assert!(!remote.has_errors(), "{table}: {:?}", remote.errored());
        assert_eq!(counts(&local), counts(&remote), "{table}");
        assert_eq!(connector.open_connections(), 0);
        assert_eq!(connector.opened_connections(), remote.results.len());
    }
}

/// `a = [i64::MAX, 1, 0]`, `b = [1, 0, 0]`: one overflowing sum and two
/// zero divisors.
fn edge_registry() -> TableRegistry {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, true),
        Field::new("b", DataType::Int64, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![i64::MAX, 1, 0])),
            Arc::new(Int64Array::from(vec![1, 0, 0])),
        ],
    )
    .unwrap();
    let mut registry = TableRegistry::new();
    registry.register_batch("edges", batch).unwrap();
    registry
}

fn edge_steps(agent: Agent) -> Agent {
    agent
        .col_vals_lte(col("a") + col("b"), 10, StepOptions::new())
        .unwrap()
        .col_vals_lte(col("a") / col("b"), 10, StepOptions::new().na_pass(true))
        .unwrap()
        .col_vals_lte(col("a") / col("b"), 10, StepOptions::new())
        .unwrap()
        .col_vals_gte(col("a") * col("b"), 0, StepOptions::new())
        .unwrap()
}

#[tokio::test]
async fn test_overflow_and_zero_divisors_agree_across_backends() {
    let local = edge_steps(
        Agent::builder("edges_local")
            .registry(edge_registry())
            .default_source(DataSource::local("edges"))
            .build()
            .unwrap(),
    )
    .interrogate()
    .await;

    let connector = SessionConnector::new(edge_registry());
    let remote = edge_steps(
        Agent::builder("edges_remote")
            .default_source(remote_source("edges"))
            .connector(connector.clone())
            .build()
            .unwrap(),
    )
    .interrogate()
    .await;

    assert!(!local.has_errors(), "{:?}", local.errored());
    // the i64::MAX sum does not wrap into a pass; x / 0 is NULL, so na_pass decides
    let expected: Vec<(u64, u64)> = vec![(3, 1), (3, 1), (3, 3), (3, 0)];
    let pairs = |r: &InterrogationReport| -> Vec<(u64, u64)> {
        r.results.iter().map(|s| (s.n_evaluated, s.n_failed)).collect()
    };
    assert_eq!(pairs(&local), expected);
    assert_eq!(counts(&local), counts(&remote));
    assert_eq!(connector.open_connections(), 0);

    let division = Predicate::compile(
        &[col("a") / col("b")],
        AssertionType::LessThanOrEqual,
        &StepValue::scalar(lit(10)),
        None,
        true,
    )
    .unwrap();
    for dialect in [SqlDialect::PostgreSQL, SqlDialect::MySQL] {
        let sql = division.failure_sql(dialect).unwrap();
        assert!(sql.contains("NULLIF("), "{dialect:?}: {sql}");
    }

    let sum = Predicate::compile(
        &[col("a") + col("b")],
        AssertionType::LessThanOrEqual,
        &StepValue::scalar(lit(10)),
        None,
        false,
    )
    .unwrap();
    assert!(sum
        .failure_sql(SqlDialect::PostgreSQL)
        .unwrap()
        .contains("CAST(\"a\" AS DOUBLE PRECISION) + CAST(\"b\" AS DOUBLE PRECISION)"));
}

#[tokio::test]
async fn test_precondition_exclusion() {
    for remote in [false, true] {
        let agent = if remote {
            remote_agent("small_table", SessionConnector::new(small_table_registry()))
        } else {
            local_agent("small_table")
        };
        let report = agent
            .col_vals_lte(
                "a",
                3,
                StepOptions::new().preconditions(col("b").gt(lit(3))),
            )
            .unwrap()
            .col_vals_lte(
                "a",
                0,
                StepOptions::new()
                    .preconditions(col("b").gt(lit(100)))
                    .thresholds(Thresholds::new().warn_at_fraction(0.1)),
            )
            .unwrap()
            .interrogate()
            .await;

        // b > 3 keeps rows with a = 3, 1, 2
        assert_eq!(
            counts(&report),
            vec![
                (StepStatus::Evaluated, 3, 0, Severity::None),
                (StepStatus::Evaluated, 0, 0, Severity::None),
            ],
            "remote = {remote}"
        );
    }
}

#[tokio::test]
async fn test_notify_fraction() {
    let report = local_agent("small_table")
        .col_vals_lt(
            "a",
            3,
            StepOptions::new().thresholds(Thresholds::new().notify_at_fraction(0.5)),
        )
        .unwrap()
        .interrogate()
        .await;
    let r = &report.results[0];
    assert_eq!((r.n_evaluated, r.n_failed, r.severity), (6, 4, Severity::Notify));
    assert!((r.f_failed.unwrap() - 4.0 / 6.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_partial_failure_isolation() {
    let connector = SessionConnector::new(small_table_registry());
    let agent = Agent::builder("mixed")
        .registry(small_table_registry())
        .default_source(DataSource::local("small_table"))
        .connector(connector.clone())
        .build()
        .unwrap();

    let report = agent
        .col_vals_lte("a", 3, StepOptions::new())
        .unwrap()
        .col_vals_lte(
            "a",
            3,
            StepOptions::new().data_source(DataSource::local("missing_table")),
        )
        .unwrap()
        .col_vals_lte(
            "a",
            3,
            StepOptions::new().data_source(remote_source("no_such_table")),
        )
        .unwrap()
        .col_vals_lte("no_such_column", 3, StepOptions::new())
        .unwrap()
        .col_vals_gt("b", 2, StepOptions::new())
        .unwrap()
        .interrogate()
        .await;

    let baseline = local_agent("small_table")
        .col_vals_lte("a", 3, StepOptions::new())
        .unwrap()
        .col_vals_gt("b", 2, StepOptions::new())
        .unwrap()
        .interrogate()
        .await;

    assert_eq!(report.results[0].n_failed, baseline.results[0].n_failed);
    assert_eq!(report.results[0].severity, baseline.results[0].severity);
    assert_eq!(report.results[4].n_failed, baseline.results[1].n_failed);
    assert_eq!(report.results[4].severity, baseline.results[1].severity);

    let kinds: Vec<Option<StepErrorKind>> = report
        .results
        .iter()
        .map(|r| r.error.as_ref().map(|e| e.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            None,
            Some(StepErrorKind::DataSource),
            Some(StepErrorKind::DataSource),
            Some(StepErrorKind::Predicate),
            None
        ]
    );
    for errored in report.errored() {
        assert_eq!(errored.n_evaluated, 0);
        assert_eq!(errored.n_failed, 0);
        assert_eq!(errored.severity, Severity::None);
        assert!(!errored.passed());
    }
    // the remote step's connection was closed after its column lookup failed
    assert_eq!(connector.opened_connections(), 1);
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_connection_released_when_counting_fails() {
    let connector = SessionConnector::new(small_table_registry()).with_failure(FailureMode::Count);
    let report = remote_agent("small_table", connector.clone())
        .col_vals_lte("a", 3, StepOptions::new())
        .unwrap()
        .col_vals_gt("b", 0, StepOptions::new())
        .unwrap()
        .interrogate()
        .await;

    assert!(report
        .results
        .iter()
        .all(|r| r.status == StepStatus::Errored));
    assert_eq!(connector.opened_connections(), 2);
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_connect_failure_is_a_data_source_error() {
    let connector =
        SessionConnector::new(small_table_registry()).with_failure(FailureMode::Connect);
    let report = remote_agent("small_table", connector.clone())
        .col_vals_lte("a", 3, StepOptions::new())
        .unwrap()
        .interrogate()
        .await;
    let error = report.results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, StepErrorKind::DataSource);
    assert!(error.message.contains("connection refused"));
    assert_eq!(connector.opened_connections(), 0);
}

#[tokio::test]
async fn test_initial_query_forms() {
    let connector = SessionConnector::new(small_table_registry());
    let agent = remote_agent("small_table", connector.clone());
    let condition = remote_source("small_table").with_initial_query("a > 2");
    let where_clause = remote_source("small_table").with_initial_query("WHERE a > 2");
    let full = DataSource::database(
        term_agent::sources::DbType::PostgreSQL,
        term_agent::test_utils::dummy_credentials(),
    )
    .with_initial_query("SELECT a, b FROM small_table WHERE a > 2");

    let report = agent
        .col_vals_lte("a", 4, StepOptions::new().data_source(condition))
        .unwrap()
        .col_vals_lte("a", 4, StepOptions::new().data_source(where_clause))
        .unwrap()
        .col_vals_lte("a", 4, StepOptions::new().data_source(full))
        .unwrap()
        .interrogate()
        .await;

    // a > 2 keeps 5, 4, 3, 5; of those 5 and 5 exceed 4
    for r in &report.results {
        assert_eq!((r.status, r.n_evaluated, r.n_failed), (StepStatus::Evaluated, 4, 2));
    }
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_unsafe_initial_query_is_rejected_at_build_time() {
    let source = remote_source("small_table").with_initial_query("1=1; DROP TABLE small_table");
    let err = local_agent("small_table")
        .col_vals_lte("a", 3, StepOptions::new().data_source(source))
        .unwrap_err();
    assert!(matches!(err, term_agent::error::TermError::PlanBuild { .. }));
}

#[tokio::test]
async fn test_order_preserved_with_concurrency() {
    let connector = SessionConnector::new(small_table_registry());
    let mut agent = Agent::builder("concurrent")
        .registry(small_table_registry())
        .default_source(DataSource::local("small_table"))
        .connector(connector.clone())
        .config(AgentConfig {
            max_concurrency: 4,
            ..Default::default()
        })
        .build()
        .unwrap();

    let mut expected = Vec::new();
    for limit in 0..12i64 {
        let source = if limit % 3 == 0 {
            remote_source("small_table")
        } else {
            DataSource::local("small_table")
        };
        agent = agent
            .col_vals_lte("a", limit, StepOptions::new().data_source(source))
            .unwrap();
        let failing = [5i64, 4, 3, 5, 1, 2].iter().filter(|&&a| a > limit).count();
        expected.push(failing as u64);
    }

    let report = agent.interrogate().await;
    let indexes: Vec<usize> = report.results.iter().map(|r| r.step_index).collect();
    assert_eq!(indexes, (1..=12).collect::<Vec<_>>());
    let failed: Vec<u64> = report.results.iter().map(|r| r.n_failed).collect();
    assert_eq!(failed, expected);
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_everything_sentinel_checks_each_column() {
    let report = local_agent("small_table")
        .add_step(StepSpec::new(
            AssertionType::GreaterThan,
            ColumnSpec::Everything,
            StepValue::scalar(lit(1)),
        ))
        .unwrap()
        .interrogate()
        .await;
    // a = 1 fails; b never does
    let r = &report.results[0];
    assert_eq!(r.columns, vec!["a", "b"]);
    assert_eq!((r.n_evaluated, r.n_failed), (6, 1));
}

#[tokio::test]
async fn test_type_mismatch_is_a_predicate_error() {
    let report = local_agent("nullable_table")
        .col_vals_gt("s", 3, StepOptions::new())
        .unwrap()
        .col_vals_lte(col("s") + col("x"), 3, StepOptions::new())
        .unwrap()
        .interrogate()
        .await;
    for r in &report.results {
        assert_eq!(
            r.error.as_ref().map(|e| e.kind),
            Some(StepErrorKind::Predicate),
            "{r:?}"
        );
    }
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let report = local_agent("small_table")
        .col_vals_lte("a", 3, StepOptions::new().brief("a stays small"))
        .unwrap()
        .interrogate()
        .await;
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["agent_name"], "small_table_local");
    assert_eq!(json["results"][0]["assertion_type"], "less-than-or-equal");
    assert_eq!(json["results"][0]["status"], "evaluated");
    assert_eq!(json["results"][0]["severity"], "warn");
    assert_eq!(json["results"][0]["brief"], "a stays small");
    assert!(json["results"][0].get("error").is_none());
}
