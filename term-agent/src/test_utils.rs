//! Test fixtures and an in-process SQL backend.
//!
//! [`SessionConnector`] stands in for a database: every connection it opens
//! is a fresh DataFusion session with the registry's tables registered under
//! their names, and it speaks the generic SQL dialect. Steps resolved through
//! it take the remote code path (base query, counting query) without a
//! database server, which is what the cross-backend equivalence tests need.

use crate::error::{Result, TermError};
use crate::expr::SqlDialect;
use crate::sources::{
    Connector, CredentialsRef, DataSource, DbCredentials, DbType, RemoteConnection, RowCounts,
    TableRegistry,
};
use arrow::array::{Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::Datelike;
use datafusion::prelude::SessionContext;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const SOURCE_TYPE: &str = "Generic";

/// The two-column table used throughout the docs:
/// `a = [5, 4, 3, 5, 1, 2]`, `b = [3, 2, 4, 3, 5, 6]`.
pub fn create_small_table() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, true),
        Field::new("b", DataType::Int64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![5, 4, 3, 5, 1, 2])),
            Arc::new(Int64Array::from(vec![3, 2, 4, 3, 5, 6])),
        ],
    )
    .expect("small_table fixture is well-formed")
}

/// A table with NULLs in every column and a mix of types.
///
/// | id | x    | y    | s     | d          |
/// |----|------|------|-------|------------|
/// | 1  | 1    | 0.5  | "a"   | 2024-01-01 |
/// | 2  | NULL | 1.5  | "b"   | 2024-02-01 |
/// | 3  | 3    | NULL | NULL  | 2024-03-01 |
/// | 4  | 4    | 4.0  | "c"   | NULL       |
/// | 5  | NULL | NULL | "a"   | 2024-05-01 |
pub fn create_nullable_table() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("x", DataType::Int64, true),
        Field::new("y", DataType::Float64, true),
        Field::new("s", DataType::Utf8, true),
        Field::new("d", DataType::Date32, true),
    ]));
    // days since 1970-01-01
    let day = |y: i32, m: u32, d: u32| {
        chrono::NaiveDate::from_ymd_opt(y, m, d)
            .map(|date| date.num_days_from_ce() - 719_163)
    };
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
            Arc::new(Int64Array::from(vec![Some(1), None, Some(3), Some(4), None])),
            Arc::new(Float64Array::from(vec![Some(0.5), Some(1.5), None, Some(4.0), None])),
            Arc::new(StringArray::from(vec![Some("a"), Some("b"), None, Some("c"), Some("a")])),
            Arc::new(Date32Array::from(vec![
                day(2024, 1, 1),
                day(2024, 2, 1),
                day(2024, 3, 1),
                None,
                day(2024, 5, 1),
            ])),
        ],
    )
    .expect("nullable_table fixture is well-formed")
}

/// A registry holding `small_table` and `nullable_table`.
pub fn small_table_registry() -> TableRegistry {
    let mut registry = TableRegistry::new();
    registry
        .register_batch("small_table", create_small_table())
        .expect("register small_table");
    registry
        .register_batch("nullable_table", create_nullable_table())
        .expect("register nullable_table");
    registry
}

/// Credentials accepted by [`SessionConnector`]; they are never used.
pub fn dummy_credentials() -> CredentialsRef {
    CredentialsRef::Inline(DbCredentials::new("localhost", "test", "tester", "secret"))
}

/// A database data source for `table` served by a [`SessionConnector`].
pub fn remote_source(table: &str) -> DataSource {
    DataSource::database(DbType::PostgreSQL, dummy_credentials()).with_table_name(table)
}

/// Writes `contents` to `name` inside a fresh temporary directory.
///
/// Keep the returned [`TempDir`] alive for as long as the file is needed.
pub fn write_temp_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write temp file");
    (dir, path)
}

#[derive(Debug, Default)]
struct ConnectionCounters {
    opened: AtomicUsize,
    open: AtomicUsize,
}

/// How a [`SessionConnector`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    None,
    /// `connect` fails
    Connect,
    /// the counting query fails after the connection is open
    Count,
}

/// Opens in-process SQL connections over a [`TableRegistry`].
#[derive(Debug, Clone)]
pub struct SessionConnector {
    registry: Arc<TableRegistry>,
    counters: Arc<ConnectionCounters>,
    failure: FailureMode,
}

impl SessionConnector {
    pub fn new(registry: impl Into<Arc<TableRegistry>>) -> Self {
        Self {
            registry: registry.into(),
            counters: Arc::new(ConnectionCounters::default()),
            failure: FailureMode::None,
        }
    }

    pub fn with_failure(mut self, failure: FailureMode) -> Self {
        self.failure = failure;
        self
    }

    /// Connections opened so far.
    pub fn opened_connections(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for SessionConnector {
    async fn connect(
        &self,
        db_type: DbType,
        _credentials: &DbCredentials,
    ) -> Result<Box<dyn RemoteConnection>> {
        if self.failure == FailureMode::Connect {
            return Err(TermError::data_source(
                db_type.as_str(),
                "connection refused by test connector",
            ));
        }
        let ctx = SessionContext::new();
        for name in self.registry.names() {
            if let Some(table) = self.registry.get(name) {
                ctx.register_table(name, table.provider())?;
            }
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SessionSqlConnection {
            ctx,
            counters: self.counters.clone(),
            fail_counts: self.failure == FailureMode::Count,
        }))
    }
}

/// One in-process SQL connection.
pub struct SessionSqlConnection {
    ctx: SessionContext,
    counters: Arc<ConnectionCounters>,
    fail_counts: bool,
}

fn sql_error(message: &str, e: datafusion::error::DataFusionError) -> TermError {
    TermError::data_source_with_source(SOURCE_TYPE, message, Box::new(e))
}

#[async_trait]
impl RemoteConnection for SessionSqlConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Generic
    }

    async fn column_names(&mut self, query: &str) -> Result<Vec<String>> {
        let frame = self
            .ctx
            .sql(query)
            .await
            .map_err(|e| sql_error("cannot plan base query", e))?;
        Ok(frame
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect())
    }

    async fn fetch_counts(&mut self, sql: &str) -> Result<RowCounts> {
        if self.fail_counts {
            return Err(TermError::data_source(SOURCE_TYPE, "connection lost"));
        }
        let batches = self
            .ctx
            .sql(sql)
            .await
            .map_err(|e| sql_error("cannot plan counting query", e))?
            .collect()
            .await
            .map_err(|e| sql_error("counting query failed", e))?;

        let batch = batches
            .iter()
            .find(|b| b.num_rows() > 0)
            .ok_or_else(|| TermError::data_source(SOURCE_TYPE, "counting query returned no row"))?;
        let count = |i: usize| -> Result<u64> {
            let column = batch
                .column(i)
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| TermError::Internal(format!("count column {i} is not Int64")))?;
            u64::try_from(column.value(0))
                .map_err(|_| TermError::Internal("negative count".to_string()))
        };
        Ok(RowCounts {
            n_evaluated: count(0)?,
            n_failed: count(1)?,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
