//! Table resolution.
//!
//! A [`DataSource`] describes where a step's rows live: a named in-memory
//! table, a delimited file, or a remote database. [`resolve`] turns it into a
//! [`ResolvedTable`], a uniform handle that can check a predicate against
//! the table's columns, apply one precondition filter, and count evaluated
//! and failing rows.
//!
//! In-memory and file tables are evaluated by DataFusion. Remote tables are
//! evaluated by the database itself through a single counting query.

use crate::core::AgentConfig;
use crate::expr::SqlDialect;
use crate::predicate::Predicate;
use crate::prelude::*;
use crate::security::SqlSecurity;
use crate::{log_data_op, log_sql};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::{DataFrame, SessionContext};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

mod database;
mod file;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

pub use database::{
    base_query, is_full_query, Connector, CredentialsRef, DbCredentials, DbType, NativeConnector,
    RemoteConnection, RowCounts,
};
pub use file::{parse_col_types, read_column_names, ColumnType, FileOptions};

#[cfg(feature = "mysql")]
pub use mysql::MySqlConnection;
#[cfg(feature = "postgres")]
pub use postgres::PgConnection;

/// Describes where a step's rows come from.
///
/// All fields are optional; which ones are set decides the kind of source:
/// `file_path` selects a file, `db_type` + `creds_ref` a database, and a
/// bare `tbl_name` a registered in-memory table. With a file, `tbl_name` is
/// only a display label.
///
/// # Examples
///
/// ```rust
/// use term_agent::sources::{CredentialsRef, DataSource, DbType};
///
/// let local = DataSource::local("small_table");
/// let file = DataSource::file("data/orders.csv").with_col_types("ciD");
/// let remote = DataSource::database(DbType::PostgreSQL, CredentialsRef::Env("WAREHOUSE".into()))
///     .with_table_name("orders")
///     .with_initial_query("WHERE created_at > DATE '2024-01-01'");
///
/// assert!(local.validate().is_ok());
/// assert!(file.validate().is_ok());
/// assert!(remote.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSource {
    pub tbl_name: Option<String>,
    pub db_type: Option<DbType>,
    pub creds_ref: Option<CredentialsRef>,
    pub initial_query: Option<String>,
    pub file_path: Option<PathBuf>,
    pub col_types: Option<String>,
    /// Column names of a database source, used to expand "every column"
    /// steps at build time
    pub known_columns: Option<Vec<String>>,
    pub file_options: FileOptions,
}

/// The kind of table a validated [`DataSource`] points at.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSourceKind<'a> {
    Local {
        name: &'a str,
    },
    File {
        path: &'a Path,
        col_types: Option<Vec<ColumnType>>,
        options: &'a FileOptions,
    },
    Database {
        db_type: DbType,
        creds_ref: &'a CredentialsRef,
        table: Option<&'a str>,
        initial_query: Option<&'a str>,
    },
}

impl DataSource {
    /// A registered in-memory table.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            tbl_name: Some(name.into()),
            ..Default::default()
        }
    }

    /// A delimited file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// A database reached with the given credentials.
    pub fn database(db_type: DbType, creds_ref: CredentialsRef) -> Self {
        Self {
            db_type: Some(db_type),
            creds_ref: Some(creds_ref),
            ..Default::default()
        }
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.tbl_name = Some(name.into());
        self
    }

    pub fn with_col_types(mut self, col_types: impl Into<String>) -> Self {
        self.col_types = Some(col_types.into());
        self
    }

    pub fn with_initial_query(mut self, query: impl Into<String>) -> Self {
        self.initial_query = Some(query.into());
        self
    }

    pub fn with_known_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_file_options(mut self, options: FileOptions) -> Self {
        self.file_options = options;
        self
    }

    /// Returns true when no field is set.
    pub fn is_empty(&self) -> bool {
        self.tbl_name.is_none()
            && self.db_type.is_none()
            && self.creds_ref.is_none()
            && self.initial_query.is_none()
            && self.file_path.is_none()
            && self.col_types.is_none()
    }

    /// Checks field consistency and classifies the source.
    ///
    /// # Errors
    ///
    /// Returns [`TermError::PlanBuild`] when `db_type` and `creds_ref` are
    /// not given together, `col_types` is given without `file_path`,
    /// `initial_query` without `db_type`, both a file and a database are
    /// given, a type hint is malformed, the initial query is unsafe, or
    /// nothing identifies a table.
    pub fn validate(&self) -> Result<DataSourceKind<'_>> {
        if self.db_type.is_some() != self.creds_ref.is_some() {
            return Err(TermError::plan_build(
                "db_type and creds_ref must be given together",
            ));
        }
        if self.col_types.is_some() && self.file_path.is_none() {
            return Err(TermError::plan_build("col_types requires file_path"));
        }
        if self.initial_query.is_some() && self.db_type.is_none() {
            return Err(TermError::plan_build("initial_query requires db_type"));
        }
        if self.file_path.is_some() && self.db_type.is_some() {
            return Err(TermError::plan_build(
                "a data source cannot be both a file and a database",
            ));
        }

        if let Some(path) = &self.file_path {
            let col_types = self.col_types.as_deref().map(parse_col_types).transpose()?;
            return Ok(DataSourceKind::File {
                path,
                col_types,
                options: &self.file_options,
            });
        }

        if let (Some(db_type), Some(creds_ref)) = (self.db_type, &self.creds_ref) {
            if let Some(query) = &self.initial_query {
                SqlSecurity::validate_initial_query(query)
                    .map_err(|e| TermError::plan_build(format!("initial_query rejected: {e}")))?;
            }
            let verbatim = self.initial_query.as_deref().is_some_and(is_full_query);
            match &self.tbl_name {
                Some(name) => SqlSecurity::validate_table_name(name)
                    .map_err(|e| TermError::plan_build(e.to_string()))?,
                None if !verbatim => {
                    return Err(TermError::plan_build(
                        "a database source needs tbl_name unless initial_query is a full SELECT",
                    ))
                }
                None => {}
            }
            return Ok(DataSourceKind::Database {
                db_type,
                creds_ref,
                table: self.tbl_name.as_deref(),
                initial_query: self.initial_query.as_deref(),
            });
        }

        match &self.tbl_name {
            Some(name) => Ok(DataSourceKind::Local { name }),
            None => Err(TermError::plan_build(
                "data source does not identify a table (set tbl_name, file_path, or db_type)",
            )),
        }
    }

    /// Short type tag used in logs and errors.
    pub fn source_type(&self) -> &'static str {
        match (&self.file_path, self.db_type, &self.tbl_name) {
            (Some(_), _, _) => "file",
            (None, Some(db_type), _) => db_type.as_str(),
            (None, None, Some(_)) => "local",
            _ => "none",
        }
    }

    /// Human-readable label of the table.
    pub fn label(&self) -> String {
        match (&self.tbl_name, &self.file_path) {
            (Some(name), _) => name.clone(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => self
                .initial_query
                .clone()
                .unwrap_or_else(|| "<unset>".to_string()),
        }
    }

    /// Lists the table's columns without loading any rows.
    ///
    /// Used to expand "every column" steps when the plan is built. Database
    /// sources answer from `known_columns`.
    pub fn column_names(&self, registry: &TableRegistry) -> Result<Vec<String>> {
        let as_plan_error = |e: TermError| TermError::plan_build(format!(
            "cannot list columns of {} source '{}': {e}",
            self.source_type(),
            self.label()
        ));
        match self.validate()? {
            DataSourceKind::Local { name } => registry
                .get(name)
                .map(|t| t.column_names())
                .ok_or_else(|| {
                    as_plan_error(TermError::data_source(
                        "local",
                        format!("table '{name}' is not registered"),
                    ))
                }),
            DataSourceKind::File {
                path,
                col_types,
                options,
            } => read_column_names(path, col_types.as_deref(), options).map_err(as_plan_error),
            DataSourceKind::Database { .. } => self.known_columns.clone().ok_or_else(|| {
                TermError::plan_build(format!(
                    "columns of database source '{}' are unknown; declare known_columns",
                    self.label()
                ))
            }),
        }
    }
}

/// A registered in-memory table.
#[derive(Debug, Clone)]
pub struct LocalTable {
    schema: SchemaRef,
    provider: Arc<MemTable>,
    num_rows: usize,
}

impl LocalTable {
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// The table as a DataFusion provider.
    pub fn provider(&self) -> Arc<MemTable> {
        self.provider.clone()
    }
}

/// Named in-memory tables available to local data sources.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use datafusion::arrow::array::Int64Array;
/// use datafusion::arrow::datatypes::{DataType, Field, Schema};
/// use datafusion::arrow::record_batch::RecordBatch;
/// use term_agent::sources::TableRegistry;
///
/// let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, true)]));
/// let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2, 3]))]).unwrap();
///
/// let mut registry = TableRegistry::new();
/// registry.register_batch("small_table", batch).unwrap();
/// assert!(registry.contains("small_table"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, LocalTable>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers batches sharing one schema under a name, replacing any
    /// previous table of that name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<()> {
        let name = name.into();
        SqlSecurity::validate_identifier(&name)
            .map_err(|e| TermError::Configuration(format!("invalid table name: {e}")))?;
        let num_rows = batches.iter().map(RecordBatch::num_rows).sum();
        let provider = Arc::new(MemTable::try_new(schema.clone(), vec![batches])?);
        debug!(table = %name, rows = num_rows, "Registered local table");
        self.tables.insert(
            name,
            LocalTable {
                schema,
                provider,
                num_rows,
            },
        );
        Ok(())
    }

    /// Registers a single batch.
    pub fn register_batch(&mut self, name: impl Into<String>, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        self.register(name, schema, vec![batch])
    }

    pub fn get(&self, name: &str) -> Option<&LocalTable> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

enum TableHandle {
    Session {
        _ctx: SessionContext,
        frame: DataFrame,
    },
    Remote {
        conn: Box<dyn RemoteConnection>,
        base_query: String,
        columns: Vec<String>,
        filter_sql: Option<String>,
    },
}

/// A table resolved for one step.
///
/// At most one precondition filter can be applied. Remote tables hold a
/// private connection which [`ResolvedTable::release`] closes; callers must
/// release on every path.
pub struct ResolvedTable {
    source_type: String,
    label: String,
    handle: TableHandle,
    filtered: bool,
}

impl fmt::Debug for ResolvedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTable")
            .field("source_type", &self.source_type)
            .field("label", &self.label)
            .field("remote", &self.is_remote())
            .field("filtered", &self.filtered)
            .finish()
    }
}

impl ResolvedTable {
    /// Wraps an in-memory table provider read through a fresh session.
    pub async fn in_memory(
        ctx: SessionContext,
        provider: Arc<MemTable>,
        source_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<Self> {
        let frame = ctx.read_table(provider)?;
        Ok(Self {
            source_type: source_type.into(),
            label: label.into(),
            handle: TableHandle::Session { _ctx: ctx, frame },
            filtered: false,
        })
    }

    /// Wraps a remote connection. Learns the base query's columns first; on
    /// failure the connection is closed before the error is returned.
    pub async fn remote(
        mut conn: Box<dyn RemoteConnection>,
        base_query: String,
        source_type: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<Self> {
        let columns = match conn.column_names(&base_query).await {
            Ok(columns) => columns,
            Err(e) => {
                if let Err(close_err) = conn.close().await {
                    warn!(error = %close_err, "Failed to close connection after error");
                }
                return Err(e);
            }
        };
        Ok(Self {
            source_type: source_type.into(),
            label: label.into(),
            handle: TableHandle::Remote {
                conn,
                base_query,
                columns,
                filter_sql: None,
            },
            filtered: false,
        })
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.handle, TableHandle::Remote { .. })
    }

    /// SQL dialect of a remote table.
    pub fn dialect(&self) -> Option<SqlDialect> {
        match &self.handle {
            TableHandle::Remote { conn, .. } => Some(conn.dialect()),
            TableHandle::Session { .. } => None,
        }
    }

    /// Column names of the table.
    pub fn columns(&self) -> Vec<String> {
        match &self.handle {
            TableHandle::Session { frame, .. } => frame
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect(),
            TableHandle::Remote { columns, .. } => columns.clone(),
        }
    }

    /// Checks that a predicate fits the table's columns.
    pub fn check_predicate(&self, predicate: &Predicate) -> Result<()> {
        match &self.handle {
            TableHandle::Session { frame, .. } => predicate.check_schema(frame.schema().as_arrow()),
            TableHandle::Remote { columns, .. } => predicate.check_columns(columns),
        }
    }

    /// Restricts the table to rows where the predicate's preconditions are
    /// TRUE. A predicate without preconditions leaves the table unchanged.
    ///
    /// # Errors
    ///
    /// Applying a second filter is an internal error.
    pub fn apply_precondition(&mut self, predicate: &Predicate) -> Result<()> {
        let Some(pre) = predicate.preconditions() else {
            return Ok(());
        };
        if self.filtered {
            return Err(TermError::Internal(format!(
                "a precondition filter was already applied to '{}'",
                self.label
            )));
        }
        match &mut self.handle {
            TableHandle::Session { frame, .. } => {
                if let Some(expr) = predicate.precondition_expr() {
                    *frame = frame.clone().filter(expr)?;
                }
            }
            TableHandle::Remote {
                conn, filter_sql, ..
            } => {
                *filter_sql = Some(conn.dialect().render_condition(pre)?);
            }
        }
        self.filtered = true;
        Ok(())
    }

    /// Counts evaluated rows and failing rows.
    pub async fn count(&mut self, predicate: &Predicate, config: &AgentConfig) -> Result<RowCounts> {
        match &mut self.handle {
            TableHandle::Session { frame, .. } => {
                let n_evaluated = frame.clone().count().await?;
                let n_failed = frame
                    .clone()
                    .filter(predicate.failure_expr())?
                    .count()
                    .await?;
                Ok(RowCounts {
                    n_evaluated: n_evaluated as u64,
                    n_failed: n_failed as u64,
                })
            }
            TableHandle::Remote {
                conn,
                base_query,
                filter_sql,
                ..
            } => {
                let failure_sql = predicate.failure_sql(conn.dialect())?;
                let sql = database::count_query(base_query, &failure_sql, filter_sql.as_deref());
                log_sql!(config.log, sql = %crate::logging::truncate_field(&sql, config.log.max_field_length), "Counting query");
                conn.fetch_counts(&sql).await
            }
        }
    }

    /// Releases the table, closing a remote connection.
    pub async fn release(self) -> Result<()> {
        match self.handle {
            TableHandle::Session { .. } => Ok(()),
            TableHandle::Remote { conn, .. } => conn.close().await,
        }
    }
}

/// Resolves a data source into a table handle.
///
/// # Errors
///
/// Returns [`TermError::DataSource`] when the local table is not
/// registered, the file cannot be read or parsed, credentials cannot be
/// resolved, or the database cannot be reached.
#[instrument(skip_all, fields(data_source.type = source.source_type(), data_source.label = %source.label()))]
pub async fn resolve(
    source: &DataSource,
    registry: &TableRegistry,
    config: &AgentConfig,
    connector: &dyn Connector,
) -> Result<ResolvedTable> {
    let kind = source
        .validate()
        .map_err(|e| TermError::data_source(source.source_type(), e.to_string()))?;

    match kind {
        DataSourceKind::File {
            path,
            col_types,
            options,
        } => {
            let loaded =
                file::load_file(path, col_types.as_deref(), options, config.batch_size).await?;
            let provider = Arc::new(MemTable::try_new(loaded.schema, vec![loaded.batches])?);
            log_data_op!(config.log, path = %path.display(), "Loaded file table");
            ResolvedTable::in_memory(
                config.session_context()?,
                provider,
                "file",
                source.label(),
            )
            .await
        }
        DataSourceKind::Database {
            db_type,
            creds_ref,
            table,
            initial_query,
        } => {
            let credentials = creds_ref.resolve()?;
            let query = base_query(db_type.dialect(), table, initial_query)
                .map_err(|e| TermError::data_source(db_type.as_str(), e.to_string()))?;
            let conn = connector.connect(db_type, &credentials).await?;
            log_data_op!(config.log, engine = db_type.as_str(), "Opened database connection");
            ResolvedTable::remote(conn, query, db_type.as_str(), source.label()).await
        }
        DataSourceKind::Local { name } => {
            let table = registry.get(name).ok_or_else(|| {
                TermError::data_source(
                    "local",
                    format!(
                        "table '{name}' is not registered (known: {})",
                        registry.names().join(", ")
                    ),
                )
            })?;
            ResolvedTable::in_memory(
                config.session_context()?,
                table.provider.clone(),
                "local",
                name,
            )
            .await
        }
    }
}
