//! Remote database connectivity.
//!
//! Remote tables are never materialized. The agent builds a base query from
//! the data source (table name and/or initial query), learns its column
//! names, and sends a single counting query per step so the database does
//! the work.
//!
//! Engines are compiled in through the `postgres` and `mysql` features.
//! Connecting to an engine that was not compiled in is a data source error.

use crate::expr::SqlDialect;
use crate::prelude::*;
use crate::security::{SecureString, SqlSecurity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    PostgreSQL,
    MySQL,
}

impl DbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::PostgreSQL => "PostgreSQL",
            DbType::MySQL => "MySQL",
        }
    }

    /// The SQL dialect spoken by this engine.
    pub fn dialect(&self) -> SqlDialect {
        match self {
            DbType::PostgreSQL => SqlDialect::PostgreSQL,
            DbType::MySQL => SqlDialect::MySQL,
        }
    }

    /// The engine's standard TCP port.
    pub fn default_port(&self) -> u16 {
        match self {
            DbType::PostgreSQL => 5432,
            DbType::MySQL => 3306,
        }
    }
}

impl FromStr for DbType {
    type Err = TermError;

    /// Matches engine names case-insensitively.
    ///
    /// ```rust
    /// use term_agent::sources::DbType;
    ///
    /// assert_eq!("postgres".parse::<DbType>().unwrap(), DbType::PostgreSQL);
    /// assert_eq!("MySQL".parse::<DbType>().unwrap(), DbType::MySQL);
    /// assert!("oracle".parse::<DbType>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DbType::PostgreSQL),
            "mysql" => Ok(DbType::MySQL),
            other => Err(TermError::plan_build(format!(
                "unsupported database type '{other}' (expected PostgreSQL or MySQL)"
            ))),
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters for a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub host: String,
    /// Falls back to the engine's default port
    pub port: Option<u16>,
    pub dbname: String,
    pub user: String,
    pub password: SecureString,
}

impl DbCredentials {
    pub fn new(
        host: impl Into<String>,
        dbname: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<SecureString>,
    ) -> Self {
        Self {
            host: host.into(),
            port: None,
            dbname: dbname.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Where credentials come from.
///
/// `Env("WAREHOUSE")` reads `WAREHOUSE_HOST`, `WAREHOUSE_PORT`,
/// `WAREHOUSE_DBNAME`, `WAREHOUSE_USER` and `WAREHOUSE_PASSWORD` at
/// resolution time. `WAREHOUSE_PORT` is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsRef {
    Inline(DbCredentials),
    Env(String),
}

impl CredentialsRef {
    /// Produces concrete credentials.
    pub fn resolve(&self) -> Result<DbCredentials> {
        match self {
            CredentialsRef::Inline(creds) => Ok(creds.clone()),
            CredentialsRef::Env(prefix) => {
                let var = |suffix: &str| -> Result<String> {
                    let name = format!("{prefix}_{suffix}");
                    std::env::var(&name).map_err(|_| {
                        TermError::data_source(
                            "credentials",
                            format!("environment variable {name} is not set"),
                        )
                    })
                };
                let port = match std::env::var(format!("{prefix}_PORT")) {
                    Ok(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                        TermError::data_source(
                            "credentials",
                            format!("{prefix}_PORT is not a valid port: '{raw}'"),
                        )
                    })?),
                    Err(_) => None,
                };
                Ok(DbCredentials {
                    host: var("HOST")?,
                    port,
                    dbname: var("DBNAME")?,
                    user: var("USER")?,
                    password: SecureString::new(var("PASSWORD")?),
                })
            }
        }
    }
}

/// Row counts returned by one counting query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowCounts {
    pub n_evaluated: u64,
    pub n_failed: u64,
}

/// A private connection to a remote table's database.
///
/// A connection belongs to exactly one resolved table and is closed when
/// that table is released.
#[async_trait]
pub trait RemoteConnection: Send {
    /// The dialect queries must be rendered in.
    fn dialect(&self) -> SqlDialect;

    /// Returns the column names a query produces, without reading rows.
    async fn column_names(&mut self, query: &str) -> Result<Vec<String>>;

    /// Runs a query returning exactly one row of two integer columns,
    /// `n_evaluated` then `n_failed`.
    async fn fetch_counts(&mut self, sql: &str) -> Result<RowCounts>;

    /// Closes the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens connections for database data sources.
///
/// The default [`NativeConnector`] uses the compiled-in drivers; tests and
/// embedders can substitute their own.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(
        &self,
        db_type: DbType,
        credentials: &DbCredentials,
    ) -> Result<Box<dyn RemoteConnection>>;
}

/// Connector backed by the drivers enabled at compile time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

#[async_trait]
impl Connector for NativeConnector {
    async fn connect(
        &self,
        db_type: DbType,
        credentials: &DbCredentials,
    ) -> Result<Box<dyn RemoteConnection>> {
        match db_type {
            #[cfg(feature = "postgres")]
            DbType::PostgreSQL => Ok(Box::new(
                super::postgres::PgConnection::connect(credentials).await?,
            )),
            #[cfg(feature = "mysql")]
            DbType::MySQL => Ok(Box::new(
                super::mysql::MySqlConnection::connect(credentials).await?,
            )),
            #[allow(unreachable_patterns)]
            other => {
                let _ = credentials;
                Err(TermError::data_source(
                    other.as_str(),
                    format!(
                        "{other} support is not compiled in; enable the '{}' feature",
                        other.as_str().to_lowercase().replace("postgresql", "postgres")
                    ),
                ))
            }
        }
    }
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    let Some(head) = text.get(..keyword.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(keyword)
        && text[keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '(')
}

/// Returns true when an initial query is a full statement used verbatim.
pub fn is_full_query(initial_query: &str) -> bool {
    let q = initial_query.trim_start();
    starts_with_keyword(q, "SELECT") || starts_with_keyword(q, "WITH")
}

/// Builds the base query of a remote table.
///
/// - no initial query: `SELECT * FROM <table>`
/// - a query starting with `SELECT` or `WITH`: used verbatim
/// - a query starting with `WHERE`: appended to `SELECT * FROM <table>`
/// - anything else: used as the condition of such a `WHERE` clause
///
/// ```rust
/// use term_agent::expr::SqlDialect;
/// use term_agent::sources::base_query;
///
/// let q = base_query(SqlDialect::PostgreSQL, Some("orders"), Some("amount > 0")).unwrap();
/// assert_eq!(q, "SELECT * FROM \"orders\" WHERE amount > 0");
/// ```
pub fn base_query(
    dialect: SqlDialect,
    table: Option<&str>,
    initial_query: Option<&str>,
) -> Result<String> {
    if let Some(q) = initial_query {
        SqlSecurity::validate_initial_query(q)?;
    }
    let initial = initial_query.map(str::trim);
    if let Some(q) = initial.filter(|q| is_full_query(q)) {
        return Ok(q.to_string());
    }

    let table = table.ok_or_else(|| {
        TermError::data_source(
            dialect.as_str(),
            "a table name is required unless the initial query is a full SELECT",
        )
    })?;
    let from = format!("SELECT * FROM {}", dialect.quote_table_name(table)?);
    Ok(match initial {
        None => from,
        Some(q) if starts_with_keyword(q, "WHERE") => format!("{from} {q}"),
        Some(q) => format!("{from} WHERE {q}"),
    })
}

/// Builds the single counting query for a step.
pub(crate) fn count_query(base: &str, failure_sql: &str, filter_sql: Option<&str>) -> String {
    let mut sql = format!(
        "SELECT COUNT(*) AS n_evaluated, COUNT(CASE WHEN {failure_sql} THEN 1 END) AS n_failed FROM ({base}) AS pb_tbl"
    );
    if let Some(filter) = filter_sql {
        sql.push_str(&format!(" WHERE {filter} IS TRUE"));
    }
    sql
}

/// Converts a driver count into `u64`.
#[cfg(any(feature = "postgres", feature = "mysql"))]
pub(crate) fn count_to_u64(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| TermError::Internal(format!("database returned negative {what}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(any(feature = "postgres", feature = "mysql"))]
    #[test]
    fn test_count_to_u64_rejects_negative_counts() {
        assert_eq!(count_to_u64(6, "n_evaluated").unwrap(), 6);
        assert!(matches!(
            count_to_u64(-1, "n_failed"),
            Err(TermError::Internal(_))
        ));
    }

    #[test]
    fn test_db_type_aliases() {
        for name in ["PostgreSQL", "postgresql", "POSTGRES", " postgres "] {
            assert_eq!(name.parse::<DbType>().unwrap(), DbType::PostgreSQL);
        }
        assert_eq!("mySQL".parse::<DbType>().unwrap(), DbType::MySQL);
        assert!(matches!(
            "sqlite".parse::<DbType>(),
            Err(TermError::PlanBuild { .. })
        ));
    }

    #[test]
    fn test_base_query_forms() {
        let pg = SqlDialect::PostgreSQL;
        assert_eq!(
            base_query(pg, Some("orders"), None).unwrap(),
            "SELECT * FROM \"orders\""
        );
        assert_eq!(
            base_query(pg, None, Some("  select a from orders")).unwrap(),
            "select a from orders"
        );
        assert_eq!(
            base_query(pg, None, Some("WITH x AS (SELECT 1 AS a) SELECT * FROM x")).unwrap(),
            "WITH x AS (SELECT 1 AS a) SELECT * FROM x"
        );
        assert_eq!(
            base_query(SqlDialect::MySQL, Some("shop.orders"), Some("where amount > 0")).unwrap(),
            "SELECT * FROM `shop`.`orders` where amount > 0"
        );
        assert_eq!(
            base_query(pg, Some("orders"), Some("status = 'open'")).unwrap(),
            "SELECT * FROM \"orders\" WHERE status = 'open'"
        );
        // "selected" is a column name, not the SELECT keyword
        assert_eq!(
            base_query(pg, Some("t"), Some("selected = true")).unwrap(),
            "SELECT * FROM \"t\" WHERE selected = true"
        );
    }

    #[test]
    fn test_base_query_errors() {
        let pg = SqlDialect::PostgreSQL;
        assert!(matches!(
            base_query(pg, None, Some("amount > 0")),
            Err(TermError::DataSource { .. })
        ));
        assert!(base_query(pg, Some("t"), Some("1=1; DROP TABLE t")).is_err());
        assert!(base_query(pg, Some("t; DROP TABLE t"), None).is_err());
    }

    #[test]
    fn test_count_query() {
        assert_eq!(
            count_query("SELECT * FROM t", "(x > 1) IS NOT TRUE", None),
            "SELECT COUNT(*) AS n_evaluated, COUNT(CASE WHEN (x > 1) IS NOT TRUE THEN 1 END) AS n_failed FROM (SELECT * FROM t) AS pb_tbl"
        );
        assert!(count_query("q", "f", Some("(y = 2)")).ends_with("WHERE (y = 2) IS TRUE"));
    }

    #[test]
    fn test_env_credentials() {
        let prefix = "TERM_AGENT_TEST_CREDS";
        std::env::set_var(format!("{prefix}_HOST"), "db.internal");
        std::env::set_var(format!("{prefix}_PORT"), "6543");
        std::env::set_var(format!("{prefix}_DBNAME"), "warehouse");
        std::env::set_var(format!("{prefix}_USER"), "reader");
        std::env::set_var(format!("{prefix}_PASSWORD"), "s3cret");

        let creds = CredentialsRef::Env(prefix.to_string()).resolve().unwrap();
        assert_eq!(creds.host, "db.internal");
        assert_eq!(creds.port, Some(6543));
        assert_eq!(creds.password.expose(), "s3cret");
        assert!(!format!("{creds:?}").contains("s3cret"));
    }

    #[test]
    fn test_env_credentials_missing() {
        let err = CredentialsRef::Env("TERM_AGENT_TEST_NOPE".to_string())
            .resolve()
            .unwrap_err();
        assert!(matches!(err, TermError::DataSource { .. }));
        assert!(err.to_string().contains("TERM_AGENT_TEST_NOPE_HOST"));
    }

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn test_engine_not_compiled_in() {
        let creds = DbCredentials::new("localhost", "db", "u", "p");
        let err = NativeConnector
            .connect(DbType::PostgreSQL, &creds)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TermError::DataSource { .. }));
        assert!(err.to_string().contains("'postgres' feature"));
    }
}
