//! MySQL connections through `mysql_async`.

use super::database::{count_to_u64, DbCredentials, DbType, RemoteConnection, RowCounts};
use crate::expr::SqlDialect;
use crate::prelude::*;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};
use tracing::{debug, instrument};

const SOURCE_TYPE: &str = "MySQL";

fn mysql_error(message: impl Into<String>, e: mysql_async::Error) -> TermError {
    TermError::data_source_with_source(SOURCE_TYPE, message, Box::new(e))
}

/// One MySQL session.
pub struct MySqlConnection {
    conn: Conn,
}

impl MySqlConnection {
    #[instrument(skip(credentials), fields(host = %credentials.host, dbname = %credentials.dbname))]
    pub async fn connect(credentials: &DbCredentials) -> Result<Self> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(credentials.host.clone())
            .tcp_port(credentials.port.unwrap_or(DbType::MySQL.default_port()))
            .db_name(Some(credentials.dbname.clone()))
            .user(Some(credentials.user.clone()))
            .pass(Some(credentials.password.expose().to_string()));

        let conn = Conn::new(opts)
            .await
            .map_err(|e| mysql_error(format!("cannot connect to {}", credentials.host), e))?;

        debug!("MySQL connection established");
        Ok(Self { conn })
    }
}

#[async_trait]
impl RemoteConnection for MySqlConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
    }

    async fn column_names(&mut self, query: &str) -> Result<Vec<String>> {
        let statement = self
            .conn
            .prep(query)
            .await
            .map_err(|e| mysql_error("cannot prepare base query", e))?;
        let names = statement
            .columns()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();
        self.conn
            .close(statement)
            .await
            .map_err(|e| mysql_error("cannot close prepared statement", e))?;
        Ok(names)
    }

    async fn fetch_counts(&mut self, sql: &str) -> Result<RowCounts> {
        let row: Option<(i64, i64)> = self
            .conn
            .query_first(sql)
            .await
            .map_err(|e| mysql_error("counting query failed", e))?;
        let (n_evaluated, n_failed) = row.ok_or_else(|| {
            TermError::data_source(SOURCE_TYPE, "counting query returned no row")
        })?;
        Ok(RowCounts {
            n_evaluated: count_to_u64(n_evaluated, "n_evaluated")?,
            n_failed: count_to_u64(n_failed, "n_failed")?,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| mysql_error("error while disconnecting", e))
    }
}
