//! PostgreSQL connections through `tokio-postgres`.

use super::database::{count_to_u64, DbCredentials, DbType, RemoteConnection, RowCounts};
use crate::expr::SqlDialect;
use crate::prelude::*;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, error, instrument};

const SOURCE_TYPE: &str = "PostgreSQL";

fn pg_error(message: impl Into<String>, e: tokio_postgres::Error) -> TermError {
    TermError::data_source_with_source(SOURCE_TYPE, message, Box::new(e))
}

/// One PostgreSQL session. The driver task runs until the client is dropped.
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgConnection {
    #[instrument(skip(credentials), fields(host = %credentials.host, dbname = %credentials.dbname))]
    pub async fn connect(credentials: &DbCredentials) -> Result<Self> {
        let mut config = Config::new();
        config
            .host(&credentials.host)
            .port(
                credentials
                    .port
                    .unwrap_or(DbType::PostgreSQL.default_port()),
            )
            .dbname(&credentials.dbname)
            .user(&credentials.user)
            .password(credentials.password.expose())
            .application_name("term-agent");

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| pg_error(format!("cannot connect to {}", credentials.host), e))?;

        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "Postgres connection error");
            }
        });

        debug!("Postgres connection established");
        Ok(Self { client, driver })
    }
}

#[async_trait]
impl RemoteConnection for PgConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    async fn column_names(&mut self, query: &str) -> Result<Vec<String>> {
        let statement = self
            .client
            .prepare(query)
            .await
            .map_err(|e| pg_error("cannot prepare base query", e))?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }

    async fn fetch_counts(&mut self, sql: &str) -> Result<RowCounts> {
        let row = self
            .client
            .query_one(sql, &[])
            .await
            .map_err(|e| pg_error("counting query failed", e))?;
        let n_evaluated: i64 = row
            .try_get(0)
            .map_err(|e| pg_error("unexpected n_evaluated column", e))?;
        let n_failed: i64 = row
            .try_get(1)
            .map_err(|e| pg_error("unexpected n_failed column", e))?;
        Ok(RowCounts {
            n_evaluated: count_to_u64(n_evaluated, "n_evaluated")?,
            n_failed: count_to_u64(n_failed, "n_failed")?,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { client, driver } = *self;
        // dropping the client terminates the session and ends the driver task
        drop(client);
        driver
            .await
            .map_err(|e| TermError::Internal(format!("Postgres driver task failed: {e}")))
    }
}
