//! The seam between the store and the database driver.
//!
//! The store only ever talks to a [SqlConnector]; the pooled postgres implementation lives here,
//! test doubles live in `giraffeql-test-utils`.

use std::fmt::Display;

use async_trait::async_trait;
use giraffeql_core::JsonMap;
use tokio_postgres::types::ToSql;
use tracing::{trace, warn};

use crate::sql_value::{SqlVal, decode_row};

pub const UNIQUE_VIOLATION: &str = "23505";
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

/// A failed statement, reduced to what the store needs to classify it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqlError {
    /// SQLSTATE code, when the server produced one
    pub code: Option<String>,
    pub message: String,
    pub constraint: Option<String>,
}

impl SqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            constraint: None,
        }
    }

    pub fn with_code(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            constraint: None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION)
    }
}

impl Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<tokio_postgres::Error> for SqlError {
    fn from(value: tokio_postgres::Error) -> Self {
        match value.as_db_error() {
            Some(db_error) => Self {
                code: Some(db_error.code().code().to_string()),
                message: db_error.message().to_string(),
                constraint: db_error.constraint().map(ToString::to_string),
            },
            None => Self {
                code: value.code().map(|code| code.code().to_string()),
                message: value.to_string(),
                constraint: None,
            },
        }
    }
}

/// Something that runs statements: a pooled connection or an open transaction.
#[async_trait]
pub trait SqlClient: Send + Sync {
    /// Run a statement and decode every returned row into a JSON object keyed by column name.
    async fn query(&self, sql: &str, params: &[SqlVal]) -> Result<Vec<JsonMap>, SqlError>;

    /// Run a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlVal]) -> Result<u64, SqlError>;
}

/// An open transaction.
///
/// Dropping it without calling [SqlTransaction::commit] must roll it back.
#[async_trait]
pub trait SqlTransaction: Send + Sync {
    fn client(&self) -> &dyn SqlClient;

    async fn commit(self: Box<Self>) -> Result<(), SqlError>;

    async fn rollback(self: Box<Self>) -> Result<(), SqlError>;
}

#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn client(&self) -> Result<Box<dyn SqlClient>, SqlError>;

    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError>;
}

/// [SqlConnector] backed by a deadpool of tokio-postgres connections.
pub struct PgConnector {
    pool: deadpool_postgres::Pool,
}

impl PgConnector {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    async fn object(&self) -> Result<deadpool_postgres::Object, SqlError> {
        self.pool
            .get()
            .await
            .map_err(|error| SqlError::new(format!("connection pool: {error}")))
    }
}

#[async_trait]
impl SqlConnector for PgConnector {
    async fn client(&self) -> Result<Box<dyn SqlClient>, SqlError> {
        Ok(Box::new(PooledClient(self.object().await?)))
    }

    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError> {
        let object = self.object().await?;
        object.batch_execute("BEGIN").await?;
        trace!("BEGIN OK");

        Ok(Box::new(PooledTransaction {
            object: Some(object),
            open: true,
        }))
    }
}

struct PooledClient(deadpool_postgres::Object);

#[async_trait]
impl SqlClient for PooledClient {
    async fn query(&self, sql: &str, params: &[SqlVal]) -> Result<Vec<JsonMap>, SqlError> {
        run_query(&self.0, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlVal]) -> Result<u64, SqlError> {
        run_execute(&self.0, sql, params).await
    }
}

struct PooledTransaction {
    object: Option<deadpool_postgres::Object>,
    open: bool,
}

impl PooledTransaction {
    fn object(&self) -> Result<&deadpool_postgres::Object, SqlError> {
        self.object
            .as_ref()
            .ok_or_else(|| SqlError::new("transaction already finished"))
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> Result<(), SqlError> {
        self.object()?.batch_execute(statement).await?;
        self.open = false;
        trace!("{statement} OK");
        Ok(())
    }
}

#[async_trait]
impl SqlClient for PooledTransaction {
    async fn query(&self, sql: &str, params: &[SqlVal]) -> Result<Vec<JsonMap>, SqlError> {
        run_query(self.object()?, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[SqlVal]) -> Result<u64, SqlError> {
        run_execute(self.object()?, sql, params).await
    }
}

#[async_trait]
impl SqlTransaction for PooledTransaction {
    fn client(&self) -> &dyn SqlClient {
        self
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PooledTransaction {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            if self.open {
                // The connection is detached from the pool and closed, the server rolls back.
                warn!("transaction dropped while open, discarding its connection");
                drop(deadpool::managed::Object::take(object));
            }
        }
    }
}

async fn run_query(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[SqlVal],
) -> Result<Vec<JsonMap>, SqlError> {
    let params: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    let rows = client.query(sql, &params).await?;
    rows.iter().map(decode_row).collect()
}

async fn run_execute(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[SqlVal],
) -> Result<u64, SqlError> {
    let params: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    Ok(client.execute(sql, &params).await?)
}
