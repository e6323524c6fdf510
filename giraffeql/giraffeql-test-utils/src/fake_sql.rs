//! A scripted stand-in for the database.
//!
//! Every statement consumes the next scripted response, in order. The log records each
//! statement along with `BEGIN`, `COMMIT` and `ROLLBACK`, so tests can assert on the exact
//! SQL a data store operation produced.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use giraffeql_core::JsonMap;
use giraffeql_store_pg::{
    client::{SqlClient, SqlConnector, SqlError, SqlTransaction},
    sql_value::SqlVal,
};
use serde_json::Value;
use tracing::debug;

enum Response {
    Rows(Vec<JsonMap>),
    Affected(u64),
    Error(SqlError),
}

#[derive(Default)]
struct State {
    responses: VecDeque<Response>,
    log: Vec<String>,
    params: Vec<Vec<SqlVal>>,
}

#[derive(Clone, Default)]
pub struct FakeSql {
    state: Arc<Mutex<State>>,
}

impl FakeSql {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next statement returns these rows. Each row must be a JSON object.
    pub fn returning(self, rows: impl IntoIterator<Item = Value>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => map,
                other => panic!("scripted row is not an object: {other}"),
            })
            .collect();
        self.push(Response::Rows(rows))
    }

    /// The next statement affects `count` rows and returns nothing.
    pub fn affecting(self, count: u64) -> Self {
        self.push(Response::Affected(count))
    }

    pub fn failing(self, error: SqlError) -> Self {
        self.push(Response::Error(error))
    }

    fn push(self, response: Response) -> Self {
        self.state.lock().unwrap().responses.push_back(response);
        self
    }

    /// Everything that ran, in order
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    /// Only the statements, without transaction control
    pub fn statements(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|entry| !matches!(entry.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .collect()
    }

    /// The bound parameters of each statement
    pub fn params(&self) -> Vec<Vec<SqlVal>> {
        self.state.lock().unwrap().params.clone()
    }

    /// Number of scripted responses no statement consumed
    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().responses.len()
    }

    fn next(&self, sql: &str, params: &[SqlVal]) -> Result<Response, SqlError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(sql.to_string());
        state.params.push(params.to_vec());
        debug!("fake sql: {sql}");

        state
            .responses
            .pop_front()
            .ok_or_else(|| SqlError::new(format!("unscripted statement: {sql}")))
    }

    fn record(&self, entry: &str) {
        self.state.lock().unwrap().log.push(entry.to_string());
    }
}

#[async_trait]
impl SqlClient for FakeSql {
    async fn query(&self, sql: &str, params: &[SqlVal]) -> Result<Vec<JsonMap>, SqlError> {
        match self.next(sql, params)? {
            Response::Rows(rows) => Ok(rows),
            Response::Affected(_) => Ok(vec![]),
            Response::Error(error) => Err(error),
        }
    }

    async fn execute(&self, sql: &str, params: &[SqlVal]) -> Result<u64, SqlError> {
        match self.next(sql, params)? {
            Response::Rows(rows) => Ok(rows.len() as u64),
            Response::Affected(count) => Ok(count),
            Response::Error(error) => Err(error),
        }
    }
}

struct FakeTransaction(FakeSql);

#[async_trait]
impl SqlTransaction for FakeTransaction {
    fn client(&self) -> &dyn SqlClient {
        &self.0
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlError> {
        self.0.record("COMMIT");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlError> {
        self.0.record("ROLLBACK");
        Ok(())
    }
}

#[async_trait]
impl SqlConnector for FakeSql {
    async fn client(&self) -> Result<Box<dyn SqlClient>, SqlError> {
        Ok(Box::new(self.clone()))
    }

    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError> {
        self.record("BEGIN");
        Ok(Box::new(FakeTransaction(self.clone())))
    }
}
