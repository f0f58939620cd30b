//! Scripted `QueryExecutor` for exercising the checks without a server

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::pool::ConnectionError;
use crate::protocol::ResultSet;

use super::{QueryExecutor, READ_ONLY_SQL, SLAVE_STATUS_SQL};

pub(crate) const SLAVE_STATUS_COLUMNS: [&str; 4] = [
    "Slave_IO_State",
    "Slave_IO_Running",
    "Slave_SQL_Running",
    "Seconds_Behind_Master",
];

#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    responses: HashMap<&'static str, Result<ResultSet, ConnectionError>>,
    issued: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read_only(mut self, value: &str) -> Self {
        self.responses.insert(
            READ_ONLY_SQL,
            Ok(ResultSet::from_strs(&["read_only"], &[&[Some(value)]])),
        );
        self
    }

    /// No replication configured
    pub(crate) fn no_slave_status(mut self) -> Self {
        self.responses.insert(
            SLAVE_STATUS_SQL,
            Ok(ResultSet::from_strs(&SLAVE_STATUS_COLUMNS, &[])),
        );
        self
    }

    pub(crate) fn slave_status(
        mut self,
        io_running: Option<&str>,
        sql_running: Option<&str>,
        seconds_behind: Option<&str>,
    ) -> Self {
        self.responses.insert(
            SLAVE_STATUS_SQL,
            Ok(ResultSet::from_strs(
                &SLAVE_STATUS_COLUMNS,
                &[&[
                    Some("Waiting for source to send event"),
                    io_running,
                    sql_running,
                    seconds_behind,
                ]],
            )),
        );
        self
    }

    pub(crate) fn fail(mut self, sql: &'static str, err: ConnectionError) -> Self {
        self.responses.insert(sql, Err(err));
        self
    }

    pub(crate) fn issued(&self) -> Vec<String> {
        self.issued.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn query(&self, sql: &str) -> Result<ResultSet, ConnectionError> {
        self.issued.lock().push(sql.to_string());
        self.responses.get(sql).cloned().unwrap_or_else(|| {
            Err(ConnectionError::Server {
                code: 1064,
                state: "42000".to_string(),
                message: format!("unscripted query: {sql}"),
            })
        })
    }
}
