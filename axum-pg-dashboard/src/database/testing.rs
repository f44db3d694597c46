//! In-memory statement executor for tests

use crate::database::traits::{DatabaseError, QueryOutput, StatementExecutor};
use crate::schema::Row;
use crate::statement::Statement;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

type Responder = dyn Fn(&Statement) -> Result<QueryOutput, DatabaseError> + Send + Sync;

/// Records every statement and answers it with a responder closure
pub struct FakeExecutor {
    responder: Box<Responder>,
    statements: Mutex<Vec<Statement>>,
}

impl FakeExecutor {
    pub fn new(
        responder: impl Fn(&Statement) -> Result<QueryOutput, DatabaseError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Statements received so far, in arrival order
    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatementExecutor for FakeExecutor {
    async fn query(&self, statement: &Statement) -> Result<QueryOutput, DatabaseError> {
        self.statements.lock().unwrap().push(statement.clone());
        (self.responder)(statement)
    }
}

/// Build a query output from a JSON array of objects
pub fn rows(value: Value) -> QueryOutput {
    let rows: Vec<Row> = match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    QueryOutput::from_rows(rows)
}
