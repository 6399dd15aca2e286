//! Statement objects handed out by a handler.
//!
//! A `Query` carries the statement text, its bound values and, once
//! executed, the driver's output. It is tied to one connection name and is
//! only ever run through the handler that created it.

use super::driver::{QueryOutput, SqlValue};

/// A statement bound to one connection.
#[derive(Debug, Clone)]
pub struct Query {
    connection_name: String,
    sql: String,
    bound: Vec<SqlValue>,
    prepared: bool,
    output: Option<QueryOutput>,
    last_error: Option<String>,
}

impl Query {
    /// Creates an empty statement for `connection_name`.
    pub fn new(connection_name: &str) -> Self {
        Query {
            connection_name: connection_name.to_string(),
            sql: String::new(),
            bound: Vec::new(),
            prepared: false,
            output: None,
            last_error: None,
        }
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// Text of the last statement given to `prepare_query`.
    pub fn last_query(&self) -> &str {
        &self.sql
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Whether the last execution succeeded and its output is available.
    pub fn is_active(&self) -> bool {
        self.output.is_some()
    }

    /// Appends a positional value.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        self.bound.push(value.into());
        self
    }

    pub fn bind_all<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.bound.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn clear_bindings(&mut self) {
        self.bound.clear();
    }

    pub fn bound_values(&self) -> &[SqlValue] {
        &self.bound
    }

    pub fn columns(&self) -> &[String] {
        self.output.as_ref().map(|o| o.columns.as_slice()).unwrap_or(&[])
    }

    pub fn rows(&self) -> &[Vec<SqlValue>] {
        self.output.as_ref().map(|o| o.rows.as_slice()).unwrap_or(&[])
    }

    pub fn rows_affected(&self) -> u64 {
        self.output.as_ref().map(|o| o.rows_affected).unwrap_or(0)
    }

    /// Value of `column` in row `row`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.columns().iter().position(|c| c == column)?;
        self.rows().get(row)?.get(index)
    }

    /// Driver message of the last failed prepare or execute.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn set_prepared(&mut self, sql: &str) {
        self.sql = sql.to_string();
        self.prepared = true;
        self.output = None;
        self.last_error = None;
    }

    pub(crate) fn set_prepare_failed(&mut self, sql: &str, message: &str) {
        self.sql = sql.to_string();
        self.prepared = false;
        self.output = None;
        self.last_error = Some(message.to_string());
    }

    pub(crate) fn set_output(&mut self, output: QueryOutput) {
        self.output = Some(output);
        self.last_error = None;
    }

    pub(crate) fn set_execute_failed(&mut self, message: &str) {
        self.output = None;
        self.last_error = Some(message.to_string());
    }
}
