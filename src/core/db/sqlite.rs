//! SQLite session backed by rusqlite.

use super::driver::{DriverError, QueryOutput, SqlSession, SqlValue};
use crate::config::DriverType;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::time::Duration;
use tracing::{debug, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DriverResult<T> = std::result::Result<T, DriverError>;

/// A session onto one SQLite file (or `:memory:`).
#[derive(Debug)]
pub struct SqliteSession {
    path: String,
    connection: Option<Connection>,
}

impl SqliteSession {
    pub fn new(path: &str) -> Self {
        SqliteSession {
            path: path.to_string(),
            connection: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn connection(&self) -> DriverResult<&Connection> {
        self.connection.as_ref().ok_or_else(DriverError::not_open)
    }
}

impl SqlSession for SqliteSession {
    fn driver(&self) -> DriverType {
        DriverType::Sqlite
    }

    fn open(&mut self) -> DriverResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        debug!(path = %self.path, "sqlite connection opened");
        self.connection = Some(conn);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            // On failure rusqlite hands the connection back; dropping it
            // releases the handle anyway.
            if let Err((_conn, err)) = conn.close() {
                warn!(path = %self.path, error = %err, "sqlite close reported an error");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn is_valid(&self) -> bool {
        self.connection
            .as_ref()
            .map(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).is_ok())
            .unwrap_or(false)
    }

    fn exec_direct(&mut self, sql: &str) -> DriverResult<()> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> DriverResult<()> {
        // The compiled statement stays in rusqlite's cache for `execute`.
        self.connection()?.prepare_cached(sql)?;
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<QueryOutput> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        if columns.is_empty() {
            let changed = stmt.execute(params_from_iter(params.iter()))?;
            return Ok(QueryOutput::affected(changed as u64));
        }

        let column_count = columns.len();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(value_from_ref(row.get_ref(i)?));
            }
            collected.push(values);
        }
        Ok(QueryOutput::with_rows(columns, collected))
    }

    fn begin(&mut self) -> DriverResult<()> {
        self.exec_direct("BEGIN")
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.exec_direct("COMMIT")
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.exec_direct("ROLLBACK")
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}
