//! MySQL session backed by the `mysql` client.

use super::driver::{DriverError, QueryOutput, SqlSession, SqlValue};
use crate::config::{DbhConfig, DriverType};
use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Params, Row, Value};
use tracing::debug;

type DriverResult<T> = std::result::Result<T, DriverError>;

impl From<mysql::Error> for DriverError {
    fn from(err: mysql::Error) -> Self {
        DriverError::new(err.to_string())
    }
}

/// A session onto one MySQL database.
pub struct MysqlSession {
    opts: Opts,
    conn: Option<Conn>,
    /// Set once the server connection failed underneath us
    broken: bool,
}

impl MysqlSession {
    pub fn new(config: &DbhConfig) -> Self {
        let mut builder = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .db_name(Some(config.name.clone()));
        if config.port != 0 {
            builder = builder.tcp_port(config.port);
        }
        if !config.user.is_empty() {
            builder = builder.user(Some(config.user.clone()));
        }
        if !config.password.is_empty() {
            builder = builder.pass(Some(config.password.clone()));
        }
        MysqlSession {
            opts: builder.into(),
            conn: None,
            broken: false,
        }
    }

    fn conn(&mut self) -> DriverResult<&mut Conn> {
        self.conn.as_mut().ok_or_else(DriverError::not_open)
    }

    fn track<T>(&mut self, result: mysql::Result<T>) -> DriverResult<T> {
        if let Err(mysql::Error::IoError(_)) = &result {
            self.broken = true;
        }
        result.map_err(DriverError::from)
    }
}

impl SqlSession for MysqlSession {
    fn driver(&self) -> DriverType {
        DriverType::Mysql
    }

    fn open(&mut self) -> DriverResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = Conn::new(self.opts.clone())?;
        debug!("mysql connection opened");
        self.conn = Some(conn);
        self.broken = false;
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the connection sends COM_QUIT.
        self.conn = None;
        self.broken = false;
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn is_valid(&self) -> bool {
        self.conn.is_some() && !self.broken
    }

    fn exec_direct(&mut self, sql: &str) -> DriverResult<()> {
        let result = self.conn()?.query_drop(sql);
        self.track(result)
    }

    fn prepare(&mut self, sql: &str) -> DriverResult<()> {
        let result = self.conn()?.prep(sql).map(|_| ());
        self.track(result)
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<QueryOutput> {
        let bound = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(to_mysql_value).collect())
        };

        let conn = self.conn()?;
        let result = conn.prep(sql).and_then(|stmt| {
            let columns: Vec<String> = stmt
                .columns()
                .iter()
                .map(|c| c.name_str().into_owned())
                .collect();
            let rows: Vec<Row> = conn.exec(&stmt, bound)?;
            Ok((columns, rows, conn.affected_rows()))
        });
        let (columns, rows, affected) = self.track(result)?;

        if columns.is_empty() {
            return Ok(QueryOutput::affected(affected));
        }
        let collected = rows
            .into_iter()
            .map(|row| row.unwrap().into_iter().map(from_mysql_value).collect())
            .collect();
        Ok(QueryOutput::with_rows(columns, collected))
    }

    fn begin(&mut self) -> DriverResult<()> {
        self.exec_direct("START TRANSACTION")
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.exec_direct("COMMIT")
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.exec_direct("ROLLBACK")
    }
}

fn to_mysql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Integer(v) => Value::Int(*v),
        SqlValue::Real(v) => Value::Double(*v),
        SqlValue::Text(v) => Value::Bytes(v.clone().into_bytes()),
        SqlValue::Blob(v) => Value::Bytes(v.clone()),
    }
}

fn from_mysql_value(value: Value) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::Integer(v),
        Value::UInt(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => SqlValue::Text(v.to_string()),
        },
        Value::Float(v) => SqlValue::Real(v.into()),
        Value::Double(v) => SqlValue::Real(v),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => SqlValue::Text(text),
            Err(err) => SqlValue::Blob(err.into_bytes()),
        },
        Value::Date(year, month, day, hour, minute, second, micros) => SqlValue::Text(format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
            year, month, day, hour, minute, second, micros
        )),
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = u64::from(days) * 24 + u64::from(hours);
            SqlValue::Text(format!(
                "{}{:02}:{:02}:{:02}.{:06}",
                if negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds,
                micros
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_mapping() {
        assert_eq!(from_mysql_value(Value::Int(4)), SqlValue::Integer(4));
        assert_eq!(
            from_mysql_value(Value::Bytes(b"abc".to_vec())),
            SqlValue::Text("abc".into())
        );
        assert_eq!(
            from_mysql_value(Value::Bytes(vec![0xff, 0xfe])),
            SqlValue::Blob(vec![0xff, 0xfe])
        );
        assert_eq!(
            from_mysql_value(Value::Time(true, 1, 2, 3, 4, 0)),
            SqlValue::Text("-26:03:04.000000".into())
        );
        assert_eq!(to_mysql_value(&SqlValue::Null), Value::NULL);
    }

    #[test]
    fn test_closed_session_reports_not_open() {
        let mut session = MysqlSession::new(&DbhConfig::mysql("localhost", "app"));
        assert!(!session.is_open());
        assert!(!session.is_valid());
        assert_eq!(session.commit().unwrap_err(), DriverError::not_open());
    }
}
