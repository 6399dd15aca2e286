//! PostgreSQL session backed by the blocking `postgres` client.

use super::driver::{DriverError, QueryOutput, SqlSession, SqlValue};
use crate::config::{DbhConfig, DriverType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{FromSql, ToSql, Type};
use postgres::{Client, NoTls, Row};
use std::error::Error;
use tracing::{debug, warn};

type DriverResult<T> = std::result::Result<T, DriverError>;

impl From<postgres::Error> for DriverError {
    fn from(err: postgres::Error) -> Self {
        // The database's own message is more useful than the client wrapper.
        match err.as_db_error() {
            Some(db) => DriverError::new(format!("{}: {}", db.code().code(), db.message())),
            None => DriverError::new(err.to_string()),
        }
    }
}

/// A session onto one PostgreSQL database.
pub struct PostgresSession {
    params: postgres::Config,
    client: Option<Client>,
}

impl PostgresSession {
    pub fn new(config: &DbhConfig) -> Self {
        let mut params = postgres::Config::new();
        params.host(&config.host).dbname(&config.name);
        if config.port != 0 {
            params.port(config.port);
        }
        if !config.user.is_empty() {
            params.user(&config.user);
        }
        if !config.password.is_empty() {
            params.password(&config.password);
        }
        params.application_name(&config.connection_name);
        PostgresSession { params, client: None }
    }

    fn client(&mut self) -> DriverResult<&mut Client> {
        self.client.as_mut().ok_or_else(DriverError::not_open)
    }
}

impl SqlSession for PostgresSession {
    fn driver(&self) -> DriverType {
        DriverType::Postgres
    }

    fn open(&mut self) -> DriverResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let client = self.params.connect(NoTls)?;
        debug!("postgres connection opened");
        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(err) = client.close() {
                warn!(error = %err, "postgres close reported an error");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn is_valid(&self) -> bool {
        self.client
            .as_ref()
            .map(|client| !client.is_closed())
            .unwrap_or(false)
    }

    fn exec_direct(&mut self, sql: &str) -> DriverResult<()> {
        self.client()?.batch_execute(sql)?;
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> DriverResult<()> {
        self.client()?.prepare(sql)?;
        Ok(())
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<QueryOutput> {
        let client = self.client()?;
        let stmt = client.prepare(sql)?;
        if stmt.params().len() != params.len() {
            return Err(DriverError::new(format!(
                "statement expects {} parameters, {} bound",
                stmt.params().len(),
                params.len()
            )));
        }
        let bound = params
            .iter()
            .zip(stmt.params())
            .map(|(value, ty)| PgParam::convert(value, ty).map(PgParam::boxed))
            .collect::<DriverResult<Vec<_>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|b| b.as_ref()).collect();

        if stmt.columns().is_empty() {
            let changed = client.execute(&stmt, &refs)?;
            return Ok(QueryOutput::affected(changed));
        }

        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let rows = client.query(&stmt, &refs)?;
        let collected = rows
            .iter()
            .map(row_values)
            .collect::<DriverResult<Vec<_>>>()?;
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

/// Wire type a bound value is converted to, picked from the parameter's
/// declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Bytes,
    Text,
}

impl ParamKind {
    fn of(ty: &Type) -> ParamKind {
        if *ty == Type::BOOL {
            ParamKind::Bool
        } else if *ty == Type::INT2 {
            ParamKind::Int2
        } else if *ty == Type::INT4 {
            ParamKind::Int4
        } else if *ty == Type::INT8 {
            ParamKind::Int8
        } else if *ty == Type::FLOAT4 {
            ParamKind::Float4
        } else if *ty == Type::FLOAT8 {
            ParamKind::Float8
        } else if *ty == Type::BYTEA {
            ParamKind::Bytes
        } else {
            ParamKind::Text
        }
    }
}

/// A `SqlValue` converted to the Rust type the server expects.
#[derive(Debug, Clone, PartialEq)]
enum PgParam {
    Null(ParamKind),
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Bytes(Vec<u8>),
    Text(String),
}

impl PgParam {
    fn convert(value: &SqlValue, ty: &Type) -> DriverResult<PgParam> {
        let mismatch = || {
            DriverError::new(format!(
                "cannot bind {} to a parameter of type {}",
                value, ty
            ))
        };
        let kind = ParamKind::of(ty);
        let param = match (kind, value) {
            (kind, SqlValue::Null) => PgParam::Null(kind),
            (ParamKind::Bool, SqlValue::Integer(v)) => PgParam::Bool(*v != 0),
            (ParamKind::Int2, SqlValue::Integer(v)) => {
                PgParam::Int2(i16::try_from(*v).map_err(|_| mismatch())?)
            }
            (ParamKind::Int4, SqlValue::Integer(v)) => {
                PgParam::Int4(i32::try_from(*v).map_err(|_| mismatch())?)
            }
            (ParamKind::Int8, SqlValue::Integer(v)) => PgParam::Int8(*v),
            (ParamKind::Float4, SqlValue::Integer(v)) => PgParam::Float4(*v as f32),
            (ParamKind::Float4, SqlValue::Real(v)) => PgParam::Float4(*v as f32),
            (ParamKind::Float8, SqlValue::Integer(v)) => PgParam::Float8(*v as f64),
            (ParamKind::Float8, SqlValue::Real(v)) => PgParam::Float8(*v),
            (ParamKind::Bytes, SqlValue::Blob(v)) => PgParam::Bytes(v.clone()),
            (ParamKind::Text, SqlValue::Text(v)) => PgParam::Text(v.clone()),
            (ParamKind::Text, SqlValue::Integer(v)) => PgParam::Text(v.to_string()),
            (ParamKind::Text, SqlValue::Real(v)) => PgParam::Text(v.to_string()),
            _ => return Err(mismatch()),
        };
        Ok(param)
    }

    fn boxed(self) -> Box<dyn ToSql + Sync> {
        match self {
            PgParam::Null(kind) => match kind {
                ParamKind::Bool => Box::new(None::<bool>),
                ParamKind::Int2 => Box::new(None::<i16>),
                ParamKind::Int4 => Box::new(None::<i32>),
                ParamKind::Int8 => Box::new(None::<i64>),
                ParamKind::Float4 => Box::new(None::<f32>),
                ParamKind::Float8 => Box::new(None::<f64>),
                ParamKind::Bytes => Box::new(None::<Vec<u8>>),
                ParamKind::Text => Box::new(None::<String>),
            },
            PgParam::Bool(v) => Box::new(v),
            PgParam::Int2(v) => Box::new(v),
            PgParam::Int4(v) => Box::new(v),
            PgParam::Int8(v) => Box::new(v),
            PgParam::Float4(v) => Box::new(v),
            PgParam::Float8(v) => Box::new(v),
            PgParam::Bytes(v) => Box::new(v),
            PgParam::Text(v) => Box::new(v),
        }
    }
}

/// `numeric` read from its binary form as decimal text.
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        numeric_to_string(raw).map(NumericText)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Renders the binary `numeric` layout: digit count, weight, sign and
/// display scale, then base-10000 digits.
fn numeric_to_string(raw: &[u8]) -> Result<String, Box<dyn Error + Sync + Send>> {
    if raw.len() < 8 {
        return Err("numeric value is truncated".into());
    }
    let word = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    let ndigits = word(0) as usize;
    let weight = i32::from(word(2) as i16);
    let sign = word(4);
    let dscale = word(6) as usize;
    if raw.len() < 8 + 2 * ndigits {
        return Err("numeric value is truncated".into());
    }
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digit = |index: i32| -> u16 {
        if index < 0 || index as usize >= ndigits {
            0
        } else {
            word(8 + 2 * index as usize)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for index in 1..=weight {
            out.push_str(&format!("{:04}", digit(index)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut index = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(index)));
            index += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

fn row_values(row: &Row) -> DriverResult<Vec<SqlValue>> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value: SqlValue = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)?.into()
        } else if *ty == Type::CHAR {
            row.try_get::<_, Option<i8>>(i)?.map(i64::from).into()
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?.map(i64::from).into()
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?.map(i64::from).into()
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.into()
        } else if *ty == Type::OID {
            row.try_get::<_, Option<u32>>(i)?.map(i64::from).into()
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)?.map(f64::from).into()
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)?.into()
        } else if *ty == Type::BYTEA {
            row.try_get::<_, Option<Vec<u8>>>(i)?.into()
        } else if *ty == Type::NUMERIC {
            row.try_get::<_, Option<NumericText>>(i)?.map(|n| n.0).into()
        } else if *ty == Type::DATE {
            row.try_get::<_, Option<NaiveDate>>(i)?.map(|v| v.to_string()).into()
        } else if *ty == Type::TIME {
            row.try_get::<_, Option<NaiveTime>>(i)?.map(|v| v.to_string()).into()
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(i)?.map(|v| v.to_string()).into()
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(i)?
                .map(|v| v.to_rfc3339())
                .into()
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<uuid::Uuid>>(i)?.map(|v| v.to_string()).into()
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<serde_json::Value>>(i)?
                .map(|v| v.to_string())
                .into()
        } else if <String as FromSql>::accepts(ty) {
            row.try_get::<_, Option<String>>(i)?.into()
        } else {
            return Err(DriverError::new(format!(
                "column `{}` has unsupported type {}",
                column.name(),
                ty
            )));
        };
        values.push(value);
    }
    Ok(values)
}
