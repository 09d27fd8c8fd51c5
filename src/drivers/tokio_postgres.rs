use std::error::Error;
use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row, SimpleQueryMessage};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConnectionParameters, Driver};
use crate::error::{DbError, Result};
use crate::traits::DatabaseDriver;
use crate::types::{RawQueryResult, SqlValue};

type BoxError = Box<dyn Error + Sync + Send>;

/// PostgreSQL driver implementation using tokio-postgres.
pub struct TokioPostgresDriver {
    client: RwLock<Option<Client>>,
    connection_task: Mutex<Option<JoinHandle<()>>>,
}

impl TokioPostgresDriver {
    /// Connect to a PostgreSQL database.
    pub async fn connect(params: &ConnectionParameters) -> Result<Self> {
        let (client, connection) = pg_config(params)
            .connect(NoTls)
            .await
            .map_err(|e| DbError::ConnectionFailed(describe(&e)))?;

        // Spawn the connection handler
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        info!(host = %params.host, port = params.port, "Connected to PostgreSQL");

        Ok(Self {
            client: RwLock::new(Some(client)),
            connection_task: Mutex::new(Some(connection_task)),
        })
    }
}

/// Client configuration built field by field rather than from the DSN text,
/// where an empty password would swallow the key after it.
fn pg_config(params: &ConnectionParameters) -> Config {
    let mut config = Config::new();
    config
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .ssl_mode(SslMode::Disable);
    if !params.password.is_empty() {
        config.password(&params.password);
    }
    if !params.database.is_empty() {
        config.dbname(&params.database);
    }
    config
}

#[async_trait]
impl DatabaseDriver for TokioPostgresDriver {
    fn dialect(&self) -> Driver {
        Driver::Postgres
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(DbError::ConnectionClosed)?;

        debug!(sql, params = params.len(), "Executing PostgreSQL statement");

        let bound: Vec<BoundValue<'_>> = params.iter().map(BoundValue).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|b| b as &(dyn ToSql + Sync)).collect();

        let statement = match client.prepare(sql).await {
            Ok(statement) => statement,
            // Batches of several statements cannot be prepared
            Err(e) if params.is_empty() && e.code() == Some(&SqlState::SYNTAX_ERROR) => {
                debug!(error = %describe(&e), "Running statement with the simple query protocol");
                return simple_query(client, sql).await;
            }
            Err(e) => return Err(DbError::QueryFailed(describe(&e))),
        };

        let rows = client
            .query(&statement, &param_refs)
            .await
            .map_err(|e| DbError::QueryFailed(describe(&e)))?;

        // Column names come from the statement so empty results keep them
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let result_rows: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(i, col)| row_value(row, i, col.name(), col.type_()))
                    .collect()
            })
            .collect();

        Ok(RawQueryResult::new(columns, result_rows))
    }

    async fn execute_update(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(DbError::ConnectionClosed)?;

        debug!(sql, params = params.len(), "Executing PostgreSQL update");

        if params.is_empty() {
            let messages = client
                .simple_query(sql)
                .await
                .map_err(|e| DbError::QueryFailed(describe(&e)))?;
            return Ok(affected_rows(&messages));
        }

        let bound: Vec<BoundValue<'_>> = params.iter().map(BoundValue).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|b| b as &(dyn ToSql + Sync)).collect();

        client
            .execute(sql, &param_refs)
            .await
            .map_err(|e| DbError::QueryFailed(describe(&e)))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the client lets the connection future finish
        if self.client.write().await.take().is_none() {
            return Ok(());
        }

        if let Some(task) = self.connection_task.lock().await.take() {
            task.await
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        }

        info!("PostgreSQL connection closed");
        Ok(())
    }
}

/// Runs `sql` as-is and keeps the first result set that has columns.
/// Values arrive in their text form.
async fn simple_query(client: &Client, sql: &str) -> Result<RawQueryResult> {
    let messages = client
        .simple_query(sql)
        .await
        .map_err(|e| DbError::QueryFailed(describe(&e)))?;

    let events = messages.into_iter().filter_map(|message| match message {
        SimpleQueryMessage::RowDescription(columns) => Some(SimpleEvent::Columns(
            columns.iter().map(|c| c.name().to_string()).collect(),
        )),
        SimpleQueryMessage::Row(row) => Some(SimpleEvent::Row(
            (0..row.len())
                .map(|i| row.get(i).map_or(SqlValue::Null, SqlValue::from))
                .collect(),
        )),
        SimpleQueryMessage::CommandComplete(_) => Some(SimpleEvent::Complete),
        _ => None,
    });

    Ok(first_result_set(events))
}

/// Simple-protocol response messages, reduced to what result collection needs.
#[derive(Debug)]
enum SimpleEvent {
    Columns(Vec<String>),
    Row(Vec<SqlValue>),
    Complete,
}

fn first_result_set(events: impl IntoIterator<Item = SimpleEvent>) -> RawQueryResult {
    let mut result: Option<RawQueryResult> = None;
    for event in events {
        match event {
            SimpleEvent::Columns(columns) => {
                result.get_or_insert_with(|| RawQueryResult::new(columns, Vec::new()));
            }
            SimpleEvent::Row(values) => {
                if let Some(result) = result.as_mut() {
                    result.rows.push(values);
                }
            }
            SimpleEvent::Complete if result.is_some() => break,
            SimpleEvent::Complete => {}
        }
    }
    result.unwrap_or_else(RawQueryResult::empty)
}

fn affected_rows(messages: &[SimpleQueryMessage]) -> u64 {
    messages
        .iter()
        .map(|message| match message {
            SimpleQueryMessage::CommandComplete(n) => *n,
            _ => 0,
        })
        .sum()
}

/// Server errors carry their message on the `DbError` source, not on the
/// top-level display.
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => db.to_string(),
        None => e.to_string(),
    }
}

/// Binds a `SqlValue` to whatever type the server inferred for its placeholder.
#[derive(Debug)]
struct BoundValue<'a>(&'a SqlValue);

impl ToSql for BoundValue<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if let Kind::Domain(base) = ty.kind() {
            return self.to_sql(base, out);
        }

        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }
        let mismatch = || -> BoxError { format!("cannot bind {:?} as {}", value, ty).into() };

        match *ty {
            Type::BOOL => as_bool(value).ok_or_else(mismatch)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(as_i64(value).ok_or_else(mismatch)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(as_i64(value).ok_or_else(mismatch)?)?.to_sql(ty, out),
            Type::INT8 => as_i64(value).ok_or_else(mismatch)?.to_sql(ty, out),
            Type::OID => u32::try_from(as_i64(value).ok_or_else(mismatch)?)?.to_sql(ty, out),
            Type::FLOAT4 => (as_f64(value).ok_or_else(mismatch)? as f32).to_sql(ty, out),
            Type::FLOAT8 => as_f64(value).ok_or_else(mismatch)?.to_sql(ty, out),
            Type::NUMERIC => Decimal::from_str(&value.to_string())?.to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                value.to_string().to_sql(ty, out)
            }
            Type::JSON | Type::JSONB => {
                let json = match value {
                    SqlValue::Text(s) => serde_json::from_str(s)
                        .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
                    other => serde_json::to_value(other)?,
                };
                json.to_sql(ty, out)
            }
            Type::UUID => Uuid::parse_str(as_text(value).ok_or_else(mismatch)?)?.to_sql(ty, out),
            Type::DATE => {
                NaiveDate::parse_from_str(as_text(value).ok_or_else(mismatch)?, "%Y-%m-%d")?
                    .to_sql(ty, out)
            }
            Type::TIME => {
                NaiveTime::from_str(as_text(value).ok_or_else(mismatch)?)?.to_sql(ty, out)
            }
            Type::TIMESTAMP => {
                parse_timestamp(as_text(value).ok_or_else(mismatch)?)?.to_sql(ty, out)
            }
            Type::TIMESTAMPTZ => {
                DateTime::parse_from_rfc3339(as_text(value).ok_or_else(mismatch)?)?.to_sql(ty, out)
            }
            _ => match ty.kind() {
                // Enum labels travel as their text
                Kind::Enum(_) => value.to_string().as_str().to_sql(ty, out),
                _ => Err(mismatch()),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn as_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int32(i) => Some(*i != 0),
        SqlValue::Int64(i) => Some(*i != 0),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_i64(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int32(i) => Some(i64::from(*i)),
        SqlValue::Int64(i) => Some(*i),
        // i64::MAX as f64 is 2^63, one past the range
        SqlValue::Float64(f)
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
        {
            Some(*f as i64)
        }
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Int32(i) => Some(f64::from(*i)),
        SqlValue::Int64(i) => Some(*i as f64),
        SqlValue::Float64(f) => Some(*f),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &SqlValue) -> Option<&str> {
    match value {
        SqlValue::Text(s) => Some(s.trim()),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
}

/// Convert a row value at a given index to a SqlValue.
/// Types without a typed decoder, and values a typed decoder rejects such as
/// NUMERIC beyond `Decimal` range, come back as text.
fn row_value(row: &Row, index: usize, column: &str, type_: &Type) -> SqlValue {
    let decoded: std::result::Result<Option<SqlValue>, tokio_postgres::Error> = match *type_ {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(index)
            .map(|v| v.map(SqlValue::Bool)),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map(|v| v.map(|i| SqlValue::Int32(i32::from(i)))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map(|v| v.map(SqlValue::Int32)),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(index)
            .map(|v| v.map(SqlValue::Int64)),
        Type::OID => row
            .try_get::<_, Option<u32>>(index)
            .map(|v| v.map(|i| SqlValue::Int64(i64::from(i)))),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .map(|v| v.map(|f| SqlValue::Float64(f64::from(f)))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(index)
            .map(|v| v.map(SqlValue::Float64)),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(index)
            .map(|v| v.map(|d| SqlValue::Text(d.to_string()))),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => row
            .try_get::<_, Option<String>>(index)
            .map(|v| v.map(SqlValue::Text)),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(index)
            .map(|v| v.map(|b| SqlValue::from_bytes(&b))),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(index)
            .map(|v| v.map(|j| SqlValue::Text(j.to_string()))),
        Type::UUID => row
            .try_get::<_, Option<Uuid>>(index)
            .map(|v| v.map(|u| SqlValue::Text(u.to_string()))),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(index)
            .map(|v| v.map(|d| SqlValue::Text(d.to_string()))),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(index)
            .map(|v| v.map(|t| SqlValue::Text(t.to_string()))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map(|v| v.map(|t| SqlValue::Text(t.to_string()))),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map(|v| v.map(|t| SqlValue::Text(t.to_rfc3339()))),
        _ => text_value(row, index),
    };

    let decoded = decoded.or_else(|e| {
        debug!(column, column_type = %type_, error = %e, "Reading PostgreSQL column as text");
        text_value(row, index)
    });

    match decoded {
        Ok(value) => value.unwrap_or(SqlValue::Null),
        Err(e) => {
            warn!(column, error = %e, "Failed to decode PostgreSQL column, returning NULL");
            SqlValue::Null
        }
    }
}

fn text_value(
    row: &Row,
    index: usize,
) -> std::result::Result<Option<SqlValue>, tokio_postgres::Error> {
    row.try_get::<_, Option<PgText>>(index)
        .map(|v| v.map(|t| SqlValue::Text(t.0)))
}

/// Text rendering of a binary-format value, close to what the server's
/// own output function prints.
#[derive(Debug)]
struct PgText(String);

impl<'a> FromSql<'a> for PgText {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        let text = match ty.kind() {
            Kind::Domain(base) => return Self::from_sql(base, raw),
            Kind::Array(_) => array_text(Vec::<Option<PgText>>::from_sql(ty, raw)?),
            Kind::Enum(_) => String::from_utf8(raw.to_vec())?,
            _ => match *ty {
                Type::NUMERIC => numeric_text(raw)?,
                Type::INTERVAL => interval_text(raw)?,
                Type::MONEY => money_text(<i64 as FromSql>::from_sql(ty, raw)?),
                Type::INET | Type::CIDR => inet_text(raw)?,
                _ => plain_text(raw),
            },
        };
        Ok(PgText(text))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn array_text(elements: Vec<Option<PgText>>) -> String {
    let elements: Vec<String> = elements
        .into_iter()
        .map(|element| match element {
            None => "NULL".to_string(),
            Some(PgText(s)) if needs_array_quotes(&s) => {
                format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            Some(PgText(s)) => s,
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

fn needs_array_quotes(s: &str) -> bool {
    s.is_empty()
        || s.eq_ignore_ascii_case("null")
        || s.chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | ',' | '"' | '\\'))
}

/// NUMERIC on the wire: digit count, weight, sign and display scale, then
/// base-10000 digits, most significant first.
fn numeric_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    let word = |i: usize| -> std::result::Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "invalid numeric value".into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<std::result::Result<Vec<u16>, BoxError>>()?;
    let digit = |i: i32| match usize::try_from(i) {
        Ok(i) => digits.get(i).copied().unwrap_or(0),
        Err(_) => 0,
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// INTERVAL on the wire: microseconds, days, months.
fn interval_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    if raw.len() != 16 {
        return Err("invalid interval value".into());
    }
    let micros = i64::from_be_bytes(raw[0..8].try_into()?);
    let days = i32::from_be_bytes(raw[8..12].try_into()?);
    let months = i32::from_be_bytes(raw[12..16].try_into()?);

    let plural = |n: i32| if n.abs() == 1 { "" } else { "s" };
    let mut parts = Vec::new();
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        parts.push(format!("{} year{}", years, plural(years)));
    }
    if months != 0 {
        parts.push(format!("{} mon{}", months, plural(months)));
    }
    if days != 0 {
        parts.push(format!("{} day{}", days, plural(days)));
    }
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let total = micros.unsigned_abs();
        let (secs, fraction) = (total / 1_000_000, total % 1_000_000);
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        if fraction != 0 {
            time.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(time);
    }
    Ok(parts.join(" "))
}

fn money_text(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// INET and CIDR share a layout: family, netmask bits, cidr flag, length, address.
fn inet_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    let addr = <IpAddr as FromSql>::from_sql(&Type::INET, raw)?;
    let (bits, is_cidr) = match raw {
        [_, bits, is_cidr, ..] => (*bits, *is_cidr != 0),
        _ => return Err("invalid inet value".into()),
    };
    let full = if addr.is_ipv4() { 32 } else { 128 };
    Ok(if is_cidr || bits != full {
        format!("{}/{}", addr, bits)
    } else {
        addr.to_string()
    })
}

/// Text-like types (xml, citext and other extension types) are sent as their
/// text; anything else that is not printable is shown as hex, like bytea.
fn plain_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) if !s.chars().any(|c| c.is_control() && !c.is_whitespace()) => s.to_string(),
        _ => format!(
            "\\x{}",
            raw.iter().map(|b| format!("{:02x}", b)).collect::<String>()
        ),
    }
}
