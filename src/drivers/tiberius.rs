use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{AuthMethod, Client, ColumnData, Config, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::{ConnectionParameters, Driver};
use crate::error::{DbError, Result};
use crate::traits::DatabaseDriver;
use crate::types::{RawQueryResult, SqlValue};

/// SQL Server driver implementation using tiberius.
pub struct TiberiusDriver {
    client: Mutex<Option<Client<Compat<TcpStream>>>>,
}

impl TiberiusDriver {
    /// Connect to SQL Server with SQL authentication.
    pub async fn connect(params: &ConnectionParameters) -> Result<Self> {
        let mut config = Config::new();
        config.host(&params.host);
        config.port(params.port);
        config.authentication(AuthMethod::sql_server(&params.user, &params.password));
        if !params.database.is_empty() {
            config.database(&params.database);
        }
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(host = %params.host, port = params.port, "Connected to SQL Server");

        Ok(Self {
            client: Mutex::new(Some(client)),
        })
    }
}

#[async_trait]
impl DatabaseDriver for TiberiusDriver {
    fn dialect(&self) -> Driver {
        Driver::SqlServer
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DbError::ConnectionClosed)?;

        debug!(sql, params = params.len(), "Executing SQL Server statement");

        let bound: Vec<TdsValue<'_>> = params.iter().map(TdsValue).collect();
        let param_refs: Vec<&dyn ToSql> = bound.iter().map(|b| b as &dyn ToSql).collect();

        let rows = client
            .query(sql, &param_refs)
            .await
            .map_err(|e| DbError::QueryFailed(e.to_string()))?
            .into_first_result()
            .await
            .map_err(|e| DbError::QueryFailed(e.to_string()))?;

        // Extract column names
        let columns: Vec<String> = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            None => Vec::new(),
        };

        let result_rows: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| {
                row.cells()
                    .enumerate()
                    .map(|(i, (col, data))| cell_value(row, i, col.name(), data))
                    .collect()
            })
            .collect();

        Ok(RawQueryResult::new(columns, result_rows))
    }

    async fn execute_update(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DbError::ConnectionClosed)?;

        debug!(sql, params = params.len(), "Executing SQL Server update");

        let bound: Vec<TdsValue<'_>> = params.iter().map(TdsValue).collect();
        let param_refs: Vec<&dyn ToSql> = bound.iter().map(|b| b as &dyn ToSql).collect();

        let result = client
            .execute(sql, &param_refs)
            .await
            .map_err(|e| DbError::QueryFailed(e.to_string()))?;

        Ok(result.rows_affected().iter().sum())
    }

    async fn close(&self) -> Result<()> {
        if let Some(client) = self.client.lock().await.take() {
            client
                .close()
                .await
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
            info!("SQL Server connection closed");
        }
        Ok(())
    }
}

struct TdsValue<'a>(&'a SqlValue);

impl ToSql for TdsValue<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            SqlValue::Int32(i) => ColumnData::I32(Some(*i)),
            SqlValue::Int64(i) => ColumnData::I64(Some(*i)),
            SqlValue::Float64(f) => ColumnData::F64(Some(*f)),
            SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
        }
    }
}

/// Convert one cell of a tiberius row to a SqlValue.
fn cell_value(
    row: &tiberius::Row,
    index: usize,
    column: &str,
    data: &ColumnData<'static>,
) -> SqlValue {
    let value = match data {
        ColumnData::U8(v) => v.as_ref().map(|i| SqlValue::Int32(i32::from(*i))),
        ColumnData::I16(v) => v.as_ref().map(|i| SqlValue::Int32(i32::from(*i))),
        ColumnData::I32(v) => v.as_ref().map(|i| SqlValue::Int32(*i)),
        ColumnData::I64(v) => v.as_ref().map(|i| SqlValue::Int64(*i)),
        ColumnData::F32(v) => v.as_ref().map(|f| SqlValue::Float64(f64::from(*f))),
        ColumnData::F64(v) => v.as_ref().map(|f| SqlValue::Float64(*f)),
        ColumnData::Bit(v) => v.as_ref().map(|b| SqlValue::Bool(*b)),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.as_ref().map(|g| SqlValue::Text(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::from_bytes(b)),
        ColumnData::Numeric(v) => v.as_ref().map(|n| SqlValue::Text(n.to_string())),
        _ => temporal_value(row, index).or_else(|| {
            warn!(column, "Unsupported SQL Server column type, returning NULL");
            None
        }),
    };

    value.unwrap_or(SqlValue::Null)
}

/// Date and time columns, decoded through chrono.
/// `None` means the column is not a temporal type.
fn temporal_value(row: &tiberius::Row, index: usize) -> Option<SqlValue> {
    if let Ok(v) = row.try_get::<NaiveDateTime, _>(index) {
        return Some(v.map_or(SqlValue::Null, |t| SqlValue::Text(t.to_string())));
    }
    if let Ok(v) = row.try_get::<DateTime<FixedOffset>, _>(index) {
        return Some(v.map_or(SqlValue::Null, |t| SqlValue::Text(t.to_rfc3339())));
    }
    if let Ok(v) = row.try_get::<NaiveDate, _>(index) {
        return Some(v.map_or(SqlValue::Null, |d| SqlValue::Text(d.to_string())));
    }
    if let Ok(v) = row.try_get::<NaiveTime, _>(index) {
        return Some(v.map_or(SqlValue::Null, |t| SqlValue::Text(t.to_string())));
    }
    None
}
