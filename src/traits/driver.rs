use async_trait::async_trait;

use crate::config::Driver;
use crate::error::Result;
use crate::types::{RawQueryResult, SqlValue};

/// Trait for database driver implementations.
/// Drivers are responsible for:
/// - Connecting to the database
/// - Converting SqlValue parameters to native types
/// - Executing queries and converting results to RawQueryResult
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Which SQL dialect this driver speaks.
    /// Statement builders use it for quoting and placeholders.
    fn dialect(&self) -> Driver;

    /// Execute a SQL query with the given parameters.
    /// Placeholders follow the dialect ($1 for Postgres, @P1 for SQL Server).
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<RawQueryResult>;

    /// Execute a statement for its side effects and return the affected row count.
    async fn execute_update(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Close the underlying handle. Later calls to `execute` fail with
    /// `DbError::ConnectionClosed`.
    async fn close(&self) -> Result<()>;
}
