use std::sync::Arc;

use tracing::{debug, info};

use crate::builders::{information_schema, InsertStatement, ProcedureCall};
use crate::config::{ConnectionParameters, Driver};
use crate::drivers::{TiberiusDriver, TokioPostgresDriver};
use crate::error::Result;
use crate::traits::DatabaseDriver;
use crate::types::{QueryResult, SqlValue};

/// Main entry point for dbconn.
/// Holds one open database handle and runs statements against it.
pub struct Connection {
    driver: Arc<dyn DatabaseDriver>,
}

impl Connection {
    /// Open a connection with the driver named in `params`.
    ///
    /// # Example
    /// ```ignore
    /// let params =
    ///     ConnectionParameters::new("postgres", "127.0.0.1", 5432, "postgres", "pw", "postgres")?;
    /// let conn = Connection::open(&params).await?;
    /// ```
    pub async fn open(params: &ConnectionParameters) -> Result<Self> {
        info!(
            driver = %params.driver,
            host = %params.host,
            database = %params.database,
            "Opening database connection"
        );

        let driver: Arc<dyn DatabaseDriver> = match params.driver {
            Driver::Postgres => Arc::new(TokioPostgresDriver::connect(params).await?),
            Driver::SqlServer => Arc::new(TiberiusDriver::connect(params).await?),
        };

        Ok(Self { driver })
    }

    /// Create a new connection over a custom driver.
    /// Useful for testing or using alternative database drivers.
    pub fn with_driver(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self { driver }
    }

    /// The SQL dialect of the underlying driver.
    pub fn dialect(&self) -> Driver {
        self.driver.dialect()
    }

    /// Run `sql` verbatim and collect every returned row.
    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.query_with(sql, &[]).await
    }

    /// Run `sql` with bound parameters.
    pub async fn query_with(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let raw = self.driver.execute(sql, params).await?;
        Ok(QueryResult::from_raw(raw))
    }

    /// Run a statement for its side effects.
    /// Returns the number of rows it affected.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.driver.execute_update(sql, &[]).await
    }

    /// Insert one row and return it as stored, identity column included.
    pub async fn insert(&self, statement: &InsertStatement) -> Result<QueryResult> {
        let (sql, params) = statement.build_sql(self.dialect())?;
        debug!(
            table = statement.table(),
            columns = statement.columns().len(),
            "Inserting row"
        );
        self.query_with(&sql, &params).await
    }

    /// Call a stored procedure with positional arguments.
    pub async fn call_procedure<V: Into<SqlValue>>(
        &self,
        name: &str,
        params: impl IntoIterator<Item = V>,
    ) -> Result<QueryResult> {
        let (sql, params) = ProcedureCall::new(name, params).build_sql(self.dialect());
        self.query_with(&sql, &params).await
    }

    /// Column names of `table` in declared order.
    /// Only Postgres exposes them; other drivers get an empty list.
    pub async fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let Some((sql, params)) = information_schema::column_names_query(self.dialect(), table)
        else {
            debug!(driver = %self.dialect(), table, "Column lookup not supported for driver");
            return Ok(Vec::new());
        };

        let result = self.query_with(&sql, &params).await?;
        Ok(result
            .rows()
            .into_iter()
            .filter_map(|row| match row.iter().next() {
                Some((_, SqlValue::Text(name))) => Some(name.clone()),
                _ => None,
            })
            .collect())
    }

    /// Close the underlying handle.
    pub async fn close(self) -> Result<()> {
        self.driver.close().await
    }
}
