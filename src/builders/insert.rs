use crate::config::Driver;
use crate::error::{DbError, Result};
use crate::types::SqlValue;

/// An INSERT of one row: a table plus positionally paired columns and values.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    table: String,
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl InsertStatement {
    /// Creates a statement from parallel column and value lists.
    /// Returns an error if the lists differ in length or are empty.
    ///
    /// # Example
    /// ```
    /// use dbconn::{InsertStatement, SqlValue};
    ///
    /// let stmt = InsertStatement::new("t", ["a", "b"], [SqlValue::from(1), SqlValue::from("x")])
    ///     .unwrap();
    /// assert_eq!(
    ///     stmt.to_sql_string(),
    ///     r#"insert into "t" ("a", "b") values ('1', 'x')"#
    /// );
    /// ```
    pub fn new<C, V>(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = C>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self>
    where
        C: Into<String>,
        V: Into<SqlValue>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let values: Vec<SqlValue> = values.into_iter().map(Into::into).collect();

        if columns.len() != values.len() {
            return Err(DbError::InvalidStatement(format!(
                "{} column(s) but {} value(s)",
                columns.len(),
                values.len()
            )));
        }

        let stmt = Self {
            table: table.into(),
            columns,
            values,
        };
        stmt.validate()?;
        Ok(stmt)
    }

    /// Starts an empty statement for `table`; add pairs with [`value`](Self::value).
    pub fn into_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Adds a column and its value.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    fn validate(&self) -> Result<()> {
        if self.table.is_empty() {
            return Err(DbError::InvalidStatement("table name is empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(DbError::InvalidStatement(format!(
                "no columns given for insert into {}",
                self.table
            )));
        }
        Ok(())
    }

    /// Renders the statement with its values inlined as literals.
    /// For display and logging; execution always goes through [`build_sql`](Self::build_sql).
    pub fn to_sql_string(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| Driver::Postgres.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let values = self
            .values
            .iter()
            .map(|v| v.to_sql_literal())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "insert into {} ({}) values ({})",
            Driver::Postgres.quote_ident(&self.table),
            columns,
            values
        )
    }

    /// Build the parameterized SQL string and its parameters.
    /// The statement returns the inserted row.
    pub fn build_sql(&self, dialect: Driver) -> Result<(String, Vec<SqlValue>)> {
        self.validate()?;

        let mut sql = String::with_capacity(128);

        sql.push_str("INSERT INTO ");
        sql.push_str(&dialect.quote_qualified(&self.table));

        sql.push_str(" (");
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.quote_ident(col));
        }
        sql.push(')');

        if dialect == Driver::SqlServer {
            sql.push_str(" OUTPUT INSERTED.*");
        }

        sql.push_str(" VALUES (");
        for i in 0..self.values.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.placeholder(i + 1));
        }
        sql.push(')');

        if dialect == Driver::Postgres {
            sql.push_str(" RETURNING *");
        }

        Ok((sql, self.values.clone()))
    }
}
