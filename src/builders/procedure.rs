use crate::config::Driver;
use crate::types::SqlValue;

/// A stored procedure invocation with positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCall {
    name: String,
    params: Vec<SqlValue>,
}

impl ProcedureCall {
    pub fn new<V: Into<SqlValue>>(
        name: impl Into<String>,
        params: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the call expression and its parameters.
    /// Postgres uses `CALL name($1, ...)`, SQL Server `EXEC name @P1, ...`.
    pub fn build_sql(&self, dialect: Driver) -> (String, Vec<SqlValue>) {
        let placeholders = (1..=self.params.len())
            .map(|n| dialect.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ");
        let name = dialect.quote_qualified(&self.name);

        let sql = match dialect {
            Driver::Postgres => format!("CALL {}({})", name, placeholders),
            Driver::SqlServer if placeholders.is_empty() => format!("EXEC {}", name),
            Driver::SqlServer => format!("EXEC {} {}", name, placeholders),
        };

        (sql, self.params.clone())
    }
}
