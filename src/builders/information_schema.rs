use crate::config::Driver;
use crate::types::SqlValue;

/// Query listing a table's column names in declared order.
///
/// Only Postgres is supported; other dialects yield `None`.
pub fn column_names_query(dialect: Driver, table: &str) -> Option<(String, Vec<SqlValue>)> {
    match dialect {
        Driver::Postgres => Some((
            "SELECT column_name::text AS column_name FROM information_schema.columns \
             WHERE table_name = $1::text ORDER BY ordinal_position"
                .to_string(),
            vec![SqlValue::from(table)],
        )),
        Driver::SqlServer => None,
    }
}
