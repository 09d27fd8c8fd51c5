use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{DbError, Result};
use crate::types::SqlValue;

/// Driver-agnostic raw result from a database query.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQueryResult {
    /// Column names in order
    pub columns: Vec<String>,
    /// Rows, where each row is a vector of values in column order
    pub rows: Vec<Vec<SqlValue>>,
}

impl RawQueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }
}

/// A single row result from a query.
/// Values are accessed by column name and keep the result set's column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Creates a new Row from column names and values.
    /// Surplus values without a column name are dropped. A repeated column
    /// name keeps its first position and takes the last value.
    pub(crate) fn new(columns: &[String], values: Vec<SqlValue>) -> Self {
        let mut row = Self {
            columns: Vec::with_capacity(values.len()),
            values: Vec::with_capacity(values.len()),
        };
        for (column, value) in columns.iter().zip(values) {
            match row.columns.iter().position(|c| c == column) {
                Some(i) => row.values[i] = value,
                None => {
                    row.columns.push(column.clone());
                    row.values.push(value);
                }
            }
        }
        row
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Result<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string()))
    }

    /// Returns all column names in this row, in order.
    pub fn columns(&self) -> Vec<&str> {
        self.columns.iter().map(|s| s.as_str()).collect()
    }

    /// Iterates over `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(|c| c.as_str())
            .zip(self.values.iter())
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Result of a query execution, containing zero or more rows.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Row>,
    row_count: Option<u64>,
}

impl QueryResult {
    /// Creates a QueryResult from a RawQueryResult.
    /// Repeated column names are listed once.
    pub fn from_raw(raw: RawQueryResult) -> Self {
        let row_count = Some(raw.rows.len() as u64);
        let rows = raw
            .rows
            .into_iter()
            .map(|values| Row::new(&raw.columns, values))
            .collect();
        let mut columns: Vec<String> = Vec::with_capacity(raw.columns.len());
        for column in raw.columns {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// Builds a result directly from rows, without a known row count.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.columns.clone())
            .unwrap_or_default();
        Self {
            columns,
            rows,
            row_count: None,
        }
    }

    /// Extracts a single row from the result.
    /// Returns an error if the result contains zero or more than one row.
    pub fn single_row(self) -> Result<Row> {
        if self.rows.len() != 1 {
            return Err(DbError::UnexpectedRowCount {
                expected: 1,
                actual: self.rows.len(),
            });
        }
        self.rows
            .into_iter()
            .next()
            .ok_or(DbError::UnexpectedRowCount {
                expected: 1,
                actual: 0,
            })
    }

    /// Returns all rows from the result.
    pub fn rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns a reference to the rows without consuming the result.
    pub fn rows_ref(&self) -> &[Row] {
        &self.rows
    }

    /// Returns the column names from this result.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Total number of rows reported by the driver, if known.
    pub fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    /// Returns the number of rows in this result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if this result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serializes the rows as a JSON array of objects keyed by column name.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.rows)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> RawQueryResult {
        RawQueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_row_get() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let row = Row::new(&columns, vec![SqlValue::from(1), SqlValue::from("John")]);

        assert_eq!(row.get("id").unwrap(), &SqlValue::Int32(1));
        assert_eq!(row.get("name").unwrap(), &SqlValue::from("John"));
        assert!(matches!(
            row.get("missing"),
            Err(DbError::ColumnNotFound(ref c)) if c == "missing"
        ));
    }

    #[test]
    fn test_to_json() {
        let result = QueryResult::from_raw(raw(
            &["id", "name"],
            vec![vec![SqlValue::from(1), SqlValue::from("a")]],
        ));
        assert_eq!(result.to_json().unwrap(), r#"[{"id":1,"name":"a"}]"#);
        assert_eq!(result.row_count(), Some(1));
    }

    #[test]
    fn test_to_json_keeps_column_order() {
        let result = QueryResult::from_raw(raw(
            &["zeta", "alpha"],
            vec![
                vec![SqlValue::Null, SqlValue::from(true)],
                vec![SqlValue::from(2.5), SqlValue::from(false)],
            ],
        ));
        assert_eq!(
            result.to_json().unwrap(),
            r#"[{"zeta":null,"alpha":true},{"zeta":2.5,"alpha":false}]"#
        );
    }

    #[test]
    fn test_empty_result_is_empty_array() {
        let result = QueryResult::from_raw(RawQueryResult::empty());
        assert!(result.is_empty());
        assert_eq!(result.to_json().unwrap(), "[]");
    }

    #[test]
    fn test_query_result_single_row() {
        let result = QueryResult::from_raw(raw(&["id"], vec![vec![SqlValue::from(1)]]));
        let row = result.single_row().unwrap();
        assert_eq!(row.get("id").unwrap(), &SqlValue::Int32(1));
    }

    #[test]
    fn test_query_result_single_row_error_on_empty() {
        let result = QueryResult::from_raw(raw(&["id"], vec![]));
        let err = result.single_row().unwrap_err();
        match err {
            DbError::UnexpectedRowCount { expected, actual } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 0);
            }
            _ => panic!("Expected UnexpectedRowCount error"),
        }
    }

    #[test]
    fn test_query_result_single_row_error_on_multiple() {
        let result = QueryResult::from_raw(raw(
            &["id"],
            vec![vec![SqlValue::from(1)], vec![SqlValue::from(2)]],
        ));
        let err = result.single_row().unwrap_err();
        match err {
            DbError::UnexpectedRowCount { expected, actual } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            _ => panic!("Expected UnexpectedRowCount error"),
        }
    }

    #[test]
    fn test_from_rows_has_no_row_count() {
        let columns = vec!["id".to_string()];
        let result = QueryResult::from_rows(vec![Row::new(&columns, vec![SqlValue::from(3)])]);
        assert_eq!(result.row_count(), None);
        assert_eq!(result.columns(), &["id".to_string()]);
    }

    #[test]
    fn test_duplicate_columns_keep_last_value() {
        let result = QueryResult::from_raw(raw(
            &["id", "name", "id"],
            vec![vec![SqlValue::from(1), SqlValue::from("a"), SqlValue::from(2)]],
        ));
        assert_eq!(result.columns(), &["id".to_string(), "name".to_string()]);
        assert_eq!(result.to_json().unwrap(), r#"[{"id":2,"name":"a"}]"#);

        let row = &result.rows_ref()[0];
        assert_eq!(row.get("id").unwrap(), &SqlValue::Int32(2));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_to_json_fails_on_nan() {
        let result = QueryResult::from_raw(raw(&["f"], vec![vec![SqlValue::from(f64::NAN)]]));
        assert!(matches!(result.to_json(), Err(DbError::Serialization(_))));
    }
}
