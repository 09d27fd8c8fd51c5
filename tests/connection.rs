use std::sync::Arc;

use dbconn::drivers::{InMemoryTestDriver, InMemoryTestResponseBuilder};
use dbconn::error::DbError;
use dbconn::traits::DatabaseDriver;
use dbconn::types::SqlValue;
use dbconn::{Connection, Driver, InsertStatement};

fn connect(driver: &Arc<InMemoryTestDriver>) -> Connection {
    let driver: Arc<dyn DatabaseDriver> = Arc::clone(driver) as Arc<dyn DatabaseDriver>;
    Connection::with_driver(driver)
}

#[tokio::test]
async fn test_query_runs_sql_verbatim() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["id", "name"])
                .values(vec![SqlValue::from(1), SqlValue::from("a")])
                .build(),
        ),
    );
    let conn = connect(&in_memory_test_driver);

    let result = conn.query("select * from golangtest").await.unwrap();

    in_memory_test_driver.assert_last_query("select * from golangtest", &[]);
    in_memory_test_driver.assert_query_count(1);

    assert_eq!(result.row_count(), Some(1));
    assert_eq!(result.to_json().unwrap(), r#"[{"id":1,"name":"a"}]"#);
}

#[tokio::test]
async fn test_query_error_propagates_unchanged() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_error(
        DbError::QueryFailed("relation \"missing\" does not exist".to_string()),
    ));
    let conn = connect(&in_memory_test_driver);

    let err = conn.query("select * from missing").await.unwrap_err();

    match err {
        DbError::QueryFailed(msg) => assert_eq!(msg, "relation \"missing\" does not exist"),
        other => panic!("Expected QueryFailed error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_query_with_binds_params() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new());
    let conn = connect(&in_memory_test_driver);

    let result = conn
        .query_with(
            "SELECT id FROM users WHERE name = $1",
            &[SqlValue::from("Bob")],
        )
        .await
        .unwrap();

    in_memory_test_driver.assert_last_query(
        "SELECT id FROM users WHERE name = $1",
        &[SqlValue::Text("Bob".to_string())],
    );
    assert!(result.is_empty());
    assert_eq!(result.to_json().unwrap(), "[]");
}

#[tokio::test]
async fn test_insert_returns_inserted_row() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["id", "a", "b"])
                .values(vec![
                    SqlValue::Int64(42),
                    SqlValue::from(1),
                    SqlValue::from("x"),
                ])
                .build(),
        ),
    );
    let conn = connect(&in_memory_test_driver);

    let stmt =
        InsertStatement::new("t", ["a", "b"], [SqlValue::from(1), SqlValue::from("x")]).unwrap();
    let row = conn.insert(&stmt).await.unwrap().single_row().unwrap();

    in_memory_test_driver.assert_last_query(
        r#"INSERT INTO "t" ("a", "b") VALUES ($1, $2) RETURNING *"#,
        &[SqlValue::Int32(1), SqlValue::Text("x".to_string())],
    );
    in_memory_test_driver.assert_query_count(1);
    assert_eq!(row.get("id").unwrap(), &SqlValue::Int64(42));
}

#[tokio::test]
async fn test_insert_on_sqlserver_uses_output_clause() {
    let in_memory_test_driver =
        Arc::new(InMemoryTestDriver::new().with_dialect(Driver::SqlServer));
    let conn = connect(&in_memory_test_driver);

    let stmt = InsertStatement::into_table("users")
        .value("name", "John")
        .value("active", true);
    conn.insert(&stmt).await.unwrap();

    in_memory_test_driver.assert_last_query(
        "INSERT INTO [users] ([name], [active]) OUTPUT INSERTED.* VALUES (@P1, @P2)",
        &[SqlValue::from("John"), SqlValue::Bool(true)],
    );
}

#[tokio::test]
async fn test_insert_without_columns_never_reaches_driver() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new());
    let conn = connect(&in_memory_test_driver);

    let err = conn
        .insert(&InsertStatement::into_table("users"))
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::InvalidStatement(_)));
    in_memory_test_driver.assert_query_count(0);
}

#[tokio::test]
async fn test_call_procedure() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new());
    let conn = connect(&in_memory_test_driver);

    conn.call_procedure("archive_orders", [SqlValue::from(2024), SqlValue::from("eu")])
        .await
        .unwrap();

    in_memory_test_driver.assert_last_query(
        r#"CALL "archive_orders"($1, $2)"#,
        &[SqlValue::Int32(2024), SqlValue::from("eu")],
    );
}

#[tokio::test]
async fn test_column_names_from_information_schema() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["column_name"])
                .row(&["id"])
                .row(&["name"])
                .row(&["created_at"])
                .build(),
        ),
    );
    let conn = connect(&in_memory_test_driver);

    let names = conn.column_names("users").await.unwrap();

    assert_eq!(names, vec!["id", "name", "created_at"]);
    let last = in_memory_test_driver.last_query().unwrap();
    assert!(last.sql.contains("information_schema.columns"));
    assert_eq!(last.params, vec![SqlValue::from("users")]);
}

#[tokio::test]
async fn test_column_names_empty_for_sqlserver() {
    let in_memory_test_driver =
        Arc::new(InMemoryTestDriver::new().with_dialect(Driver::SqlServer));
    let conn = connect(&in_memory_test_driver);

    let names = conn.column_names("users").await.unwrap();

    assert!(names.is_empty());
    in_memory_test_driver.assert_query_count(0);
}

#[tokio::test]
async fn test_execute_reports_affected_rows() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["id"])
                .row(&["1"])
                .row(&["2"])
                .build(),
        ),
    );
    let conn = connect(&in_memory_test_driver);

    let affected = conn.execute("DELETE FROM users").await.unwrap();

    assert_eq!(affected, 2);
    in_memory_test_driver.assert_last_query("DELETE FROM users", &[]);
}

#[tokio::test]
async fn test_operations_fail_after_close() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new());
    let conn = connect(&in_memory_test_driver);
    conn.close().await.unwrap();
    assert!(in_memory_test_driver.is_closed());

    let conn = connect(&in_memory_test_driver);
    let err = conn.query("select 1").await.unwrap_err();

    assert!(matches!(err, DbError::ConnectionClosed));
    in_memory_test_driver.assert_query_count(0);
}

#[tokio::test]
async fn test_responses_are_consumed_in_order() {
    let in_memory_test_driver = Arc::new(InMemoryTestDriver::new().with_responses(vec![
        InMemoryTestResponseBuilder::new()
            .columns(&["n"])
            .row(&["first"])
            .build(),
        InMemoryTestResponseBuilder::new()
            .columns(&["n"])
            .row(&["second"])
            .build(),
    ]));
    let conn = connect(&in_memory_test_driver);

    let first = conn.query("select 1").await.unwrap().single_row().unwrap();
    let second = conn.query("select 2").await.unwrap().single_row().unwrap();
    let third = conn.query("select 3").await.unwrap();

    assert_eq!(first.get("n").unwrap(), &SqlValue::from("first"));
    assert_eq!(second.get("n").unwrap(), &SqlValue::from("second"));
    assert!(third.is_empty());
    in_memory_test_driver.assert_query_count(3);
}

#[tokio::test]
async fn test_default_response_after_queue_drains() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_default_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["ok"])
                .values(vec![SqlValue::from(true)])
                .build(),
        ),
    );
    let conn = connect(&in_memory_test_driver);

    for _ in 0..2 {
        let result = conn.query("SELECT true AS ok").await.unwrap();
        assert_eq!(result.rows_ref().len(), 1);
        assert_eq!(
            result.rows_ref()[0].get("ok").unwrap(),
            &SqlValue::Bool(true)
        );
    }
    in_memory_test_driver.assert_query_count(2);

    in_memory_test_driver.clear_recorded_queries();
    in_memory_test_driver.assert_query_count(0);
    assert!(in_memory_test_driver.last_query().is_none());
}

#[tokio::test]
async fn test_query_collapses_repeated_column_names() {
    let in_memory_test_driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["id", "id"])
                .values(vec![SqlValue::from(1), SqlValue::from(2)])
                .build(),
        ),
    );
    let conn = connect(&in_memory_test_driver);

    let result = conn
        .query("SELECT a.id, b.id FROM a JOIN b ON b.a_id = a.id")
        .await
        .unwrap();

    assert_eq!(result.to_json().unwrap(), r#"[{"id":2}]"#);
    assert_eq!(result.rows_ref()[0].get("id").unwrap(), &SqlValue::Int32(2));
}
