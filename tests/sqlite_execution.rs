//! Runs generated SQLite SQL against an in-memory database.

use bizql::sql::FunctionTranslator;
use bizql::{Dialect, JsonConfigSource, QueryCompiler};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;

fn compile(question: &str) -> String {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/config");
    QueryCompiler::new(Arc::new(JsonConfigSource::new(root)))
        .compile("shop", question)
        .unwrap()
        .sql
        .unwrap()
}

fn seeded() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE Clients (CustID INTEGER PRIMARY KEY, CityName TEXT, Balance REAL, JoinDate TEXT);
         CREATE TABLE Orders (OrderID INTEGER PRIMARY KEY, CustID INTEGER, Amount REAL, OrderDate TEXT, Cancelled INTEGER);
         INSERT INTO Clients VALUES (1, 'Haifa', 100.0, '2023-01-10');
         INSERT INTO Clients VALUES (2, 'Eilat', 200.0, '2024-06-01');
         INSERT INTO Clients VALUES (3, 'Akko', -60.0, '2022-03-15');
         INSERT INTO Orders VALUES (10, 1, 50.0, date('now', '-2 days'), 0);
         INSERT INTO Orders VALUES (11, 1, 70.0, date('now', '-30 days'), 0);
         INSERT INTO Orders VALUES (12, 2, 999.0, date('now', '-1 days'), 1);
         INSERT INTO Orders VALUES (13, 2, 30.0, date('now', '-40 days'), 0);
         INSERT INTO Orders VALUES (14, 3, 10.0, date('now', '-50 days'), 0);
         INSERT INTO Orders VALUES (15, 3, 20.0, date('now', '-60 days'), 0);",
    )
    .unwrap();
    conn
}

fn scalar_i64(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn scalar_f64(conn: &Connection, sql: &str) -> f64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn scalar_text(conn: &Connection, sql: &str) -> String {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn test_aggregates_run() {
    let conn = seeded();
    assert_eq!(scalar_i64(&conn, &compile("how-many-term customers-term?")), 3);
    let avg = scalar_f64(&conn, &compile("average balance of clients"));
    assert!((avg - 80.0).abs() < 1e-9);
    let total = scalar_f64(&conn, &compile("total order amount"));
    assert!((total - 180.0).abs() < 1e-9);
}

#[test]
fn test_projection_uses_default_ordering() {
    let conn = seeded();
    let sql = compile("show city of clients");
    let mut stmt = conn.prepare(&sql).unwrap();
    let cities: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(cities, vec!["Eilat", "Haifa", "Akko"]);
}

#[test]
fn test_shortcuts_run() {
    let conn = seeded();
    // the cancelled order is still counted: shortcuts bypass table filters
    assert_eq!(scalar_i64(&conn, &compile("weekly orders")), 2);

    let sql = compile("recent orders please");
    let mut stmt = conn.prepare(&sql).unwrap();
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0)).unwrap().count();
    assert_eq!(rows, 5);
}

#[test]
fn test_translated_date_functions_evaluate() {
    let translator = FunctionTranslator::new(Dialect::Sqlite);
    let conn = Connection::open_in_memory().unwrap();
    let cases = [
        ("SELECT YEAR('2024-03-15')", "2024"),
        ("SELECT DATE_TRUNC('month', '2024-03-15')", "2024-03-01"),
        ("SELECT DATEADD(day, 3, '2024-03-15')", "2024-03-18"),
        ("SELECT DATE_SUB('2024-03-15', INTERVAL 1 YEAR)", "2023-03-15"),
        ("SELECT DATE_TRUNC('week', '2024-03-13')", "2024-03-11"),
        ("SELECT DATE_FORMAT('2024-03-15', '%Y-01-01')", "2024-01-01"),
    ];
    for (input, expected) in cases {
        let sql = translator.translate(input);
        assert_eq!(scalar_text(&conn, &sql), expected, "{} -> {}", input, sql);
    }
}

#[test]
fn test_timestamp_shifts_keep_time_of_day() {
    let translator = FunctionTranslator::new(Dialect::Sqlite);
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE Events (EventID INTEGER PRIMARY KEY, At TEXT);
         INSERT INTO Events VALUES (1, '2024-03-14 08:00:00');
         INSERT INTO Events VALUES (2, '2024-03-14 12:00:00');
         INSERT INTO Events VALUES (3, '2024-03-15 09:00:00');",
    )
    .unwrap();

    let last_day =
        translator.translate("SELECT COUNT(*) FROM Events WHERE At >= datetime('2024-03-15 10:30:00', '-1 day')");
    assert_eq!(scalar_i64(&conn, &last_day), 2, "{}", last_day);

    let cases = [
        ("SELECT datetime('2024-03-15 10:30:00', '+7 days')", "2024-03-22 10:30:00"),
        ("SELECT DATEADD(day, 1, DATETIME('2024-03-15 10:30:00'))", "2024-03-16 10:30:00"),
        ("SELECT DATEADD(week, 1, DATETIME('2024-03-15 10:30:00'))", "2024-03-22 10:30:00"),
    ];
    for (input, expected) in cases {
        let sql = translator.translate(input);
        assert_eq!(scalar_text(&conn, &sql), expected, "{} -> {}", input, sql);
    }
}
