//! Generated SQL Server and MySQL text must parse in the target dialect.

use bizql::sql::FunctionTranslator;
use bizql::{Dialect, JsonConfigSource, QueryCompiler};
use sqlparser::dialect::{Dialect as SqlDialect, MsSqlDialect, MySqlDialect};
use sqlparser::parser::Parser;
use std::path::PathBuf;
use std::sync::Arc;

fn compile(tenant: &str, question: &str) -> String {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/config");
    QueryCompiler::new(Arc::new(JsonConfigSource::new(root)))
        .compile(tenant, question)
        .unwrap()
        .sql
        .unwrap()
}

fn assert_parses(dialect: &dyn SqlDialect, sql: &str) {
    if let Err(err) = Parser::parse_sql(dialect, sql) {
        panic!("failed to parse {}: {}", sql, err);
    }
}

#[test]
fn test_sqlserver_output_parses() {
    for question in ["show city of clients", "how many clients", "recent orders please", "total order amount", "weekly orders"] {
        assert_parses(&MsSqlDialect {}, &compile("shop_mssql", question));
    }

    let translator = FunctionTranslator::new(Dialect::SqlServer);
    let sql = translator.translate("SELECT DATE_TRUNC('month', OrderDate) FROM Orders LIMIT 10");
    assert_eq!(sql, "SELECT TOP 10 DATEADD(month, DATEDIFF(month, 0, OrderDate), 0) FROM Orders");
    assert_parses(&MsSqlDialect {}, &sql);
}

#[test]
fn test_mysql_output_parses() {
    for question in [
        "show city of clients",
        "list distinct city of clients",
        "average balance of clients",
        "recent orders please",
    ] {
        assert_parses(&MySqlDialect {}, &compile("shop_mysql", question));
    }

    let translator = FunctionTranslator::new(Dialect::MySql);
    let sql = translator.translate("SELECT TOP 3 YEAR(OrderDate) FROM Orders");
    assert_eq!(sql, "SELECT YEAR(OrderDate) FROM Orders LIMIT 3");
    assert_parses(&MySqlDialect {}, &sql);
}
