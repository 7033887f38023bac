use bizql::ast::{AggregateFunction, EntityRef};
use bizql::{
    BizqlError, ClauseRequest, CompileOptions, Dialect, Intent, JsonConfigSource, QueryCompiler, QueryNode,
    SelectQuery, UnresolvedTermPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;

fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/config")
}

fn compiler() -> QueryCompiler {
    QueryCompiler::new(Arc::new(JsonConfigSource::new(fixture_root())))
}

fn sql(tenant: &str, question: &str) -> String {
    compiler()
        .compile(tenant, question)
        .unwrap()
        .sql
        .unwrap_or_else(|| panic!("no SQL for '{}'", question))
}

#[test]
fn test_count_question_compiles_to_count_star() {
    let compiled = compiler().compile("shop", "how-many-term customers-term?").unwrap();

    assert_eq!(compiled.parsed.intent, Intent::Count);
    assert_eq!(compiled.dialect, Dialect::Sqlite);
    assert_eq!(compiled.parsed.confidence, 0.5);
    let mut expected = SelectQuery::new(vec![EntityRef::new("customer")]);
    expected.push_aggregate(AggregateFunction::count_all());
    assert_eq!(compiled.parsed.node, QueryNode::Select(expected));
    assert_eq!(compiled.sql.as_deref(), Some("SELECT COUNT(*) FROM Clients"));
}

#[test]
fn test_sqlite_tenant() {
    assert_eq!(
        sql("shop", "show city of clients"),
        "SELECT CityName FROM Clients ORDER BY JoinDate DESC"
    );
    assert_eq!(sql("shop", "average balance of clients"), "SELECT AVG(Balance) FROM Clients");
    assert_eq!(
        sql("shop", "total order amount"),
        "SELECT SUM(Amount) FROM Orders WHERE Cancelled = 0"
    );
    assert_eq!(sql("shop", "how many patrons"), "SELECT COUNT(*) FROM Clients");
}

#[test]
fn test_shortcuts_are_translated_per_dialect() {
    assert_eq!(
        sql("shop", "recent orders please"),
        "SELECT OrderID, Amount FROM Orders ORDER BY OrderDate DESC LIMIT 5"
    );
    assert_eq!(
        sql("shop_mssql", "recent orders please"),
        "SELECT TOP 5 OrderID, Amount FROM Orders ORDER BY OrderDate DESC"
    );
    assert_eq!(
        sql("shop", "weekly orders"),
        "SELECT COUNT(*) FROM Orders WHERE OrderDate >= date('now', '-7 days')"
    );
    assert_eq!(
        sql("shop_mssql", "weekly orders"),
        "SELECT COUNT(*) FROM Orders WHERE OrderDate >= DATEADD(day, -7, CAST(GETDATE() AS DATE))"
    );
    assert_eq!(
        sql("shop_mysql", "weekly orders"),
        "SELECT COUNT(*) FROM Orders WHERE OrderDate >= DATE_ADD(CURDATE(), INTERVAL -7 DAY)"
    );

    let compiled = compiler().compile("shop", "weekly orders").unwrap();
    assert_eq!(compiled.parsed.intent, Intent::Shortcut);
    assert_eq!(compiled.parsed.confidence, 1.0);
}

#[test]
fn test_row_limits_and_business_rules() {
    assert_eq!(
        sql("shop_mssql", "show city of clients"),
        "SELECT TOP 100 CityName FROM Clients WHERE Balance >= 0 ORDER BY JoinDate DESC"
    );
    assert_eq!(
        sql("shop_mssql", "how many clients"),
        "SELECT TOP 100 COUNT(*) FROM Clients WHERE Balance >= 0"
    );
    assert_eq!(
        sql("shop_mysql", "list distinct city of clients"),
        "SELECT COUNT(DISTINCT CityName) FROM Clients WHERE Balance >= 0 LIMIT 50"
    );
}

#[test]
fn test_clauses_bind_and_unknown_fields_are_reported() {
    let options = CompileOptions {
        clauses: vec![
            ClauseRequest::parse_filter("town = \"Haifa\"").unwrap(),
            ClauseRequest::parse_sort("balance:desc"),
            ClauseRequest::parse_filter("planet = 3").unwrap(),
        ],
        policy: UnresolvedTermPolicy::Drop,
        dialect: None,
    };
    let compiled = compiler().compile_with("shop", "show clients", &options).unwrap();
    assert_eq!(
        compiled.sql.as_deref(),
        Some("SELECT * FROM Clients WHERE CityName = 'Haifa' ORDER BY Balance DESC")
    );
    assert_eq!(compiled.parsed.warnings.len(), 1);
    assert!(compiled.parsed.warnings[0].contains("planet"));

    let strict = CompileOptions {
        policy: UnresolvedTermPolicy::Fail,
        ..options
    };
    let err = compiler().compile_with("shop", "show clients", &strict).unwrap_err();
    assert!(matches!(err, BizqlError::TermNotFound(_)));
}

#[test]
fn test_dialect_override() {
    let options = CompileOptions {
        dialect: Some(Dialect::MySql),
        ..Default::default()
    };
    let compiled = compiler().compile_with("shop_mssql", "show city of clients", &options).unwrap();
    assert_eq!(
        compiled.sql.as_deref(),
        Some("SELECT CityName FROM Clients WHERE Balance >= 0 ORDER BY JoinDate DESC LIMIT 100")
    );
}

#[test]
fn test_unresolvable_question() {
    let compiled = compiler().compile("shop", "what is the weather").unwrap();
    assert!(compiled.sql.is_none());
    assert!(!compiled.parsed.is_executable());
    assert_eq!(compiled.parsed.confidence, 0.0);
}

#[test]
fn test_added_dictionary_term_is_understood_in_questions() {
    let compiler = compiler();
    assert!(compiler.compile("shop", "show clientlocale").unwrap().sql.is_none());
    assert!(compiler.add_mapping("shop", "clientlocale", "Clients", "CityName", None).unwrap());
    assert_eq!(
        compiler.compile("shop", "show clientlocale").unwrap().sql.as_deref(),
        Some("SELECT CityName FROM Clients ORDER BY JoinDate DESC")
    );
}

#[test]
fn test_tenant_errors() {
    assert!(matches!(
        compiler().compile("nobody", "how many clients"),
        Err(BizqlError::UnknownTenant(_))
    ));
    assert!(matches!(
        compiler().compile("broken", "how many clients"),
        Err(BizqlError::Validation(_))
    ));
}

#[test]
fn test_json_output_shape() {
    let compiled = compiler().compile("shop", "how-many-term customers-term?").unwrap();
    let json = serde_json::to_value(&compiled).unwrap();
    assert_eq!(json["dialect"], "sqlite");
    assert_eq!(json["parsed"]["intent"], "count");
    assert_eq!(json["parsed"]["matched_terms"][0]["term"], "customers-term");
    assert_eq!(json["parsed"]["matched_terms"][0]["position"], 14);
}
