use super::{Dialect, SqlGenerator};

const RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BACKUP", "BEGIN", "BETWEEN", "BREAK", "BY",
    "CASCADE", "CASE", "CHECK", "COLUMN", "COMMIT", "CONSTRAINT", "CONTAINS", "CREATE", "CROSS",
    "CURRENT", "CURSOR", "DATABASE", "DECLARE", "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP",
    "ELSE", "END", "EXCEPT", "EXEC", "EXISTS", "FILE", "FOR", "FOREIGN", "FROM", "FULL", "FUNCTION",
    "GRANT", "GROUP", "HAVING", "IDENTITY", "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "INTO", "IS",
    "JOIN", "KEY", "LEFT", "LIKE", "MERGE", "NOT", "NULL", "OF", "ON", "OPEN", "OR", "ORDER", "OUTER",
    "OVER", "PERCENT", "PIVOT", "PLAN", "PRIMARY", "PROCEDURE", "PUBLIC", "READ", "REFERENCES",
    "RIGHT", "ROWCOUNT", "RULE", "SCHEMA", "SELECT", "SET", "TABLE", "THEN", "TO", "TOP", "TRAN",
    "TRIGGER", "TRUNCATE", "UNION", "UNIQUE", "UPDATE", "USE", "USER", "VALUES", "VIEW", "WHEN",
    "WHERE", "WHILE", "WITH",
];

/// SQL Server: bracketed identifiers, `SELECT TOP n`, bit booleans.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerGenerator;

impl SqlGenerator for SqlServerGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        RESERVED
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn uses_top(&self) -> bool {
        true
    }

    fn format_bool(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }
}
