use super::{Dialect, SqlGenerator};

const RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHANGE", "CHECK", "COLUMN",
    "CONDITION", "CONSTRAINT", "CREATE", "CROSS", "DATABASE", "DEFAULT", "DELETE", "DESC", "DESCRIBE",
    "DISTINCT", "DIV", "DROP", "ELSE", "EXISTS", "EXPLAIN", "FALSE", "FOR", "FOREIGN", "FROM",
    "FULLTEXT", "GRANT", "GROUP", "HAVING", "IN", "INDEX", "INNER", "INSERT", "INTERVAL", "INTO", "IS",
    "JOIN", "KEY", "KEYS", "KILL", "LEFT", "LIKE", "LIMIT", "LOCK", "MATCH", "MOD", "NOT", "NULL", "ON",
    "OPTION", "OR", "ORDER", "OUTER", "PRIMARY", "RANGE", "READ", "REFERENCES", "REGEXP", "RENAME",
    "REPLACE", "RIGHT", "RLIKE", "SCHEMA", "SELECT", "SET", "SHOW", "TABLE", "THEN", "TO", "TRUE",
    "UNION", "UNIQUE", "UPDATE", "USAGE", "USE", "USING", "VALUES", "WHEN", "WHERE", "WITH", "WRITE",
];

/// MySQL family (also used for PostgreSQL-configured tenants): backtick
/// identifiers, trailing `LIMIT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlGenerator;

impl SqlGenerator for MySqlGenerator {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn reserved_words(&self) -> &'static [&'static str] {
        RESERVED
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }
}
