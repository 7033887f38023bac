//! SQL generation: one [`SqlGenerator`] per dialect family.
//!
//! Rendering of a [`SelectQuery`] is shared; each dialect supplies its
//! reserved words, identifier quoting, boolean literals and row-limit style,
//! and every statement is finished by the dialect function translator.

pub mod mysql;
pub mod sqlite;
pub mod sqlserver;
pub mod translate;

use crate::ast::{AggregateFunction, AttributeRef, FilterCondition, FilterOperator, ParsedQuery, QueryNode, SelectQuery, ShortcutQuery};
use crate::config::AggregationType;
use crate::error::{BizqlError, Result};
use crate::schema::TenantSchema;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

lazy_static! {
    static ref HAS_OR: Regex = Regex::new(r"(?i)\bOR\b").unwrap();
}

pub use mysql::MySqlGenerator;
pub use sqlite::SqliteGenerator;
pub use sqlserver::SqlServerGenerator;
pub use translate::FunctionTranslator;

/// Statement emitted for a query with no source entity.
pub const NO_ENTITIES: &str = "-- No entities specified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    SqlServer,
    MySql,
}

impl Dialect {
    /// Dialect family for a configured database type. Unknown types fall
    /// back to SQLite with a warning.
    pub fn from_database_type(database_type: &str) -> Self {
        database_type.parse().unwrap_or_else(|_| {
            warn!(
                "Unsupported database type '{}', falling back to SQLite",
                database_type
            );
            Dialect::Sqlite
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::SqlServer => "sqlserver",
            Dialect::MySql => "mysql",
        }
    }
}

impl FromStr for Dialect {
    type Err = BizqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "sqlserver" | "sql_server" | "mssql" | "tsql" => Ok(Dialect::SqlServer),
            "mysql" | "mariadb" | "postgresql" | "postgres" => Ok(Dialect::MySql),
            other => Err(BizqlError::Validation(format!("Unknown dialect: {}", other))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub trait SqlGenerator: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Upper-case reserved words that must be quoted when used as identifiers.
    fn reserved_words(&self) -> &'static [&'static str];

    /// Quote one identifier part unconditionally.
    fn quote_identifier(&self, ident: &str) -> String;

    /// `LIMIT n` after ORDER BY unless the dialect uses `SELECT TOP n`.
    fn uses_top(&self) -> bool {
        false
    }

    fn format_bool(&self, value: bool) -> String {
        if value { "TRUE" } else { "FALSE" }.to_string()
    }

    /// Quote each dotted part that is reserved or not a plain identifier.
    fn escape_identifier(&self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| {
                let already_quoted = part.starts_with('[') || part.starts_with('"') || part.starts_with('`');
                let plain = !part.is_empty()
                    && part.chars().all(|c| c.is_alphanumeric() || c == '_')
                    && !part.starts_with(|c: char| c.is_ascii_digit());
                let reserved = self.reserved_words().contains(&part.to_ascii_uppercase().as_str());
                if already_quoted || (plain && !reserved) {
                    part.to_string()
                } else {
                    self.quote_identifier(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn translate(&self, sql: &str) -> String {
        FunctionTranslator::new(self.dialect()).translate(sql)
    }

    fn generate(&self, parsed: &ParsedQuery, schema: &TenantSchema) -> Result<String> {
        match &parsed.node {
            QueryNode::Select(query) => self.visit_select(query, schema),
            QueryNode::Shortcut(shortcut) => Ok(self.visit_shortcut(shortcut)),
        }
    }

    fn visit_select(&self, query: &SelectQuery, schema: &TenantSchema) -> Result<String> {
        let sql = render_select(self, query, schema)?;
        let sql = self.translate(&sql);
        info!("Generated {} SQL: {}", self.dialect(), sql);
        Ok(sql)
    }

    /// Stored shortcut SQL, changed only by function translation.
    fn visit_shortcut(&self, shortcut: &ShortcutQuery) -> String {
        let sql = self.translate(&shortcut.sql);
        info!("Shortcut '{}' rendered for {}: {}", shortcut.name, self.dialect(), sql);
        sql
    }
}

pub fn generator_for(dialect: Dialect) -> Box<dyn SqlGenerator> {
    match dialect {
        Dialect::Sqlite => Box::new(SqliteGenerator),
        Dialect::SqlServer => Box::new(SqlServerGenerator),
        Dialect::MySql => Box::new(MySqlGenerator),
    }
}

/// Generator for a tenant's configured database type.
pub fn create_generator(database_type: &str) -> Box<dyn SqlGenerator> {
    generator_for(Dialect::from_database_type(database_type))
}

fn render_select<G: SqlGenerator + ?Sized>(sql_gen: &G, query: &SelectQuery, schema: &TenantSchema) -> Result<String> {
    let Some(source) = query.source_entity() else {
        debug!("Query has no entities, emitting placeholder");
        return Ok(NO_ENTITIES.to_string());
    };
    if query.entities.len() > 1 {
        debug!(
            "Query names {} entities; reading from {} only",
            query.entities.len(),
            source.name
        );
    }

    let table = schema.table_for(&source.name)?;
    let column = |attribute: &AttributeRef| -> Result<String> {
        Ok(sql_gen.escape_identifier(schema.column_for(&attribute.entity, &attribute.attribute)?))
    };

    // SELECT
    let projection = if !query.aggregates.is_empty() {
        query
            .aggregates
            .iter()
            .map(|agg| render_aggregate(sql_gen, agg, &column))
            .collect::<Result<Vec<_>>>()?
            .join(", ")
    } else if !query.attributes.is_empty() {
        query
            .attributes
            .iter()
            .map(|attr| {
                let col = column(attr)?;
                Ok(match &attr.alias {
                    Some(alias) => format!("{} AS {}", col, sql_gen.escape_identifier(alias)),
                    None => col,
                })
            })
            .collect::<Result<Vec<_>>>()?
            .join(", ")
    } else {
        "*".to_string()
    };
    let select_clause = match (sql_gen.uses_top(), query.limit) {
        (true, Some(limit)) => format!("SELECT TOP {} {}", limit, projection),
        _ => format!("SELECT {}", projection),
    };

    // FROM
    let mut from_clause = format!("FROM {}", sql_gen.escape_identifier(&table.physical_table));
    if let Some(alias) = &source.alias {
        from_clause.push_str(&format!(" AS {}", sql_gen.escape_identifier(alias)));
    }

    // WHERE
    let rules = &schema.config().mappings.business_rules;
    let mut conditions = Vec::new();
    if let Some(where_clause) = table.where_clause.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
        conditions.push(parenthesize(where_clause));
    }
    if let Some(defaults) = rules.default_filters.get(&source.name) {
        for condition in defaults.values().map(|c| c.trim()).filter(|c| !c.is_empty()) {
            conditions.push(parenthesize(&rewrite_logical_columns(sql_gen, condition, &table.columns)));
        }
    }
    for filter in &query.filters {
        conditions.push(render_filter(sql_gen, filter, &column(&filter.attribute)?));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    // GROUP BY
    let group_by_clause = if query.group_by.is_empty() {
        String::new()
    } else {
        let columns = query.group_by.iter().map(&column).collect::<Result<Vec<_>>>()?;
        format!("GROUP BY {}", columns.join(", "))
    };

    // ORDER BY: explicit sorts win; the configured default never applies to aggregates
    let order_by_clause = if !query.sorts.is_empty() {
        let parts = query
            .sorts
            .iter()
            .map(|sort| Ok(format!("{} {}", column(&sort.attribute)?, sort.direction.as_sql())))
            .collect::<Result<Vec<_>>>()?;
        format!("ORDER BY {}", parts.join(", "))
    } else {
        match rules.default_ordering.get(&source.name).map(|o| o.trim()) {
            Some(ordering) if !ordering.is_empty() && query.aggregates.is_empty() => {
                format!("ORDER BY {}", rewrite_logical_columns(sql_gen, ordering, &table.columns))
            }
            _ => String::new(),
        }
    };

    let limit_clause = match (sql_gen.uses_top(), query.limit) {
        (false, Some(limit)) => format!("LIMIT {}", limit),
        _ => String::new(),
    };

    let sql = [select_clause, from_clause, where_clause, group_by_clause, order_by_clause, limit_clause]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(sql)
}

fn render_aggregate<G, F>(sql_gen: &G, aggregate: &AggregateFunction, column: &F) -> Result<String>
where
    G: SqlGenerator + ?Sized,
    F: Fn(&AttributeRef) -> Result<String>,
{
    let expr = match (aggregate.function, &aggregate.attribute) {
        (AggregationType::Distinct, Some(attr)) => format!("COUNT(DISTINCT {})", column(attr)?),
        (AggregationType::Distinct, None) => "COUNT(*)".to_string(),
        (function, Some(attr)) => format!("{}({})", function.as_sql(), column(attr)?),
        (function, None) => format!("{}(*)", function.as_sql()),
    };
    Ok(match &aggregate.alias {
        Some(alias) => format!("{} AS {}", expr, sql_gen.escape_identifier(alias)),
        None => expr,
    })
}

fn render_filter<G: SqlGenerator + ?Sized>(sql_gen: &G, filter: &FilterCondition, column: &str) -> String {
    let condition = match (filter.operator, &filter.value) {
        (op, _) if op.is_unary() => format!("{} {}", column, op.as_sql()),
        (FilterOperator::Eq, Value::Null) => format!("{} IS NULL", column),
        (FilterOperator::Ne, Value::Null) => format!("{} IS NOT NULL", column),
        (op @ (FilterOperator::In | FilterOperator::NotIn), value) => {
            let items = match value {
                Value::Array(items) => items.iter().map(|v| format_value(sql_gen, v)).collect::<Vec<_>>(),
                other => vec![format_value(sql_gen, other)],
            };
            format!("{} {} ({})", column, op.as_sql(), items.join(", "))
        }
        (op, value) => format!("{} {} {}", column, op.as_sql(), format_value(sql_gen, value)),
    };
    if filter.negate {
        format!("NOT ({})", condition)
    } else {
        condition
    }
}

/// Inline a literal. Strings are single-quoted with embedded quotes doubled.
pub fn format_value<G: SqlGenerator + ?Sized>(sql_gen: &G, value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => sql_gen.format_bool(*b),
        Value::Array(items) => {
            let values: Vec<String> = items.iter().map(|v| format_value(sql_gen, v)).collect();
            format!("({})", values.join(", "))
        }
        Value::Null => "NULL".to_string(),
        Value::Object(_) => format!("'{}'", value.to_string().replace('\'', "''")),
    }
}

/// Replace logical column names in raw config text with escaped physical
/// names, in one pass and outside string literals.
fn rewrite_logical_columns<G: SqlGenerator + ?Sized>(
    sql_gen: &G,
    text: &str,
    columns: &BTreeMap<String, String>,
) -> String {
    let mut names: Vec<&String> = columns.keys().collect();
    if names.is_empty() {
        return text.to_string();
    }
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));
    let alternation = names.iter().map(|n| regex::escape(n)).collect::<Vec<_>>().join("|");
    let Ok(pattern) = Regex::new(&format!(r"\b({})\b", alternation)) else {
        return text.to_string();
    };

    let spans = translate::literal_spans(text);
    pattern
        .replace_all(text, |caps: &Captures| {
            let start = caps.get(0).map_or(0, |m| m.start());
            let logical = &caps[1];
            let preceded_by_dot = text[..start].ends_with('.');
            match columns.get(logical) {
                Some(physical) if !translate::in_literal(&spans, start) && !preceded_by_dot => {
                    sql_gen.escape_identifier(physical)
                }
                _ => logical.to_string(),
            }
        })
        .into_owned()
}

fn parenthesize(condition: &str) -> String {
    if HAS_OR.is_match(condition) {
        format!("({})", condition)
    } else {
        condition.to_string()
    }
}
