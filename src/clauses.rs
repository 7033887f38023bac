//! Binds loosely specified filter, sort and group-by requests onto a query.
//!
//! Each request names its field in business vocabulary; the field goes
//! through the [`TermResolver`] and becomes an [`AttributeRef`]. A field that
//! cannot be resolved is either dropped with a warning recorded on the
//! [`ParsedQuery`] or turned into an error, depending on the policy.

use crate::ast::{AttributeRef, FilterCondition, FilterOperator, ParsedQuery, QueryNode, SortClause, SortDirection};
use crate::error::{BizqlError, Result};
use crate::term_resolver::TermResolver;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

lazy_static! {
    static ref FILTER_EXPR: Regex =
        Regex::new(r"(?is)^\s*(.+?)\s*(!=|>=|<=|=|>|<|\bNOT\s+IN\b|\bIN\b|\bLIKE\b|\bIS\s+NOT\s+NULL\b|\bIS\s+NULL\b)\s*(.*?)\s*$")
            .unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause", rename_all = "snake_case")]
pub enum ClauseRequest {
    Filter {
        field: String,
        operator: FilterOperator,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        negate: bool,
    },
    Sort {
        field: String,
        #[serde(default)]
        direction: SortDirection,
    },
    GroupBy {
        field: String,
    },
}

impl ClauseRequest {
    pub fn field(&self) -> &str {
        match self {
            ClauseRequest::Filter { field, .. }
            | ClauseRequest::Sort { field, .. }
            | ClauseRequest::GroupBy { field } => field,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ClauseRequest::Filter { .. } => "filter",
            ClauseRequest::Sort { .. } => "sort",
            ClauseRequest::GroupBy { .. } => "group-by",
        }
    }

    /// Parse `field OP value`, e.g. `עיר = "חיפה"` or `יתרה >= 100`.
    ///
    /// The value is read as JSON when it parses as JSON and as a plain
    /// string otherwise.
    pub fn parse_filter(expr: &str) -> Result<Self> {
        let caps = FILTER_EXPR
            .captures(expr)
            .ok_or_else(|| BizqlError::Validation(format!("Cannot parse filter '{}'", expr)))?;
        let field = caps[1].trim().to_string();
        let op_text = caps[2].split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        let operator = match op_text.as_str() {
            "=" => FilterOperator::Eq,
            "!=" => FilterOperator::Ne,
            ">" => FilterOperator::Gt,
            "<" => FilterOperator::Lt,
            ">=" => FilterOperator::Ge,
            "<=" => FilterOperator::Le,
            "LIKE" => FilterOperator::Like,
            "IN" => FilterOperator::In,
            "NOT IN" => FilterOperator::NotIn,
            "IS NULL" => FilterOperator::IsNull,
            _ => FilterOperator::IsNotNull,
        };
        let raw = caps[3].trim();
        if !operator.is_unary() && raw.is_empty() {
            return Err(BizqlError::Validation(format!("Filter '{}' has no value", expr)));
        }
        let value = if operator.is_unary() {
            Value::Null
        } else {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };
        Ok(ClauseRequest::Filter {
            field,
            operator,
            value,
            negate: false,
        })
    }

    /// Parse `field` or `field:desc` / `field:asc`.
    pub fn parse_sort(expr: &str) -> Self {
        let (field, direction) = match expr.rsplit_once(':') {
            Some((field, dir)) if dir.trim().eq_ignore_ascii_case("desc") => (field, SortDirection::Desc),
            Some((field, dir)) if dir.trim().eq_ignore_ascii_case("asc") => (field, SortDirection::Asc),
            _ => (expr, SortDirection::Asc),
        };
        ClauseRequest::Sort {
            field: field.trim().to_string(),
            direction,
        }
    }
}

/// What to do with a clause whose field cannot be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedTermPolicy {
    /// Skip the clause, log it and record a warning
    #[default]
    Drop,
    /// Abort with the underlying error
    Fail,
}

pub struct ClauseBinder<'a> {
    resolver: &'a TermResolver,
    policy: UnresolvedTermPolicy,
}

impl<'a> ClauseBinder<'a> {
    pub fn new(resolver: &'a TermResolver, policy: UnresolvedTermPolicy) -> Self {
        Self { resolver, policy }
    }

    /// Bind every request onto the parsed query. Returns how many were applied.
    pub fn bind(&self, parsed: &mut ParsedQuery, requests: &[ClauseRequest]) -> Result<usize> {
        let mut applied = 0;
        for request in requests {
            match self.bind_one(&mut parsed.node, request) {
                Ok(()) => applied += 1,
                Err(err) if err.is_fatal() && !matches!(err, BizqlError::Validation(_)) => return Err(err),
                Err(err) => {
                    if self.policy == UnresolvedTermPolicy::Fail {
                        return Err(err);
                    }
                    let message = format!("Dropped {} on '{}': {}", request.kind(), request.field(), err);
                    warn!("{}", message);
                    parsed.warnings.push(message);
                }
            }
        }
        Ok(applied)
    }

    fn bind_one(&self, node: &mut QueryNode, request: &ClauseRequest) -> Result<()> {
        let query = match node {
            QueryNode::Select(query) => query,
            QueryNode::Shortcut(shortcut) => {
                return Err(BizqlError::Validation(format!(
                    "shortcut '{}' does not take extra clauses",
                    shortcut.name
                )))
            }
        };
        let source = query
            .source_entity()
            .map(|e| e.name.clone())
            .ok_or_else(|| BizqlError::Validation("question has no source entity".to_string()))?;

        let attribute = self.resolve_attribute(request.field(), &source)?;
        debug!("Bound {} field '{}' to {}", request.kind(), request.field(), attribute);

        match request {
            ClauseRequest::Filter {
                operator,
                value,
                negate,
                ..
            } => query.filters.push(FilterCondition {
                attribute,
                operator: *operator,
                value: value.clone(),
                negate: *negate,
            }),
            ClauseRequest::Sort { direction, .. } => query.sorts.push(SortClause {
                attribute,
                direction: *direction,
            }),
            ClauseRequest::GroupBy { .. } => {
                if !query.group_by.contains(&attribute) {
                    query.group_by.push(attribute);
                }
            }
        }
        Ok(())
    }

    fn resolve_attribute(&self, field: &str, source: &str) -> Result<AttributeRef> {
        let mapping = self.resolver.resolve(field)?;
        let (Some(entity), Some(attribute)) = (mapping.entity, mapping.attribute) else {
            return Err(BizqlError::TermNotFound(format!(
                "'{}' does not name a column of a known entity",
                field
            )));
        };
        if entity != source {
            return Err(BizqlError::Validation(format!(
                "'{}' belongs to {}, but the query reads from {}",
                field, entity, source
            )));
        }
        Ok(AttributeRef::new(entity, attribute))
    }
}
