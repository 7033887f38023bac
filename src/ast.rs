//! Query AST: the structured form of a question before SQL is rendered.

use crate::config::AggregationType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl EntityRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRef {
    pub entity: String,
    pub attribute: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl AttributeRef {
    pub fn new(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            attribute: attribute.into(),
            alias: None,
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.attribute)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
}

impl FilterOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::Ge => ">=",
            FilterOperator::Le => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT IN",
            FilterOperator::IsNull => "IS NULL",
            FilterOperator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Operators that take no right-hand value.
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub attribute: AttributeRef,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateFunction {
    pub function: AggregationType,
    /// `None` renders as `FUNCTION(*)`
    #[serde(default)]
    pub attribute: Option<AttributeRef>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl AggregateFunction {
    pub fn count_all() -> Self {
        Self {
            function: AggregationType::Count,
            attribute: None,
            alias: None,
        }
    }

    pub fn over(function: AggregationType, attribute: AttributeRef) -> Self {
        Self {
            function,
            attribute: Some(attribute),
            alias: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortClause {
    pub attribute: AttributeRef,
    #[serde(default)]
    pub direction: SortDirection,
}

/// A single-table SELECT.
///
/// Zero entities means the question could not be resolved; such a query
/// must never be executed. Projection attributes and aggregates are
/// mutually exclusive, and the mutating helpers below keep it that way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub entities: Vec<EntityRef>,
    pub attributes: Vec<AttributeRef>,
    pub aggregates: Vec<AggregateFunction>,
    pub filters: Vec<FilterCondition>,
    pub sorts: Vec<SortClause>,
    pub group_by: Vec<AttributeRef>,
    pub limit: Option<u32>,
}

impl SelectQuery {
    pub fn new(entities: Vec<EntityRef>) -> Self {
        Self {
            entities,
            ..Default::default()
        }
    }

    pub fn is_resolvable(&self) -> bool {
        !self.entities.is_empty()
    }

    /// The entity the query reads from.
    pub fn source_entity(&self) -> Option<&EntityRef> {
        self.entities.first()
    }

    /// Adds a projection column; ignored once the query aggregates.
    pub fn push_attribute(&mut self, attribute: AttributeRef) {
        if self.aggregates.is_empty() && !self.attributes.contains(&attribute) {
            self.attributes.push(attribute);
        }
    }

    /// Adds an aggregate and drops any raw projection.
    pub fn push_aggregate(&mut self, aggregate: AggregateFunction) {
        self.attributes.clear();
        if !self.aggregates.contains(&aggregate) {
            self.aggregates.push(aggregate);
        }
    }

    pub fn set_aggregates(&mut self, aggregates: Vec<AggregateFunction>) {
        self.aggregates.clear();
        for aggregate in aggregates {
            self.push_aggregate(aggregate);
        }
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.set_limit(limit);
        self
    }

    pub fn set_limit(&mut self, limit: Option<u32>) {
        self.limit = limit.filter(|&n| n > 0);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortcutQuery {
    pub name: String,
    pub sql: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryNode {
    Select(SelectQuery),
    Shortcut(ShortcutQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Aggregate,
    Select,
    Count,
    Sum,
    Filter,
    Shortcut,
    Unknown,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Intent::Aggregate => "aggregate",
            Intent::Select => "select",
            Intent::Count => "count",
            Intent::Sum => "sum",
            Intent::Filter => "filter",
            Intent::Shortcut => "shortcut",
            Intent::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One vocabulary hit in the question text. `position` and `length` count chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedTerm {
    pub term: String,
    pub entity: Option<String>,
    pub attribute: Option<String>,
    pub aggregation: Option<AggregationType>,
    pub position: usize,
    pub length: usize,
}

/// Parse result plus the metadata shown to callers for logging and UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub original_text: String,
    pub node: QueryNode,
    pub matched_terms: Vec<MatchedTerm>,
    /// Share of words covered by vocabulary, in [0, 1]
    pub confidence: f64,
    pub intent: Intent,
    /// Clauses that were requested but could not be bound
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ParsedQuery {
    pub fn unresolved(text: &str) -> Self {
        Self {
            original_text: text.to_string(),
            node: QueryNode::Select(SelectQuery::default()),
            matched_terms: Vec::new(),
            confidence: 0.0,
            intent: Intent::Unknown,
            warnings: Vec::new(),
        }
    }

    /// False when there is nothing to run: an empty-entity select.
    pub fn is_executable(&self) -> bool {
        match &self.node {
            QueryNode::Select(select) => select.is_resolvable(),
            QueryNode::Shortcut(_) => true,
        }
    }

    pub fn select(&self) -> Option<&SelectQuery> {
        match &self.node {
            QueryNode::Select(select) => Some(select),
            QueryNode::Shortcut(_) => None,
        }
    }

    pub fn select_mut(&mut self) -> Option<&mut SelectQuery> {
        match &mut self.node {
            QueryNode::Select(select) => Some(select),
            QueryNode::Shortcut(_) => None,
        }
    }
}
