//! Turns question text into a [`ParsedQuery`].
//!
//! Shortcuts are checked first; otherwise every configured entity, attribute
//! and aggregation phrase is located in the case-folded text, intent is
//! classified, and a [`SelectQuery`] is assembled from the hits. Dictionary
//! terms handed to [`QueryParser::parse_with_terms`] are scanned alongside
//! the configured vocabulary.

use crate::ast::{
    AggregateFunction, AttributeRef, EntityRef, Intent, MatchedTerm, ParsedQuery, QueryNode,
    SelectQuery, ShortcutQuery,
};
use crate::config::{AggregationType, IntentTriggers};
use crate::schema::TenantSchema;
use crate::term_resolver::Mapping;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
enum TermKind {
    Entity(String),
    Attribute { entity: String, attribute: String },
    Aggregation(AggregationType),
}

#[derive(Debug, Clone)]
struct VocabularyEntry {
    phrase: String,
    kind: TermKind,
}

pub struct QueryParser {
    schema: Arc<TenantSchema>,
    vocabulary: Vec<VocabularyEntry>,
    triggers: IntentTriggers,
}

impl QueryParser {
    pub fn new(schema: Arc<TenantSchema>) -> Self {
        let vocabulary = build_vocabulary(&schema);
        let triggers = lowercase_triggers(&schema.config().functions.intent_triggers);
        debug!(
            "Parser vocabulary for tenant {}: {} phrases",
            schema.tenant_id(),
            vocabulary.len()
        );
        Self {
            schema,
            vocabulary,
            triggers,
        }
    }

    pub fn schema(&self) -> &Arc<TenantSchema> {
        &self.schema
    }

    pub fn parse(&self, text: &str) -> ParsedQuery {
        self.parse_with_terms(text, &[])
    }

    /// Parse with extra dictionary terms. Terms without a known entity are
    /// not scanned.
    pub fn parse_with_terms(&self, text: &str, terms: &[Mapping]) -> ParsedQuery {
        let lowered = text.to_lowercase();

        if let Some(parsed) = self.match_shortcut(text, &lowered) {
            return parsed;
        }

        let dictionary = dictionary_vocabulary(terms, &self.vocabulary);
        let matches = self.find_matches(&lowered, &dictionary);
        if matches.is_empty() {
            warn!("No vocabulary matched question: {}", text);
            return ParsedQuery::unresolved(text);
        }

        let intent = self.classify(&matches, &lowered);
        let mut warnings = Vec::new();
        let query = self.build_select(&matches, intent, &mut warnings);

        let distinct_terms = matches.iter().map(|m| m.term.as_str()).unique().count();
        let word_count = text.split_whitespace().count().max(1);
        let confidence = (distinct_terms as f64 / word_count as f64).min(1.0);

        info!(
            "Parsed question with intent {} ({} terms, confidence {:.2})",
            intent,
            matches.len(),
            confidence
        );

        ParsedQuery {
            original_text: text.to_string(),
            node: QueryNode::Select(query),
            matched_terms: matches,
            confidence,
            intent,
            warnings,
        }
    }

    fn match_shortcut(&self, text: &str, lowered: &str) -> Option<ParsedQuery> {
        let shortcuts = &self.schema.config().mappings.shortcuts;
        for (name, shortcut) in shortcuts {
            let key = name.to_lowercase();
            if key.trim().is_empty() {
                continue;
            }
            let Some(byte_pos) = lowered.find(&key) else {
                continue;
            };
            info!("Question matched shortcut '{}'", name);
            return Some(ParsedQuery {
                original_text: text.to_string(),
                node: QueryNode::Shortcut(ShortcutQuery {
                    name: name.clone(),
                    sql: shortcut.sql.clone(),
                    description: shortcut.description.clone(),
                    params: shortcut.parameters.clone(),
                }),
                matched_terms: vec![MatchedTerm {
                    term: name.clone(),
                    entity: None,
                    attribute: None,
                    aggregation: None,
                    position: char_offset(lowered, byte_pos),
                    length: key.chars().count(),
                }],
                confidence: 1.0,
                intent: Intent::Shortcut,
                warnings: Vec::new(),
            });
        }
        None
    }

    /// First occurrence of each vocabulary phrase, ordered by position then
    /// longest phrase first.
    fn find_matches(&self, lowered: &str, dictionary: &[VocabularyEntry]) -> Vec<MatchedTerm> {
        let mut matches: Vec<MatchedTerm> = self
            .vocabulary
            .iter()
            .chain(dictionary)
            .filter_map(|entry| {
                let byte_pos = lowered.find(&entry.phrase)?;
                let (entity, attribute, aggregation) = match &entry.kind {
                    TermKind::Entity(entity) => (Some(entity.clone()), None, None),
                    TermKind::Attribute { entity, attribute } => {
                        (Some(entity.clone()), Some(attribute.clone()), None)
                    }
                    TermKind::Aggregation(function) => (None, None, Some(*function)),
                };
                Some(MatchedTerm {
                    term: entry.phrase.clone(),
                    entity,
                    attribute,
                    aggregation,
                    position: char_offset(lowered, byte_pos),
                    length: entry.phrase.chars().count(),
                })
            })
            .collect();
        matches.sort_by(|a, b| a.position.cmp(&b.position).then(b.length.cmp(&a.length)));
        matches
    }

    fn classify(&self, matches: &[MatchedTerm], lowered: &str) -> Intent {
        if matches.iter().any(|m| m.aggregation.is_some()) {
            Intent::Aggregate
        } else if mentions(lowered, &self.triggers.select) {
            Intent::Select
        } else if mentions(lowered, &self.triggers.count) {
            Intent::Count
        } else if mentions(lowered, &self.triggers.sum) {
            Intent::Sum
        } else if mentions(lowered, &self.triggers.filter) {
            Intent::Filter
        } else {
            Intent::Select
        }
    }

    fn build_select(&self, matches: &[MatchedTerm], intent: Intent, warnings: &mut Vec<String>) -> SelectQuery {
        let entities: Vec<EntityRef> = matches
            .iter()
            .filter_map(|m| m.entity.as_deref())
            .unique()
            .map(EntityRef::new)
            .collect();

        let attributes: Vec<AttributeRef> = matches
            .iter()
            .filter_map(|m| match (&m.entity, &m.attribute) {
                (Some(entity), Some(attribute)) => Some(AttributeRef::new(entity, attribute)),
                _ => None,
            })
            .unique()
            .collect();

        let aggregates: Vec<AggregateFunction> = matches
            .iter()
            .filter_map(|m| m.aggregation)
            .map(|function| pair_aggregate(function, attributes.first()))
            .unique()
            .collect();

        let mut query = SelectQuery::new(entities);
        match intent {
            Intent::Aggregate => query.set_aggregates(aggregates),
            Intent::Count => query.set_aggregates(vec![AggregateFunction::count_all()]),
            Intent::Sum => match self.first_numeric(&attributes) {
                Some(attribute) => {
                    query.set_aggregates(vec![AggregateFunction::over(AggregationType::Sum, attribute)])
                }
                // no numeric column to sum: fall back to every column
                None => warnings.push("Sum requested but no numeric attribute was mentioned".to_string()),
            },
            _ => attributes.into_iter().for_each(|a| query.push_attribute(a)),
        }

        query.set_limit(self.schema.max_results());
        query
    }

    fn first_numeric(&self, attributes: &[AttributeRef]) -> Option<AttributeRef> {
        attributes
            .iter()
            .find(|a| {
                self.schema
                    .attribute(&a.entity, &a.attribute)
                    .map(|attr| attr.data_type.is_numeric())
                    .unwrap_or(false)
            })
            .cloned()
    }
}

/// COUNT never takes a column; DISTINCT counts distinct values of the paired
/// attribute; the rest need an attribute or fall back to `COUNT(*)`.
fn pair_aggregate(function: AggregationType, attribute: Option<&AttributeRef>) -> AggregateFunction {
    match (function, attribute) {
        (AggregationType::Count, _) | (_, None) => AggregateFunction::count_all(),
        (function, Some(attribute)) => AggregateFunction::over(function, attribute.clone()),
    }
}

fn mentions(lowered: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| !p.is_empty() && lowered.contains(p.as_str()))
}

fn char_offset(text: &str, byte_pos: usize) -> usize {
    text[..byte_pos].chars().count()
}

fn build_vocabulary(schema: &TenantSchema) -> Vec<VocabularyEntry> {
    let config = schema.config();
    let custom = &config.mappings.custom_terms;
    let mut entries: Vec<VocabularyEntry> = Vec::new();
    let mut push = |phrase: &str, kind: TermKind| {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() || entries.iter().any(|e| e.phrase == phrase && e.kind == kind) {
            return;
        }
        entries.push(VocabularyEntry { phrase, kind });
    };

    for (entity_name, entity) in schema.entities() {
        let extra = custom.entities.get(entity_name).map(|c| c.additional_names.as_slice()).unwrap_or(&[]);
        for phrase in entity.vocabulary.iter().chain(extra) {
            push(phrase.as_str(), TermKind::Entity(entity_name.clone()));
        }

        for (attr_name, attr) in &entity.attributes {
            let qualified = format!("{}.{}", entity_name, attr_name);
            let extras = [attr_name.as_str(), qualified.as_str()]
                .into_iter()
                .filter_map(|key| custom.attributes.get(key))
                .flat_map(|c| c.additional_names.iter());
            for phrase in attr.vocabulary.iter().chain(extras) {
                push(
                    phrase.as_str(),
                    TermKind::Attribute {
                        entity: entity_name.clone(),
                        attribute: attr_name.clone(),
                    },
                );
            }
        }
    }

    for aggregation in config.functions.aggregations.values() {
        for phrase in &aggregation.vocabulary {
            push(phrase.as_str(), TermKind::Aggregation(aggregation.sql_function));
        }
    }
    entries
}

/// Vocabulary entries for dictionary terms not already in `known`.
fn dictionary_vocabulary(terms: &[Mapping], known: &[VocabularyEntry]) -> Vec<VocabularyEntry> {
    let mut entries: Vec<VocabularyEntry> = Vec::new();
    for mapping in terms {
        let Some(entity) = mapping.entity.clone() else {
            debug!("Dictionary term '{}' has no entity, not scanned", mapping.canonical_term);
            continue;
        };
        let kind = match mapping.attribute.clone() {
            Some(attribute) => TermKind::Attribute { entity, attribute },
            None => TermKind::Entity(entity),
        };
        for phrase in std::iter::once(&mapping.canonical_term).chain(&mapping.aliases) {
            let phrase = phrase.trim().to_lowercase();
            let seen = known.iter().chain(&entries).any(|e| e.phrase == phrase && e.kind == kind);
            if !phrase.is_empty() && !seen {
                entries.push(VocabularyEntry {
                    phrase,
                    kind: kind.clone(),
                });
            }
        }
    }
    entries
}

fn lowercase_triggers(triggers: &IntentTriggers) -> IntentTriggers {
    let lower = |list: &[String]| list.iter().map(|p| p.trim().to_lowercase()).collect::<Vec<_>>();
    IntentTriggers {
        select: lower(&triggers.select),
        count: lower(&triggers.count),
        sum: lower(&triggers.sum),
        filter: lower(&triggers.filter),
    }
}
