//! Resolves vocabulary phrases to physical schema locations.
//!
//! Mappings come from the tenant schema (entity and attribute vocabulary plus
//! custom tenant terms) and from a per-tenant [`TermStore`] dictionary. They
//! are gathered into a [`TermCache`] snapshot on first use; `add_mapping` and
//! `refresh` swap that snapshot under the write lock.

use crate::config::AggregationType;
use crate::error::{BizqlError, Result};
use crate::fuzzy_matcher::{normalize_term, FuzzyMatcher};
use crate::schema::TenantSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Resolved target of a vocabulary phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    pub canonical_term: String,
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub default_aggregation: Option<AggregationType>,
    #[serde(default)]
    pub date_field: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Logical entity this phrase denotes, when known
    #[serde(default)]
    pub entity: Option<String>,
    /// Logical attribute; `None` when the phrase names a whole entity
    #[serde(default)]
    pub attribute: Option<String>,
}

impl Mapping {
    pub fn new(term: impl Into<String>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            canonical_term: term.into(),
            table: table.into(),
            column: column.into(),
            default_aggregation: None,
            date_field: None,
            aliases: Vec::new(),
            entity: None,
            attribute: None,
        }
    }

    fn matches_normalized(&self, key: &str) -> bool {
        normalize_term(&self.canonical_term) == key || self.aliases.iter().any(|a| normalize_term(a) == key)
    }
}

/// Per-tenant dictionary of extra terms.
pub trait TermStore: Send + Sync {
    fn records(&self, tenant_id: &str) -> Vec<Mapping>;

    /// True if the tenant already has a record whose canonical term or an
    /// alias normalizes to `normalized_term`.
    fn contains(&self, tenant_id: &str, normalized_term: &str) -> bool;

    fn insert(&self, tenant_id: &str, mapping: Mapping);
}

#[derive(Default)]
pub struct InMemoryTermStore {
    records: RwLock<HashMap<String, Vec<Mapping>>>,
}

impl InMemoryTermStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TermStore for InMemoryTermStore {
    fn records(&self, tenant_id: &str) -> Vec<Mapping> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(tenant_id).cloned().unwrap_or_default()
    }

    fn contains(&self, tenant_id: &str, normalized_term: &str) -> bool {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .get(tenant_id)
            .map(|list| list.iter().any(|m| m.matches_normalized(normalized_term)))
            .unwrap_or(false)
    }

    fn insert(&self, tenant_id: &str, mapping: Mapping) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.entry(tenant_id.to_string()).or_default().push(mapping);
    }
}

/// Immutable lookup tables built from every mapping source, in load order.
#[derive(Debug, Default)]
pub struct TermCache {
    mappings: Vec<Mapping>,
    /// Normalized canonical term per mapping, same index as `mappings`
    canonical: Vec<String>,
    exact: HashMap<String, usize>,
    aliases: HashMap<String, usize>,
    /// Index of the first mapping that came from the term store
    dictionary_start: usize,
}

impl TermCache {
    fn push(&mut self, mapping: Mapping) {
        let idx = self.mappings.len();
        let key = normalize_term(&mapping.canonical_term);
        if key.is_empty() {
            return;
        }
        if self.exact.contains_key(&key) {
            debug!("Duplicate canonical term '{}' ignored", mapping.canonical_term);
            return;
        }
        self.exact.insert(key.clone(), idx);
        for alias in &mapping.aliases {
            let alias_key = normalize_term(alias);
            if !alias_key.is_empty() {
                self.aliases.entry(alias_key).or_insert(idx);
            }
        }
        self.canonical.push(key);
        self.mappings.push(mapping);
    }

    fn exact(&self, key: &str) -> Option<&Mapping> {
        self.exact.get(key).map(|&idx| &self.mappings[idx])
    }

    fn alias(&self, key: &str) -> Option<&Mapping> {
        self.aliases.get(key).map(|&idx| &self.mappings[idx])
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

pub struct TermResolver {
    schema: Arc<TenantSchema>,
    store: Arc<dyn TermStore>,
    matcher: FuzzyMatcher,
    cache: RwLock<Option<Arc<TermCache>>>,
}

impl TermResolver {
    pub fn new(schema: Arc<TenantSchema>, store: Arc<dyn TermStore>) -> Self {
        Self {
            schema,
            store,
            matcher: FuzzyMatcher::default(),
            cache: RwLock::new(None),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.matcher = FuzzyMatcher::new(threshold);
        self
    }

    pub fn schema(&self) -> &Arc<TenantSchema> {
        &self.schema
    }

    pub fn threshold(&self) -> f64 {
        self.matcher.threshold
    }

    /// Resolve a phrase: exact canonical term, then alias, then fuzzy.
    pub fn resolve(&self, term: &str) -> Result<Mapping> {
        let key = normalize_term(term);
        if key.is_empty() {
            return Err(BizqlError::TermNotFound(term.to_string()));
        }
        let cache = self.cache();

        if let Some(mapping) = cache.exact(&key) {
            debug!("Resolved '{}' exactly to {}.{}", term, mapping.table, mapping.column);
            return Ok(mapping.clone());
        }
        if let Some(mapping) = cache.alias(&key) {
            debug!("Resolved '{}' via alias to {}.{}", term, mapping.table, mapping.column);
            return Ok(mapping.clone());
        }

        match self.matcher.best_match(&key, cache.canonical.iter().map(String::as_str)) {
            Some((idx, score)) => {
                let mapping = &cache.mappings[idx];
                warn!(
                    "Fuzzy matched '{}' to '{}' (score {:.1})",
                    term, mapping.canonical_term, score
                );
                Ok(mapping.clone())
            }
            None => Err(BizqlError::TermNotFound(term.to_string())),
        }
    }

    /// Exact canonical or alias hit, no fuzzy fallback.
    pub fn has(&self, term: &str) -> bool {
        let key = normalize_term(term);
        let cache = self.cache();
        cache.exact(&key).is_some() || cache.alias(&key).is_some()
    }

    /// Add a dictionary term for this tenant. Returns `false` if the term is
    /// already known; otherwise stores it and drops the cached snapshot.
    pub fn add_mapping(
        &self,
        term: &str,
        table: &str,
        column: &str,
        default_aggregation: Option<AggregationType>,
        date_field: Option<&str>,
    ) -> Result<bool> {
        let key = normalize_term(term);
        if key.is_empty() || table.trim().is_empty() || column.trim().is_empty() {
            return Err(BizqlError::Validation(
                "Term, table and column must be non-empty".to_string(),
            ));
        }

        let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let known_in_cache = match guard.as_ref() {
            Some(cache) => cache.exact(&key).is_some() || cache.alias(&key).is_some(),
            None => {
                let cache = self.build_cache();
                cache.exact(&key).is_some() || cache.alias(&key).is_some()
            }
        };
        let tenant_id = self.schema.tenant_id();
        if known_in_cache || self.store.contains(tenant_id, &key) {
            debug!("Term '{}' already exists for tenant {}", term, tenant_id);
            return Ok(false);
        }

        let mut mapping = Mapping::new(term.trim(), table.trim(), column.trim());
        mapping.default_aggregation = default_aggregation;
        mapping.date_field = date_field.map(str::to_string);
        self.store.insert(tenant_id, mapping);
        *guard = None;

        info!("Added term '{}' → {}.{} for tenant {}", term, table, column, tenant_id);
        Ok(true)
    }

    /// Discard the snapshot and rebuild it from all sources. The rebuild
    /// holds the write lock so a concurrent `add_mapping` cannot be lost.
    pub fn refresh(&self) {
        let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(self.build_cache()));
    }

    pub fn all_mappings(&self) -> Vec<Mapping> {
        self.cache().mappings.clone()
    }

    /// Mappings from the term store, with entity and attribute filled in
    /// where the table and column are known to the schema.
    pub fn dictionary_mappings(&self) -> Vec<Mapping> {
        let cache = self.cache();
        cache.mappings[cache.dictionary_start..].to_vec()
    }

    fn cache(&self) -> Arc<TermCache> {
        {
            let guard = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cache) = guard.as_ref() {
                return Arc::clone(cache);
            }
        }
        let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = guard.as_ref() {
            return Arc::clone(cache);
        }
        let cache = Arc::new(self.build_cache());
        *guard = Some(Arc::clone(&cache));
        cache
    }

    fn build_cache(&self) -> TermCache {
        let mut cache = TermCache::default();
        for mapping in schema_mappings(&self.schema) {
            cache.push(mapping);
        }
        cache.dictionary_start = cache.len();

        for mut record in self.store.records(self.schema.tenant_id()) {
            if record.entity.is_none() {
                record.entity = self.schema.entity_for_table(&record.table).map(str::to_string);
            }
            if let (Some(entity), None) = (record.entity.as_deref(), record.attribute.as_ref()) {
                record.attribute = self
                    .schema
                    .attribute_for_column(entity, &record.column)
                    .map(str::to_string);
            }
            cache.push(record);
        }

        info!(
            "Built term cache for tenant {} with {} mappings",
            self.schema.tenant_id(),
            cache.len()
        );
        cache
    }
}

/// Mappings implied by the ontology, datasource and custom tenant terms.
fn schema_mappings(schema: &TenantSchema) -> Vec<Mapping> {
    let custom = &schema.config().mappings.custom_terms;
    let mut mappings = Vec::new();

    for (entity_name, entity) in schema.entities() {
        let Some(table) = schema.table_mapping(entity_name) else {
            debug!("Entity '{}' has no table mapping, skipping its vocabulary", entity_name);
            continue;
        };
        let Some((pk_name, _)) = entity.primary_key() else {
            continue;
        };
        let Some(pk_column) = table.columns.get(pk_name) else {
            warn!("Primary key '{}.{}' has no physical column", entity_name, pk_name);
            continue;
        };

        let date_field = entity
            .attributes
            .iter()
            .filter(|(_, attr)| attr.data_type == crate::config::AttributeType::Date)
            .find_map(|(name, _)| table.columns.get(name).cloned());

        let Some((canonical, rest)) = entity.vocabulary.split_first() else {
            continue;
        };
        let mut aliases: Vec<String> = rest.to_vec();
        if let Some(extra) = custom.entities.get(entity_name) {
            aliases.extend(extra.additional_names.iter().cloned());
        }
        aliases.push(entity_name.clone());

        mappings.push(Mapping {
            canonical_term: canonical.clone(),
            table: table.physical_table.clone(),
            column: pk_column.clone(),
            default_aggregation: Some(AggregationType::Count),
            date_field: date_field.clone(),
            aliases,
            entity: Some(entity_name.clone()),
            attribute: None,
        });

        for (attr_name, attr) in &entity.attributes {
            let Some(column) = table.columns.get(attr_name) else {
                continue;
            };
            let Some((canonical, rest)) = attr.vocabulary.split_first() else {
                continue;
            };
            let qualified = format!("{}.{}", entity_name, attr_name);
            let mut aliases: Vec<String> = rest.to_vec();
            for key in [attr_name, &qualified] {
                if let Some(extra) = custom.attributes.get(key) {
                    aliases.extend(extra.additional_names.iter().cloned());
                }
            }
            aliases.push(qualified.clone());
            aliases.push(attr_name.clone());

            mappings.push(Mapping {
                canonical_term: canonical.clone(),
                table: table.physical_table.clone(),
                column: column.clone(),
                default_aggregation: attr.data_type.is_numeric().then_some(AggregationType::Sum),
                date_field: date_field.clone(),
                aliases,
                entity: Some(entity_name.clone()),
                attribute: Some(attr_name.clone()),
            });
        }
    }
    mappings
}
