//! Tenant configuration models and loading
//!
//! A tenant's configuration is split across four JSON documents:
//! - `shared/ontology.json`: business entities, attributes and their vocabulary
//! - `shared/functions.json`: aggregation / date-function vocabulary and intent triggers
//! - `clients/<tenant>/datasource.json`: dialect and logical→physical table mappings
//! - `clients/<tenant>/mappings.json`: custom terms, business rules and shortcuts
//!
//! Everything is validated once at load; later stages assume a valid model.

use crate::error::{BizqlError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Integer,
    String,
    Decimal,
    Date,
    Boolean,
}

impl AttributeType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, AttributeType::Integer | AttributeType::Decimal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub data_type: AttributeType,
    pub vocabulary: Vec<String>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub display_name: String,
    pub vocabulary: Vec<String>,
    #[serde(default)]
    pub description: String,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Entity {
    /// Name and definition of the single primary-key attribute.
    pub fn primary_key(&self) -> Option<(&String, &Attribute)> {
        self.attributes.iter().find(|(_, attr)| attr.primary_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub foreign_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ontology {
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub relationships: BTreeMap<String, Relationship>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    Max,
    Min,
    Distinct,
}

impl AggregationType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregationType::Count => "COUNT",
            AggregationType::Sum => "SUM",
            AggregationType::Avg => "AVG",
            AggregationType::Max => "MAX",
            AggregationType::Min => "MIN",
            AggregationType::Distinct => "DISTINCT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    Integer,
    Decimal,
    String,
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    pub sql_function: AggregationType,
    pub vocabulary: Vec<String>,
    pub return_type: ReturnType,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateFunction {
    pub sql_function: String,
    pub vocabulary: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Phrases that classify a question when no aggregation term matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentTriggers {
    #[serde(default = "default_select_triggers")]
    pub select: Vec<String>,
    #[serde(default = "default_count_triggers")]
    pub count: Vec<String>,
    #[serde(default = "default_sum_triggers")]
    pub sum: Vec<String>,
    #[serde(default = "default_filter_triggers")]
    pub filter: Vec<String>,
}

impl Default for IntentTriggers {
    fn default() -> Self {
        Self {
            select: default_select_triggers(),
            count: default_count_triggers(),
            sum: default_sum_triggers(),
            filter: default_filter_triggers(),
        }
    }
}

fn default_select_triggers() -> Vec<String> {
    vec!["הצג".to_string(), "הראה".to_string(), "תציג".to_string()]
}

fn default_count_triggers() -> Vec<String> {
    vec!["כמה".to_string(), "מספר".to_string()]
}

fn default_sum_triggers() -> Vec<String> {
    vec!["סכום".to_string(), "סיכום".to_string(), "חיבור".to_string()]
}

fn default_filter_triggers() -> Vec<String> {
    vec!["ב".to_string(), "של".to_string(), "עם".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Functions {
    pub aggregations: BTreeMap<String, Aggregation>,
    #[serde(default)]
    pub date_functions: BTreeMap<String, DateFunction>,
    #[serde(default)]
    pub intent_triggers: IntentTriggers,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    pub physical_table: String,
    /// Logical attribute name → physical column name
    pub columns: BTreeMap<String, String>,
    #[serde(default)]
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub max_results: Option<u32>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            max_results: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_timeout() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasource {
    pub client_id: String,
    pub database_type: String,
    pub connection_string: String,
    pub table_mappings: BTreeMap<String, TableMapping>,
    #[serde(default)]
    pub database_settings: DatabaseSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomNames {
    pub additional_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomTerms {
    #[serde(default)]
    pub entities: BTreeMap<String, CustomNames>,
    #[serde(default)]
    pub attributes: BTreeMap<String, CustomNames>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessRules {
    /// Entity → (field → raw condition text using logical column names)
    #[serde(default)]
    pub default_filters: BTreeMap<String, BTreeMap<String, String>>,
    /// Entity → raw ORDER BY text using logical column names
    #[serde(default)]
    pub default_ordering: BTreeMap<String, String>,
    #[serde(default)]
    pub max_results_override: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryShortcut {
    pub sql: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mappings {
    pub client_id: String,
    #[serde(default)]
    pub custom_terms: CustomTerms,
    #[serde(default)]
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub shortcuts: BTreeMap<String, QueryShortcut>,
}

/// Everything one tenant needs to compile questions.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub ontology: Ontology,
    pub functions: Functions,
    pub datasource: Datasource,
    pub mappings: Mappings,
}

const MAX_RESULTS_CEILING: u32 = 10_000;

impl TenantConfig {
    /// Check the structural rules the rest of the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.ontology.entities.is_empty() {
            return Err(BizqlError::Validation("Ontology must have at least one entity".to_string()));
        }

        for (entity_name, entity) in &self.ontology.entities {
            check_vocabulary(&entity.vocabulary, &format!("entity '{}'", entity_name))?;
            if entity.attributes.is_empty() {
                return Err(BizqlError::Validation(format!(
                    "Entity '{}' must have at least one attribute",
                    entity_name
                )));
            }
            let primary_keys = entity.attributes.values().filter(|a| a.primary_key).count();
            if primary_keys != 1 {
                return Err(BizqlError::Validation(format!(
                    "Entity '{}' must have exactly one primary key, found {}",
                    entity_name, primary_keys
                )));
            }
            for (attr_name, attr) in &entity.attributes {
                check_vocabulary(&attr.vocabulary, &format!("attribute '{}.{}'", entity_name, attr_name))?;
            }
        }

        for (name, rel) in &self.ontology.relationships {
            for endpoint in [&rel.from, &rel.to] {
                if !self.ontology.entities.contains_key(endpoint) {
                    return Err(BizqlError::Validation(format!(
                        "Relationship '{}' references unknown entity '{}'",
                        name, endpoint
                    )));
                }
            }
        }

        if self.functions.aggregations.is_empty() {
            return Err(BizqlError::Validation("At least one aggregation must be defined".to_string()));
        }
        for (name, agg) in &self.functions.aggregations {
            check_vocabulary(&agg.vocabulary, &format!("aggregation '{}'", name))?;
        }

        let ds = &self.datasource;
        if ds.client_id.trim().is_empty() || self.mappings.client_id.trim().is_empty() {
            return Err(BizqlError::Validation("Client ID cannot be empty".to_string()));
        }
        if ds.connection_string.trim().is_empty() {
            return Err(BizqlError::Validation("Connection string cannot be empty".to_string()));
        }
        if ds.table_mappings.is_empty() {
            return Err(BizqlError::Validation(
                "Datasource must have at least one table mapping".to_string(),
            ));
        }
        for (entity_name, mapping) in &ds.table_mappings {
            if mapping.columns.is_empty() {
                return Err(BizqlError::Validation(format!(
                    "Table mapping for '{}' must have at least one column",
                    entity_name
                )));
            }
        }

        let limits = [
            ds.database_settings.max_results,
            self.mappings.business_rules.max_results_override,
        ];
        for limit in limits.into_iter().flatten() {
            if limit == 0 || limit > MAX_RESULTS_CEILING {
                return Err(BizqlError::Validation(format!(
                    "max_results must be between 1 and {}, got {}",
                    MAX_RESULTS_CEILING, limit
                )));
            }
        }

        for (name, shortcut) in &self.mappings.shortcuts {
            if shortcut.sql.trim().is_empty() {
                return Err(BizqlError::Validation(format!("Shortcut '{}' has empty SQL", name)));
            }
        }

        Ok(())
    }

    /// Row cap applied to generated queries, if any.
    pub fn max_results(&self) -> Option<u32> {
        self.mappings
            .business_rules
            .max_results_override
            .or(self.datasource.database_settings.max_results)
    }
}

fn check_vocabulary(names: &[String], owner: &str) -> Result<()> {
    if names.is_empty() || names.iter().any(|n| n.trim().is_empty()) {
        return Err(BizqlError::Validation(format!(
            "Vocabulary for {} must be a non-empty list of non-empty strings",
            owner
        )));
    }
    Ok(())
}

/// Where tenant configurations come from.
pub trait ConfigSource: Send + Sync {
    fn load_tenant(&self, tenant_id: &str) -> Result<TenantConfig>;
}

/// Reads the JSON layout described in the module docs from a root directory.
pub struct JsonConfigSource {
    root: PathBuf,
}

impl JsonConfigSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load_json<T: for<'de> Deserialize<'de>>(path: PathBuf) -> Result<T> {
        if !path.exists() {
            return Err(BizqlError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            BizqlError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            BizqlError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

impl ConfigSource for JsonConfigSource {
    fn load_tenant(&self, tenant_id: &str) -> Result<TenantConfig> {
        let client_dir = self.root.join("clients").join(tenant_id);
        if !client_dir.is_dir() {
            return Err(BizqlError::UnknownTenant(tenant_id.to_string()));
        }

        let shared = self.root.join("shared");
        let config = TenantConfig {
            tenant_id: tenant_id.to_string(),
            ontology: Self::load_json(shared.join("ontology.json"))?,
            functions: Self::load_json(shared.join("functions.json"))?,
            datasource: Self::load_json(client_dir.join("datasource.json"))?,
            mappings: Self::load_json(client_dir.join("mappings.json"))?,
        };
        config.validate()?;

        info!(
            "Loaded configuration for tenant {}: {} entities, {} table mappings, {} shortcuts",
            tenant_id,
            config.ontology.entities.len(),
            config.datasource.table_mappings.len(),
            config.mappings.shortcuts.len()
        );
        Ok(config)
    }
}

/// In-memory configurations keyed by tenant.
#[derive(Default)]
pub struct StaticConfigSource {
    tenants: RwLock<HashMap<String, TenantConfig>>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(self, config: TenantConfig) -> Self {
        self.insert(config);
        self
    }

    pub fn insert(&self, config: TenantConfig) {
        let mut tenants = self.tenants.write().unwrap_or_else(|e| e.into_inner());
        tenants.insert(config.tenant_id.clone(), config);
    }
}

impl ConfigSource for StaticConfigSource {
    fn load_tenant(&self, tenant_id: &str) -> Result<TenantConfig> {
        let tenants = self.tenants.read().unwrap_or_else(|e| e.into_inner());
        let config = tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| BizqlError::UnknownTenant(tenant_id.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
