//! Validated per-tenant schema and the process-wide registry that caches it.

use crate::config::{Attribute, ConfigSource, Entity, TableMapping, TenantConfig};
use crate::error::{BizqlError, Result};
use crate::sql::Dialect;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// One tenant's loaded configuration with logical→physical lookups.
#[derive(Debug)]
pub struct TenantSchema {
    config: TenantConfig,
    dialect: Dialect,
}

impl TenantSchema {
    pub fn new(config: TenantConfig) -> Result<Self> {
        config.validate()?;
        let dialect = Dialect::from_database_type(&config.datasource.database_type);
        Ok(Self { config, dialect })
    }

    pub fn tenant_id(&self) -> &str {
        &self.config.tenant_id
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.config.ontology.entities.get(name)
    }

    pub fn attribute(&self, entity: &str, attribute: &str) -> Option<&Attribute> {
        self.entity(entity).and_then(|e| e.attributes.get(attribute))
    }

    pub fn entities(&self) -> impl Iterator<Item = (&String, &Entity)> {
        self.config.ontology.entities.iter()
    }

    pub fn table_mapping(&self, entity: &str) -> Option<&TableMapping> {
        self.config.datasource.table_mappings.get(entity)
    }

    /// Physical table for an entity; a missing mapping is a configuration error.
    pub fn table_for(&self, entity: &str) -> Result<&TableMapping> {
        self.table_mapping(entity).ok_or_else(|| {
            BizqlError::Configuration(format!(
                "No table mapping for entity '{}' (tenant {})",
                entity,
                self.tenant_id()
            ))
        })
    }

    pub fn column_for(&self, entity: &str, attribute: &str) -> Result<&str> {
        let table = self.table_for(entity)?;
        table.columns.get(attribute).map(String::as_str).ok_or_else(|| {
            BizqlError::Configuration(format!(
                "No column mapping for attribute '{}.{}' in table {}",
                entity, attribute, table.physical_table
            ))
        })
    }

    /// Reverse lookup used for dictionary records that only know physical names.
    pub fn entity_for_table(&self, physical_table: &str) -> Option<&str> {
        self.config
            .datasource
            .table_mappings
            .iter()
            .find(|(_, m)| m.physical_table.eq_ignore_ascii_case(physical_table))
            .map(|(name, _)| name.as_str())
    }

    pub fn attribute_for_column(&self, entity: &str, column: &str) -> Option<&str> {
        self.table_mapping(entity)?
            .columns
            .iter()
            .find(|(_, physical)| physical.eq_ignore_ascii_case(column))
            .map(|(logical, _)| logical.as_str())
    }

    pub fn max_results(&self) -> Option<u32> {
        self.config.max_results()
    }
}

/// Caches one [`TenantSchema`] per tenant for the life of the process.
///
/// First use of a tenant loads it from the [`ConfigSource`]; concurrent first
/// uses load once. `load` forces a reload and swaps the cached snapshot, so
/// readers holding the old `Arc` keep a consistent view.
pub struct SchemaRegistry {
    source: Arc<dyn ConfigSource>,
    tenants: RwLock<HashMap<String, Arc<TenantSchema>>>,
}

impl SchemaRegistry {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self {
            source,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, tenant_id: &str) -> Result<Arc<TenantSchema>> {
        {
            let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(schema) = tenants.get(tenant_id) {
                return Ok(Arc::clone(schema));
            }
        }

        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(schema) = tenants.get(tenant_id) {
            return Ok(Arc::clone(schema));
        }
        let schema = Arc::new(TenantSchema::new(self.source.load_tenant(tenant_id)?)?);
        info!("Cached schema for tenant {} ({:?})", tenant_id, schema.dialect());
        tenants.insert(tenant_id.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Reload a tenant from its source, replacing any cached copy.
    pub fn load(&self, tenant_id: &str) -> Result<Arc<TenantSchema>> {
        let schema = Arc::new(TenantSchema::new(self.source.load_tenant(tenant_id)?)?);
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        tenants.insert(tenant_id.to_string(), Arc::clone(&schema));
        debug!("Reloaded schema for tenant {}", tenant_id);
        Ok(schema)
    }

    pub fn invalidate(&self, tenant_id: &str) -> bool {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        tenants.remove(tenant_id).is_some()
    }

    pub fn invalidate_all(&self) {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        tenants.clear();
    }

    pub fn cached_tenants(&self) -> Vec<String> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = tenants.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::config::StaticConfigSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountingSource {
        loads: AtomicUsize,
    }

    impl ConfigSource for CountingSource {
        fn load_tenant(&self, tenant_id: &str) -> Result<TenantConfig> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if tenant_id != "acme" {
                return Err(BizqlError::UnknownTenant(tenant_id.to_string()));
            }
            Ok(sample_config())
        }
    }

    #[test]
    fn test_lookups() {
        let schema = TenantSchema::new(sample_config()).unwrap();
        assert_eq!(schema.dialect(), Dialect::Sqlite);
        assert_eq!(schema.table_for("customer").unwrap().physical_table, "Clients");
        assert_eq!(schema.column_for("customer", "city").unwrap(), "CityName");
        assert_eq!(schema.entity_for_table("clients"), Some("customer"));
        assert_eq!(schema.attribute_for_column("customer", "custid"), Some("id"));
        assert!(matches!(
            schema.column_for("customer", "missing"),
            Err(BizqlError::Configuration(_))
        ));
    }

    #[test]
    fn test_registry_caches_and_invalidates() {
        let source = Arc::new(CountingSource { loads: AtomicUsize::new(0) });
        let registry = SchemaRegistry::new(source.clone());

        let first = registry.get("acme").unwrap();
        let second = registry.get("acme").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        assert!(registry.invalidate("acme"));
        let third = registry.get("acme").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);

        assert!(matches!(registry.get("nobody"), Err(BizqlError::UnknownTenant(_))));
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let source = Arc::new(CountingSource { loads: AtomicUsize::new(0) });
        let registry = Arc::new(SchemaRegistry::new(source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get("acme").map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_swaps_snapshot() {
        let source = Arc::new(StaticConfigSource::new().with_tenant(sample_config()));
        let registry = SchemaRegistry::new(source);
        let before = registry.get("acme").unwrap();
        let after = registry.load("acme").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(registry.cached_tenants(), vec!["acme".to_string()]);
        registry.invalidate_all();
        assert!(registry.cached_tenants().is_empty());
    }
}
