//! Compiler facade: tenant lookup, parse, clause binding, SQL generation.

use crate::ast::ParsedQuery;
use crate::clauses::{ClauseBinder, ClauseRequest, UnresolvedTermPolicy};
use crate::config::{AggregationType, ConfigSource};
use crate::error::Result;
use crate::parser::QueryParser;
use crate::schema::{SchemaRegistry, TenantSchema};
use crate::sql::{generator_for, Dialect};
use crate::term_resolver::{InMemoryTermStore, TermResolver, TermStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct CompiledQuery {
    /// `None` when the question named no known entity
    pub sql: Option<String>,
    pub dialect: Dialect,
    pub parsed: ParsedQuery,
}

#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub clauses: Vec<ClauseRequest>,
    pub policy: UnresolvedTermPolicy,
    /// Render for this dialect instead of the tenant's configured one
    pub dialect: Option<Dialect>,
}

/// Parser and resolver built against one schema snapshot.
struct TenantRuntime {
    schema: Arc<TenantSchema>,
    parser: QueryParser,
    resolver: TermResolver,
}

pub struct QueryCompiler {
    registry: SchemaRegistry,
    store: Arc<dyn TermStore>,
    runtimes: RwLock<HashMap<String, Arc<TenantRuntime>>>,
}

impl QueryCompiler {
    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self::with_store(source, Arc::new(InMemoryTermStore::new()))
    }

    pub fn with_store(source: Arc<dyn ConfigSource>, store: Arc<dyn TermStore>) -> Self {
        Self {
            registry: SchemaRegistry::new(source),
            store,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn compile(&self, tenant_id: &str, question: &str) -> Result<CompiledQuery> {
        self.compile_with(tenant_id, question, &CompileOptions::default())
    }

    pub fn compile_with_clauses(
        &self,
        tenant_id: &str,
        question: &str,
        clauses: &[ClauseRequest],
        policy: UnresolvedTermPolicy,
    ) -> Result<CompiledQuery> {
        let options = CompileOptions {
            clauses: clauses.to_vec(),
            policy,
            dialect: None,
        };
        self.compile_with(tenant_id, question, &options)
    }

    pub fn compile_with(&self, tenant_id: &str, question: &str, options: &CompileOptions) -> Result<CompiledQuery> {
        let runtime = self.runtime(tenant_id)?;
        let mut parsed = runtime
            .parser
            .parse_with_terms(question, &runtime.resolver.dictionary_mappings());
        let dialect = options.dialect.unwrap_or_else(|| runtime.schema.dialect());

        if !parsed.is_executable() {
            warn!("No entity recognized in question for tenant {}", tenant_id);
            return Ok(CompiledQuery {
                sql: None,
                dialect,
                parsed,
            });
        }

        if !options.clauses.is_empty() {
            let applied = ClauseBinder::new(&runtime.resolver, options.policy).bind(&mut parsed, &options.clauses)?;
            debug!("Applied {}/{} clauses", applied, options.clauses.len());
        }

        let sql = generator_for(dialect).generate(&parsed, &runtime.schema)?;
        info!(
            "Compiled question for tenant {} (intent {}, confidence {:.2})",
            tenant_id, parsed.intent, parsed.confidence
        );
        Ok(CompiledQuery {
            sql: Some(sql),
            dialect,
            parsed,
        })
    }

    /// Add a dictionary term for a tenant. Returns `false` if it already exists.
    /// The term is recognized in questions and in clause fields from the next compile.
    pub fn add_mapping(
        &self,
        tenant_id: &str,
        term: &str,
        table: &str,
        column: &str,
        default_aggregation: Option<AggregationType>,
    ) -> Result<bool> {
        self.runtime(tenant_id)?
            .resolver
            .add_mapping(term, table, column, default_aggregation, None)
    }

    /// Reload a tenant's configuration; the next compile rebuilds its runtime.
    pub fn reload(&self, tenant_id: &str) -> Result<()> {
        self.registry.load(tenant_id)?;
        Ok(())
    }

    fn runtime(&self, tenant_id: &str) -> Result<Arc<TenantRuntime>> {
        let schema = self.registry.get(tenant_id)?;
        {
            let runtimes = self.runtimes.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(runtime) = runtimes.get(tenant_id) {
                if Arc::ptr_eq(&runtime.schema, &schema) {
                    return Ok(Arc::clone(runtime));
                }
            }
        }

        let mut runtimes = self.runtimes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = runtimes.get(tenant_id) {
            if Arc::ptr_eq(&runtime.schema, &schema) {
                return Ok(Arc::clone(runtime));
            }
        }
        debug!("Building parser and resolver for tenant {}", tenant_id);
        let runtime = Arc::new(TenantRuntime {
            parser: QueryParser::new(Arc::clone(&schema)),
            resolver: TermResolver::new(Arc::clone(&schema), Arc::clone(&self.store)),
            schema,
        });
        runtimes.insert(tenant_id.to_string(), Arc::clone(&runtime));
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Intent;
    use crate::config::tests::sample_config;
    use crate::config::StaticConfigSource;
    use crate::error::BizqlError;

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(Arc::new(StaticConfigSource::new().with_tenant(sample_config())))
    }

    #[test]
    fn test_compile_count() {
        let compiled = compiler().compile("acme", "כמה לקוחות").unwrap();
        assert_eq!(compiled.sql.as_deref(), Some("SELECT COUNT(*) FROM Clients"));
        assert_eq!(compiled.dialect, Dialect::Sqlite);
        assert_eq!(compiled.parsed.intent, Intent::Count);
    }

    #[test]
    fn test_unresolvable_question_has_no_sql() {
        let compiled = compiler().compile("acme", "מה מזג האוויר").unwrap();
        assert!(compiled.sql.is_none());
        assert_eq!(compiled.parsed.intent, Intent::Unknown);
    }

    #[test]
    fn test_unknown_tenant() {
        let err = compiler().compile("globex", "כמה לקוחות").unwrap_err();
        assert!(matches!(err, BizqlError::UnknownTenant(_)));
    }

    #[test]
    fn test_dialect_override_and_clauses() {
        let options = CompileOptions {
            clauses: vec![ClauseRequest::parse_filter("עיר = \"חיפה\"").unwrap()],
            policy: UnresolvedTermPolicy::Drop,
            dialect: Some(Dialect::SqlServer),
        };
        let compiled = compiler().compile_with("acme", "כמה לקוחות", &options).unwrap();
        assert_eq!(
            compiled.sql.as_deref(),
            Some("SELECT COUNT(*) FROM Clients WHERE CityName = 'חיפה'")
        );
        assert_eq!(compiled.dialect, Dialect::SqlServer);
    }

    #[test]
    fn test_added_term_resolves_in_clauses() {
        let compiler = compiler();
        assert!(compiler.add_mapping("acme", "מיקום", "Clients", "CityName", None).unwrap());
        assert!(!compiler.add_mapping("acme", "מיקום", "Clients", "CityName", None).unwrap());

        let compiled = compiler
            .compile_with_clauses(
                "acme",
                "כמה לקוחות",
                &[ClauseRequest::parse_sort("מיקום:desc")],
                UnresolvedTermPolicy::Fail,
            )
            .unwrap();
        assert!(compiled.parsed.warnings.is_empty());
        assert_eq!(
            compiled.sql.as_deref(),
            Some("SELECT COUNT(*) FROM Clients ORDER BY CityName DESC")
        );
    }

    #[test]
    fn test_added_term_resolves_in_questions() {
        let compiler = compiler();
        assert!(compiler.compile("acme", "הצג מיקום").unwrap().sql.is_none());
        assert!(compiler.add_mapping("acme", "מיקום", "Clients", "CityName", None).unwrap());

        let compiled = compiler.compile("acme", "הצג מיקום").unwrap();
        assert_eq!(compiled.sql.as_deref(), Some("SELECT CityName FROM Clients"));
        assert_eq!(compiled.parsed.matched_terms[0].term, "מיקום");
        assert_eq!(compiled.parsed.matched_terms[0].attribute.as_deref(), Some("city"));
    }

    #[test]
    fn test_reload_rebuilds_runtime() {
        let compiler = compiler();
        let first = compiler.runtime("acme").unwrap();
        assert!(Arc::ptr_eq(&first, &compiler.runtime("acme").unwrap()));
        compiler.reload("acme").unwrap();
        assert!(!Arc::ptr_eq(&first, &compiler.runtime("acme").unwrap()));
    }
}
