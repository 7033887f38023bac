//! bizql: compiles short business-vocabulary questions into SQL.
//!
//! Pipeline: [`term_resolver`] maps phrases onto physical schema locations,
//! [`parser`] turns matched terms into an [`ast`], and [`sql`] renders that
//! AST (or a configured shortcut) for the tenant's database dialect.

pub mod ast;
pub mod clauses;
pub mod compiler;
pub mod config;
pub mod error;
pub mod fuzzy_matcher;
pub mod parser;
pub mod schema;
pub mod sql;
pub mod term_resolver;

pub use ast::{Intent, ParsedQuery, QueryNode, SelectQuery, ShortcutQuery};
pub use clauses::{ClauseBinder, ClauseRequest, UnresolvedTermPolicy};
pub use compiler::{CompileOptions, CompiledQuery, QueryCompiler};
pub use config::{ConfigSource, JsonConfigSource, StaticConfigSource, TenantConfig};
pub use error::{BizqlError, Result};
pub use parser::QueryParser;
pub use schema::{SchemaRegistry, TenantSchema};
pub use sql::{create_generator, Dialect, SqlGenerator};
pub use term_resolver::{InMemoryTermStore, Mapping, TermResolver, TermStore};
