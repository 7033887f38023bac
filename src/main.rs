use anyhow::{Context, Result};
use bizql::{ClauseRequest, CompileOptions, Dialect, JsonConfigSource, QueryCompiler, UnresolvedTermPolicy};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bizql")]
#[command(about = "Compile a business-vocabulary question into SQL")]
struct Args {
    /// The question, in the tenant's business vocabulary
    question: String,

    /// Tenant whose configuration and dialect to use
    #[arg(short, long)]
    tenant: String,

    /// Configuration root containing shared/ and clients/
    #[arg(short, long, env = "BIZQL_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Render for this dialect instead of the tenant's (sqlite, sqlserver, mysql)
    #[arg(long)]
    dialect: Option<String>,

    /// Extra filter, e.g. 'עיר = "חיפה"' (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Sort field, optionally with :asc or :desc (repeatable)
    #[arg(long = "sort")]
    sorts: Vec<String>,

    /// Group-by field (repeatable)
    #[arg(long = "group-by")]
    group_by: Vec<String>,

    /// Fail instead of dropping clauses whose field cannot be resolved
    #[arg(long)]
    strict: bool,

    /// Print the parse metadata with the SQL as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Compiling question for tenant {}", args.tenant);

    let mut clauses = Vec::new();
    for expr in &args.filters {
        clauses.push(ClauseRequest::parse_filter(expr).with_context(|| format!("Invalid --filter '{}'", expr))?);
    }
    clauses.extend(args.sorts.iter().map(|expr| ClauseRequest::parse_sort(expr)));
    clauses.extend(args.group_by.iter().map(|field| ClauseRequest::GroupBy {
        field: field.trim().to_string(),
    }));

    let dialect = args
        .dialect
        .as_deref()
        .map(str::parse::<Dialect>)
        .transpose()
        .context("Invalid --dialect")?;

    let options = CompileOptions {
        clauses,
        policy: if args.strict {
            UnresolvedTermPolicy::Fail
        } else {
            UnresolvedTermPolicy::Drop
        },
        dialect,
    };

    let compiler = QueryCompiler::new(Arc::new(JsonConfigSource::new(&args.config_dir)));
    let compiled = compiler
        .compile_with(&args.tenant, &args.question, &options)
        .with_context(|| format!("Failed to compile question for tenant {}", args.tenant))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
        return Ok(());
    }

    for warning in &compiled.parsed.warnings {
        eprintln!("warning: {}", warning);
    }
    match &compiled.sql {
        Some(sql) => println!("{}", sql),
        None => {
            error!("No known entity in question: {}", args.question);
            std::process::exit(2);
        }
    }
    Ok(())
}
