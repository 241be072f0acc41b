use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use asyncquery::adapter::{Capabilities, MemoryProvider, QueryAdapter};
use asyncquery::config::AdapterOptions;
use asyncquery::expr::{AsyncQuery, BinaryOp, Expr, Param, ScalarMethod, TypeToken, Value};
use asyncquery::operator::{Family, Operator};
use asyncquery::sequence::CancellationSignal;
use asyncquery::translate::TranslatorRegistry;
use asyncquery::{QueryEngine, QueryResult};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Runs a built-in query scenario against the in-memory provider
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Scenario to run
    #[arg(value_enum)]
    scenario: Scenario,

    /// Adapter options file (defaults to <config_dir>/asyncquery/adapter.toml)
    #[arg(long = "options")]
    options: Option<PathBuf>,

    /// Let terminal hooks finish in memory
    #[arg(long)]
    allow_in_memory_evaluation: bool,

    /// Let untranslatable operators run in memory
    #[arg(long)]
    allow_implicit_post_processing: bool,

    /// Also allow it when a default translator refused the call
    #[arg(long)]
    allow_implicit_default_post_processing: bool,

    /// Print the rewritten expression tree
    #[arg(long)]
    explain: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// `where(x > 2).sum()` pushed down to a provider that has both
    WhereSum,
    /// `select(x => x.ToString().Length)` with no translator for select
    SelectFallback,
    /// `average()` over integers
    Average,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut options = match &cli.options {
        Some(path) => AdapterOptions::load(path)?,
        None => AdapterOptions::load_default()?,
    };
    options.allow_in_memory_evaluation |= cli.allow_in_memory_evaluation;
    options.allow_implicit_post_processing |= cli.allow_implicit_post_processing;
    options.allow_implicit_default_post_processing |= cli.allow_implicit_default_post_processing;

    let capabilities = match cli.scenario {
        Scenario::WhereSum => Capabilities::only(&[Family::Where, Family::Sum]),
        Scenario::SelectFallback | Scenario::Average => Capabilities::all(),
    };
    let provider = Arc::new(
        MemoryProvider::with_capabilities("ints", options, capabilities)
            .with_table(TypeToken::Int32, (1..=5).map(Value::from).collect())?,
    );
    let adapter: Arc<dyn QueryAdapter> = provider.clone();
    let cancel = CancellationSignal::new();
    let source = AsyncQuery::from_adapter(adapter, TypeToken::Int32).with_cancellation(&cancel);

    let x = Param::new("x", TypeToken::Int32);
    let (engine, expr) = match cli.scenario {
        Scenario::WhereSum => {
            let predicate = Expr::lambda(
                vec![x.clone()],
                Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(2))?,
            );
            (QueryEngine::new(), source.where_(predicate)?.sum()?)
        }
        Scenario::SelectFallback => {
            let text = Expr::method(ScalarMethod::ToString, vec![Expr::param(&x)])?;
            let length = Expr::lambda(
                vec![x.clone()],
                Expr::method(ScalarMethod::Length, vec![text])?,
            );
            let mut registry = TranslatorRegistry::with_defaults();
            registry.unregister(&Operator::asynchronous(Family::Select));
            (
                QueryEngine::with_registry(Arc::new(registry)),
                source.select(length)?.into_expr(),
            )
        }
        Scenario::Average => (QueryEngine::new(), source.average()?),
    };

    if cli.explain {
        let rewritten = engine
            .rewrite_with(&expr, &cancel)
            .context("Failed to rewrite query")?;
        println!("query:     {}", expr);
        println!("rewritten: {}", rewritten);
    }

    let result = match engine.execute(&expr, cancel.clone()).await? {
        QueryResult::Scalar(value) => value,
        QueryResult::Sequence(seq) => Value::list(seq.collect(&cancel).await?),
    };

    if cli.json {
        let report = serde_json::json!({
            "scenario": format!("{:?}", cli.scenario),
            "result": result.to_json(),
            "operations": provider.operation_log(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", result);
        for operation in provider.operation_log() {
            println!("  {}", operation);
        }
    }
    Ok(())
}
