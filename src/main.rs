use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use nlq_pipeline::catalog::{PgSchemaProvider, RegistryProvider, SchemaProvider, StaticRegistryProvider};
use nlq_pipeline::config::AppConfig;
use nlq_pipeline::eval::{EvalSink, JsonlEvalSink};
use nlq_pipeline::execution::{PgQueryExecutor, QueryRunner};
use nlq_pipeline::intent::IntentContext;
use nlq_pipeline::llm::{build_adapter, ResilienceServices};
use nlq_pipeline::observability::PipelineMetrics;
use nlq_pipeline::pipeline::{ModelSelection, Pipeline, PipelineDeps, PipelineOutput, RunOptions};
use nlq_pipeline::privacy::{PiiMasker, RegexPiiMasker};
use nlq_pipeline::sql_mode::validate_generated_sql;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Answer business questions over tenant data")]
struct Cli {
    /// Registry document (overrides NLQ_REGISTRY_PATH)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question
    Ask {
        question: String,

        #[arg(long, default_value = "default")]
        tenant: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Analysis lens slug
        #[arg(long)]
        lens: Option<String>,

        /// Registry domain
        #[arg(long)]
        domain: Option<String>,

        #[arg(long)]
        skip_narrative: bool,

        /// Invocation deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Print the full output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the registry catalog as the intent model sees it
    Catalog {
        #[arg(long)]
        domain: Option<String>,
    },
    /// Validate SQL against the live schema without running it
    ValidateSql { sql: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if cli.registry.is_some() {
        config.registry_path = cli.registry.clone();
    }

    match cli.command {
        Command::Ask {
            question,
            tenant,
            user,
            lens,
            domain,
            skip_narrative,
            deadline_ms,
            json,
        } => {
            let pipeline = build_pipeline(&config).await?;
            let mut context = IntentContext::new(tenant, user, Local::now().date_naive());
            if let Some(lens) = lens {
                context = context.with_lens(lens);
            }
            let options = RunOptions {
                skip_narrative,
                deadline: deadline_ms.map(Duration::from_millis),
                domain,
            };

            let output = pipeline.run(&question, context, options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_output(&output);
            }
        }
        Command::Catalog { domain } => {
            let registry = load_registry(&config)?;
            let catalog = registry.build_catalog(domain.as_deref()).await?;
            println!("{}", catalog.describe_for_prompt());
        }
        Command::ValidateSql { sql } => {
            let executor = PgQueryExecutor::connect(&config.database).await?;
            let provider = PgSchemaProvider::new(executor.pool().clone(), &config.database);
            let schema = provider.build_schema_catalog().await?;
            let validation = validate_generated_sql(&sql, &schema, config.pipeline.max_rows);
            println!("{}", serde_json::to_string_pretty(&validation)?);
            if !validation.valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_registry(config: &AppConfig) -> Result<StaticRegistryProvider> {
    let path = match &config.registry_path {
        Some(path) => path,
        None => bail!("No registry document; pass --registry or set NLQ_REGISTRY_PATH"),
    };
    StaticRegistryProvider::from_file(path).with_context(|| format!("loading registry {}", path.display()))
}

async fn build_pipeline(config: &AppConfig) -> Result<Pipeline> {
    let registry: Arc<dyn RegistryProvider> = Arc::new(load_registry(config)?);

    let services = Arc::new(ResilienceServices::from_config(&config.resilience));
    let adapter = build_adapter(&config.llm, services)?;

    let executor = PgQueryExecutor::connect(&config.database).await?;
    let schema: Option<Arc<dyn SchemaProvider>> = if config.pipeline.sql_mode_enabled {
        Some(Arc::new(PgSchemaProvider::new(executor.pool().clone(), &config.database)))
    } else {
        None
    };
    let result_cache = Arc::new(nlq_pipeline::cache::ResultCache::from_config(&config.resilience));
    let runner = QueryRunner::new(Arc::new(executor), config.pipeline.query_timeout()).with_cache(result_cache);

    let eval_sink: Option<Arc<dyn EvalSink>> = config
        .eval_log_path
        .as_ref()
        .map(|path| Arc::new(JsonlEvalSink::new(path.clone())) as Arc<dyn EvalSink>);
    let masker: Option<Arc<dyn PiiMasker>> = Some(Arc::new(RegexPiiMasker::new()));

    info!(
        provider = ?config.llm.provider,
        sql_mode = schema.is_some(),
        eval_log = ?config.eval_log_path,
        "Pipeline ready"
    );

    let deps = PipelineDeps {
        adapter,
        registry,
        schema,
        runner: Arc::new(runner),
        eval_sink,
        masker,
        metrics: Arc::new(PipelineMetrics::new()),
    };
    Ok(Pipeline::new(deps, config.pipeline.clone()).with_models(ModelSelection::from_config(&config.llm)))
}

fn print_output(output: &PipelineOutput) {
    if output.is_clarification {
        println!("{}", output.clarification_text.as_deref().unwrap_or_default());
        return;
    }

    if let Some(narrative) = &output.narrative {
        println!("{}\n", narrative);
    }
    if let Some(data) = &output.data {
        println!("{}", data.to_markdown_table(20));
    }
    let mode = output.mode.map(|m| m.as_str()).unwrap_or("none");
    println!(
        "\nmode: {}  tokens: {}/{}",
        mode, output.tokens_input, output.tokens_output
    );
    for warning in &output.warnings {
        println!("warning: {}", warning);
    }
    for error in output.compilation_errors.iter().chain(output.fallback_errors.iter()) {
        println!("error: {}", error);
    }
}
