//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use handbookqa_core::pipeline::{ProgressReporter, QaPipeline};
use handbookqa_providers::{OpenAiEmbedder, OpenAiGenerator};
use handbookqa_shared::{
    AppConfig, IngestionReport, QueryStatus, default_db_path, init_config, load_config,
    validate_api_key,
};
use handbookqa_storage::VectorStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// HandbookQA — ask questions against the employee handbook.
#[derive(Parser)]
#[command(
    name = "handbookqa",
    version,
    about = "Retrieval-augmented question answering over an employee handbook.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest the configured handbook corpus into the vector store.
    Ingest {
        /// Rebuild the store even if it matches the current configuration.
        #[arg(long)]
        force: bool,

        /// Vector store database path (defaults to ~/.handbookqa/handbook.db).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Ask a question against the ingested handbook.
    Query {
        /// The question to answer.
        question: String,

        /// Print the raw response envelope as JSON.
        #[arg(long)]
        json: bool,

        /// Number of chunks to retrieve (overrides config).
        #[arg(long)]
        top_k: Option<usize>,

        /// Vector store database path (defaults to ~/.handbookqa/handbook.db).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show the persisted store's tag and record count.
    Status {
        /// Vector store database path (defaults to ~/.handbookqa/handbook.db).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "handbookqa=info",
        1 => "handbookqa=debug",
        _ => "handbookqa=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest { force, db } => cmd_ingest(force, db).await,
        Command::Query {
            question,
            json,
            top_k,
            db,
        } => cmd_query(&question, json, top_k, db).await,
        Command::Status { db } => cmd_status(db).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Resolve the store path from the flag or the config default.
fn resolve_db(db: Option<PathBuf>) -> Result<PathBuf> {
    match db {
        Some(path) => Ok(path),
        None => Ok(default_db_path()?),
    }
}

/// Build the pipeline against the real OpenAI-compatible providers.
fn build_pipeline(
    config: AppConfig,
    db_path: PathBuf,
) -> Result<QaPipeline<OpenAiEmbedder, OpenAiGenerator>> {
    validate_api_key(&config)?;
    let api_key = std::env::var(&config.openai.api_key_env)
        .map_err(|_| eyre!("{} is not set", config.openai.api_key_env))?;

    let embedder = OpenAiEmbedder::new(&api_key, &config.openai)?;
    let generator = OpenAiGenerator::new(&api_key, &config.openai)?;
    Ok(QaPipeline::new(config, db_path, embedder, generator))
}

async fn cmd_ingest(force: bool, db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let db_path = resolve_db(db)?;

    info!(db = %db_path.display(), force, "ingesting handbook corpus");

    let reporter = CliProgress::new();
    let mut pipeline = build_pipeline(config, db_path.clone())?;
    let report = pipeline.init(force, &reporter).await?;

    println!();
    if report.skipped {
        println!("  Store already matches the configured corpus; nothing to do.");
        println!("  Records: {}", pipeline.store_records());
    } else {
        println!("  Handbook ingested successfully!");
        println!("  Documents: {}", report.documents_fetched);
        if report.documents_failed > 0 {
            println!("  Failed:    {}", report.documents_failed);
        }
        println!("  Chunks:    {}", report.chunks_embedded);
        println!("  Store:     {}", db_path.display());
        println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    }
    println!();

    Ok(())
}

async fn cmd_query(
    question: &str,
    json: bool,
    top_k: Option<usize>,
    db: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config()?;
    if let Some(k) = top_k {
        config.retrieval.top_k = k;
    }
    let db_path = resolve_db(db)?;

    let reporter = CliProgress::new();
    let mut pipeline = build_pipeline(config, db_path)?;
    // Ingestion is a no-op when the persisted store already matches.
    pipeline.init(false, &reporter).await?;

    let response = pipeline.handle(question).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match response.status {
        QueryStatus::Success => {
            println!();
            println!("{}", response.answer.trim());
            if !response.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &response.sources {
                    println!("  - {}", source.source);
                }
            }
            println!();
            Ok(())
        }
        QueryStatus::Error => Err(eyre!(
            "query failed: {}",
            response.error.unwrap_or_else(|| "unknown error".into())
        )),
    }
}

async fn cmd_status(db: Option<PathBuf>) -> Result<()> {
    let db_path = resolve_db(db)?;
    if !db_path.exists() {
        println!("No vector store at {} (run `handbookqa ingest`).", db_path.display());
        return Ok(());
    }

    let store = VectorStore::open(&db_path).await?;
    println!();
    println!("  Store:   {}", db_path.display());
    println!("  Records: {}", store.len());
    match store.meta() {
        Some(meta) => {
            println!("  Model:   {}", meta.model_version);
            println!("  Dims:    {}", meta.dimensions);
            println!("  Corpus:  {}", meta.corpus_fingerprint);
        }
        None => println!("  Untagged (never ingested)"),
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_embedded(&self, url: &str, current: usize, total: usize) {
        self.spinner.set_message(format!(
            "Embedding [{current}/{total}] {url}"
        ));
    }

    fn done(&self, _report: &IngestionReport) {
        self.spinner.finish_and_clear();
    }
}
