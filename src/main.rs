//! # NewsRAG CLI (`nrag`)
//!
//! Operator surface for the news/entity retrieval pipeline: feed ingestion,
//! index rebuilds, document and entity search, and grounded chat.
//!
//! ## Usage
//!
//! ```bash
//! nrag --config ./config/newsrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nrag ingest` | Fetch the configured feeds into the document root |
//! | `nrag reindex <documents\|entities\|both>` | Rebuild indexes (documents also ingest feeds) |
//! | `nrag search "<query>"` | Document search, printed as an HTML table |
//! | `nrag search --file <path>` | Document search using a file's contents as the query |
//! | `nrag extend "<query>"` | Entity search, printed as an HTML table |
//! | `nrag ask "<question>"` | One chat turn, streamed to stdout |
//! | `nrag chat` | Interactive chat until `bye` |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use newsrag::chat::ChatStream;
use newsrag::config::{self, Config};
use newsrag::models::IndexScope;
use newsrag::progress::{format_number, ProgressMode};
use newsrag::store::OpenMode;
use newsrag::toolkit::Toolkit;

/// NewsRAG: retrieval over syndicated news and the entities they mention.
#[derive(Parser)]
#[command(name = "nrag", version, about = "News and entity retrieval with grounded chat")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/newsrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every feed in the feed list and write new documents.
    Ingest,

    /// Rebuild one or both indexes.
    ///
    /// `documents` (alias `news`) ingests feeds, annotates every document,
    /// rebuilds the entity corpus and the document index. `entities`
    /// (alias `wiki`) rebuilds the entity index from the entity corpus.
    Reindex {
        /// `documents`, `entities` or `both`.
        scope: String,

        /// Progress output on stderr: `off`, `human` or `json`.
        /// Defaults to human when stderr is a terminal.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Search documents.
    Search {
        /// Free-text query; `c{n}` tokens are expanded to entity descriptions.
        #[arg(required_unless_present = "file")]
        query: Option<String>,

        /// Use a file's contents as the query, without entity expansion.
        #[arg(long, conflicts_with = "query")]
        file: Option<PathBuf>,
    },

    /// Search entities.
    Extend { query: String },

    /// Ask one question.
    Ask { question: String },

    /// Interactive chat on the console.
    Chat,
}

fn parse_progress(value: Option<&str>) -> Result<ProgressMode> {
    match value {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => bail!("Unknown progress mode: '{}'. Use off, human or json.", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsrag=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Reject a bad scope before the config or any index is touched.
    let scope = match &cli.command {
        Commands::Reindex { scope, .. } => Some(IndexScope::from_str(scope)?),
        _ => None,
    };

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest => run_ingest(cfg).await?,
        Commands::Reindex { progress, .. } => {
            let mode = parse_progress(progress.as_deref())?;
            let scope = scope.context("reindex scope")?;
            run_reindex(cfg, scope, mode).await?;
        }
        Commands::Search { query, file } => {
            let toolkit = serving_toolkit(cfg).await?;
            let html = match file {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read query file {}", path.display()))?;
                    toolkit.retrieve(&text, true).await?
                }
                None => toolkit.retrieve(&query.unwrap_or_default(), false).await?,
            };
            print!("{}", html);
        }
        Commands::Extend { query } => {
            let toolkit = serving_toolkit(cfg).await?;
            print!("{}", toolkit.extend(&query).await?);
        }
        Commands::Ask { question } => {
            let toolkit = serving_toolkit(cfg).await?;
            print_stream(toolkit.ask(&question).await?).await?;
        }
        Commands::Chat => run_chat(cfg).await?,
    }

    Ok(())
}

async fn serving_toolkit(cfg: Config) -> Result<Toolkit> {
    Toolkit::open(cfg, OpenMode::ReadOnly, IndexScope::Both).await
}

async fn run_ingest(cfg: Config) -> Result<()> {
    let builder = newsrag::corpus::CorpusBuilder::new(&cfg)?;
    let report = builder.ingest_feeds(&cfg.paths.feed_list).await?;
    println!("ingest {}", cfg.paths.feed_list.display());
    println!("  feeds: {} ({} failed)", report.feeds, report.feeds_failed);
    println!("  entries seen: {}", format_number(report.entries_seen as u64));
    println!("  created: {}", format_number(report.created as u64));
    println!("  already present: {}", format_number(report.already_present as u64));
    println!("  skipped: {}", report.skipped.len());
    println!("ok");
    Ok(())
}

async fn run_reindex(cfg: Config, scope: IndexScope, mode: ProgressMode) -> Result<()> {
    let toolkit = Toolkit::open(cfg, OpenMode::ExclusiveWrite, scope).await?;
    let reporter = mode.reporter();
    let summary = toolkit.reindex(scope, reporter.as_ref()).await?;

    if let Some(ingest) = &summary.ingest {
        println!("ingest");
        println!("  created: {}", format_number(ingest.created as u64));
        println!("  already present: {}", format_number(ingest.already_present as u64));
    }
    if let Some(docs) = &summary.index.documents {
        println!("reindex documents");
        println!("  files: {}", format_number(docs.files as u64));
        println!("  indexed: {}", format_number(docs.indexed as u64));
        println!("  not annotated: {}", docs.skipped.len());
        println!("  spans: {}", format_number(docs.spans as u64));
    }
    if let Some(annotations) = &summary.index.annotations {
        println!("  annotations: {}", format_number(annotations.annotated as u64));
        println!("  annotations degraded: {}", annotations.degraded);
    }
    if let Some(entities) = &summary.index.materialized {
        println!("  entities written: {}", format_number(entities.written as u64));
        println!("  entities rejected (name too long): {}", entities.rejected_too_long);
    }
    if let Some(wiki) = &summary.index.entities {
        println!("reindex entities");
        println!("  files: {}", format_number(wiki.files as u64));
        println!("  spans: {}", format_number(wiki.spans as u64));
    }
    println!("ok");
    Ok(())
}

async fn print_stream(mut stream: ChatStream) -> Result<()> {
    let mut stdout = std::io::stdout();
    while let Some(token) = stream.next().await {
        write!(stdout, "{}", token?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

async fn run_chat(cfg: Config) -> Result<()> {
    let toolkit = Toolkit::open(cfg, OpenMode::ReadOnly, IndexScope::Documents).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("How can I help ? (type 'bye' to quit.)");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("bye") {
            println!("Bye. Looking forward talking with you again !");
            break;
        }
        if question.is_empty() {
            continue;
        }
        print_stream(toolkit.ask(question).await?).await?;
    }
    Ok(())
}
