//! medgraph CLI: build and query a medical knowledge graph.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use medgraph::config::{BackendKind, Config};
use medgraph::graph::{GraphStore, search_subgraph};
use medgraph::index::{IndexBuilder, IndexSnapshot};
use medgraph::ingest::{
    GraphIngestor, ResultLog, check_log, dedupe_units, load_log_into_graph, read_units,
    renormalize_log,
};
use medgraph::oracle::{HttpEmbedder, HttpReranker, OllamaExtractor};
use medgraph::retrieve::HybridRetriever;

#[derive(Parser)]
#[command(name = "medgraph", version, about = "Medical knowledge graph builder and retriever")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract knowledge from text units and write it to the graph.
    Ingest {
        /// JSON array of strings, or of objects with a `knowledge` field.
        #[arg(long)]
        input: PathBuf,

        /// Worker count (0 = configured default).
        #[arg(long, default_value = "0")]
        concurrency: usize,

        /// Keep duplicate units instead of dropping all but the last.
        #[arg(long)]
        keep_duplicates: bool,
    },

    /// Re-validate the result log, repair what can be repaired, drop the rest.
    Normalize {
        /// Result log to use instead of `ingest.log_path`.
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Validate the result log without changing it.
    Check {
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Project every result log entry into the graph.
    Load {
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Embed all knowledge and entity nodes and save the vector index.
    Index,

    /// Retrieve context cards for a question.
    Query {
        text: String,

        /// Number of cards to return (defaults to the configured value).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print the subgraph around a keyword as JSON.
    Search { keyword: String },

    /// Write a config file with every default spelled out.
    InitConfig {
        #[arg(long, default_value = "medgraph.toml")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            input,
            concurrency,
            keep_duplicates,
        } => {
            let mut units = read_units(&input)?;
            if !keep_duplicates {
                units = dedupe_units(units);
            }
            let store = Arc::new(open_store(&config)?);
            let log = open_log(&config)?.map(Arc::new);
            let extractor = Arc::new(OllamaExtractor::new(config.oracle.ollama.clone()));
            let ingestor = GraphIngestor::new(extractor, store.clone(), log, config.ingest.clone());

            let report = ingestor.ingest_all(&units, concurrency);
            println!("{report}");
            let stats = store.stats();
            if stats.dropped_writes() > 0 {
                println!(
                    "warning: {} graph writes were dropped after retrying",
                    stats.dropped_writes()
                );
            }
        }

        Commands::Normalize { log } => {
            let log = require_log(&config, log)?;
            let extractor = OllamaExtractor::new(config.oracle.ollama.clone());
            let report = renormalize_log(&log, &extractor, config.ingest.repair_scope)?;
            println!(
                "{} valid, {} repaired, {} dropped",
                report.valid, report.repaired, report.dropped
            );
        }

        Commands::Check { log } => {
            let log = require_log(&config, log)?;
            let problems = check_log(&log, config.ingest.repair_scope)?;
            if problems.is_empty() {
                println!("all entries valid");
            }
            for (entry, errors) in &problems {
                for error in errors {
                    println!("entry {entry}: {error}");
                }
            }
        }

        Commands::Load { log } => {
            let log = require_log(&config, log)?;
            let store = config.graph_store();
            let stats = load_log_into_graph(&log, &store)?;
            println!(
                "{} node writes, {} edge writes, {} dropped",
                stats.nodes, stats.edges, stats.dropped
            );
        }

        Commands::Index => {
            let store = open_store(&config)?;
            let embedder = Arc::new(HttpEmbedder::new(config.oracle.embedding.clone()));
            let snapshot = IndexBuilder::new(embedder)
                .with_batch_size(config.index.batch_size)
                .build_from_graph(&store)?;
            snapshot.save(&config.index.dir)?;
            println!(
                "indexed {} nodes into {}",
                snapshot.len(),
                config.index.dir.display()
            );
        }

        Commands::Query { text, top_k } => {
            let snapshot = Arc::new(IndexSnapshot::load(&config.index.dir)?);
            let retriever = HybridRetriever::new(
                snapshot,
                Arc::new(open_store(&config)?),
                Arc::new(HttpEmbedder::new(config.oracle.embedding.clone())),
                Arc::new(HttpReranker::new(config.oracle.rerank.clone())),
                config.retrieve.clone(),
            );
            let top_k = top_k.unwrap_or(config.retrieve.top_k);
            let cards = retriever.retrieve_scored(&text, top_k);
            if cards.is_empty() {
                println!("no results");
            }
            for (rank, card) in cards.iter().enumerate() {
                println!("#{} [{:.4}] {}\n{}\n", rank + 1, card.score, card.node, card.text);
            }
        }

        Commands::Search { keyword } => {
            let store = open_store(&config)?;
            let subgraph = search_subgraph(&store, &keyword);
            println!(
                "{}",
                serde_json::to_string_pretty(&subgraph).into_diagnostic()?
            );
        }

        Commands::InitConfig { out } => {
            Config::default().save(&out)?;
            println!("wrote {}", out.display());
        }
    }

    Ok(())
}

/// The configured graph store. A memory backend starts out hydrated from
/// the result log, since it has no persistence of its own.
fn open_store(config: &Config) -> Result<GraphStore> {
    let store = config.graph_store();
    if config.graph.backend == BackendKind::Memory {
        if let Some(log) = open_log(config)? {
            load_log_into_graph(&log, &store)?;
        }
    }
    Ok(store)
}

fn open_log(config: &Config) -> Result<Option<ResultLog>> {
    match &config.ingest.log_path {
        Some(path) => Ok(Some(ResultLog::open(path)?)),
        None => Ok(None),
    }
}

/// The result log at `path`, or the configured one.
fn require_log(config: &Config, path: Option<PathBuf>) -> Result<ResultLog> {
    if let Some(path) = path {
        return Ok(ResultLog::open(path)?);
    }
    match open_log(config)? {
        Some(log) => Ok(log),
        None => miette::bail!("no result log configured; set `ingest.log_path`"),
    }
}
