//! # medrag CLI
//!
//! The `medrag` binary drives the question-answering engine: index
//! initialization, document ingestion, raw retrieval, single-shot questions,
//! and a multi-turn chat REPL.
//!
//! ## Usage
//!
//! ```bash
//! medrag --config ./medrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `medrag init` | Create the index directory (and seed it if configured) |
//! | `medrag ingest <path>` | Ingest a `.txt` file or directory |
//! | `medrag search "<query>"` | Raw knowledge-base retrieval with scores |
//! | `medrag ask "<question>"` | One orchestrated question-answer turn |
//! | `medrag chat` | Interactive multi-turn session |
//! | `medrag stats` | Index size, dimension, metric, providers |
//!
//! ## Examples
//!
//! ```bash
//! # Build an index from a corpus of text files
//! medrag init
//! medrag ingest ./docs
//!
//! # Inspect what retrieval sees
//! medrag search "fever in children" --top-k 5
//!
//! # Ask one question, forcing web search on
//! medrag ask "What eases a sore throat?" --web --mode detailed
//!
//! # Talk to it
//! medrag chat --provider groq
//! ```
//!
//! Logging goes to stderr and is controlled with `MEDRAG_LOG`
//! (e.g. `MEDRAG_LOG=medrag=debug`).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use medrag::config::Config;
use medrag::embedding::create_provider;
use medrag::gateway::Gateway;
use medrag::index::{Metric, VectorIndex};
use medrag::ingest;
use medrag::models::{ResponseMode, TurnRequest, TurnResponse};
use medrag::session::Session;

/// Hybrid question answering over a local document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; defaults apply when the file is absent.
#[derive(Parser)]
#[command(
    name = "medrag",
    about = "Hybrid retrieval-augmented question answering over local documents",
    version,
    long_about = "medrag maintains a persistent similarity index over chunked text documents, \
    blends knowledge-base retrieval with live web search, and routes the assembled context \
    to a configurable LLM backend (Groq, OpenAI, or Gemini) one turn at a time."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./medrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the index directory.
    ///
    /// Creates an empty index with the configured dimension and metric.
    /// If `[docs] dir` is set and the index is fresh, that corpus is
    /// ingested as a seed. Running it again on an existing index is safe.
    Init,

    /// Ingest a text file or directory into the knowledge base.
    ///
    /// Chunks each document with the configured window and overlap, embeds
    /// the chunks, and appends them to the persistent index.
    Ingest {
        /// A `.txt` file or a directory scanned recursively for `.txt` files.
        path: PathBuf,
    },

    /// Query the knowledge base directly and print scored matches.
    ///
    /// Bypasses the LLM entirely. Useful for judging what context a
    /// question would retrieve.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return (defaults to `[retrieval] top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask a single question and print the answer with its sources.
    Ask {
        /// The question text.
        question: String,

        /// Response mode: `concise` or `detailed`.
        #[arg(long, default_value = "concise")]
        mode: String,

        /// Force web search on for this question.
        #[arg(long)]
        web: bool,

        /// Force web search off for this question.
        #[arg(long, conflicts_with = "web")]
        no_web: bool,

        /// LLM backend to use (defaults to `[gateway] provider`).
        #[arg(long)]
        provider: Option<String>,
    },

    /// Start an interactive multi-turn chat session.
    ///
    /// Reads questions line by line. `exit` or `quit` ends the session,
    /// `/clear` forgets the conversation, `/history` prints the transcript.
    Chat {
        /// Response mode: `concise` or `detailed`.
        #[arg(long, default_value = "concise")]
        mode: String,

        /// Force web search on for every turn.
        #[arg(long)]
        web: bool,

        /// Force web search off for every turn.
        #[arg(long, conflicts_with = "web")]
        no_web: bool,

        /// LLM backend to use (defaults to `[gateway] provider`).
        #[arg(long)]
        provider: Option<String>,
    },

    /// Print index statistics and available LLM backends.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await?,
        Commands::Ingest { path } => run_ingest(&config, &path).await?,
        Commands::Search { query, top_k } => run_search(&config, &query, top_k).await?,
        Commands::Ask {
            question,
            mode,
            web,
            no_web,
            provider,
        } => {
            let request = TurnRequest {
                question,
                mode: parse_mode(&mode)?,
                use_web: web_override(web, no_web),
                provider,
            };
            run_ask(&config, request).await?;
        }
        Commands::Chat {
            mode,
            web,
            no_web,
            provider,
        } => {
            run_chat(&config, parse_mode(&mode)?, web_override(web, no_web), provider).await?;
        }
        Commands::Stats => run_stats(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("MEDRAG_LOG").unwrap_or_else(|_| EnvFilter::new("medrag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn parse_mode(mode: &str) -> anyhow::Result<ResponseMode> {
    match mode {
        "concise" => Ok(ResponseMode::Concise),
        "detailed" => Ok(ResponseMode::Detailed),
        _ => bail!("Unknown response mode: {}. Use concise or detailed.", mode),
    }
}

fn web_override(web: bool, no_web: bool) -> Option<bool> {
    if web {
        Some(true)
    } else if no_web {
        Some(false)
    } else {
        None
    }
}

fn parse_metric(config: &Config) -> anyhow::Result<Metric> {
    Metric::parse(&config.index.metric)
        .with_context(|| format!("invalid metric '{}'", config.index.metric))
}

async fn run_init(config: &Config) -> anyhow::Result<()> {
    let metric = parse_metric(config)?;
    let (index, fresh) =
        VectorIndex::open_or_create(&config.index.dir, config.embedding.dimension, metric)?;

    if fresh {
        println!("Created index at {}", config.index.dir.display());
        if let Some(ref docs_dir) = config.docs.dir {
            let embedder = create_provider(&config.embedding)?;
            let report = ingest::ingest_path(&index, embedder.as_ref(), config, docs_dir).await?;
            println!(
                "Seeded {} documents ({} chunks) from {}",
                report.documents,
                report.chunks,
                docs_dir.display()
            );
        }
    } else {
        println!(
            "Index already exists at {} ({} chunks)",
            config.index.dir.display(),
            index.len()
        );
    }
    Ok(())
}

async fn run_ingest(config: &Config, path: &PathBuf) -> anyhow::Result<()> {
    let metric = parse_metric(config)?;
    let (index, _) =
        VectorIndex::open_or_create(&config.index.dir, config.embedding.dimension, metric)?;
    let embedder = create_provider(&config.embedding)?;

    let report = ingest::ingest_path(&index, embedder.as_ref(), config, path).await?;
    println!("ingest {}", path.display());
    println!("  documents: {}", report.documents);
    println!("  chunks written: {}", report.chunks);
    println!("  index size: {} chunks", index.len());
    println!("ok");
    Ok(())
}

async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> anyhow::Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let index = VectorIndex::load(&config.index.dir, config.embedding.dimension)
        .context("no readable index; run `medrag init` and `medrag ingest` first")?;
    if index.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let embedder = create_provider(&config.embedding)?;
    let vector = embedder.embed_query(query).await?;
    let hits = index.query(&vector, top_k.unwrap_or(config.retrieval.top_k))?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.source_label);
        println!(
            "    excerpt: \"{}\"",
            truncate_excerpt(&hit.text.replace('\n', " "), 160)
        );
        println!("    chunk: {}", hit.chunk_id);
        println!();
    }
    Ok(())
}

async fn run_ask(config: &Config, request: TurnRequest) -> anyhow::Result<()> {
    let mut session = open_session(config)?;
    let response = session.ask(request).await;
    print_response(&response);
    if response.error {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_chat(
    config: &Config,
    mode: ResponseMode,
    use_web: Option<bool>,
    provider: Option<String>,
) -> anyhow::Result<()> {
    let mut session = open_session(config)?;
    println!(
        "medrag chat ({} chunks indexed). Type 'exit' to quit, '/clear' to reset, '/history' for the transcript.",
        session.index().len()
    );

    let stdin = io::stdin();
    loop {
        print!("you> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "exit" | "quit" => break,
            "/clear" => {
                session.clear_history();
                println!("(history cleared)");
                continue;
            }
            "/history" => {
                if session.conversation().is_empty() {
                    println!("(no history yet)");
                } else {
                    println!("{}", session.conversation().transcript());
                }
                continue;
            }
            _ => {}
        }

        let mut request = TurnRequest::new(line);
        request.mode = mode;
        request.use_web = use_web;
        request.provider = provider.clone();
        let response = session.ask(request).await;
        print_response(&response);
        println!();
    }
    Ok(())
}

fn run_stats(config: &Config) -> anyhow::Result<()> {
    println!("index");
    match VectorIndex::load(&config.index.dir, config.embedding.dimension) {
        Ok(index) => {
            println!("  dir: {}", index.dir().display());
            println!("  chunks: {}", index.len());
            println!("  dimension: {}", index.dimension());
            println!("  metric: {}", index.metric().as_str());
        }
        Err(e) => {
            println!("  dir: {}", config.index.dir.display());
            println!("  (not readable: {e})");
        }
    }
    println!("embedding");
    println!("  provider: {}", config.embedding.provider);
    println!("  dimension: {}", config.embedding.dimension);
    println!("gateway");
    let gateway = Gateway::from_env(config.gateway.clone())?;
    let available = gateway.available();
    if available.is_empty() {
        println!("  backends: none (set GROQ_API_KEY, OPENAI_API_KEY, or GOOGLE_API_KEY)");
    } else {
        println!("  backends: {}", available.join(", "));
    }
    println!("  default: {}", config.gateway.provider);
    Ok(())
}

fn open_session(config: &Config) -> anyhow::Result<Session> {
    let metric = parse_metric(config)?;
    let (index, fresh) =
        VectorIndex::open_or_create(&config.index.dir, config.embedding.dimension, metric)?;
    if fresh {
        tracing::info!(dir = %config.index.dir.display(), "starting with an empty index");
    }
    let session = Session::from_config(config.clone(), Arc::new(index))?;
    if !session.gateway().has(session.gateway().default_provider()) {
        tracing::warn!(
            provider = session.gateway().default_provider(),
            "default LLM backend has no API key set; turns will fail until one is exported"
        );
    }
    Ok(session)
}

fn print_response(response: &TurnResponse) {
    println!("{}", response.answer);
    if !response.citations.is_empty() {
        println!();
        println!("Sources:");
        for citation in &response.citations {
            println!("  [{}] {}", citation.kind.as_str(), citation.label);
        }
    }
}

fn truncate_excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
