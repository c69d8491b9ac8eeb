//! # Course Harness CLI (`course`)
//!
//! ## Usage
//!
//! ```bash
//! course --config ./config/course.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `course ingest` | Copy enrolled courses' files from Canvas into the bucket |
//! | `course classify` | Print the syllabus/schedule pick for each course |
//! | `course index` | Rebuild the index from the bucket and persist it |
//! | `course ask "<q>"` | Answer one question |
//! | `course chat` | Interactive question loop with session history |
//! | `course serve` | Start the HTTP query API |
//!
//! Credentials come from the environment: `CANVAS_API_TOKEN`,
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` (optional
//! `AWS_SESSION_TOKEN`), `OPENAI_API_KEY`, `LLAMA_CLOUD_API_KEY`.
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use course_harness::classify::DocumentClassifier;
use course_harness::config::{self, Config, Credentials};
use course_harness::connector_canvas::CanvasClient;
use course_harness::embedding::{create_provider, EmbeddingProvider};
use course_harness::ingest::ingest_courses;
use course_harness::llm::{ChatModel, OpenAIChat};
use course_harness::models::ConversationTurn;
use course_harness::parse::{LlamaParseClient, StoreTextLoader};
use course_harness::pipeline::{self, IndexingServices};
use course_harness::query::QueryEngine;
use course_harness::server::run_server;
use course_harness::store::s3::S3Store;

/// Course Harness: Canvas course files in, grounded answers out.
#[derive(Parser)]
#[command(name = "course", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/course.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every file of every enrolled course from Canvas into the bucket.
    ///
    /// Re-running overwrites objects by key, so it is safe to repeat.
    Ingest,

    /// Classify stored files and print each course's syllabus and schedule.
    Classify,

    /// Rebuild the retrieval index from the bucket and persist it.
    Index,

    /// Answer a single question.
    Ask {
        /// The question.
        question: String,
    },

    /// Interactive chat. Type `exit` or `quit` to leave.
    Chat,

    /// Serve the query API over HTTP on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let creds = Credentials::from_env();

    let store = S3Store::new(&cfg.storage, &creds)?;
    store.ensure_bucket().await?;

    match cli.command {
        Commands::Ingest => {
            let canvas = CanvasClient::new(&cfg.canvas, &creds)?;
            let report = ingest_courses(&canvas, &store, &cfg.canvas.enrolled_courses).await?;
            report.print();
        }
        Commands::Classify => {
            let chat = OpenAIChat::new(&cfg.llm, &creds)?;
            let keys = pipeline::list_stored_files(&store, &cfg).await?;
            let classification = DocumentClassifier::new(&chat).classify(&keys).await;
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Commands::Index => {
            let chat = OpenAIChat::new(&cfg.llm, &creds)?;
            let layout = LlamaParseClient::new(&cfg.parsing, &creds)?;
            let loader = StoreTextLoader::new(&store);
            let embedder = create_provider(&cfg.embedding, &creds)?;
            let services = IndexingServices {
                store: &store,
                chat: &chat,
                layout: &layout,
                loader: &loader,
                embedder: embedder.as_ref(),
            };
            let (_, report) = pipeline::rebuild(&cfg, &services).await?;
            report.print();
        }
        Commands::Ask { question } => {
            let engine = start_engine(&cfg, &creds, &store).await?;
            println!("{}", engine.answer(&question, &[]).await?);
        }
        Commands::Chat => {
            let engine = start_engine(&cfg, &creds, &store).await?;
            chat_loop(&engine).await?;
        }
        Commands::Serve => {
            let engine = start_engine(&cfg, &creds, &store).await?;
            run_server(&cfg.server.bind, Arc::new(engine)).await?;
        }
    }

    Ok(())
}

/// Load (or rebuild) the index and wire up a [`QueryEngine`].
///
/// The layout parser, and with it `LLAMA_CLOUD_API_KEY`, is only needed
/// when there is no usable remote index.
async fn start_engine(cfg: &Config, creds: &Credentials, store: &S3Store) -> Result<QueryEngine> {
    let chat = OpenAIChat::new(&cfg.llm, creds)?;
    let embedder: Box<dyn EmbeddingProvider> = create_provider(&cfg.embedding, creds)?;

    let index = match pipeline::restore_remote(cfg, store, embedder.as_ref()).await {
        Some(index) => index,
        None => {
            let layout = LlamaParseClient::new(&cfg.parsing, creds)?;
            let loader = StoreTextLoader::new(store);
            let services = IndexingServices {
                store,
                chat: &chat,
                layout: &layout,
                loader: &loader,
                embedder: embedder.as_ref(),
            };
            pipeline::rebuild_for_serving(cfg, &services).await?
        }
    };

    let chat: Box<dyn ChatModel> = Box::new(chat);
    Ok(QueryEngine::new(index, embedder, chat, cfg.retrieval.top_k))
}

async fn chat_loop(engine: &QueryEngine) -> Result<()> {
    println!("Ask about your courses. Type 'exit' to quit.\n");
    let stdin = std::io::stdin();
    let mut history: Vec<ConversationTurn> = Vec::new();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit") {
            println!("Goodbye!");
            break;
        }

        match engine.answer(question, &history).await {
            Ok(answer) => {
                println!("Bot: {}\n", answer);
                history.push(ConversationTurn {
                    question: question.to_string(),
                    answer,
                });
            }
            Err(e) => eprintln!("error: {:#}\n", e),
        }
    }
    Ok(())
}
