//! # QMS Review CLI (`qms`)
//!
//! The `qms` binary indexes quality-management procedures and runs
//! multi-discipline design change reviews against them.
//!
//! ## Usage
//!
//! ```bash
//! qms --config ./config/qms.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qms ingest` | Scan the procedures root and report what would be indexed |
//! | `qms search "<query>"` | Ranked procedure passages for a query |
//! | `qms review "<change>"` | Run the regulatory → quality → engineering review |
//! | `qms ask "<question>"` | Answer a question from the procedures |
//! | `qms status` | Retrieval store status after ingestion |
//! | `qms history` | Recently recorded reviews |
//! | `qms serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Review a change
//! qms review "Add a fever alarm to the wrist thermometer app"
//!
//! # Same, as JSON
//! qms review "Replace the battery supplier" --json
//!
//! # Start the HTTP API
//! qms serve --config ./config/qms.toml
//! ```
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use qms_review::config::{load_config, Config};
use qms_review::history::{append, JsonlHistory, ReviewSink};
use qms_review::ingest::{build_store, ingest_documents};
use qms_review::orchestrator::{ReviewOrchestrator, ReviewOutcome};
use qms_review::server::{run_server, AppState};
use qms_review_core::{RetrievalStore, ReviewError};

/// QMS Review CLI: design change review against indexed procedures.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/qms.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "qms",
    about = "Regulatory, quality, and engineering review of product design changes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qms.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan, chunk, and index the procedures root.
    ///
    /// The store lives in memory, so this is mainly a check that documents
    /// are found and chunk as expected.
    Ingest {
        /// Count documents and chunks without embedding anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the indexed procedures.
    Search {
        /// The search query.
        query: String,

        /// Maximum number of passages to return.
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Review a design change.
    ///
    /// Runs the regulatory reviewer first; a BLOCK there rejects the change
    /// immediately. Otherwise quality and engineering reviews follow and a
    /// synthesis step produces the final verdict.
    Review {
        /// Free-text description of the change.
        description: String,

        /// Print the full outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask a question about the procedures.
    Ask {
        question: String,
    },

    /// Show retrieval store status after ingestion.
    Status,

    /// List recorded reviews, most recent last.
    History {
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { dry_run } => {
            let store = build_store(&config)?;
            let report = ingest_documents(&config, &store, dry_run).await?;
            println!(
                "{} documents, {} chunks, {} indexed, {} failed ({} words){}",
                report.documents,
                report.chunks,
                report.indexed,
                report.failed,
                report.words,
                if dry_run { " [dry run]" } else { "" }
            );
        }
        Commands::Search { query, limit } => {
            let store = load_store(&config).await?;
            let hits = store.search(&query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let header = hit.section_header.as_deref().unwrap_or("-");
                println!("{}. [{:.3}] {} / {}", i + 1, hit.score, hit.source_id, header);
                println!("    {}", snippet(&hit.content, 160));
            }
        }
        Commands::Review { description, json } => {
            let store = load_store(&config).await?;
            let orchestrator = ReviewOrchestrator::from_config(&config, store)?;
            let history = open_history(&config)?;

            match orchestrator.process_design_change(&description).await {
                Ok(outcome) => {
                    if let Some(history) = &history {
                        append(history.clone(), outcome.state.clone(), outcome.synthesis.clone())
                            .await?;
                    }
                    if json {
                        println!("{}", serde_json::to_string_pretty(&outcome)?);
                    } else {
                        print_outcome(&outcome);
                    }
                }
                Err(ReviewError::Infrastructure { message, state }) => {
                    let request_id = state.request_id().to_string();
                    if let Some(history) = &history {
                        append(history.clone(), *state, None).await?;
                    }
                    bail!("review {} aborted: {}", request_id, message);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Ask { question } => {
            let store = load_store(&config).await?;
            let state = AppState::from_config(&config, store)?;
            let answer = state.procedures.ask(&question).await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!("\nSources: {}", answer.sources.join(", "));
            }
        }
        Commands::Status => {
            let store = load_store(&config).await?;
            let status = store.status();
            println!("initialized:      {}", status.initialized);
            println!("chunks:           {}", status.count);
            println!("capacity:         {}", status.capacity);
            println!("target watermark: {}", status.target_watermark);
        }
        Commands::History { limit } => {
            let Some(path) = &config.history.path else {
                bail!("history is not configured; set [history].path");
            };
            let history = JsonlHistory::open(path)?;
            let reviews = history.reviews(Some(limit))?;
            if reviews.is_empty() {
                println!("No reviews recorded.");
            }
            for review in reviews {
                let verdict = review
                    .state
                    .final_verdict()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  {:<10} {:<9} {}",
                    review.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    review.request_id,
                    review.state.phase().as_str(),
                    verdict,
                    snippet(review.state.description(), 60)
                );
            }
        }
        Commands::Serve => {
            let store = load_store(&config).await?;
            let state = AppState::from_config(&config, store)?;
            run_server(state).await?;
        }
    }

    Ok(())
}

async fn load_store(config: &Config) -> Result<Arc<RetrievalStore>> {
    let store = build_store(config)?;
    ingest_documents(config, &store, false).await?;
    Ok(store)
}

fn open_history(config: &Config) -> Result<Option<Arc<dyn ReviewSink>>> {
    match &config.history.path {
        Some(path) => Ok(Some(Arc::new(JsonlHistory::open(path)?))),
        None => Ok(None),
    }
}

fn print_outcome(outcome: &ReviewOutcome) {
    let state = &outcome.state;
    println!("Request:  {}", state.request_id());
    println!("Phase:    {}", state.phase());
    if let Some(verdict) = state.final_verdict() {
        println!("Verdict:  {}", verdict);
    }
    println!();
    for message in state.messages() {
        println!("[{}]", message.role);
        println!("{}", message.content);
        println!();
    }
    if let Some(synthesis) = &outcome.synthesis {
        print_list("Required documents", &synthesis.required_documents);
        print_list("Next steps", &synthesis.next_steps);
        print_list("Blockers", &synthesis.blockers);
    }
    print_list("Missing information", state.missing_info());
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!("{}:", title);
    for item in items {
        println!("  - {}", item);
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut)
}
