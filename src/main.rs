//! Memoria CLI
//!
//! Manage the long-term memory store, run consolidation, or chat with the
//! memory-conditioned assistant.

use clap::{Parser, Subcommand};
use futures::StreamExt;
use memoria::{
    Assistant, CapabilityStore, Category, ConsolidationPipeline, ConsolidationSummary,
    HttpInferenceClient, Inference, InferenceClient, MemoriaConfig, MemoryId, MemoryStore,
    SqliteMemoryStore,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Memoria - long-term user memory with LLM-driven consolidation
#[derive(Parser, Debug)]
#[command(name = "memoria")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Memoria home directory (config.toml, default database)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Path to the SQLite memory database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List memories, newest first
    List {
        #[arg(long)]
        category: Option<Category>,
    },
    /// Add a memory
    Add { category: Category, content: String },
    /// Replace a memory's content and category
    Update {
        id: MemoryId,
        category: Category,
        content: String,
    },
    /// Delete a memory
    Delete { id: MemoryId },
    /// Delete every memory
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Merge duplicates, drop stale contradictions, shorten verbose memories
    Consolidate {
        /// Print progress as Server-Sent Events frames
        #[arg(long)]
        sse: bool,
        /// Reach the store through the resource/tool capability surface
        #[arg(long)]
        via_capabilities: bool,
    },
    /// Chat on stdin, one turn per line
    Chat {
        /// Print the memory context sent with each turn
        #[arg(long)]
        test_mode: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries command output only
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let home = match cli.home {
        Some(home) => home,
        None => get_memoria_home()?,
    };
    let mut config = MemoriaConfig::load(&home).await?;
    if let Some(db) = cli.db {
        config = config.with_database(db);
    }
    info!("Database: {:?}", config.database);

    let store = Arc::new(SqliteMemoryStore::open(&config.database)?);

    match cli.command {
        Command::List { category } => {
            for record in store.list(category).await? {
                println!(
                    "#{} [{}] {} ({})",
                    record.id,
                    record.category,
                    record.content,
                    record.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Add { category, content } => {
            let id = store.add(category, &content).await?;
            println!("Added #{id}");
        }
        Command::Update {
            id,
            category,
            content,
        } => {
            store.update(id, &content, category).await?;
            println!("Updated #{id}");
        }
        Command::Delete { id } => {
            store.delete(id).await?;
            println!("Deleted #{id}");
        }
        Command::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete every memory without --yes");
            }
            store.delete_all().await?;
            println!("All memories deleted");
        }
        Command::Consolidate {
            sse,
            via_capabilities,
        } => {
            let store: Arc<dyn MemoryStore> = if via_capabilities {
                Arc::new(CapabilityStore::over(store))
            } else {
                store
            };
            run_consolidation(store, &config, sse).await?;
        }
        Command::Chat { test_mode } => {
            run_chat(store, &config, test_mode).await?;
        }
    }

    Ok(())
}

async fn run_consolidation(
    store: Arc<dyn MemoryStore>,
    config: &MemoriaConfig,
    sse: bool,
) -> anyhow::Result<()> {
    let client: Arc<dyn InferenceClient> = Arc::new(HttpInferenceClient::new(&config.inference));
    let inference = Inference::new(client, config.inference.helper_timeout);
    let pipeline = ConsolidationPipeline::new(store, inference);

    let mut summary = ConsolidationSummary::default();
    let mut events = pipeline.run();
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        summary.record(&event);
        if sse {
            write!(stdout, "{}", event.to_sse())?;
        } else {
            writeln!(stdout, "{event}")?;
        }
        stdout.flush()?;
    }

    info!("Consolidation summary: {}", summary);
    if !sse {
        println!("{summary}");
    }
    Ok(())
}

async fn run_chat(
    store: Arc<SqliteMemoryStore>,
    config: &MemoriaConfig,
    test_mode: bool,
) -> anyhow::Result<()> {
    let client: Arc<dyn InferenceClient> = Arc::new(HttpInferenceClient::new(&config.inference));
    let assistant = Assistant::new(store, client, config);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let reply = assistant.chat(input, test_mode).await?;
        if let Some(context) = reply.context_used {
            println!("--- context ---\n{context}\n---------------");
        }
        println!("{}", reply.response);
    }
    Ok(())
}

/// Get the Memoria home directory
fn get_memoria_home() -> anyhow::Result<PathBuf> {
    if let Ok(home) = std::env::var("MEMORIA_HOME") {
        return Ok(PathBuf::from(home));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".memoria"))
}
