// ============================================================================
// chatmem - CLI for the conversational memory store
// ============================================================================
// Usage:
//   chatmem insert --session S --file history.json   Chunk and store a history
//   chatmem query "text" [--limit 5]                  Semantic search
//   chatmem list [--limit 50] [--offset 0]            Page through records
//   chatmem session S                                 Records of one session
//   chatmem delete-session S [--all]                  Delete a session's records
//   chatmem purge --yes                               Drop the whole collection
//   chatmem stats                                     Show collection statistics
// ============================================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatmem_core::{
    ChunkingOptions, FormatStyle, InsertReceipt, MemoryConfig, MemoryStore, Message, Payload, StoreBackend,
};

/// Conversational memory tool
#[derive(Parser)]
#[command(name = "chatmem", version, about = "Store and recall chunked chat history")]
struct Cli {
    /// Vector store backend: local or qdrant (default: CHATMEM_BACKEND or local)
    #[arg(long, global = true)]
    backend: Option<StoreBackend>,

    /// Path to the local database file (default: ~/.chatmem/memory.redb)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Use a throwaway in-memory store
    #[arg(long, global = true)]
    temp: bool,

    /// Collection name (default: memory_collection)
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a chat history and store it under a session
    Insert {
        /// Session identifier
        #[arg(long)]
        session: String,

        /// JSON array of {role, content, timestamp?} messages ("-" for stdin)
        #[arg(long)]
        file: PathBuf,

        /// Messages per chunk
        #[arg(long)]
        window: Option<usize>,

        /// Messages to advance between chunks
        #[arg(long)]
        stride: Option<usize>,

        /// Chunk rendering: simple, detailed, markdown
        #[arg(long)]
        format: Option<FormatStyle>,
    },

    /// Semantic search over stored chunks
    Query {
        text: String,

        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// Page through stored records
    List {
        #[arg(long, default_value = "50")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show records belonging to one session
    Session {
        session_id: String,

        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Delete a session's records (one capped batch unless --all)
    DeleteSession {
        session_id: String,

        /// Repeat until the session is empty
        #[arg(long)]
        all: bool,
    },

    /// Drop the entire collection
    Purge {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show collection statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("chatmem_core=info,chatmem=info")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = MemoryConfig::default();
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(path) = cli.db_path {
        config.db_path = Some(path);
    }
    if cli.temp {
        config.temp = true;
    }
    if let Some(collection) = cli.collection {
        config.collection = collection;
    }

    let memory = config.build_store().await?;
    info!("Memory store ready (collection: {})", memory.collection());

    match cli.command {
        Commands::Insert {
            session,
            file,
            window,
            stride,
            format,
        } => {
            let options = ChunkingOptions {
                window_size: window.unwrap_or(config.chunking.window_size),
                stride: stride.unwrap_or(config.chunking.stride),
                format_style: format.unwrap_or(config.chunking.format_style),
            };
            cmd_insert(&memory, &session, &file, &options, cli.json).await
        }
        Commands::Query { text, limit } => cmd_query(&memory, &text, limit, cli.json).await,
        Commands::List { limit, offset } => cmd_list(&memory, limit, offset, cli.json).await,
        Commands::Session { session_id, limit } => {
            cmd_session(&memory, &session_id, limit, cli.json).await
        }
        Commands::DeleteSession { session_id, all } => {
            cmd_delete_session(&memory, &session_id, all).await
        }
        Commands::Purge { yes } => cmd_purge(&memory, yes).await,
        Commands::Stats => cmd_stats(&memory, cli.json).await,
    }
}

fn read_history(file: &Path) -> Result<Vec<Message>> {
    let raw = if file.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read history from stdin")?;
        buf
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };

    serde_json::from_str(&raw).context("History must be a JSON array of {role, content} messages")
}

fn snippet(text: &str, width: usize) -> String {
    let line = text.replace('\n', " / ");
    if line.chars().count() <= width {
        return line;
    }
    let mut cut: String = line.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn field(payload: &Payload, key: &str) -> String {
    match payload.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => "-".to_string(),
    }
}

async fn cmd_insert(
    memory: &MemoryStore,
    session: &str,
    file: &Path,
    options: &ChunkingOptions,
    json: bool,
) -> Result<()> {
    let history = read_history(file)?;
    let receipt = memory.try_insert_history(&history, session, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
        return Ok(());
    }

    println!(
        "{:<20}  {:<8}  {:<6}  {}",
        "SESSION", "MESSAGES", "CHUNKS", "WINDOW/STRIDE/FORMAT"
    );
    println!("{}", "-".repeat(70));
    println!("{}", insert_row(&receipt, options));
    Ok(())
}

fn insert_row(receipt: &InsertReceipt, options: &ChunkingOptions) -> String {
    format!(
        "{:<20}  {:<8}  {:<6}  {}/{}/{}",
        snippet(&receipt.session_id, 20),
        receipt.message_count,
        receipt.chunk_count,
        options.window_size,
        options.stride,
        options.format_style
    )
}

async fn cmd_query(memory: &MemoryStore, text: &str, limit: usize, json: bool) -> Result<()> {
    let hits = memory.try_query(text, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    println!("{:<8}  {:<20}  {}", "SCORE", "SESSION", "TEXT");
    println!("{}", "-".repeat(90));
    for hit in &hits {
        println!(
            "{:<8.4}  {:<20}  {}",
            hit.score,
            snippet(&field(&hit.metadata, "session_id"), 20),
            snippet(&field(&hit.metadata, "document"), 58)
        );
    }
    Ok(())
}

async fn cmd_list(memory: &MemoryStore, limit: usize, offset: usize, json: bool) -> Result<()> {
    let records = memory.try_get(limit, offset).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<5}  {}",
        "ID", "SESSION", "CHUNK", "TEXT"
    );
    println!("{}", "-".repeat(100));
    for record in &records {
        println!(
            "{:<36}  {:<20}  {:<5}  {}",
            record.id,
            snippet(record.session_id().unwrap_or("-"), 20),
            field(&record.payload, "chunk_index"),
            snippet(record.document(), 30)
        );
    }

    println!("\nShowing {} records from offset {}", records.len(), offset);
    Ok(())
}

async fn cmd_session(memory: &MemoryStore, session_id: &str, limit: usize, json: bool) -> Result<()> {
    let mut entries = memory.try_query_by_session(session_id, limit).await?;
    entries.sort_by_key(|e| e.metadata.get("chunk_index").and_then(|v| v.as_u64()));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No records for session {}.", session_id);
        return Ok(());
    }

    for entry in &entries {
        println!(
            "--- chunk {} (messages {}-{}, inserted {}) ---",
            field(&entry.metadata, "chunk_index"),
            field(&entry.metadata, "window_start"),
            field(&entry.metadata, "window_end"),
            field(&entry.metadata, "inserted_at"),
        );
        println!("{}\n", entry.text);
    }

    println!("Total: {} records", entries.len());
    Ok(())
}

async fn cmd_delete_session(memory: &MemoryStore, session_id: &str, all: bool) -> Result<()> {
    let mut total = 0;
    loop {
        let deleted = memory.try_delete_session_messages(session_id).await?;
        total += deleted;
        if !all || deleted == 0 {
            break;
        }
    }

    println!("Deleted {} records for session {}", total, session_id);
    Ok(())
}

async fn cmd_purge(memory: &MemoryStore, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "Refusing to drop collection '{}' without --yes",
            memory.collection()
        );
    }

    memory.try_delete_all_messages().await?;
    println!("Dropped collection {}", memory.collection());
    Ok(())
}

async fn cmd_stats(memory: &MemoryStore, json: bool) -> Result<()> {
    let stats = memory.try_stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let schema = memory.schema();
    println!("=== Chat Memory Stats ===");
    println!("Backend:    {}", memory.backend().name());
    println!("Collection: {}", stats.collection);
    println!("Dimension:  {} ({:?})", schema.dimension, schema.distance);
    println!("Records:    {}", stats.points_count);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_row_summarizes_receipt() {
        let receipt = InsertReceipt {
            session_id: "support-call-42".to_string(),
            ids: vec![],
            chunk_count: 3,
            message_count: 5,
        };
        let row = insert_row(&receipt, &ChunkingOptions::default());

        let columns: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(columns, vec!["support-call-42", "5", "3", "3/1/simple"]);
    }

    #[test]
    fn test_snippet_truncates_long_text() {
        assert_eq!(snippet("User: hi\nAssistant: yo", 40), "User: hi / Assistant: yo");
        assert_eq!(snippet("abcdefghij", 6), "abc...");
    }
}
