// chat-memory/crates/chat-memory/src/main.rs

#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use chat_memory::{config::MemoryConfig, telemetry, FactCategory, MemoryEngine};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "chat-memory", version, about = "Inspect and move a local chat memory store")]
struct Cli {
    /// Log engine events at debug (-v) or trace (-vv); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// List sessions, most recently active first
    Sessions,
    /// Print messages, globally or for one session
    History {
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Case-insensitive substring search over message content
    Search {
        query: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List stored facts
    Facts {
        #[arg(long)]
        category: Option<FactCategory>,
    },
    /// Print the fact summary used in system prompts
    Prompt,
    /// Write every message as a JSON array to stdout
    Export,
    /// Load messages from a JSON array produced by `export`
    Import { file: PathBuf },
    /// Database statistics and backend counters
    Stats,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose);

    let cfg = MemoryConfig::from_env()?;
    cfg.print_config();

    let engine = MemoryEngine::open(cfg).await?;

    match cli.command {
        Command::Sessions => {
            print_json(&engine.get_all_sessions().await)?;
        }
        Command::History { session, limit } => {
            let messages = match session {
                Some(id) => engine.get_session_messages(&id, Some(limit)).await,
                None => engine.get_recent_messages(limit).await,
            };
            for message in messages {
                println!("[{}] {}: {}", message.timestamp.to_rfc3339(), message.role, message.content);
            }
        }
        Command::Search { query, limit } => {
            print_json(&engine.search_messages(&query, limit).await)?;
        }
        Command::Facts { category } => {
            let facts = match category {
                Some(category) => engine.get_facts_by_category(category).await,
                None => engine.get_all_facts().await,
            };
            print_json(&facts)?;
        }
        Command::Prompt => {
            println!("{}", engine.get_facts_for_prompt().await);
        }
        Command::Export => {
            println!("{}", engine.export_messages().await?);
        }
        Command::Import { file } => {
            let data = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let imported = engine.import_messages(&data).await?;
            println!("Imported {} messages", imported);
        }
        Command::Stats => {
            println!("state: {}", engine.state());
            match engine.stats().await {
                Some(stats) => print_json(&stats)?,
                None => println!("embedded database unavailable"),
            }
            print_json(&engine.counters())?;
        }
    }

    engine.dispose().await;
    Ok(())
}

#[cfg(feature = "cli")]
fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
