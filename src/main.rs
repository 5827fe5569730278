mod commands;
#[cfg(feature = "mcp")]
mod mcp;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use mailvault::config::LoggingConfig;
use mailvault::{Config, MessageId};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailvault")]
#[command(about = "Hybrid mail store with keyword and semantic search", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(long, global = true, help = "Directory holding .mailvault (default: current dir)")]
    root: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // ===== Setup =====
    /// Create the data directory and a default config
    Init {
        #[arg(long, help = "Overwrite an existing config.yaml")]
        force: bool,
    },

    // ===== Ingestion =====
    /// Ingest provider message JSON files (directories are walked for *.json)
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== Retrieval =====
    /// Hybrid keyword + semantic search
    Search {
        query: String,
        #[arg(long, short, help = "Limit results")]
        limit: Option<usize>,
        #[arg(long, help = "Keyword matching only")]
        keyword: bool,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Show one message
    Show {
        #[arg(required_unless_present = "provider_id")]
        id: Option<MessageId>,
        #[arg(long, conflicts_with = "id", help = "Look up by provider message id")]
        provider_id: Option<String>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List a thread, or render it as summarization context
    Thread {
        thread_id: String,
        #[arg(long, help = "Render plain-text thread context")]
        context: bool,
        #[arg(long, help = "Messages kept in the context (default from config)")]
        max: Option<usize>,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// Messages carrying a label
    Label {
        name: String,
        #[arg(long, short, default_value_t = 20, help = "Limit results")]
        limit: usize,
        #[arg(long, default_value_t = 0, help = "Skip this many results")]
        offset: usize,
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== Actions =====
    /// Change flags and labels of a message
    Mark {
        id: MessageId,
        #[arg(long, conflicts_with = "unread")]
        read: bool,
        #[arg(long)]
        unread: bool,
        #[arg(long, conflicts_with = "unarchive")]
        archive: bool,
        #[arg(long)]
        unarchive: bool,
        #[arg(long, conflicts_with = "restore", help = "Soft delete")]
        delete: bool,
        #[arg(long)]
        restore: bool,
        #[arg(long, value_name = "LABEL")]
        add_label: Vec<String>,
        #[arg(long, value_name = "LABEL")]
        remove_label: Vec<String>,
    },
    /// Soft-delete a message and drop it from semantic search
    Forget { id: MessageId },

    /// Store and index statistics
    Status {
        #[arg(long, help = "JSON output")]
        json: bool,
    },

    // ===== MCP Server =====
    /// Start MCP server on stdio
    #[cfg(feature = "mcp")]
    Mcp,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    init_logging(&root, cli.verbose);

    match cli.command {
        Commands::Init { force } => commands::init::run(&root, force),
        Commands::Ingest { paths, json } => commands::ingest::run(&root, &paths, json),
        Commands::Search {
            query,
            limit,
            keyword,
            json,
        } => commands::search::run(&root, &query, limit, keyword, json),
        Commands::Show {
            id,
            provider_id,
            json,
        } => commands::show::run(&root, id, provider_id.as_deref(), json),
        Commands::Thread {
            thread_id,
            context,
            max,
            json,
        } => commands::thread::run(&root, &thread_id, context, max, json),
        Commands::Label {
            name,
            limit,
            offset,
            json,
        } => commands::label::run(&root, &name, limit, offset, json),
        Commands::Mark {
            id,
            read,
            unread,
            archive,
            unarchive,
            delete,
            restore,
            add_label,
            remove_label,
        } => {
            let changes = commands::mark::Changes {
                read: toggle(read, unread),
                archived: toggle(archive, unarchive),
                deleted: toggle(delete, restore),
                add_labels: add_label,
                remove_labels: remove_label,
            };
            commands::mark::run(&root, id, &changes)
        }
        Commands::Forget { id } => commands::forget::run(&root, id),
        Commands::Status { json } => commands::status::run(&root, json),

        #[cfg(feature = "mcp")]
        Commands::Mcp => run_mcp_server(root),
    }
}

fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Logs go to stderr; stdout carries command output and the MCP transport
fn init_logging(root: &Path, verbose: bool) {
    let logging: LoggingConfig = Config::load(root).map(|c| c.logging).unwrap_or_default();
    let default_level = if verbose {
        "debug".to_string()
    } else {
        logging.level
    };

    let filter = EnvFilter::try_from_env("MAILVAULT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(feature = "mcp")]
fn run_mcp_server(root: PathBuf) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(mcp::run_mcp_server(root))
}
