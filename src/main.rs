use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use ultimate_advisor::Result;
use ultimate_advisor::commands::{
    clear_index, init_db, list_history, load_documents, run_query, show_count, show_health,
    show_history_entry, show_statistics,
};
use ultimate_advisor::config::{Config, resolve_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "ultimate-advisor")]
#[command(about = "Answer questions over your own documents with a local LLM")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the history database and the LanceDB store
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Also write logs to a timestamped file under <config-dir>/logs
    #[arg(long, global = true)]
    log_file: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama and the vector store
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Check the vector table against the embedding model and fix drift
    InitDb {
        /// Answer yes to every prompt
        #[arg(long)]
        yes: bool,
    },
    /// Index every .pdf, .txt and .md file in a directory
    Load {
        /// Defaults to the configured data folder
        dir: Option<PathBuf>,
    },
    /// Ask a question against the indexed documents
    Query {
        text: String,
        /// Number of sources to return
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Report store and model readiness
    Health {
        /// Also require the query index to be materialized
        #[arg(long)]
        include_index: bool,
    },
    /// Print the number of stored chunks
    Count,
    /// Delete every stored chunk
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// List recorded queries, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Show one recorded query with its sources
    HistoryShow { id: String },
    /// Aggregate query statistics
    Stats,
}

fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let path = dir.join(format!(
                "{}.log",
                chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
            ));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir.as_deref())?;

    let log_dir = cli
        .log_file
        .then(|| Config::with_base_dir(&config_dir).log_dir_path());
    init_tracing(log_dir.as_deref())?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::InitDb { yes } => {
            init_db(&config_dir, yes).await?;
        }
        Commands::Load { dir } => {
            load_documents(&config_dir, dir).await?;
        }
        Commands::Query { text, top_k } => {
            run_query(&config_dir, text, top_k).await?;
        }
        Commands::Health { include_index } => {
            show_health(&config_dir, include_index).await?;
        }
        Commands::Count => {
            show_count(&config_dir).await?;
        }
        Commands::Clear { yes } => {
            clear_index(&config_dir, yes).await?;
        }
        Commands::History { limit, offset } => {
            list_history(&config_dir, limit, offset).await?;
        }
        Commands::HistoryShow { id } => {
            show_history_entry(&config_dir, &id).await?;
        }
        Commands::Stats => {
            show_statistics(&config_dir).await?;
        }
    }

    Ok(())
}
