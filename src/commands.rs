use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use dialoguer::{Confirm, Input, Select};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::vector::{AdminOutcome, DataLoss, SchemaStatus};
use crate::indexer::DocumentLoader;
use crate::query::{QueryRequest, UNKNOWN_DOCUMENT};
use crate::rag::{RagContext, RagService};

const DELETE_CONFIRMATION: &str = "DELETE";
const QUERY_PREVIEW_CHARS: usize = 60;

fn load_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).context("Failed to load configuration")
}

async fn open_history(config_dir: &Path) -> Result<Database> {
    Database::initialize_from_config_dir(config_dir)
        .await
        .context("Failed to open query history database")
}

/// Inspect the vector table and bring it in line with the embedding model,
/// asking before anything is deleted
#[inline]
pub async fn init_db(config_dir: &Path, assume_yes: bool) -> Result<()> {
    let config = load_config(config_dir)?;
    println!(
        "🗄️  Vector store: {} ({})",
        config.backend_kind(),
        config.store.table_name
    );

    let context = RagContext::connect(config).await?;
    let dimensions = context.dimensions();
    if !dimensions.is_verified() {
        println!(
            "⚠️  Could not probe the embedding model; assuming {} dimensions",
            dimensions.configured
        );
    }

    let status = context.check_schema_status().await?;
    print_schema_status(&status);

    if !status.exists {
        let outcome = context.create_table().await?;
        print_admin_outcome(&outcome);
        return Ok(());
    }

    if !dimensions.is_verified() {
        warn!("Embedding dimension unverified; leaving the table unchanged");
        println!("⚠️  Table width is unverified; nothing was changed. Retry once the model responds.");
        return Ok(());
    }

    if !status.dimension_mismatch {
        println!("✅ Table schema matches the embedding model");
        return Ok(());
    }

    let recreate = if status.row_count == 0 {
        assume_yes
            || Confirm::new()
                .with_prompt("The table is empty but has the wrong dimension. Recreate it?")
                .default(true)
                .interact()?
    } else {
        assume_yes || confirm_destructive_recreate(status.row_count)?
    };

    if recreate {
        let outcome = context.recreate_table(DataLoss::Accept).await?;
        print_admin_outcome(&outcome);
    } else {
        warn!("Keeping mismatched table; queries will fail until it is recreated");
        println!("Keeping the existing table. Queries will fail until it is recreated.");
    }

    Ok(())
}

fn confirm_destructive_recreate(row_count: u64) -> Result<bool> {
    let choices = [
        format!("r: Recreate the table (deletes {row_count} rows)"),
        "k: Keep the existing table".to_string(),
    ];
    let choice = Select::new()
        .with_prompt("The table holds data embedded at a different dimension")
        .items(&choices)
        .default(1)
        .interact()?;
    if choice != 0 {
        return Ok(false);
    }

    let typed: String = Input::new()
        .with_prompt(format!("Type {DELETE_CONFIRMATION} to confirm"))
        .allow_empty(true)
        .interact_text()?;
    if typed.trim() == DELETE_CONFIRMATION {
        Ok(true)
    } else {
        println!("Confirmation did not match; nothing was deleted.");
        Ok(false)
    }
}

fn print_schema_status(status: &SchemaStatus) {
    let stored = status
        .stored_dimension
        .map_or_else(|| "unknown".to_string(), |d| d.to_string());

    println!();
    println!("{}", style("Schema Status").bold().yellow());
    println!("  {:<20} {}", "Table exists:", status.exists);
    println!("  {:<20} {}", "Rows:", status.row_count);
    println!("  {:<20} {}", "Stored dimension:", stored);
    println!("  {:<20} {}", "Model dimension:", status.expected_dimension);
    println!("  {:<20} {}", "Mismatch:", status.dimension_mismatch);
    println!();
}

fn print_admin_outcome(outcome: &AdminOutcome) {
    match outcome {
        AdminOutcome::Created { dimension } => {
            println!("✅ Created table with {} dimensions", dimension);
        }
        AdminOutcome::AlreadyExists { dimension } => {
            println!("ℹ️  Table already exists ({:?} dimensions)", dimension);
        }
        AdminOutcome::Recreated { from, to } => {
            println!("✅ Recreated table: {:?} → {} dimensions", from, to);
        }
        AdminOutcome::ConfirmationRequired { row_count } => {
            println!(
                "⚠️  Table holds {} rows; nothing was changed without confirmation",
                row_count
            );
        }
    }
}

/// Load every supported file under `dir` (or the configured data folder) and
/// index it
#[inline]
pub async fn load_documents(config_dir: &Path, dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_dir)?;
    let root = dir.unwrap_or_else(|| config.data_folder_path());
    let loader = DocumentLoader::new(root);

    println!("📂 Loading documents from {}", loader.root().display());
    let documents = loader.load().await?;
    if documents.is_empty() {
        println!("No supported documents found (.pdf, .txt, .md).");
        return Ok(());
    }
    println!("Found {} documents", documents.len());

    let context = RagContext::initialize(config).await?;
    let service = RagService::new(Arc::new(context), None);
    let stats = service.index_documents(&documents).await?;

    println!("✅ Indexing complete");
    println!("  Documents: {}", stats.documents);
    println!("  Chunks created: {}", stats.chunks_created);
    println!("  Embeddings generated: {}", stats.embeddings_generated);
    if stats.fallback_rows > 0 {
        println!("  Rows written row by row: {}", stats.fallback_rows);
    }
    println!("  Rows in store: {}", service.document_count().await?);

    Ok(())
}

#[inline]
pub async fn run_query(config_dir: &Path, text: String, top_k: usize) -> Result<()> {
    let config = load_config(config_dir)?;
    let history = match open_history(config_dir).await {
        Ok(history) => Some(history),
        Err(e) => {
            warn!("Query history disabled: {:#}", e);
            None
        }
    };

    let context = RagContext::initialize(config).await?;
    let service = RagService::new(Arc::new(context), history);
    let request = QueryRequest::new(text).with_top_k(top_k);
    let response = service.query(&request).await;

    println!("{}", response.chat_response);
    if response.source_documents.is_empty() {
        return Ok(());
    }

    println!();
    println!("{}", style("Sources:").bold().yellow());
    for (rank, source) in response.source_documents.iter().enumerate() {
        let page = source
            .metadata
            .page
            .map(|p| format!(", page {p}"))
            .unwrap_or_default();
        println!(
            "  {}. {}{} (score {:.3})",
            rank + 1,
            source.metadata.file_name,
            page,
            source.score
        );
    }

    Ok(())
}

#[inline]
pub async fn show_health(config_dir: &Path, include_index: bool) -> Result<()> {
    let config = load_config(config_dir)?;
    let context = RagContext::initialize(config).await?;
    if include_index {
        if let Err(e) = context.index().get_or_materialize(context.manager()).await {
            warn!("Could not materialize the query index: {}", e);
        }
    }

    let status = context.health_monitor().check(include_index).await;
    let mark = |ok: bool| if ok { "✅" } else { "❌" };

    println!("{}", style("🩺 Health").bold().cyan());
    println!("  {} Store connected", mark(status.store_connected));
    println!("  {} Vector store ready", mark(status.vector_store_ready));
    println!("  {} Models ready", mark(status.models_ready));
    if include_index {
        println!("  {} Index ready", mark(status.index_ready));
    }

    let ready = if include_index {
        status.is_ready()
    } else {
        status.is_basic_ready()
    };
    println!();
    println!("Overall: {}", if ready { "ready" } else { "not ready" });

    Ok(())
}

#[inline]
pub async fn show_count(config_dir: &Path) -> Result<()> {
    let config = load_config(config_dir)?;
    let context = RagContext::connect(config).await?;
    println!("{}", context.document_count().await?);
    Ok(())
}

#[inline]
pub async fn clear_index(config_dir: &Path, assume_yes: bool) -> Result<()> {
    let config = load_config(config_dir)?;
    let context = RagContext::connect(config).await?;
    let rows = context.document_count().await?;

    let confirmed = assume_yes
        || Confirm::new()
            .with_prompt(format!("Delete all {rows} indexed chunks?"))
            .default(false)
            .interact()?;
    if !confirmed {
        println!("Nothing was deleted.");
        return Ok(());
    }

    let outcome = context.clear_index().await?;
    info!("Index cleared: {:?}", outcome);
    print_admin_outcome(&outcome);
    Ok(())
}

#[inline]
pub async fn list_history(config_dir: &Path, limit: i64, offset: i64) -> Result<()> {
    let history = open_history(config_dir).await?;
    let page = history.list(limit, offset).await?;

    if page.items.is_empty() {
        println!("No queries recorded yet.");
        return Ok(());
    }

    println!(
        "Query History ({} of {} total, offset {}):",
        page.items.len(),
        page.total_count,
        page.offset
    );
    println!();
    for entry in &page.items {
        let status = if entry.success { "✅" } else { "❌" };
        let preview: String = entry.query.chars().take(QUERY_PREVIEW_CHARS).collect();
        println!(
            "{} {} {} {}",
            status,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.id,
            preview
        );
    }

    Ok(())
}

#[inline]
pub async fn show_history_entry(config_dir: &Path, id: &str) -> Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("Invalid history ID: {id}"))?;
    let history = open_history(config_dir).await?;

    let Some(entry) = history.get(id).await? else {
        bail!("History entry not found: {}", id);
    };

    println!("{}", style(format!("Query {}", entry.id)).bold().cyan());
    println!("  Asked: {}", entry.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Query: {}", entry.query);
    println!("  Top K: {}", entry.top_k);
    if let Some(ms) = entry.response_time_ms {
        println!("  Response time: {}ms", ms);
    }
    println!("  Success: {}", entry.success);
    if let Some(error) = &entry.error_message {
        println!("  Error: {}", error);
    }
    println!();
    println!("{}", entry.chat_response);

    let sources = history.sources_for(id).await?;
    if !sources.is_empty() {
        println!();
        println!("{}", style("Sources:").bold().yellow());
    }
    for source in &sources {
        let name = source
            .metadata()
            .map_or_else(|| UNKNOWN_DOCUMENT.to_string(), |m| m.file_name);
        println!("  - {} (score {:.3})", name, source.similarity_score);
        println!("    {}", source.content_preview);
    }

    Ok(())
}

#[inline]
pub async fn show_statistics(config_dir: &Path) -> Result<()> {
    let history = open_history(config_dir).await?;
    let stats = history.statistics().await?;

    println!("{}", style("📊 Query Statistics").bold().cyan());
    println!("  Total queries: {}", stats.total_queries);
    println!("  Successful: {}", stats.successful_queries);
    println!("  Success rate: {:.2}%", stats.success_rate_percent);
    match stats.average_response_time_ms {
        Some(avg) => println!("  Average response time: {:.2}ms", avg),
        None => println!("  Average response time: n/a"),
    }

    Ok(())
}
