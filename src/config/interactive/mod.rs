
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, OllamaConfig, is_valid_table_name};
use crate::database::vector::StoreBackendKind;
use crate::embeddings::OllamaClient;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Ultimate Advisor Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the Ollama instance that serves embeddings and chat completions.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Vector Store Configuration").bold().yellow());
    configure_store(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Checking Ollama and the configured models...").yellow());

    match test_ollama_connection(&config.ollama) {
        Ok(()) => eprintln!("{}", style("✓ Both models are available").green()),
        Err(e) => {
            eprintln!("{}", style(format!("⚠ {e:#}")).yellow());
            eprintln!("Saving is still possible; pull the models before running `load`.");
        }
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(&config.ollama.embedding_model).cyan()
    );
    eprintln!("  Chat Model: {}", style(&config.ollama.chat_model).cyan());
    eprintln!(
        "  Fallback Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    eprintln!("  Table: {}", style(&config.store.table_name).cyan());
    match config.store.backend {
        StoreBackendKind::LanceDb => eprintln!(
            "  Location: {}",
            style(config.vector_database_path().display()).cyan()
        ),
        StoreBackendKind::Postgres => eprintln!(
            "  Server: {}",
            style(config.store.postgres.display_target()).cyan()
        ),
    }

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Similarity Cutoff: {}",
        style(config.retrieval.similarity_cutoff).cyan()
    );
    eprintln!(
        "  Chunking: {} tokens, {} overlap",
        style(config.chunking.chunk_size).cyan(),
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!(
        "  Data Folder: {}",
        style(config.data_folder_path().display()).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    if !config_dir.join("config.toml").exists() {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
        return Ok(Config::with_base_dir(config_dir));
    }

    Config::load(config_dir).map_or_else(
        |e| {
            eprintln!(
                "{}",
                style(format!("Existing configuration is unusable ({e:#}). Using defaults."))
                    .yellow()
            );
            Ok(Config::with_base_dir(config_dir))
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = ["http", "https"];
    let current = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);
    let choice = Select::new()
        .with_prompt("Protocol used to reach Ollama")
        .default(current)
        .items(&protocols)
        .interact()?;
    ollama.set_protocol(protocols[choice].to_string())?;

    // Each prompt validates against a scratch copy through the same setter
    // that applies the answer afterwards
    let scratch = ollama.clone();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| scratch.clone().set_host(input.clone()))
        .interact_text()?;
    ollama.set_host(host)?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| scratch.clone().set_port(*input))
        .interact_text()?;
    ollama.set_port(port)?;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.embedding_model.clone())
        .validate_with(non_empty)
        .interact_text()?;
    ollama.set_embedding_model(embedding_model)?;

    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(ollama.chat_model.clone())
        .validate_with(non_empty)
        .interact_text()?;
    ollama.set_chat_model(chat_model)?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Fallback embedding dimension (used when the model cannot be probed)")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| scratch.clone().set_embedding_dimension(*input))
        .interact_text()?;
    ollama.set_embedding_dimension(embedding_dimension)?;

    let batch_size: u32 = Input::new()
        .with_prompt("Texts per embedding request")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| scratch.clone().set_batch_size(*input))
        .interact_text()?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_store(config: &mut Config) -> Result<()> {
    let backends = [StoreBackendKind::LanceDb, StoreBackendKind::Postgres];
    let labels = &["lancedb (embedded)", "postgres (pgvector)"];
    let default_index = backends
        .iter()
        .position(|&b| b == config.store.backend)
        .unwrap_or(0);

    let backend_index = Select::new()
        .with_prompt("Vector store backend")
        .default(default_index)
        .items(labels)
        .interact()?;
    config.store.backend = backends[backend_index];

    let table_name: String = Input::new()
        .with_prompt("Table name")
        .default(config.store.table_name.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if is_valid_table_name(input) {
                Ok(())
            } else {
                Err("Use letters, digits and underscores, not starting with a digit")
            }
        })
        .interact_text()?;
    config.store.table_name = table_name;

    if config.store.backend == StoreBackendKind::Postgres {
        let postgres = &mut config.store.postgres;
        postgres.host = Input::new()
            .with_prompt("Postgres host")
            .default(postgres.host.clone())
            .interact_text()?;
        postgres.port = Input::new()
            .with_prompt("Postgres port")
            .default(postgres.port)
            .interact_text()?;
        postgres.user = Input::new()
            .with_prompt("Postgres user")
            .default(postgres.user.clone())
            .interact_text()?;
        postgres.password = Input::new()
            .with_prompt("Postgres password")
            .default(postgres.password.clone())
            .allow_empty(true)
            .interact_text()?;
        postgres.database = Input::new()
            .with_prompt("Postgres database")
            .default(postgres.database.clone())
            .interact_text()?;
    }

    Ok(())
}

fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Model name cannot be empty")
    } else {
        Ok(())
    }
}

/// One listing request, no retries: the server answers and has both models
fn test_ollama_connection(ollama: &OllamaConfig) -> Result<()> {
    OllamaClient::new(ollama)?
        .with_timeout(Duration::from_secs(5))
        .with_retry_attempts(1)
        .health_check()
}
