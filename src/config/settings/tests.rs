use super::*;
use tempfile::TempDir;

fn rejection(mutate: impl FnOnce(&mut Config)) -> ConfigError {
    let mut config = Config::with_base_dir("/tmp/advisor");
    mutate(&mut config);
    config
        .validate()
        .expect_err("mutated config should be rejected")
}

#[test]
fn defaults_are_valid_and_local() {
    let config = Config::with_base_dir("/tmp/advisor");
    assert!(config.validate().is_ok());
    assert_eq!(
        config.ollama_url().expect("default URL").as_str(),
        "http://localhost:11434/"
    );
    assert_eq!(config.ollama.embedding_model, "nomic-embed-text:latest");
    assert_eq!(config.ollama.embedding_dimension, 768);
    assert_eq!(config.ollama.request_timeout_secs, 120);
    assert_eq!((config.chunking.chunk_size, config.chunking.chunk_overlap), (256, 20));
    assert_eq!(config.backend_kind(), StoreBackendKind::LanceDb);
}

#[test]
fn each_section_is_validated() {
    assert!(matches!(
        rejection(|c| c.ollama.protocol = "ftp".to_string()),
        ConfigError::InvalidProtocol(_)
    ));
    assert!(matches!(
        rejection(|c| c.ollama.port = 0),
        ConfigError::InvalidPort(0)
    ));
    assert!(matches!(
        rejection(|c| c.ollama.chat_model = String::new()),
        ConfigError::InvalidModel(_)
    ));
    assert!(matches!(
        rejection(|c| c.ollama.batch_size = 1001),
        ConfigError::InvalidBatchSize(1001)
    ));
    assert!(matches!(
        rejection(|c| c.ollama.embedding_dimension = 0),
        ConfigError::InvalidEmbeddingDimension(0)
    ));
    assert!(matches!(
        rejection(|c| c.store.table_name = "docs; DROP TABLE users".to_string()),
        ConfigError::InvalidTableName(_)
    ));
    assert!(matches!(
        rejection(|c| c.chunking.chunk_overlap = c.chunking.chunk_size),
        ConfigError::InvalidChunkOverlap(256, 256)
    ));
    assert!(matches!(
        rejection(|c| c.retrieval.similarity_cutoff = 1.5),
        ConfigError::InvalidSimilarityCutoff(_)
    ));
    assert!(matches!(
        rejection(|c| c.indexing.verify_attempts = 0),
        ConfigError::InvalidVerifyAttempts(0)
    ));
}

#[test]
fn serialized_defaults_parse_back() {
    let config = Config::with_base_dir("");
    let text = toml::to_string(&config).expect("defaults should serialize");
    assert!(text.contains("[retrieval]"));
    let parsed: Config = toml::from_str(&text).expect("serialized defaults should parse");
    assert_eq!(parsed, config);
}

#[test]
fn partial_toml_uses_defaults() {
    let partial_toml = r#"
        [ollama]
        host = "gpu-box"

        [store]
        table_name = "rules_docs"
    "#;

    let config: Config = toml::from_str(partial_toml).expect("should parse partial toml");
    assert_eq!(config.ollama.host, "gpu-box");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.store.table_name, "rules_docs");
    assert_eq!(config.retrieval.max_candidates, 15);
    assert_eq!(config.indexing.verify_attempts, 5);
}

#[test]
fn postgres_backend_from_toml() {
    let toml_str = r#"
        [store]
        backend = "postgres"

        [store.postgres]
        host = "db.internal"
        database = "advisor"
    "#;

    let config: Config = toml::from_str(toml_str).expect("should parse postgres config");
    assert_eq!(config.backend_kind(), StoreBackendKind::Postgres);
    assert_eq!(config.store.postgres.host, "db.internal");
    assert_eq!(config.store.postgres.port, 5432);
}

#[test]
fn setters_share_the_validation_rules() {
    let mut config = OllamaConfig::default();

    for size in [1, 1000] {
        config.set_batch_size(size).expect("boundary batch size should be accepted");
    }
    for size in [0, 1001] {
        assert!(matches!(
            config.set_batch_size(size),
            Err(ConfigError::InvalidBatchSize(rejected)) if rejected == size
        ));
    }
    assert_eq!(config.batch_size, 1000, "rejected values must not be applied");

    config.set_protocol("https".to_string()).expect("https should be accepted");
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert_eq!(config.protocol, "https");

    config.set_embedding_dimension(8192).expect("upper dimension bound");
    assert!(config.set_embedding_dimension(8193).is_err());
    assert!(config.set_chat_model("  ".to_string()).is_err());
    assert_eq!(config.chat_model, "llama3.2:latest");

    config.set_host("gpu-box.lan".to_string()).expect("plain host should be accepted");
    config.set_port(8443).expect("port should be accepted");
    assert_eq!(
        config.ollama_url().expect("URL should build").as_str(),
        "https://gpu-box.lan:8443/"
    );
    assert!(config.validate().is_ok());
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing config should load defaults");
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
}

#[test]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.ollama.chat_model = "qwen2.5:7b".to_string();
    config.retrieval.similarity_cutoff = 0.5;

    config.save().expect("should save config");
    let loaded = Config::load(temp_dir.path()).expect("should load saved config");

    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[ollama]\nbatch_size = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn derived_paths() {
    let config = Config::with_base_dir("/srv/advisor");
    assert_eq!(
        config.history_database_path(),
        PathBuf::from("/srv/advisor/history.db")
    );
    assert_eq!(
        config.vector_database_path(),
        PathBuf::from("/srv/advisor/vectors")
    );
    assert_eq!(config.data_folder_path(), PathBuf::from("/srv/advisor/data"));

    let relative = Config {
        data_folder: Some(PathBuf::from("pdfs")),
        ..config.clone()
    };
    assert_eq!(relative.data_folder_path(), PathBuf::from("/srv/advisor/pdfs"));

    let absolute = Config {
        data_folder: Some(PathBuf::from("/mnt/rules")),
        ..config
    };
    assert_eq!(absolute.data_folder_path(), PathBuf::from("/mnt/rules"));
}

#[test]
fn table_name_rules() {
    assert!(is_valid_table_name("ultimate_advisor_docs"));
    assert!(is_valid_table_name("_private"));
    assert!(!is_valid_table_name("1docs"));
    assert!(!is_valid_table_name("docs-table"));
    assert!(!is_valid_table_name(""));
    assert!(!is_valid_table_name(&"a".repeat(64)));
}
