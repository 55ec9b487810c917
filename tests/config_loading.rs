use std::io::Write;

use resumind_core::config::{AppConfig, ConfigOverlay};
use resumind_core::types::ScopeKey;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "gemini"
api_key = "sk-test-key"
base_url = "https://generativelanguage.googleapis.com/v1beta/openai"
max_tokens = 4096

[model.retry]
max_retries = 5
initial_backoff_ms = 200

[embedding]
model = "text-embedding-3-small"
dimensions = 1536

[index]
path = "/tmp/resumind-test/index.db"
documents_collection = "resumes"

[documents]
root = "/tmp/resumind-test/docs"

[run]
extraction_model = "gemini-2.5-flash"
max_retries = 3
k = 8

[engine]
max_fan_out = 4
retry_backoff_ms = 250

[log]
log_dir = "/tmp/resumind-test/logs"
level = 3
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "gemini");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 4096);
    let retry = config.model.retry.as_ref().expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);
    assert_eq!(retry.max_backoff_ms, 30000);

    assert_eq!(config.embedding.dimensions, 1536);
    assert_eq!(config.index.documents_collection, "resumes");
    assert_eq!(config.index.questions_collection, "personalized_questions");

    assert_eq!(config.run.extraction_model, "gemini-2.5-flash");
    assert_eq!(config.run.classification_model, "gemini-2.0-flash");
    assert_eq!(config.run.max_retries, 3);
    assert_eq!(config.run.k, 8);

    assert_eq!(config.engine.max_fan_out, 4);
    assert_eq!(config.engine.max_steps, 64);
    assert_eq!(config.engine.retry_backoff_ms, 250);

    assert_eq!(
        config.log_dir(),
        Some(std::path::PathBuf::from("/tmp/resumind-test/logs"))
    );
    assert_eq!(config.log.expect("log present").level, 3);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("RESUMIND_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
api_key = "${RESUMIND_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("RESUMIND_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[model]
provider = "ollama"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.run.timeout_secs, 100);
    assert_eq!(config.run.max_retries, 2);
    assert_eq!(config.run.k, 5);
    assert_eq!(config.run.schema_version, "0.0.1");
    assert!((config.run.temperature - 0.1).abs() < f32::EPSILON);
    assert!(config.model.retry.is_none());
    assert!(config.log.is_none());
    assert!(config.log_dir().is_none());
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.toml");

    assert!(AppConfig::load(&path).is_err());
    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.run.max_retries, 2);
}

#[test]
fn test_file_defaults_then_cli_overlay() {
    let toml_content = r#"
[run]
temperature = 0.4
max_retries = 1
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");
    let config = AppConfig::load(tmp.path()).expect("load config");

    let overlay =
        ConfigOverlay::from_assignments(["max_retries=4", "query_model=local-model", "shiny=1"])
            .expect("parse assignments");
    let resolved = config
        .run
        .resolve(&ScopeKey::new("user-42"), &overlay)
        .expect("resolve");

    assert_eq!(resolved.max_retries, 4);
    assert_eq!(resolved.query_model, "local-model");
    assert!((resolved.temperature - 0.4).abs() < f32::EPSILON);
    assert_eq!(resolved.user_id, "user-42");
    assert_eq!(config.run.max_retries, 1);
}
