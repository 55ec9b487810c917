use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ResumindError};
use crate::prompts;
use crate::types::{QuestionCategory, ScopeKey};

/// Top-level Resumind configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    /// Defaults every run starts from before its overlay is applied.
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Model endpoint shared by every model-backed capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL (e.g. "https://generativelanguage.googleapis.com/v1beta/openai").
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Transport-level retries for a single call. The run-level retry
    /// controller sits above this and counts whole step attempts.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            retry: None,
        }
    }
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 8192 }

/// Retry configuration for model HTTP requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_transport_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_transport_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_transport_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Embedding model configuration for the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "openai", "ollama", or any OpenAI-compatible API.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Embedding dimensions (default: 3072).
    #[serde(default = "default_embedding_dims")]
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: None,
            api_key: None,
            dimensions: default_embedding_dims(),
        }
    }
}

fn default_embedding_model() -> String { "text-embedding-3-large".to_string() }
fn default_embedding_dims() -> usize { 3072 }

/// Vector index storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// SQLite database path. `~/` is expanded.
    #[serde(default = "default_index_path")]
    pub path: String,
    /// Collection holding parsed resume documents.
    #[serde(default = "default_documents_collection")]
    pub documents_collection: String,
    /// Collection holding generated interview questions.
    #[serde(default = "default_questions_collection")]
    pub questions_collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            documents_collection: default_documents_collection(),
            questions_collection: default_questions_collection(),
        }
    }
}

fn default_index_path() -> String { "~/.resumind/index.db".to_string() }
fn default_documents_collection() -> String { "apply_docs".to_string() }
fn default_questions_collection() -> String { "personalized_questions".to_string() }

/// Where uploaded documents live. References are `<owner>/<relative path>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
        }
    }
}

fn default_documents_root() -> String { "~/.resumind/documents".to_string() }

/// Workflow engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum step executions per run before the run is aborted. Re-runs of
    /// the retried step count once; the retry ceiling bounds the rest.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Maximum number of branches a single fan-out may spawn.
    #[serde(default = "default_max_fan_out")]
    pub max_fan_out: usize,
    /// Base delay before re-running a failed step. 0 disables backoff.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Broadcast capacity of the run event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_fan_out: default_max_fan_out(),
            retry_backoff_ms: 0,
            max_backoff_ms: default_max_backoff(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_steps() -> usize { 64 }
fn default_max_fan_out() -> usize { 8 }
fn default_event_capacity() -> usize { 256 }

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ~/.resumind/logs
    #[serde(default)]
    pub log_dir: Option<String>,
    /// Logging level: 1 = run summary only, 2 = per-step, 3 = everything including branches (default: 2).
    #[serde(default = "default_log_level")]
    pub level: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            level: 2,
        }
    }
}

fn default_log_enabled() -> bool { true }
fn default_log_level() -> u8 { 2 }

/// The resolved per-run bundle of tunables.
///
/// Every field is overridable by name through a [`ConfigOverlay`]. Once a
/// run starts its `RunConfig` is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Identity used as the scope key for every index operation.
    #[serde(default)]
    pub user_id: String,

    #[serde(default = "default_classification_model")]
    pub classification_model: String,
    #[serde(default = "default_extraction_model")]
    pub extraction_model: String,
    #[serde(default = "default_flash_model")]
    pub experience_question_model: String,
    #[serde(default = "default_flash_model")]
    pub tech_question_model: String,
    #[serde(default = "default_flash_model")]
    pub cowork_question_model: String,
    #[serde(default = "default_flash_model")]
    pub query_model: String,
    #[serde(default = "default_flash_model")]
    pub response_model: String,

    #[serde(default = "default_run_temperature")]
    pub temperature: f32,
    #[serde(default = "default_run_temperature")]
    pub question_temperature: f32,

    #[serde(default = "default_classification_prompt")]
    pub classification_prompt: String,
    #[serde(default = "default_extraction_prompt")]
    pub extraction_prompt: String,
    #[serde(default = "default_question_base_prompt")]
    pub question_base_prompt: String,
    #[serde(default = "default_experience_question_prompt")]
    pub experience_question_prompt: String,
    #[serde(default = "default_tech_question_prompt")]
    pub tech_question_prompt: String,
    #[serde(default = "default_cowork_question_prompt")]
    pub cowork_question_prompt: String,
    #[serde(default = "default_query_prompt")]
    pub query_prompt: String,
    #[serde(default = "default_response_prompt")]
    pub response_prompt: String,

    /// Per capability call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry ceiling for the designated fallible step.
    #[serde(default = "default_run_max_retries")]
    pub max_retries: u32,
    /// Documents retrieved per search query.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Upper bound on generated search queries.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            classification_model: default_classification_model(),
            extraction_model: default_extraction_model(),
            experience_question_model: default_flash_model(),
            tech_question_model: default_flash_model(),
            cowork_question_model: default_flash_model(),
            query_model: default_flash_model(),
            response_model: default_flash_model(),
            temperature: default_run_temperature(),
            question_temperature: default_run_temperature(),
            classification_prompt: default_classification_prompt(),
            extraction_prompt: default_extraction_prompt(),
            question_base_prompt: default_question_base_prompt(),
            experience_question_prompt: default_experience_question_prompt(),
            tech_question_prompt: default_tech_question_prompt(),
            cowork_question_prompt: default_cowork_question_prompt(),
            query_prompt: default_query_prompt(),
            response_prompt: default_response_prompt(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_run_max_retries(),
            k: default_k(),
            max_queries: default_max_queries(),
            schema_version: default_schema_version(),
        }
    }
}

fn default_classification_model() -> String { "gemini-2.0-flash".to_string() }
fn default_extraction_model() -> String { "gemini-2.5-pro".to_string() }
fn default_flash_model() -> String { "gemini-2.5-flash".to_string() }
fn default_run_temperature() -> f32 { 0.1 }
fn default_classification_prompt() -> String { prompts::CLASSIFICATION.to_string() }
fn default_extraction_prompt() -> String { prompts::EXTRACTION.to_string() }
fn default_question_base_prompt() -> String { prompts::QUESTION_BASE.to_string() }
fn default_experience_question_prompt() -> String { prompts::EXPERIENCE_QUESTIONS.to_string() }
fn default_tech_question_prompt() -> String { prompts::TECH_QUESTIONS.to_string() }
fn default_cowork_question_prompt() -> String { prompts::COWORK_QUESTIONS.to_string() }
fn default_query_prompt() -> String { prompts::QUERY.to_string() }
fn default_response_prompt() -> String { prompts::RESPONSE.to_string() }
fn default_timeout_secs() -> u64 { 100 }
fn default_run_max_retries() -> u32 { 2 }
fn default_k() -> usize { 5 }
fn default_max_queries() -> usize { 3 }
fn default_schema_version() -> String { "0.0.1".to_string() }

impl RunConfig {
    /// Overlay `overlay` onto `self` and bind the run to `identity`.
    ///
    /// Recognized keys replace the default value, unknown keys are ignored,
    /// and a recognized key carrying a value of the wrong type is rejected.
    /// A `user_id` key in the overlay is skipped whatever its type, and the
    /// identity is bound last, so the overlay can never redirect the run to
    /// another scope.
    pub fn resolve(&self, identity: &ScopeKey, overlay: &ConfigOverlay) -> Result<RunConfig> {
        let mut fields = match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => map,
            _ => return Err(ResumindError::Config("run config is not a table".into())),
        };

        for (key, value) in overlay.iter() {
            if key == "user_id" {
                debug!("Ignoring user_id in run overlay");
                continue;
            }
            match fields.get_mut(key) {
                Some(slot) => *slot = value.clone(),
                None => debug!(key = %key, "Ignoring unrecognized run option"),
            }
        }

        let mut resolved: RunConfig = serde_json::from_value(serde_json::Value::Object(fields))
            .map_err(|e| ResumindError::Config(format!("invalid run option: {}", e)))?;
        resolved.user_id = identity.0.clone();
        resolved.check()?;
        Ok(resolved)
    }

    fn check(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) || !(0.0..=2.0).contains(&self.question_temperature) {
            return Err(ResumindError::Config(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ResumindError::Config("timeout_secs must be positive".into()));
        }
        if self.k == 0 {
            return Err(ResumindError::Config("k must be at least 1".into()));
        }
        Ok(())
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey(self.user_id.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn question_model(&self, category: QuestionCategory) -> &str {
        match category {
            QuestionCategory::Experience => &self.experience_question_model,
            QuestionCategory::Tech => &self.tech_question_model,
            QuestionCategory::Cowork => &self.cowork_question_model,
        }
    }

    pub fn question_prompt(&self, category: QuestionCategory) -> &str {
        match category {
            QuestionCategory::Experience => &self.experience_question_prompt,
            QuestionCategory::Tech => &self.tech_question_prompt,
            QuestionCategory::Cowork => &self.cowork_question_prompt,
        }
    }
}

/// Flat mapping of run option names to caller-supplied values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigOverlay(BTreeMap<String, serde_json::Value>);

impl ConfigOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Parse a `key=value` assignment. The value is read as JSON when it
    /// parses as JSON, otherwise it is taken as a plain string.
    pub fn parse_assignment(&mut self, assignment: &str) -> Result<()> {
        let (key, raw) = assignment.split_once('=').ok_or_else(|| {
            ResumindError::Config(format!("expected key=value, got '{}'", assignment))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ResumindError::Config(format!(
                "empty option name in '{}'",
                assignment
            )));
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    pub fn from_assignments<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overlay = Self::new();
        for a in assignments {
            overlay.parse_assignment(a.as_ref())?;
        }
        Ok(overlay)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ResumindError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| ResumindError::Config(e.to_string()))
    }

    /// Load `path` when it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        expand_home("~/.resumind/config.toml")
    }

    pub fn index_path(&self) -> PathBuf {
        expand_home(&self.index.path)
    }

    pub fn documents_root(&self) -> PathBuf {
        expand_home(&self.documents.root)
    }

    /// Directory for JSONL run logs, if run logging is enabled.
    pub fn log_dir(&self) -> Option<PathBuf> {
        let log = self.log.as_ref()?;
        if !log.enabled {
            return None;
        }
        Some(match &log.log_dir {
            Some(dir) => expand_home(dir),
            None => expand_home("~/.resumind/logs"),
        })
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

/// Resolve a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
