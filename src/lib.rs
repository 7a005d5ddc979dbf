//! Memoria - long-term user memory for a conversational assistant
//!
//! Keeps short factual statements about the user (attributes, goals,
//! requests, notes) and maintains them with an LLM-driven consolidation pass:
//! - Merge near-duplicate memories
//! - Drop the stale side of contradicting memories
//! - Shorten verbose memories

pub mod assistant;
pub mod consolidation;
pub mod inference;
pub mod memory;
pub mod protocol;

pub use assistant::{AnalysisMode, Assistant, ChatReply, ChatSession};
pub use consolidation::{
    ConsolidationPipeline, ConsolidationSummary, EventDetail, ProgressEvent, ProgressStep,
};
pub use inference::{HttpInferenceClient, Inference, InferenceClient, Inferred, Unavailable};
pub use memory::{Category, InMemoryStore, MemoryId, MemoryRecord, MemoryStore, SqliteMemoryStore};
pub use protocol::{CapabilityStore, MemoryServer};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local Ollama endpoint
const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.1:8b";
/// Timeout for consolidation / extraction helper calls
const DEFAULT_HELPER_TIMEOUT_SECS: u64 = 120;
/// Timeout for the primary chat-turn completion
const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 60;
/// Short-term history is forgotten after this much idle time
const DEFAULT_IDLE_RESET_SECS: u64 = 300;
const DEFAULT_RESET_KEYWORD: &str = "ありがとう";

/// Wire format spoken by the inference endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WireApi {
    /// Ollama native API (`/api/chat`)
    #[default]
    Ollama,
    /// OpenAI-compatible Chat Completions API (`/chat/completions`)
    Chat,
}

/// Inference endpoint settings
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub wire_api: WireApi,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding a bearer key (chat wire only)
    pub api_key_env: Option<String>,
    pub helper_timeout: Duration,
    pub chat_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            wire_api: WireApi::Ollama,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: None,
            helper_timeout: Duration::from_secs(DEFAULT_HELPER_TIMEOUT_SECS),
            chat_timeout: Duration::from_secs(DEFAULT_CHAT_TIMEOUT_SECS),
        }
    }
}

/// Chat session settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle_reset: Duration,
    /// User input containing any of these clears the short-term history
    pub reset_keywords: Vec<String>,
    pub analysis: AnalysisMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_reset: Duration::from_secs(DEFAULT_IDLE_RESET_SECS),
            reset_keywords: vec![DEFAULT_RESET_KEYWORD.to_string()],
            analysis: AnalysisMode::Background,
        }
    }
}

/// Configuration for Memoria
#[derive(Debug, Clone)]
pub struct MemoriaConfig {
    /// Directory holding config.toml and the default database
    pub home: PathBuf,

    /// Path to the SQLite memory database
    pub database: PathBuf,

    pub inference: InferenceConfig,

    pub session: SessionConfig,
}

/// On-disk shape of `config.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigToml {
    database: Option<PathBuf>,
    inference: InferenceToml,
    session: SessionToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InferenceToml {
    wire_api: Option<WireApi>,
    base_url: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
    helper_timeout_secs: Option<u64>,
    chat_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionToml {
    idle_reset_secs: Option<u64>,
    reset_keywords: Option<Vec<String>>,
    analysis: Option<AnalysisMode>,
}

impl MemoriaConfig {
    pub fn new(home: PathBuf) -> Self {
        let database = home.join("memories.db");
        Self {
            home,
            database,
            inference: InferenceConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// Load `<home>/config.toml` on top of the defaults.
    ///
    /// Precedence for model and base URL:
    ///   1. `MEMORIA_MODEL` / `MEMORIA_BASE_URL` environment variables
    ///   2. `[inference]` table in config.toml
    ///   3. built-in defaults (local Ollama)
    pub async fn load(home: &Path) -> Result<Self> {
        let mut config = Self::new(home.to_path_buf());
        let config_file = home.join("config.toml");

        if config_file.exists() {
            let content = tokio::fs::read_to_string(&config_file).await?;
            config.apply_toml(&content)?;
        }

        if let Ok(model) = std::env::var("MEMORIA_MODEL") {
            config.inference.model = model;
        }
        if let Ok(base_url) = std::env::var("MEMORIA_BASE_URL") {
            config.inference.base_url = base_url;
        }

        Ok(config)
    }

    fn apply_toml(&mut self, content: &str) -> Result<()> {
        let parsed: ConfigToml =
            toml::from_str(content).map_err(|e| MemoriaError::Config(e.to_string()))?;

        if let Some(database) = parsed.database {
            // Relative paths live under home
            self.database = if database.is_absolute() {
                database
            } else {
                self.home.join(database)
            };
        }

        let inference = parsed.inference;
        if let Some(wire_api) = inference.wire_api {
            self.inference.wire_api = wire_api;
        }
        if let Some(base_url) = inference.base_url {
            self.inference.base_url = base_url;
        }
        if let Some(model) = inference.model {
            self.inference.model = model;
        }
        if inference.api_key_env.is_some() {
            self.inference.api_key_env = inference.api_key_env;
        }
        if let Some(secs) = inference.helper_timeout_secs {
            self.inference.helper_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = inference.chat_timeout_secs {
            self.inference.chat_timeout = Duration::from_secs(secs);
        }

        let session = parsed.session;
        if let Some(secs) = session.idle_reset_secs {
            self.session.idle_reset = Duration::from_secs(secs);
        }
        if let Some(keywords) = session.reset_keywords {
            self.session.reset_keywords = keywords;
        }
        if let Some(analysis) = session.analysis {
            self.session.analysis = analysis;
        }

        Ok(())
    }

    pub fn with_database(mut self, path: PathBuf) -> Self {
        self.database = path;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.inference.model = model.into();
        self
    }

    pub fn with_analysis(mut self, analysis: AnalysisMode) -> Self {
        self.session.analysis = analysis;
        self
    }
}

/// Result type for Memoria operations
pub type Result<T> = std::result::Result<T, MemoriaError>;

/// Errors that can occur in Memoria
#[derive(Debug, thiserror::Error)]
pub enum MemoriaError {
    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
