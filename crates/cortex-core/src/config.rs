//! Persisted config (notes root, Ollama models, chunking, ingestion switches) in the
//! app data directory, with environment overrides for the binaries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::{DEFAULT_MAX_CHARS, DEFAULT_OVERLAP_CHARS};
use crate::ollama::{DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL, DEFAULT_MODEL};

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the user's Logseq graph (or its `journals/` folder).
    pub notes_root: Option<String>,
    pub ollama: OllamaConfig,
    pub server: ServerConfig,
    pub chunking: ChunkingConfig,
    pub ingest: IngestConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub url: String,
    /// Generation model used for enhance/summarize/tag and answer synthesis.
    pub model: String,
    pub embed_model: String,
    /// Upper bound for every embedding and generation call.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on a chunk's text, in bytes, overlap included.
    pub max_chars: usize,
    /// Bytes repeated from the end of the previous chunk.
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Generate an LLM summary chunk per page during ingestion.
    pub enhance: bool,
    /// Also summarize journals when `enhance` is on.
    pub enhance_journals: bool,
    /// Documents longer than this are indexed without a summary.
    pub enhance_max_chars: usize,
    /// Treat `[[wiki link]]` targets as tags in addition to cross-references.
    pub wiki_links_as_tags: bool,
    /// Remove `#` and `[[ ]]` markup from the indexed text.
    pub strip_tag_markup: bool,
    /// Persist the index snapshot and last run stats in the app data directory.
    pub persist: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enhance: false,
            enhance_journals: false,
            enhance_max_chars: 4000,
            wiki_links_as_tags: false,
            strip_tag_markup: false,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Prepend an LLM-written answer (or day summary) to non-empty results.
    pub synthesize: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { synthesize: true }
    }
}

impl Config {
    /// The configured notes root, if set and non-empty.
    pub fn notes_root_path(&self) -> Option<PathBuf> {
        self.notes_root
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.ollama.timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Apply `CORTEX_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CORTEX_NOTES_DIR").filter(|v| !v.is_empty()) {
            self.notes_root = Some(v);
        }
        if let Some(v) = lookup("CORTEX_OLLAMA_URL").filter(|v| !v.is_empty()) {
            self.ollama.url = v;
        }
        if let Some(v) = lookup("CORTEX_MODEL").filter(|v| !v.is_empty()) {
            self.ollama.model = v;
        }
        if let Some(v) = lookup("CORTEX_EMBED_MODEL").filter(|v| !v.is_empty()) {
            self.ollama.embed_model = v;
        }
        if let Some(v) = lookup("CORTEX_PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("ignoring invalid CORTEX_PORT value: {}", v),
            }
        }
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.max_chars == 0 {
            return Err(ConfigError::Invalid("chunking.max_chars must be > 0".into()));
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            return Err(ConfigError::Invalid(
                "chunking.overlap_chars must be smaller than chunking.max_chars".into(),
            ));
        }
        if self.ollama.timeout_secs == 0 {
            return Err(ConfigError::Invalid("ollama.timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Path of the config file in the app data directory.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|d| d.join(CONFIG_FILENAME))
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        return Config::default();
    };
    if !path.exists() {
        return Config::default();
    }
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("using default config: {}", e);
            Config::default()
        }
    }
}

/// Load config from an explicit file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    toml::from_str(&s).map_err(ConfigError::Parse)
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(&path, s).map_err(ConfigError::Write)
}

/// Get the configured notes root path, if any.
pub fn get_notes_root() -> Option<PathBuf> {
    load_config().notes_root_path()
}

/// Set and persist the notes root.
pub fn set_notes_root(path: &Path) -> Result<(), ConfigError> {
    let path = path.canonicalize().map_err(ConfigError::Canonicalize)?;
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path));
    }
    let mut config = load_config();
    config.notes_root = Some(path.to_string_lossy().into_owned());
    save_config(&config)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("invalid config: {0}")]
    Invalid(String),
}
