//! TOML configuration parsing and validation.
//!
//! The configuration is loaded once at startup and shared read-only by every
//! component. API credentials are not part of the TOML file; they are read
//! from the environment by [`load_config`] and carried in [`Credentials`].

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generative: GenerativeConfig,
    #[serde(skip)]
    pub credentials: Credentials,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Name of the collection the catalog is written to.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Maximum hits requested from the fuzzy fallback.
    #[serde(default = "default_fuzzy_limit")]
    pub fuzzy_limit: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            fuzzy_limit: default_fuzzy_limit(),
        }
    }
}

fn default_collection() -> String {
    "product_dataset".to_string()
}
fn default_fuzzy_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "https://rag-client.netlify.app".to_string(),
    ]
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

/// Which answering contract the query responder follows.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponderMode {
    /// Keyword-shaped TID answers, then fuzzy search, then generative fallback.
    #[default]
    Fallback,
    /// TID lookups only; never escalates to fuzzy or generative search.
    Strict,
}

/// How a TID is pulled out of a query that mentions "tid".
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TidStrategy {
    /// Concatenate every digit in the query.
    #[default]
    AllDigits,
    /// First run of digits after the word "tid".
    FirstNumber,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResponderConfig {
    #[serde(default)]
    pub mode: ResponderMode,
    #[serde(default)]
    pub tid_strategy: TidStrategy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerativeConfig {
    #[serde(default = "default_generative_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            provider: default_generative_provider(),
            model: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_generative_provider() -> String {
    "gemini".to_string()
}

/// API keys read from the environment at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Credentials {
    /// Reads `GEMINI_API_KEY` and `OPENAI_API_KEY`. Missing keys are not an
    /// error here; they surface on first use of the matching client.
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: non_empty_env("GEMINI_API_KEY"),
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Defaults used when no configuration file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/catalog.sqlite"),
            },
            catalog: CatalogConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:5000".to_string(),
                cors_origins: default_cors_origins(),
                max_upload_bytes: default_max_upload_bytes(),
            },
            responder: ResponderConfig::default(),
            embedding: EmbeddingConfig::default(),
            generative: GenerativeConfig::default(),
            credentials: Credentials::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.catalog.collection) {
            bail!(
                "catalog.collection must contain only ASCII letters, digits and '_' and must not start with a digit (got '{}')",
                self.catalog.collection
            );
        }

        if self.catalog.fuzzy_limit == 0 {
            bail!("catalog.fuzzy_limit must be >= 1");
        }

        if self.server.max_upload_bytes == 0 {
            bail!("server.max_upload_bytes must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if self.embedding.dims == Some(0) {
                    bail!("embedding.dims must be > 0 when provider is 'openai'");
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        match self.generative.provider.as_str() {
            "disabled" | "gemini" | "openai" => {}
            other => bail!(
                "Unknown generative provider: '{}'. Must be disabled, gemini, or openai.",
                other
            ),
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    config.credentials = Credentials::from_env();

    Ok(config)
}

/// Loads `path` if it exists, otherwise falls back to [`Config::minimal`].
pub fn load_config_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::info!(
        "config file {} not found, using built-in defaults",
        path.display()
    );
    let mut config = Config::minimal();
    config.credentials = Credentials::from_env();
    Ok(config)
}
