//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, when the default path is used) yields a working configuration.
//!
//! ```toml
//! [library]
//! docs_dir = "docs"
//! max_file_size_mb = 50
//! allowed_extensions = ["pdf", "txt"]
//!
//! [chunking]
//! chunk_size_words = 500
//! oversize = "keep"          # or "split"
//!
//! [retrieval]
//! default_top_k = 5
//! max_top_k = 20
//! snippet_chars = 250
//!
//! [embedding]
//! provider = "local"         # local | ollama | hashing
//! model = "all-minilm-l6-v2"
//!
//! [llm]
//! url = "http://localhost:11434"
//! model = "llama3"
//! timeout_secs = 30
//!
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{bail, Context, Result};
use refchat_core::chunk::{OversizePolicy, DEFAULT_CHUNK_SIZE_WORDS};
use refchat_core::models::FileType;
use refchat_core::prompt::DEFAULT_SNIPPET_CHARS;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Path used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/refchat.toml";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding uploaded files.
    pub docs_dir: PathBuf,
    pub max_file_size_mb: u64,
    /// Accepted extensions, without the leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("docs"),
            max_file_size_mb: 50,
            allowed_extensions: vec!["pdf".to_string(), "txt".to_string()],
        }
    }
}

impl LibraryConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Allowed types, resolved from `allowed_extensions`.
    pub fn allowed_types(&self) -> Vec<FileType> {
        self.allowed_extensions
            .iter()
            .filter_map(|ext| FileType::from_extension(ext))
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size_words: usize,
    pub oversize: OversizePolicy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_words: DEFAULT_CHUNK_SIZE_WORDS,
            oversize: OversizePolicy::Keep,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 20,
            snippet_chars: DEFAULT_SNIPPET_CHARS,
        }
    }
}

impl RetrievalConfig {
    /// `requested` or the default, which must lie in `1..=max_top_k`.
    pub fn resolve_top_k(&self, requested: Option<usize>) -> refchat_core::Result<usize> {
        let top_k = requested.unwrap_or(self.default_top_k);
        if top_k == 0 || top_k > self.max_top_k {
            return Err(refchat_core::Error::validation(format!(
                "top_k must be between 1 and {}",
                self.max_top_k
            )));
        }
        Ok(top_k)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Base URL of the Ollama server when `provider = "ollama"`.
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: None,
            dims: None,
            batch_size: 32,
            max_retries: 3,
            timeout_secs: 30,
            url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            model: "llama3".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration for the CLI.
///
/// With no explicit path, a missing [`DEFAULT_CONFIG_PATH`] yields
/// [`Config::default`]. An explicit path must exist.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config(default)
            } else {
                let config = Config::default();
                validate(&config)?;
                Ok(config)
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let library = &config.library;
    if library.max_file_size_mb == 0 {
        bail!("library.max_file_size_mb must be > 0");
    }
    if library.allowed_extensions.is_empty() {
        bail!("library.allowed_extensions must not be empty");
    }
    for ext in &library.allowed_extensions {
        if FileType::from_extension(ext).is_none() {
            bail!(
                "Unsupported entry in library.allowed_extensions: '{}'. Must be pdf or txt.",
                ext
            );
        }
    }

    if config.chunking.chunk_size_words == 0 {
        bail!("chunking.chunk_size_words must be > 0");
    }

    let retrieval = &config.retrieval;
    if retrieval.default_top_k == 0 {
        bail!("retrieval.default_top_k must be >= 1");
    }
    if retrieval.max_top_k < retrieval.default_top_k {
        bail!("retrieval.max_top_k must be >= retrieval.default_top_k");
    }
    if retrieval.snippet_chars == 0 {
        bail!("retrieval.snippet_chars must be > 0");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "local" | "hashing" => {}
        "ollama" => {
            if embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'ollama'");
            }
            if embedding.dims.is_none() {
                bail!("embedding.dims must be specified when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be local, ollama, or hashing.",
            other
        ),
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }

    if config.llm.url.trim().is_empty() {
        bail!("llm.url must not be empty");
    }
    if config.llm.timeout_secs == 0 {
        bail!("llm.timeout_secs must be > 0");
    }

    config
        .server
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid server.bind address: {}", config.server.bind))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.library.docs_dir, PathBuf::from("docs"));
        assert_eq!(config.library.max_file_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.chunking.chunk_size_words, 500);
        assert_eq!(config.chunking.oversize, OversizePolicy::Keep);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.retrieval.max_top_k, 20);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(
            config.library.allowed_types(),
            vec![FileType::Pdf, FileType::Txt]
        );
    }

    #[test]
    fn top_k_resolution_enforces_bounds() {
        let retrieval = RetrievalConfig::default();
        assert_eq!(retrieval.snippet_chars, DEFAULT_SNIPPET_CHARS);
        assert_eq!(retrieval.resolve_top_k(None).unwrap(), 5);
        assert_eq!(retrieval.resolve_top_k(Some(1)).unwrap(), 1);
        assert_eq!(retrieval.resolve_top_k(Some(20)).unwrap(), 20);
        for bad in [0, 21] {
            assert!(matches!(
                retrieval.resolve_top_k(Some(bad)),
                Err(refchat_core::Error::Validation(_))
            ));
        }
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
            [chunking]
            chunk_size_words = 120
            oversize = "split"

            [embedding]
            provider = "hashing"
            dims = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_size_words, 120);
        assert_eq!(config.chunking.oversize, OversizePolicy::Split);
        assert_eq!(config.embedding.dims, Some(64));
    }

    #[test]
    fn rejects_invalid_values() {
        for bad in [
            "[chunking]\nchunk_size_words = 0",
            "[retrieval]\ndefault_top_k = 10\nmax_top_k = 5",
            "[embedding]\nprovider = \"openai\"",
            "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"",
            "[library]\nallowed_extensions = [\"docx\"]",
            "[server]\nbind = \"not an address\"",
            "[chunking]\noversize = \"truncate\"",
        ] {
            assert!(parse_config(bad).is_err(), "accepted: {}", bad);
        }
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_or_default(Some(&missing)).is_err());
    }
}
