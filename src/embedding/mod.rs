//! Embedding backends.
//!
//! Concrete [`Embedder`] implementations selected by `[embedding].provider`:
//! - **`local`**: [`LocalEmbedder`], fastembed inference in-process (feature
//!   `local-embeddings-fastembed`, on by default). The model is downloaded
//!   once from Hugging Face and cached; no network calls afterwards.
//! - **`ollama`**: [`OllamaEmbedder`], calls `POST /api/embed` on a local
//!   Ollama server.
//! - **`hashing`**: the core `HashingEmbedder`, deterministic and
//!   dependency-free.
//!
//! [`create_embedder`] builds the provider once at startup and embeds a sample
//! text, so an unreachable model or a wrong `dims` fails the process before
//! it starts serving.
//!
//! # Retry Strategy
//!
//! The Ollama backend retries transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use refchat_core::embedding::{check_dims, check_finite, Embedder, HashingEmbedder};
use refchat_core::{Error, Result};
use tracing::{info, warn};

use crate::config::{EmbeddingConfig, DEFAULT_OLLAMA_URL};

const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";
const DEFAULT_HASHING_DIMS: usize = 384;
const SAMPLE_TEXT: &str = "refchat embedding check";

/// Build and load the configured embedder, then check one sample embedding.
pub async fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "hashing" => Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        )?),
        "ollama" => Arc::new(OllamaEmbedder::new(config)?),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Arc::new(LocalEmbedder::load(config).await?),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed; \
             use provider = \"ollama\" or \"hashing\" instead"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    };

    let sample = embedder.embed(SAMPLE_TEXT).await.with_context(|| {
        format!(
            "Embedding model '{}' ({}) is not available",
            embedder.model_name(),
            config.provider
        )
    })?;
    check_dims(&sample, embedder.dims()).with_context(|| {
        format!(
            "Embedding model '{}' returned {}-dimensional vectors but embedding.dims is {}",
            embedder.model_name(),
            sample.len(),
            embedder.dims()
        )
    })?;
    check_finite(&sample).with_context(|| {
        format!(
            "Embedding model '{}' returned an unusable vector",
            embedder.model_name()
        )
    })?;

    info!(
        provider = %config.provider,
        model = embedder.model_name(),
        dims = embedder.dims(),
        "embedding model ready"
    );
    Ok(embedder)
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
    closed: AtomicBool,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::validation("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
            max_retries: config.max_retries,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::unavailable("Ollama embedder has been shut down"));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            Error::unavailable(format!("invalid Ollama embed response: {}", e))
                        })?;
                        let vectors = parse_ollama_response(&json)?;
                        if vectors.len() != texts.len() {
                            return Err(Error::internal(format!(
                                "Ollama returned {} embeddings for {} texts",
                                vectors.len(),
                                texts.len()
                            )));
                        }
                        return Ok(vectors);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "Ollama embed request failed; retrying");
                        last_err = Some(Error::unavailable(format!(
                            "Ollama API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(Error::unavailable(format!(
                        "Ollama API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Ollama embed request failed; retrying");
                    last_err = Some(request_error(&self.url, e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::unavailable("Ollama embedding failed after retries")))
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Map a transport failure to `Timeout` or `DependencyUnavailable`.
pub(crate) fn request_error(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("request to {} timed out", url))
    } else {
        Error::unavailable(format!("connection error (is Ollama running at {}?): {}", url, e))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::unavailable("invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| {
                    Error::unavailable("invalid Ollama response: embedding is not an array")
                })
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
        })
        .collect()
}

// ============ Local (fastembed) ============

/// In-process embedder using fastembed.
///
/// The loaded model sits behind a mutex and inference runs on the blocking
/// thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<parking_lot::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    /// Download (first run only) and initialise the model.
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        info!(model = %model_name, "loading local embedding model");
        let model = tokio::task::spawn_blocking(move || {
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
        })
        .await
        .map_err(|e| Error::internal(format!("model loader panicked: {}", e)))?
        .map_err(|e| {
            Error::unavailable(format!(
                "failed to initialize local embedding model: {}",
                e
            ))
        })?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(parking_lot::Mutex::new(Some(model))),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = model.lock();
            let model = guard
                .as_mut()
                .ok_or_else(|| Error::unavailable("local embedding model has been shut down"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::internal(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::internal(format!("embedding task panicked: {}", e)))?
    }

    fn shutdown(&self) {
        self.model.lock().take();
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(Error::validation(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashing(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hashing".to_string(),
            dims: Some(dims),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn parse_ollama_embeddings() {
        let json = serde_json::json!({ "embeddings": [[0.5, -1.0], [0.0, 2.0]] });
        assert_eq!(
            parse_ollama_response(&json).unwrap(),
            vec![vec![0.5, -1.0], vec![0.0, 2.0]]
        );
    }

    #[test]
    fn parse_ollama_rejects_malformed_body() {
        let json = serde_json::json!({ "embedding": [0.5] });
        assert!(matches!(
            parse_ollama_response(&json),
            Err(Error::DependencyUnavailable(_))
        ));
        let json = serde_json::json!({ "embeddings": ["nope"] });
        assert!(parse_ollama_response(&json).is_err());
    }

    #[tokio::test]
    async fn hashing_provider_passes_startup_check() {
        let embedder = create_embedder(&hashing(48)).await.unwrap();
        assert_eq!(embedder.model_name(), "hashing");
        assert_eq!(embedder.dims(), 48);
    }

    #[tokio::test]
    async fn unreachable_ollama_fails_fast() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            max_retries: 0,
            timeout_secs: 2,
            url: Some("http://127.0.0.1:9".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).await.is_err());

        let embedder = OllamaEmbedder::new(&config).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            Error::DependencyUnavailable(_) | Error::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn ollama_shutdown_rejects_calls() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        embedder.shutdown();
        assert!(matches!(
            embedder.embed("x").await,
            Err(Error::DependencyUnavailable(_))
        ));
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    #[test]
    fn local_model_dims_resolve_from_name() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(resolve_local_model(&config), ("all-minilm-l6-v2".to_string(), 384));
        config.model = Some("bge-base-en-v1.5".to_string());
        assert_eq!(resolve_local_model(&config).1, 768);
        assert!(config_to_fastembed_model("word2vec").is_err());
    }
}
