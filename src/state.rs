//! Process-wide application state.

use std::sync::Arc;

use anyhow::Context;
use refchat_core::chunk::Chunker;
use refchat_core::retriever::{LanguageModel, Retriever};
use tracing::info;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest;
use crate::library::Library;
use crate::llm::OllamaClient;

/// Everything a request handler or CLI command needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub retriever: Arc<Retriever>,
    pub library: Library,
    pub llm: Arc<OllamaClient>,
}

impl AppState {
    /// Load the embedding model, open the library and rebuild the index
    /// from the stored files.
    ///
    /// Fails if the embedding model cannot be loaded. The language model is
    /// only contacted on demand, so an absent Ollama does not block startup.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding).await?;
        let llm = Arc::new(OllamaClient::new(&config.llm)?);
        let library = Library::open(&config.library)?;
        let chunker = Chunker::new(config.chunking.chunk_size_words, config.chunking.oversize)?;

        let model: Arc<dyn LanguageModel> = llm.clone();
        let retriever =
            Retriever::new(embedder, model, chunker)?.with_batch_size(config.embedding.batch_size)?;

        let state = Self {
            config: Arc::new(config.clone()),
            retriever: Arc::new(retriever),
            library,
            llm,
        };

        let report = ingest::reindex_library(&state)
            .await
            .context("Failed to index the document library")?;
        info!(
            docs_dir = %state.library.root().display(),
            documents = report.documents_processed,
            chunks = report.chunks_created,
            skipped = report.skipped.len(),
            "document library indexed"
        );

        Ok(state)
    }

    /// Release the embedding model.
    pub fn shutdown(&self) {
        self.retriever.embedder().shutdown();
        info!("embedding model released");
    }
}
