//! Ingest, search and grounded answering over a [`DocumentIndex`].
//!
//! The [`Retriever`] owns the index together with the chunker, the
//! embedder and the language model. Reads go straight to the index.
//! Mutations go through a [`Writer`] obtained from
//! [`Retriever::begin_write`]: one writer exists at a time, so a full
//! reindex cannot race an upload or a delete. Callers that touch other
//! state alongside the index (such as the file on disk) do so while
//! holding the writer.
//!
//! Embeddings are computed before the index write lock is taken, and
//! chunks whose content hash is already indexed reuse the stored vector.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::chunk::{clean_text, Chunker};
use crate::embedding::{check_dims, check_finite, Embedder};
use crate::error::{Error, Result};
use crate::index::{DocumentIndex, NewDocument};
use crate::models::{DocumentInfo, DocumentMeta, SearchHit, SearchMode, TextChunk};
use crate::prompt::{build_prompt, EMPTY_ANSWER_FALLBACK, NO_CONTEXT_ANSWER};

/// Default number of texts per embedding call.
pub const DEFAULT_EMBED_BATCH: usize = 32;

/// Text generation backend used to answer questions.
///
/// Failures (`Timeout`, `DependencyUnavailable`) are surfaced to the caller
/// unchanged; the retriever never retries.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Extracted text of one stored document, ready for chunking.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub text: String,
    pub info: DocumentInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub top_k: usize,
    pub offset: usize,
}

/// One page of ranked hits.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Ranked hits available in the fetched window `offset + top_k`.
    pub total_matches: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub context: Vec<SearchHit>,
    /// `false` when no context was found and the model was not called.
    pub grounded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub documents_processed: usize,
    pub chunks_created: usize,
    /// Stored files that could not be turned into text.
    pub skipped: Vec<String>,
}

pub struct Retriever {
    index: DocumentIndex,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    chunker: Chunker,
    batch_size: usize,
    writer: Mutex<()>,
}

impl Retriever {
    /// Create a retriever with an empty index sized to the embedder.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        chunker: Chunker,
    ) -> Result<Self> {
        let index = DocumentIndex::new(embedder.dims())?;
        Ok(Self {
            index,
            embedder,
            llm,
            chunker,
            batch_size: DEFAULT_EMBED_BATCH,
            writer: Mutex::new(()),
        })
    }

    /// Set the number of texts sent per embedding call. Must be > 0.
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::validation("embedding batch size must be > 0"));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn index(&self) -> &DocumentIndex {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Wait for exclusive write access.
    pub async fn begin_write(&self) -> Writer<'_> {
        Writer {
            retriever: self,
            _guard: self.writer.lock().await,
        }
    }

    /// Index a single document, replacing any previous version.
    pub async fn ingest(&self, doc: SourceDocument) -> Result<DocumentMeta> {
        self.begin_write().await.ingest(doc).await
    }

    pub async fn remove(&self, filename: &str) -> Result<usize> {
        self.begin_write().await.remove(filename)
    }

    pub async fn reindex(&self, docs: Vec<SourceDocument>) -> Result<ReindexReport> {
        self.begin_write().await.reindex(docs).await
    }

    /// Clean, chunk and embed a document without touching the index.
    pub async fn prepare(&self, doc: SourceDocument) -> Result<NewDocument> {
        let text = clean_text(&doc.text);
        let chunks = self.chunker.chunk(&text);
        let embeddings = self.embed_chunks(&chunks).await?;
        Ok(NewDocument {
            filename: doc.filename,
            info: doc.info,
            character_count: text.chars().count(),
            chunks,
            embeddings,
        })
    }

    /// One vector per chunk, reusing stored vectors for known content.
    async fn embed_chunks(&self, chunks: &[TextChunk]) -> Result<Vec<Vec<f32>>> {
        let hashes: Vec<&str> = chunks.iter().map(|c| c.content_hash.as_str()).collect();
        let mut slots = self.index.cached_embeddings(&hashes);

        let missing: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect();
        debug!(
            chunks = chunks.len(),
            reused = chunks.len() - missing.len(),
            "embedding chunks"
        );

        for batch in missing.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(Error::internal(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            for (&i, vector) in batch.iter().zip(vectors) {
                check_dims(&vector, self.index.dimension())?;
                check_finite(&vector)?;
                slots[i] = Some(vector);
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| Error::internal("chunk left without an embedding")))
            .collect()
    }

    /// Rank chunks for `request` and return the requested page.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        if request.top_k == 0 {
            return Err(Error::validation("top_k must be >= 1"));
        }
        if self.index.is_empty() {
            return Ok(SearchPage {
                hits: Vec::new(),
                total_matches: 0,
            });
        }

        let window = request.offset.saturating_add(request.top_k);
        let ranked = match request.mode {
            SearchMode::Keyword => self.index.search_keyword(query, window)?,
            SearchMode::Semantic => {
                let vector = self.embedder.embed(query).await?;
                self.index.search_semantic(&vector, window)?
            }
        };

        let total_matches = ranked.len();
        let hits: Vec<SearchHit> = ranked.into_iter().skip(request.offset).collect();
        debug!(
            mode = %request.mode,
            query,
            total_matches,
            returned = hits.len(),
            "search completed"
        );
        Ok(SearchPage {
            hits,
            total_matches,
        })
    }

    /// Answer `question` from the `top_k` most similar chunks.
    ///
    /// `top_k` larger than the corpus is clamped. With nothing indexed the
    /// fixed no-context answer is returned and the model is not called.
    pub async fn answer(&self, question: &str, top_k: usize) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::validation("question must not be empty"));
        }
        if top_k == 0 {
            return Err(Error::validation("top_k must be >= 1"));
        }

        let corpus = self.index.chunk_count();
        if corpus == 0 {
            info!(question, "no indexed content; answering without the model");
            return Ok(ungrounded(question));
        }

        let vector = self.embedder.embed(question).await?;
        let hits = self.index.search_semantic(&vector, top_k.min(corpus))?;
        if hits.is_empty() {
            return Ok(ungrounded(question));
        }

        let prompt = build_prompt(question, &hits);
        debug!(
            model = self.llm.model_name(),
            context_chunks = hits.len(),
            prompt_chars = prompt.len(),
            "calling language model"
        );
        let generated = self.llm.generate(&prompt).await?;
        let answer = match generated.trim() {
            "" => {
                warn!(question, "language model returned an empty response");
                EMPTY_ANSWER_FALLBACK.to_string()
            }
            text => text.to_string(),
        };

        Ok(Answer {
            question: question.to_string(),
            answer,
            context: hits,
            grounded: true,
        })
    }
}

fn ungrounded(question: &str) -> Answer {
    Answer {
        question: question.to_string(),
        answer: NO_CONTEXT_ANSWER.to_string(),
        context: Vec::new(),
        grounded: false,
    }
}

/// Exclusive write access to a [`Retriever`]'s index.
///
/// Dropping the writer releases it.
pub struct Writer<'a> {
    retriever: &'a Retriever,
    _guard: MutexGuard<'a, ()>,
}

impl Writer<'_> {
    /// Chunk, embed and index `doc`. On error the index is unchanged.
    pub async fn ingest(&self, doc: SourceDocument) -> Result<DocumentMeta> {
        let prepared = self.retriever.prepare(doc).await?;
        let NewDocument {
            filename,
            info,
            character_count,
            chunks,
            embeddings,
        } = prepared;
        let meta = self.retriever.index.add_document(
            &filename,
            chunks,
            embeddings,
            info,
            character_count,
        )?;
        info!(
            filename = %meta.filename,
            chunks = meta.chunks_count,
            "document ingested"
        );
        Ok(meta)
    }

    pub fn remove(&self, filename: &str) -> Result<usize> {
        let removed = self.retriever.index.remove_document(filename)?;
        info!(filename, chunks = removed, "document removed");
        Ok(removed)
    }

    /// Rebuild the whole index from `docs`.
    ///
    /// Every document is prepared first; if any embedding fails the old
    /// index stays in place. The swap itself is a single write.
    pub async fn reindex(&self, docs: Vec<SourceDocument>) -> Result<ReindexReport> {
        let mut prepared = Vec::with_capacity(docs.len());
        for doc in docs {
            prepared.push(self.retriever.prepare(doc).await?);
        }
        let (documents_processed, chunks_created) = self.retriever.index.replace_all(prepared)?;
        info!(documents_processed, chunks_created, "index rebuilt");
        Ok(ReindexReport {
            documents_processed,
            chunks_created,
            skipped: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::OversizePolicy;
    use crate::embedding::HashingEmbedder;
    use crate::models::FileType;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const DIMS: usize = 128;

    /// Hashing embedder that counts embedded texts and can be made to fail.
    struct CountingEmbedder {
        inner: HashingEmbedder,
        embedded: AtomicUsize,
        fail: AtomicBool,
        non_finite: AtomicBool,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                inner: HashingEmbedder::new(DIMS).unwrap(),
                embedded: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                non_finite: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dims(&self) -> usize {
            DIMS
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::unavailable("embedding model offline"));
            }
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            let mut vectors = self.inner.embed_batch(texts).await?;
            if self.non_finite.load(Ordering::SeqCst) {
                for v in &mut vectors {
                    v[0] = f32::INFINITY;
                }
            }
            Ok(vectors)
        }
    }

    struct StubLlm {
        calls: AtomicUsize,
        reply: std::result::Result<String, Error>,
    }

    impl StubLlm {
        fn replying(reply: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reply: Ok(reply.to_string()),
            }
        }

        fn failing(err: Error) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                reply: Err(err),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            assert!(prompt.contains("[Source: "));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn doc(filename: &str, text: &str) -> SourceDocument {
        SourceDocument {
            filename: filename.to_string(),
            text: text.to_string(),
            info: DocumentInfo {
                file_size: text.len() as u64,
                file_type: FileType::Txt,
                upload_date: Utc::now(),
            },
        }
    }

    fn retriever_with(
        chunk_size: usize,
        llm: Arc<StubLlm>,
    ) -> (Retriever, Arc<CountingEmbedder>) {
        let embedder = Arc::new(CountingEmbedder::new());
        let retriever = Retriever::new(
            embedder.clone(),
            llm,
            Chunker::new(chunk_size, OversizePolicy::Keep).unwrap(),
        )
        .unwrap();
        (retriever, embedder)
    }

    fn keyword(query: &str, top_k: usize, offset: usize) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            mode: SearchMode::Keyword,
            top_k,
            offset,
        }
    }

    #[tokio::test]
    async fn ingest_then_keyword_search() {
        let llm = Arc::new(StubLlm::replying("ok"));
        let (r, _) = retriever_with(2, llm);
        let meta = r
            .ingest(doc("greek.txt", "Alpha  beta\n gamma. Delta epsilon."))
            .await
            .unwrap();
        assert_eq!(meta.chunks_count, 2);
        assert_eq!(meta.character_count, "Alpha beta gamma. Delta epsilon.".len());

        let page = r.search(&keyword("gamma", 5, 0)).await.unwrap();
        assert_eq!(page.total_matches, 1);
        assert_eq!(page.hits[0].chunk.text, "Alpha beta gamma.");
    }

    #[tokio::test]
    async fn search_on_empty_index_is_empty() {
        let (r, embedder) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        for mode in [SearchMode::Keyword, SearchMode::Semantic] {
            let page = r
                .search(&SearchRequest {
                    query: "anything".into(),
                    mode,
                    top_k: 5,
                    offset: 0,
                })
                .await
                .unwrap();
            assert!(page.hits.is_empty());
        }
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_query_and_zero_top_k_rejected() {
        let (r, _) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        assert!(matches!(
            r.search(&keyword("  ", 5, 0)).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            r.search(&keyword("x", 0, 0)).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn pagination_skips_offset() {
        let (r, _) = retriever_with(100, Arc::new(StubLlm::replying("x")));
        for i in 0..5 {
            r.ingest(doc(&format!("{}.txt", i), &"term ".repeat(i + 1)))
                .await
                .unwrap();
        }
        let first = r.search(&keyword("term", 2, 0)).await.unwrap();
        let second = r.search(&keyword("term", 2, 2)).await.unwrap();
        assert_eq!(first.hits.len(), 2);
        assert_eq!(second.hits.len(), 2);
        assert_eq!(first.hits[0].chunk.filename, "4.txt");
        assert_eq!(second.hits[0].chunk.filename, "2.txt");
        assert_eq!(second.total_matches, 4);

        let past_end = r.search(&keyword("term", 5, 10)).await.unwrap();
        assert!(past_end.hits.is_empty());
        assert_eq!(past_end.total_matches, 5);
    }

    #[tokio::test]
    async fn semantic_search_prefers_matching_document() {
        let (r, _) = retriever_with(100, Arc::new(StubLlm::replying("x")));
        r.ingest(doc("rust.txt", "Cargo builds Rust crates and manages dependencies."))
            .await
            .unwrap();
        r.ingest(doc("cook.txt", "Simmer the onions slowly in butter."))
            .await
            .unwrap();
        let page = r
            .search(&SearchRequest {
                query: "rust crates cargo".into(),
                mode: SearchMode::Semantic,
                top_k: 2,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.hits[0].chunk.filename, "rust.txt");
        assert!(page.hits[0].score >= page.hits[1].score);
    }

    #[tokio::test]
    async fn unchanged_chunks_are_not_re_embedded() {
        let (r, embedder) = retriever_with(3, Arc::new(StubLlm::replying("x")));
        r.ingest(doc("a.txt", "One two three. Four five six."))
            .await
            .unwrap();
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 2);

        // Same text again plus one new sentence: only the new chunk is embedded.
        r.ingest(doc("a.txt", "One two three. Four five six. Seven."))
            .await
            .unwrap();
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 3);

        let report = r
            .reindex(vec![doc("a.txt", "One two three. Four five six. Seven.")])
            .await
            .unwrap();
        assert_eq!(report.chunks_created, 3);
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_embedding_leaves_index_unchanged() {
        let (r, embedder) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        r.ingest(doc("a.txt", "Original content here."))
            .await
            .unwrap();
        let before = r.index().get_chunks("a.txt").unwrap();

        embedder.fail.store(true, Ordering::SeqCst);
        let err = r
            .ingest(doc("a.txt", "Completely different replacement."))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DependencyUnavailable(_)));
        assert_eq!(r.index().get_chunks("a.txt").unwrap(), before);

        let err = r
            .reindex(vec![doc("b.txt", "Fresh words entirely.")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DependencyUnavailable(_)));
        assert!(r.index().document("a.txt").is_ok());
        assert!(r.index().document("b.txt").is_err());
    }

    #[tokio::test]
    async fn non_finite_embeddings_are_rejected() {
        let (r, embedder) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        r.ingest(doc("a.txt", "Original content here."))
            .await
            .unwrap();

        embedder.non_finite.store(true, Ordering::SeqCst);
        let err = r
            .ingest(doc("b.txt", "Something never seen before."))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(r.index().document("b.txt").is_err());
        assert_eq!(r.index().stats().total_documents, 1);

        let err = r
            .search(&SearchRequest {
                query: "original".into(),
                mode: SearchMode::Semantic,
                top_k: 5,
                offset: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn zero_chunk_document_is_recorded() {
        let (r, _) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        let meta = r.ingest(doc("blank.txt", " \n\t ")).await.unwrap();
        assert_eq!(meta.chunks_count, 0);
        assert_eq!(r.index().stats().total_documents, 1);
        assert_eq!(r.index().stats().total_chunks, 0);
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() {
        let (r, _) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        assert!(matches!(
            r.remove("ghost.txt").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reindex_assigns_fresh_ids() {
        let (r, _) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        r.ingest(doc("a.txt", "Alpha.")).await.unwrap();
        let old = r.index().get_chunks("a.txt").unwrap()[0].chunk_id;

        let report = r
            .reindex(vec![doc("a.txt", "Alpha."), doc("b.txt", "Beta.")])
            .await
            .unwrap();
        assert_eq!(report.documents_processed, 2);
        assert_eq!(report.chunks_created, 2);
        let new = r.index().get_chunks("a.txt").unwrap()[0].chunk_id;
        assert!(new > old);
    }

    #[tokio::test]
    async fn answer_on_empty_index_skips_model() {
        let llm = Arc::new(StubLlm::replying("should not be used"));
        let (r, _) = retriever_with(10, llm.clone());
        let answer = r.answer("What is gamma?", 3).await.unwrap();
        assert!(!answer.grounded);
        assert!(answer.context.is_empty());
        assert_eq!(answer.answer, NO_CONTEXT_ANSWER);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answer_clamps_top_k_and_calls_model_once() {
        let llm = Arc::new(StubLlm::replying("  Gamma is the third letter.  "));
        let (r, _) = retriever_with(2, llm.clone());
        r.ingest(doc("greek.txt", "Alpha beta gamma. Delta epsilon."))
            .await
            .unwrap();
        let answer = r.answer("gamma?", 50).await.unwrap();
        assert!(answer.grounded);
        assert_eq!(answer.context.len(), 2);
        assert_eq!(answer.answer, "Gamma is the third letter.");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_model_reply_becomes_fallback() {
        let llm = Arc::new(StubLlm::replying("   "));
        let (r, _) = retriever_with(10, llm);
        r.ingest(doc("a.txt", "Some text.")).await.unwrap();
        let answer = r.answer("text?", 1).await.unwrap();
        assert_eq!(answer.answer, EMPTY_ANSWER_FALLBACK);
        assert!(answer.grounded);
    }

    #[tokio::test]
    async fn model_failure_is_surfaced() {
        let llm = Arc::new(StubLlm::failing(Error::Timeout("llm took too long".into())));
        let (r, _) = retriever_with(10, llm.clone());
        r.ingest(doc("a.txt", "Some text.")).await.unwrap();
        assert!(matches!(
            r.answer("text?", 1).await,
            Err(Error::Timeout(_))
        ));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_size_zero_rejected() {
        let (r, _) = retriever_with(10, Arc::new(StubLlm::replying("x")));
        assert!(r.with_batch_size(0).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ingest_and_search() {
        let (r, _) = retriever_with(3, Arc::new(StubLlm::replying("x")));
        let r = Arc::new(r);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let r = r.clone();
            tasks.push(tokio::spawn(async move {
                r.ingest(doc(
                    &format!("doc{}.txt", i),
                    "Shared words here. More shared words. Final shared sentence.",
                ))
                .await
                .unwrap();
            }));
        }
        for _ in 0..8 {
            let r = r.clone();
            tasks.push(tokio::spawn(async move {
                let page = r.search(&keyword("shared", 20, 0)).await.unwrap();
                for hit in &page.hits {
                    assert!(hit.score > 0.0);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stats = r.index().stats();
        assert_eq!(stats.total_documents, 8);
        assert_eq!(stats.total_chunks, 24);
    }
}
