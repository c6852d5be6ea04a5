//! In-memory chunk index with keyword and semantic lookup.
//!
//! A single [`DocumentIndex`] is shared by every request handler. All maps
//! live in one [`IndexState`] behind a `parking_lot::RwLock`: mutations take
//! the write lock around the whole multi-map update, so a reader observes
//! either the state before a write or the state after it, never a mix.
//!
//! Callers compute embeddings *before* calling [`DocumentIndex::add_document`]
//! or [`DocumentIndex::replace_all`]; the lock is held only for the map
//! update itself.
//!
//! Both search paths are linear scans over the current chunk set.
//!
//! # Invariants
//!
//! - Every chunk id in `embeddings` is in `chunks` and vice versa.
//! - The chunk ids of one document are listed in `doc_chunks` in
//!   `chunk_index` order, and those indices are exactly `0..N`.
//! - `filenames`, `documents` and `doc_chunks` describe the same set of
//!   documents.
//! - Chunk and doc ids only ever increase; a replaced or rebuilt document
//!   receives fresh ids.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::debug;

use crate::embedding::{check_dims, check_finite, cosine_similarity};
use crate::error::{Error, Result};
use crate::keyword;
use crate::models::{
    Chunk, ChunkId, DocId, DocumentInfo, DocumentMeta, IndexStats, SearchHit, TextChunk,
};

/// A fully prepared document: chunks plus one embedding per chunk.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub info: DocumentInfo,
    /// Character count of the cleaned document text.
    pub character_count: usize,
    pub chunks: Vec<TextChunk>,
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Default)]
struct IndexState {
    chunks: BTreeMap<ChunkId, Chunk>,
    embeddings: HashMap<ChunkId, Vec<f32>>,
    doc_chunks: HashMap<DocId, Vec<ChunkId>>,
    filenames: HashMap<String, DocId>,
    documents: BTreeMap<String, DocumentMeta>,
    /// content hash → chunks whose text has that hash.
    by_hash: HashMap<String, Vec<ChunkId>>,
    next_chunk_id: ChunkId,
    next_doc_id: DocId,
}

impl IndexState {
    fn insert(&mut self, doc: NewDocument) -> DocumentMeta {
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;

        let mut ids = Vec::with_capacity(doc.chunks.len());
        for (text_chunk, vector) in doc.chunks.into_iter().zip(doc.embeddings) {
            let chunk_id = self.next_chunk_id;
            self.next_chunk_id += 1;

            self.by_hash
                .entry(text_chunk.content_hash.clone())
                .or_default()
                .push(chunk_id);
            self.chunks.insert(
                chunk_id,
                Chunk {
                    chunk_id,
                    doc_id,
                    filename: doc.filename.clone(),
                    chunk_index: text_chunk.chunk_index,
                    text: text_chunk.text,
                    word_count: text_chunk.word_count,
                    character_count: text_chunk.character_count,
                    content_hash: text_chunk.content_hash,
                },
            );
            self.embeddings.insert(chunk_id, vector);
            ids.push(chunk_id);
        }

        let meta = DocumentMeta {
            doc_id,
            filename: doc.filename.clone(),
            file_size: doc.info.file_size,
            file_type: doc.info.file_type,
            upload_date: doc.info.upload_date,
            chunks_count: ids.len(),
            character_count: doc.character_count,
        };
        self.doc_chunks.insert(doc_id, ids);
        self.filenames.insert(doc.filename.clone(), doc_id);
        self.documents.insert(doc.filename, meta.clone());
        meta
    }

    /// Remove a document from every map. Returns the removed chunk count.
    fn remove(&mut self, filename: &str) -> Option<usize> {
        let doc_id = self.filenames.remove(filename)?;
        self.documents.remove(filename);
        let ids = self.doc_chunks.remove(&doc_id).unwrap_or_default();
        for id in &ids {
            self.embeddings.remove(id);
            if let Some(chunk) = self.chunks.remove(id) {
                if let Some(refs) = self.by_hash.get_mut(&chunk.content_hash) {
                    refs.retain(|r| r != id);
                    if refs.is_empty() {
                        self.by_hash.remove(&chunk.content_hash);
                    }
                }
            }
        }
        Some(ids.len())
    }
}

/// Thread-safe in-memory index of chunks and their embeddings.
#[derive(Debug)]
pub struct DocumentIndex {
    dimension: usize,
    state: RwLock<IndexState>,
}

impl DocumentIndex {
    /// Create an empty index whose embeddings all have `dimension` components.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::validation("index dimension must be > 0"));
        }
        Ok(Self {
            dimension,
            state: RwLock::new(IndexState::default()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Add or replace the document stored under `filename`.
    ///
    /// Any previous chunks for `filename` are removed and the new chunks get
    /// fresh ids, all under one write lock. Input is validated before the
    /// lock is taken, so a rejected call leaves the index untouched.
    pub fn add_document(
        &self,
        filename: &str,
        chunks: Vec<TextChunk>,
        embeddings: Vec<Vec<f32>>,
        info: DocumentInfo,
        character_count: usize,
    ) -> Result<DocumentMeta> {
        let doc = NewDocument {
            filename: filename.to_string(),
            info,
            character_count,
            chunks,
            embeddings,
        };
        self.validate(&doc)?;

        let mut state = self.state.write();
        let replaced = state.remove(filename);
        let meta = state.insert(doc);
        debug!(
            filename,
            doc_id = meta.doc_id,
            chunks = meta.chunks_count,
            replaced_chunks = replaced.unwrap_or(0),
            "document indexed"
        );
        Ok(meta)
    }

    /// Remove every chunk, embedding and metadata entry for `filename`.
    pub fn remove_document(&self, filename: &str) -> Result<usize> {
        let removed = self
            .state
            .write()
            .remove(filename)
            .ok_or_else(|| Error::not_found(format!("document not found: {}", filename)))?;
        debug!(filename, removed, "document removed from index");
        Ok(removed)
    }

    /// Discard the whole index and rebuild it from `docs`.
    ///
    /// All documents are validated first; the swap then happens under a
    /// single write lock, so concurrent searches see either the old index
    /// or the new one. Ids keep counting up from where the old index left
    /// off. Returns `(documents, chunks)` in the new index.
    pub fn replace_all(&self, docs: Vec<NewDocument>) -> Result<(usize, usize)> {
        for doc in &docs {
            self.validate(doc)?;
        }

        let mut state = self.state.write();
        let mut fresh = IndexState {
            next_chunk_id: state.next_chunk_id,
            next_doc_id: state.next_doc_id,
            ..IndexState::default()
        };
        for doc in docs {
            // A filename appearing twice keeps its last version.
            fresh.remove(&doc.filename);
            fresh.insert(doc);
        }
        let counts = (fresh.documents.len(), fresh.chunks.len());
        *state = fresh;
        Ok(counts)
    }

    /// Rank chunks by keyword score (see [`keyword`] for the rule).
    ///
    /// Returns at most `top_k` hits, all with score > 0, sorted by
    /// descending score with ties broken by ascending chunk id.
    pub fn search_keyword(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        check_top_k(top_k)?;

        let terms = keyword::query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.read();
        let mut hits: Vec<SearchHit> = state
            .chunks
            .values()
            .filter_map(|chunk| {
                let s = keyword::score(&terms, &chunk.text);
                (s > 0).then(|| SearchHit {
                    chunk: chunk.clone(),
                    score: s as f64,
                })
            })
            .collect();
        drop(state);

        rank(&mut hits, top_k);
        Ok(hits)
    }

    /// Rank chunks by cosine similarity to `query_vector`.
    ///
    /// Returns at most `top_k` hits sorted by descending similarity with
    /// ties broken by ascending chunk id.
    pub fn search_semantic(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        check_dims(query_vector, self.dimension)?;
        check_finite(query_vector)?;
        check_top_k(top_k)?;

        let state = self.state.read();
        let mut hits: Vec<SearchHit> = state
            .chunks
            .values()
            .map(|chunk| {
                let sim = state
                    .embeddings
                    .get(&chunk.chunk_id)
                    .map(|v| cosine_similarity(query_vector, v))
                    .unwrap_or(0.0);
                SearchHit {
                    chunk: chunk.clone(),
                    score: sim as f64,
                }
            })
            .collect();
        drop(state);

        rank(&mut hits, top_k);
        Ok(hits)
    }

    /// Metadata for every indexed document, ordered by filename.
    pub fn list_documents(&self) -> Vec<DocumentMeta> {
        self.state.read().documents.values().cloned().collect()
    }

    pub fn document(&self, filename: &str) -> Result<DocumentMeta> {
        self.state
            .read()
            .documents
            .get(filename)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("document not found: {}", filename)))
    }

    /// Chunks of `filename` in `chunk_index` order.
    pub fn get_chunks(&self, filename: &str) -> Result<Vec<Chunk>> {
        let state = self.state.read();
        let doc_id = state
            .filenames
            .get(filename)
            .ok_or_else(|| Error::not_found(format!("document not found: {}", filename)))?;
        Ok(state
            .doc_chunks
            .get(doc_id)
            .map(|ids| ids.iter().filter_map(|id| state.chunks.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    pub fn chunk(&self, chunk_id: ChunkId) -> Option<Chunk> {
        self.state.read().chunks.get(&chunk_id).cloned()
    }

    /// Look up stored embeddings by chunk content hash, one slot per hash.
    pub fn cached_embeddings(&self, hashes: &[&str]) -> Vec<Option<Vec<f32>>> {
        let state = self.state.read();
        hashes
            .iter()
            .map(|h| {
                state
                    .by_hash
                    .get(*h)
                    .and_then(|ids| ids.first())
                    .and_then(|id| state.embeddings.get(id))
                    .cloned()
            })
            .collect()
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            total_documents: state.documents.len(),
            total_chunks: state.chunks.len(),
            index_dimension: self.dimension,
        }
    }

    /// `true` when no document is indexed.
    pub fn is_empty(&self) -> bool {
        self.state.read().documents.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.read().chunks.len()
    }

    fn validate(&self, doc: &NewDocument) -> Result<()> {
        if doc.filename.trim().is_empty() {
            return Err(Error::validation("filename must not be empty"));
        }
        if doc.chunks.len() != doc.embeddings.len() {
            return Err(Error::validation(format!(
                "{}: {} chunks but {} embeddings",
                doc.filename,
                doc.chunks.len(),
                doc.embeddings.len()
            )));
        }
        for (i, chunk) in doc.chunks.iter().enumerate() {
            if chunk.chunk_index != i {
                return Err(Error::validation(format!(
                    "{}: chunk at position {} has chunk_index {}",
                    doc.filename, i, chunk.chunk_index
                )));
            }
            if chunk.text.is_empty() {
                return Err(Error::validation(format!(
                    "{}: chunk {} is empty",
                    doc.filename, i
                )));
            }
        }
        for vector in &doc.embeddings {
            check_dims(vector, self.dimension)?;
            check_finite(vector)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.state.read();
        assert_eq!(state.chunks.len(), state.embeddings.len());
        for id in state.chunks.keys() {
            assert!(state.embeddings.contains_key(id));
        }
        assert_eq!(state.filenames.len(), state.documents.len());
        assert_eq!(state.filenames.len(), state.doc_chunks.len());
        let mut listed = 0;
        for (filename, doc_id) in &state.filenames {
            let ids = &state.doc_chunks[doc_id];
            listed += ids.len();
            for (i, id) in ids.iter().enumerate() {
                let chunk = &state.chunks[id];
                assert_eq!(chunk.chunk_index, i);
                assert_eq!(&chunk.filename, filename);
                assert_eq!(chunk.doc_id, *doc_id);
            }
            assert_eq!(state.documents[filename].chunks_count, ids.len());
        }
        assert_eq!(listed, state.chunks.len());
    }
}

fn check_top_k(top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(Error::validation("top_k must be >= 1"));
    }
    Ok(())
}

/// Sort by score descending, then chunk id ascending, and keep `top_k`.
fn rank(hits: &mut Vec<SearchHit>, top_k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    hits.truncate(top_k);
}
