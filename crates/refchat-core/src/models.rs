//! Data types that flow through chunking, indexing and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Identifier of a chunk; monotonic and never reused within an index.
pub type ChunkId = u64;

/// Identifier of an indexed document; stable while the document is indexed.
pub type DocId = u64;

/// File types the system accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Txt,
}

impl FileType {
    /// Case-insensitive lookup by extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(FileType::Pdf),
            "txt" => Some(FileType::Txt),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    /// Extension including the leading dot, e.g. `".pdf"`.
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Pdf => ".pdf",
            FileType::Txt => ".txt",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Txt => "text/plain",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A segment produced by the chunker, before the index assigns identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 0-based position within the document.
    pub chunk_index: usize,
    pub text: String,
    pub word_count: usize,
    /// Number of Unicode scalar values in `text`.
    pub character_count: usize,
    /// SHA-256 of `text`, used to reuse embeddings of unchanged chunks.
    pub content_hash: String,
}

/// An indexed chunk. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub doc_id: DocId,
    pub filename: String,
    pub chunk_index: usize,
    pub text: String,
    pub word_count: usize,
    pub character_count: usize,
    #[serde(skip)]
    pub content_hash: String,
}

/// Metadata the caller knows about a document at ingest time.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub file_size: u64,
    pub file_type: FileType,
    pub upload_date: DateTime<Utc>,
}

/// Per-document metadata held by the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMeta {
    pub doc_id: DocId,
    pub filename: String,
    pub file_size: u64,
    pub file_type: FileType,
    pub upload_date: DateTime<Utc>,
    pub chunks_count: usize,
    pub character_count: usize,
}

/// A chunk paired with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f64,
}

/// Aggregate counters reported by [`DocumentIndex::stats`](crate::index::DocumentIndex::stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub index_dimension: usize,
}

/// Retrieval mode for a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Keyword,
    Semantic,
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            other => Err(Error::validation(format!(
                "Unknown search mode: {}. Use keyword or semantic.",
                other
            ))),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Keyword => f.write_str("keyword"),
            SearchMode::Semantic => f.write_str("semantic"),
        }
    }
}
