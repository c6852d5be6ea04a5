//! # refchat core
//!
//! Indexing and retrieval engine for refchat: word-bounded chunking,
//! an in-memory index with keyword and semantic lookup, the embedder and
//! language-model traits, and the retriever that ties them together for
//! ingest, search and grounded question answering.
//!
//! This crate performs no I/O of its own. Text extraction, embedding
//! backends, the language-model client and the HTTP layer live in the
//! `refchat` application crate.
//!
//! ```text
//! text ──▶ Chunker ──▶ Embedder ──▶ DocumentIndex ◀── search_keyword / search_semantic
//!                                        ▲
//!                                   Retriever ──▶ LanguageModel (answer)
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod keyword;
pub mod models;
pub mod prompt;
pub mod retriever;

pub use error::{Error, Result};
