//! # refchat
//!
//! A local document question-answering service. Upload PDF and text files,
//! search them by keyword or meaning, and ask questions that a local
//! language model answers from the retrieved passages, with citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  Library  │──▶│   Extract    │──▶│  refchat-core    │
//! │ docs_dir/ │   │  PDF / TXT   │   │ chunk+embed+index│
//! └───────────┘   └──────────────┘   └────────┬─────────┘
//!                                             │
//!                       ┌─────────────────────┤
//!                       ▼                     ▼
//!                  ┌──────────┐         ┌──────────┐      ┌────────┐
//!                  │   CLI    │         │   HTTP   │─────▶│ Ollama │
//!                  │(refchat) │         │  (axum)  │      │  LLM   │
//!                  └──────────┘         └──────────┘      └────────┘
//! ```
//!
//! The index lives in memory and is rebuilt from the library on startup.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`library`] | On-disk document store |
//! | [`extract`] | PDF and plain-text extraction |
//! | [`embedding`] | Embedding providers (fastembed, Ollama, hashing) |
//! | [`llm`] | Ollama generation client |
//! | [`ingest`] | Upload, delete and reindex pipeline |
//! | [`state`] | Shared application state |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI commands |

pub mod commands;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod library;
pub mod llm;
pub mod server;
pub mod state;
