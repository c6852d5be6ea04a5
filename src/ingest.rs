//! Upload, delete and reindex pipeline.
//!
//! Each operation holds the retriever's writer for its whole duration, so
//! the file on disk and the index entry for it change together:
//!
//! ```text
//! upload:  save file ──▶ extract text ──▶ chunk + embed ──▶ index
//!              ▲                                │ error
//!              └──── restore previous file ◀────┘
//! delete:  remove from index ──▶ remove file
//! reindex: list library ──▶ extract all ──▶ chunk + embed all ──▶ swap index
//! ```
//!
//! Text extraction is CPU-bound and runs on the blocking thread pool.

use chrono::Utc;
use refchat_core::chunk::clean_text;
use refchat_core::models::{DocumentInfo, DocumentMeta, FileType};
use refchat_core::retriever::{ReindexReport, SourceDocument};
use refchat_core::{Error, Result};
use tracing::{info, warn};

use crate::extract::{extract_file, extract_text};
use crate::library::{sanitize_filename, Library};
use crate::state::AppState;

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub filename: String,
    pub file_size: u64,
    pub replaced: bool,
    pub meta: DocumentMeta,
}

/// Store `bytes` as `filename` and index its text.
///
/// On failure the library is put back the way it was: a new file is
/// removed, an overwritten one is restored.
pub async fn upload_document(
    state: &AppState,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<UploadOutcome> {
    let writer = state.retriever.begin_write().await;

    let name = sanitize_filename(filename)?;
    let previous = if state.library.contains(&name) {
        Some(state.library.read(&name)?)
    } else {
        None
    };
    let saved = state.library.save(&name, &bytes)?;

    let file_type = saved.file_type;
    let indexed = async {
        let text = run_blocking(move || extract_text(&bytes, file_type).map_err(Error::from)).await?;
        writer
            .ingest(SourceDocument {
                filename: saved.filename.clone(),
                text,
                info: DocumentInfo {
                    file_size: saved.file_size,
                    file_type,
                    upload_date: Utc::now(),
                },
            })
            .await
    }
    .await;

    match indexed {
        Ok(meta) => {
            info!(
                filename = %saved.filename,
                bytes = saved.file_size,
                chunks = meta.chunks_count,
                replaced = saved.replaced,
                "upload indexed"
            );
            Ok(UploadOutcome {
                filename: saved.filename,
                file_size: saved.file_size,
                replaced: saved.replaced,
                meta,
            })
        }
        Err(err) => {
            warn!(filename = %saved.filename, error = %err, "upload rejected; rolling back file");
            let rollback = match previous {
                Some(old) => std::fs::write(state.library.root().join(&saved.filename), old)
                    .map_err(Error::from),
                None => state.library.delete(&saved.filename),
            };
            if let Err(e) = rollback {
                warn!(filename = %saved.filename, error = %e, "failed to roll back upload");
            }
            Err(err)
        }
    }
}

/// Remove a document from the index and from disk.
///
/// A file that is stored but was never indexed (e.g. skipped during a
/// reindex) is still deleted. Returns the number of chunks removed.
pub async fn delete_document(state: &AppState, filename: &str) -> Result<usize> {
    let writer = state.retriever.begin_write().await;

    // File first: if it cannot be removed the index still matches the disk.
    let had_file = match state.library.delete(filename) {
        Ok(()) => true,
        Err(Error::NotFound(_)) => false,
        Err(e) => return Err(e),
    };
    match writer.remove(filename) {
        Ok(n) => {
            if !had_file {
                warn!(filename, "indexed document had no file on disk");
            }
            Ok(n)
        }
        Err(Error::NotFound(_)) if had_file => Ok(0),
        Err(e) => Err(e),
    }
}

/// Rebuild the index from every file in the library.
///
/// Files whose text cannot be extracted are skipped and reported; any other
/// failure leaves the current index untouched.
pub async fn reindex_library(state: &AppState) -> Result<ReindexReport> {
    let writer = state.retriever.begin_write().await;

    let library = state.library.clone();
    let (docs, skipped) = run_blocking(move || load_documents(&library)).await?;
    let mut report = writer.reindex(docs).await?;
    report.skipped = skipped;
    Ok(report)
}

/// Extracted, whitespace-normalised text of a stored document.
pub async fn document_text(state: &AppState, filename: &str) -> Result<String> {
    let library = state.library.clone();
    let filename = filename.to_string();
    run_blocking(move || {
        let bytes = library.read(&filename)?;
        let text = extract_file(&bytes, &filename)?;
        Ok(clean_text(&text))
    })
    .await
}

/// Raw bytes of a stored file and its type.
pub async fn document_file(state: &AppState, filename: &str) -> Result<(FileType, Vec<u8>)> {
    let library = state.library.clone();
    let filename = filename.to_string();
    run_blocking(move || {
        let bytes = library.read(&filename)?;
        Ok((library.file_type(&filename)?, bytes))
    })
    .await
}

fn load_documents(library: &Library) -> Result<(Vec<SourceDocument>, Vec<String>)> {
    let mut docs = Vec::new();
    let mut skipped = Vec::new();

    for file in library.list()? {
        let text = library
            .read(&file.filename)
            .and_then(|bytes| extract_file(&bytes, &file.filename).map_err(Error::from));
        match text {
            Ok(text) => docs.push(SourceDocument {
                filename: file.filename,
                text,
                info: file.info,
            }),
            Err(e) => {
                warn!(filename = %file.filename, error = %e, "skipping unreadable document");
                skipped.push(file.filename);
            }
        }
    }

    Ok((docs, skipped))
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    async fn state(dir: &TempDir) -> AppState {
        let mut config = Config::default();
        config.library.docs_dir = dir.path().join("docs");
        config.embedding.provider = "hashing".to_string();
        config.embedding.dims = Some(64);
        config.chunking.chunk_size_words = 2;
        AppState::build(&config).await.unwrap()
    }

    #[tokio::test]
    async fn upload_search_delete() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;

        let outcome = upload_document(&state, "notes.txt", b"Gamma rays. Delta wings.".to_vec())
            .await
            .unwrap();
        assert_eq!(outcome.meta.chunks_count, 2);
        assert!(state.library.contains("notes.txt"));
        assert_eq!(
            document_text(&state, "notes.txt").await.unwrap(),
            "Gamma rays. Delta wings."
        );

        assert_eq!(delete_document(&state, "notes.txt").await.unwrap(), 2);
        assert!(!state.library.contains("notes.txt"));
        assert!(matches!(
            delete_document(&state, "notes.txt").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_cleans_index_when_file_already_gone() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;

        upload_document(&state, "gone.txt", b"Vanishing ink. Blank page.".to_vec())
            .await
            .unwrap();
        std::fs::remove_file(dir.path().join("docs").join("gone.txt")).unwrap();

        assert_eq!(delete_document(&state, "gone.txt").await.unwrap(), 2);
        assert!(state.retriever.index().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_unindexed_file() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;

        std::fs::write(dir.path().join("docs").join("stray.txt"), "Stray file.").unwrap();
        assert_eq!(delete_document(&state, "stray.txt").await.unwrap(), 0);
        assert!(!state.library.contains("stray.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_file_delete_keeps_document_indexed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;
        let docs = dir.path().join("docs");

        upload_document(&state, "kept.txt", b"Stubborn file. Stays indexed.".to_vec())
            .await
            .unwrap();
        std::fs::write(docs.join("canary.txt"), "x").unwrap();
        std::fs::set_permissions(&docs, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Permission bits do not bind every user (root); nothing to check then.
        let enforced = std::fs::remove_file(docs.join("canary.txt")).is_err();
        let result = delete_document(&state, "kept.txt").await;
        std::fs::set_permissions(&docs, std::fs::Permissions::from_mode(0o755)).unwrap();
        if !enforced {
            return;
        }

        assert!(matches!(result, Err(Error::Internal(_))));
        assert!(state.library.contains("kept.txt"));
        assert_eq!(state.retriever.index().document("kept.txt").unwrap().chunks_count, 2);
    }

    #[tokio::test]
    async fn failed_extraction_rolls_back_new_file() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;

        let err = upload_document(&state, "broken.pdf", b"not a pdf".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
        assert!(!state.library.contains("broken.pdf"));
        assert!(state.retriever.index().is_empty());
    }

    #[tokio::test]
    async fn failed_replacement_restores_previous_file() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;

        upload_document(&state, "a.txt", b"Original words.".to_vec())
            .await
            .unwrap();
        let err = upload_document(&state, "a.txt", vec![0u8, 1, 2]).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
        assert_eq!(state.library.read("a.txt").unwrap(), b"Original words.");
        assert_eq!(
            state.retriever.index().get_chunks("a.txt").unwrap()[0].text,
            "Original words."
        );
    }

    #[tokio::test]
    async fn startup_reindex_skips_unreadable_files() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("good.txt"), "Readable text here.").unwrap();
        std::fs::write(docs.join("bad.pdf"), "garbage").unwrap();

        let state = state(&dir).await;
        assert_eq!(state.retriever.index().stats().total_documents, 1);

        let report = reindex_library(&state).await.unwrap();
        assert_eq!(report.documents_processed, 1);
        assert_eq!(report.skipped, vec!["bad.pdf".to_string()]);
    }
}
