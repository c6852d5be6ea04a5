//! On-disk store of uploaded documents.
//!
//! Files live flat in `[library].docs_dir` under their sanitised names. The
//! directory is the source of truth for a reindex: the in-memory index can
//! always be rebuilt from what is stored here.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use refchat_core::models::{DocumentInfo, FileType};
use refchat_core::{Error, Result};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::LibraryConfig;

/// Maximum filename length in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// A file as stored in the library.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub filename: String,
    pub info: DocumentInfo,
}

/// Outcome of [`Library::save`].
#[derive(Debug, Clone, PartialEq)]
pub struct SavedFile {
    pub filename: String,
    pub file_type: FileType,
    pub file_size: u64,
    /// Whether a file of the same name was overwritten.
    pub replaced: bool,
}

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    max_bytes: u64,
    allowed: Vec<FileType>,
}

impl Library {
    /// Open the library, creating `docs_dir` if needed.
    pub fn open(config: &LibraryConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.docs_dir).map_err(|e| {
            Error::internal(format!(
                "failed to create docs dir {}: {}",
                config.docs_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            root: config.docs_dir.clone(),
            max_bytes: config.max_file_size_bytes(),
            allowed: config.allowed_types(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate the type of `filename` against the allowed list.
    pub fn file_type(&self, filename: &str) -> Result<FileType> {
        FileType::from_filename(filename)
            .filter(|t| self.allowed.contains(t))
            .ok_or_else(|| {
                let allowed: Vec<&str> = self.allowed.iter().map(|t| t.extension()).collect();
                Error::UnsupportedType(format!(
                    "{}: only {} files are supported",
                    filename,
                    allowed.join(", ")
                ))
            })
    }

    /// Store `bytes` under the sanitised form of `filename`.
    pub fn save(&self, filename: &str, bytes: &[u8]) -> Result<SavedFile> {
        let filename = sanitize_filename(filename)?;
        let file_type = self.file_type(&filename)?;
        if bytes.is_empty() {
            return Err(Error::validation(format!("{}: file is empty", filename)));
        }
        if bytes.len() as u64 > self.max_bytes {
            return Err(Error::validation(format!(
                "{}: file size {} bytes exceeds the limit of {} MB",
                filename,
                bytes.len(),
                self.max_bytes / (1024 * 1024)
            )));
        }

        let path = self.root.join(&filename);
        let replaced = path.is_file();
        std::fs::write(&path, bytes)
            .map_err(|e| Error::internal(format!("failed to write {}: {}", path.display(), e)))?;
        debug!(filename = %filename, bytes = bytes.len(), replaced, "file stored");

        Ok(SavedFile {
            filename,
            file_type,
            file_size: bytes.len() as u64,
            replaced,
        })
    }

    /// Stored files of an allowed type, sorted by filename.
    pub fn list(&self) -> Result<Vec<StoredFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::internal(format!("failed to scan library: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().to_string();
            if self.file_type(&filename).is_err() {
                continue;
            }
            files.push(StoredFile {
                info: self.stat(&filename)?,
                filename,
            });
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.existing(filename)?;
        std::fs::read(&path)
            .map_err(|e| Error::internal(format!("failed to read {}: {}", path.display(), e)))
    }

    /// Size, type and modification time of a stored file.
    pub fn stat(&self, filename: &str) -> Result<DocumentInfo> {
        let path = self.existing(filename)?;
        let metadata = std::fs::metadata(&path)?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Ok(DocumentInfo {
            file_size: metadata.len(),
            file_type: self.file_type(filename)?,
            upload_date: DateTime::<Utc>::from(modified),
        })
    }

    pub fn delete(&self, filename: &str) -> Result<()> {
        let path = self.existing(filename)?;
        std::fs::remove_file(&path)
            .map_err(|e| Error::internal(format!("failed to delete {}: {}", path.display(), e)))?;
        debug!(filename, "file deleted");
        Ok(())
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.existing(filename).is_ok()
    }

    /// Path of a stored file. Names that could escape the library are
    /// reported as not found.
    fn existing(&self, filename: &str) -> Result<PathBuf> {
        let not_found = || Error::not_found(format!("document not found: {}", filename));
        if filename.is_empty()
            || filename.starts_with('.')
            || filename.contains(['/', '\\'])
        {
            return Err(not_found());
        }
        let path = self.root.join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        }
    }
}

/// Make an uploaded filename safe to store.
///
/// Path separators and characters reserved on common filesystems become
/// `_`, control characters are dropped, leading dots and surrounding
/// whitespace are stripped, and the stem is shortened so the whole name
/// fits in [`MAX_FILENAME_BYTES`].
pub fn sanitize_filename(filename: &str) -> Result<String> {
    let replaced: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let cleaned = replaced.trim().trim_start_matches('.').trim_start();
    if cleaned.is_empty() {
        return Err(Error::validation("filename must not be empty"));
    }
    if cleaned.len() <= MAX_FILENAME_BYTES {
        return Ok(cleaned.to_string());
    }

    let (stem, ext) = match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() < 16 => (stem, format!(".{}", ext)),
        _ => (cleaned, String::new()),
    };
    let budget = MAX_FILENAME_BYTES - ext.len();
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    Ok(format!("{}{}", &stem[..cut], ext))
}
