//! Plain-text extraction for stored documents.
//!
//! The library hands over raw bytes plus the [`FileType`] derived from the
//! filename; this module returns UTF-8 text or an [`ExtractError`]. It never
//! panics on malformed input: a bad file is reported and the caller decides
//! whether to fail the upload or skip the file during a reindex.

use refchat_core::models::FileType;
use refchat_core::Error;

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("text decoding failed: {0}")]
    Decode(String),
}

impl From<ExtractError> for Error {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UnsupportedType(name) => Error::UnsupportedType(name),
            ExtractError::Pdf(msg) | ExtractError::Decode(msg) => Error::ExtractionFailed(msg),
        }
    }
}

/// Extract text from `bytes` of the given type.
pub fn extract_text(bytes: &[u8], file_type: FileType) -> Result<String, ExtractError> {
    match file_type {
        FileType::Pdf => extract_pdf(bytes),
        FileType::Txt => decode_text(bytes),
    }
}

/// Extract text from a file whose type is inferred from `filename`.
pub fn extract_file(bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
    let file_type = FileType::from_filename(filename)
        .ok_or_else(|| ExtractError::UnsupportedType(filename.to_string()))?;
    extract_text(bytes, file_type)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on some malformed inputs; keep that inside this call.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::Pdf("malformed PDF".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// UTF-8 (BOM stripped), falling back to Latin-1.
///
/// Latin-1 maps every byte to a code point, so decoding only fails for
/// input that contains NUL bytes, which is treated as binary.
fn decode_text(bytes: &[u8]) -> Result<String, ExtractError> {
    if bytes.contains(&0) {
        return Err(ExtractError::Decode(
            "file contains NUL bytes and does not look like text".to_string(),
        ));
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string()),
        Err(_) => Ok(bytes.iter().map(|&b| b as char).collect()),
    }
}
