use std::path::{Path, PathBuf};

use sha2::Digest as _;

use crate::backend::TextExtractor;
use crate::chunker;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{path} looks like a binary document; export it as plain text first")]
    BinaryInput { path: String },

    #[error("failed to read source file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract text from {path}: {message}")]
    Extraction { path: String, message: String },
}

pub fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Uploads the PDF at `path` to `extractor` and returns its text.
pub async fn extract_pdf(
    extractor: &dyn TextExtractor,
    path: &Path,
) -> Result<String, IngestError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.pdf");

    let extracted = extractor
        .extract_text(filename, bytes)
        .await
        .map_err(|err| IngestError::Extraction {
            path: path.display().to_string(),
            message: format!("{err:#}"),
        })?;
    tracing::info!(
        filename = %extracted.filename,
        pages = extracted.page_count,
        chars = chunker::char_len(&extracted.text),
        "extracted text from pdf"
    );

    ensure_text(&path.display().to_string(), &extracted.text)?;
    Ok(extracted.text)
}

/// Reads `path` as text, rejecting binary documents before any chunking happens.
pub async fn read_source(path: &Path) -> Result<String, IngestError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    ensure_text(&path.display().to_string(), &text)?;
    Ok(text)
}

pub fn ensure_text(label: &str, text: &str) -> Result<(), IngestError> {
    if chunker::looks_binary(text) {
        return Err(IngestError::BinaryInput {
            path: label.to_owned(),
        });
    }
    Ok(())
}

/// `book_` followed by the first 16 hex chars of the SHA-256 of `text`.
pub fn book_id_for(text: &str) -> String {
    let digest = sha2::Sha256::digest(text.as_bytes());
    let hex = hex::encode(digest);
    format!("book_{}", &hex[..16])
}

pub fn default_title(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.replace(['_', '-'], " ").trim().to_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "Untitled".to_owned())
}
