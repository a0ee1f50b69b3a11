//! Input resolution: turn a request's document reference into PDF bytes.
//!
//! A request can carry the document inline (raw bytes or base64), as a local
//! path, or as an HTTP(S) URL to fetch. Everything downstream works on one
//! shared in-memory buffer; pdfium opens it with `load_pdf_from_byte_slice`,
//! so no temp file is needed. The `%PDF` magic bytes are checked here so a
//! wrong upload fails as `NotAPdf` before any page work starts.

use crate::error::Pdf2SlidesError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Where the document comes from.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
    /// Download from an HTTP/HTTPS URL.
    Url(String),
    /// Read from the local file system.
    Path(PathBuf),
    /// Inline, base64-encoded (JSON request bodies).
    Base64(String),
    /// Inline bytes (library callers).
    #[serde(skip)]
    Bytes(Arc<[u8]>),
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Url(u) => f.debug_tuple("Url").field(u).finish(),
            DocumentSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            DocumentSource::Base64(s) => write!(f, "Base64(<{} chars>)", s.len()),
            DocumentSource::Bytes(b) => write!(f, "Bytes(<{} bytes>)", b.len()),
        }
    }
}

impl DocumentSource {
    /// Interpret a CLI-style argument: URL if it looks like one, else a path.
    pub fn from_arg(input: &str) -> Self {
        if is_url(input) {
            DocumentSource::Url(input.to_string())
        } else {
            DocumentSource::Path(PathBuf::from(input))
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        DocumentSource::Bytes(Arc::from(bytes.into()))
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the source to validated PDF bytes.
pub async fn resolve_document(
    source: &DocumentSource,
    name: &str,
    download_timeout_secs: u64,
) -> Result<Arc<[u8]>, Pdf2SlidesError> {
    let bytes: Arc<[u8]> = match source {
        DocumentSource::Bytes(b) => Arc::clone(b),
        DocumentSource::Base64(s) => {
            let decoded = STANDARD
                .decode(s.trim())
                .map_err(|e| Pdf2SlidesError::InvalidInput {
                    input: format!("base64 document '{name}': {e}"),
                })?;
            Arc::from(decoded)
        }
        DocumentSource::Path(p) => read_local(p).await?,
        DocumentSource::Url(u) => download_url(u, download_timeout_secs).await?,
    };

    check_magic(&bytes, name)?;
    debug!("Resolved document '{}' ({} bytes)", name, bytes.len());
    Ok(bytes)
}

fn check_magic(bytes: &[u8], name: &str) -> Result<(), Pdf2SlidesError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(Pdf2SlidesError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

async fn read_local(path: &PathBuf) -> Result<Arc<[u8]>, Pdf2SlidesError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Arc::from(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Pdf2SlidesError::FileNotFound { path: path.clone() })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(Pdf2SlidesError::PermissionDenied { path: path.clone() })
        }
        Err(e) => Err(Pdf2SlidesError::Internal(format!(
            "reading {}: {e}",
            path.display()
        ))),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Arc<[u8]>, Pdf2SlidesError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2SlidesError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2SlidesError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2SlidesError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2SlidesError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Pdf2SlidesError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(Arc::from(bytes.to_vec()))
}

/// Strip a trailing `.pdf` (any case) for titles and media names.
pub fn document_stem(name: &str) -> &str {
    let len = name.len();
    if len >= 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".pdf") {
        &name[..len - 4]
    } else {
        name
    }
}
