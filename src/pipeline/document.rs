//! Document metadata and whole-document text extraction.
//!
//! Both are black-box calls as far as the pipeline is concerned, hidden behind
//! [`DocumentInspector`] so tests (and alternative backends) can supply page
//! counts and text without pdfium. [`PdfiumInspector`] is the production
//! implementation.

use crate::error::Pdf2SlidesError;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page count and per-page sizes (PDF points).
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub page_sizes: Vec<(f32, f32)>,
}

impl DocumentInfo {
    /// Size of a 1-indexed page; `(0.0, 0.0)` when unknown.
    pub fn page_size(&self, page_number: usize) -> (f32, f32) {
        page_number
            .checked_sub(1)
            .and_then(|i| self.page_sizes.get(i))
            .copied()
            .unwrap_or((0.0, 0.0))
    }
}

#[async_trait]
pub trait DocumentInspector: Send + Sync {
    /// Open the document and read its page count and page sizes.
    ///
    /// An error here is fatal for the invocation (`DocumentUnreadable`).
    async fn inspect(&self, document: Arc<[u8]>, name: &str) -> Result<DocumentInfo, Pdf2SlidesError>;

    /// Whole-document text, pages separated by form feeds. `None` when
    /// extraction failed; never an error.
    async fn extract_text(&self, document: Arc<[u8]>) -> Option<String>;
}

/// Bind pdfium: `PDFIUM_LIB_PATH` (file or directory), then the working
/// directory, then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, Pdf2SlidesError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if std::path::Path::new(&path).is_file() => Pdfium::bind_to_library(&path),
        Ok(path) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path)),
        Err(_) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| Pdf2SlidesError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// pdfium-backed inspector. Every call runs in `spawn_blocking`.
#[derive(Debug, Clone, Default)]
pub struct PdfiumInspector;

impl PdfiumInspector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentInspector for PdfiumInspector {
    async fn inspect(&self, document: Arc<[u8]>, name: &str) -> Result<DocumentInfo, Pdf2SlidesError> {
        let owned_name = name.to_string();
        tokio::task::spawn_blocking(move || inspect_blocking(&document, &owned_name))
            .await
            .map_err(|e| Pdf2SlidesError::Internal(format!("Inspect task panicked: {}", e)))?
    }

    async fn extract_text(&self, document: Arc<[u8]>) -> Option<String> {
        match tokio::task::spawn_blocking(move || extract_text_blocking(&document)).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                warn!("Text extraction failed, continuing without text: {}", e);
                None
            }
            Err(e) => {
                warn!("Text extraction task panicked: {}", e);
                None
            }
        }
    }
}

fn inspect_blocking(bytes: &[u8], name: &str) -> Result<DocumentInfo, Pdf2SlidesError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| Pdf2SlidesError::DocumentUnreadable {
            name: name.to_string(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let page_sizes: Vec<(f32, f32)> = pages
        .iter()
        .map(|p| (p.width().value, p.height().value))
        .collect();

    if page_sizes.is_empty() {
        return Err(Pdf2SlidesError::DocumentUnreadable {
            name: name.to_string(),
            detail: "document has no pages".into(),
        });
    }

    info!("PDF '{}' loaded: {} pages", name, page_sizes.len());
    Ok(DocumentInfo {
        page_count: page_sizes.len(),
        page_sizes,
    })
}

fn extract_text_blocking(bytes: &[u8]) -> Result<String, Pdf2SlidesError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| Pdf2SlidesError::Internal(format!("{:?}", e)))?;

    let mut texts = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        match page.text() {
            Ok(text) => texts.push(text.all()),
            Err(e) => {
                debug!("No text layer on page {}: {:?}", idx + 1, e);
                texts.push(String::new());
            }
        }
    }
    Ok(texts.join("\x0C"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_lookup_is_one_indexed() {
        let info = DocumentInfo {
            page_count: 2,
            page_sizes: vec![(612.0, 792.0), (792.0, 612.0)],
        };
        assert_eq!(info.page_size(1), (612.0, 792.0));
        assert_eq!(info.page_size(2), (792.0, 612.0));
        assert_eq!(info.page_size(0), (0.0, 0.0));
        assert_eq!(info.page_size(3), (0.0, 0.0));
    }
}
