//! Error types for the edgequake-pdf2slides library.
//!
//! Three error types reflect three failure scopes:
//!
//! * [`Pdf2SlidesError`]: **Fatal**: no page can be attempted at all
//!   (document unreadable, parent module missing, bad configuration). The
//!   coordinator turns it into a `Failed` report; helper functions such as
//!   [`crate::pipeline::input::resolve_document`] return it directly.
//!
//! * [`PageError`]: **Page-scoped**: one page could not be written, or its
//!   slide could not be linked to the parent. Collected into the report's
//!   `errors` / `warnings` so the rest of the batch carries on.
//!
//! * [`StoreError`]: returned by the content-management collaborators.
//!   [`StoreError::is_contention`] is the only signal the writer retries on.
//!
//! Renderer and classifier failures never appear here: both components
//! recover locally (fallback chain, heuristic) and only log.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2slides library.
#[derive(Debug, Error)]
pub enum Pdf2SlidesError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("Document '{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    // ── Document errors ───────────────────────────────────────────────────
    /// The PDF could not be opened or has no pages; nothing can be attempted.
    #[error("Document '{name}' is unreadable: {detail}")]
    DocumentUnreadable { name: String, detail: String },

    /// pdfium could not be loaded.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Store errors ──────────────────────────────────────────────────────
    /// The parent module does not exist in the content store.
    #[error("Parent module '{id}' not found")]
    ParentNotFound { id: String },

    /// The content store failed before any page could be processed.
    #[error("Content store error: {0}")]
    Store(#[from] StoreError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// No LLM provider could be configured for classification.
    ///
    /// Not fatal for a conversion: the classifier falls back to the
    /// heuristic. Surfaced to callers that ask for a provider explicitly.
    #[error("LLM provider '{provider}' not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder or request validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// `WriteFailed` means the page produced no slide. The other variants are
/// warnings: the slide exists, something around it did not happen.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Creating the slide record failed; the page is skipped.
    #[error("Page {page}: slide creation failed: {detail}")]
    WriteFailed { page: usize, detail: String },

    /// The image could not be uploaded; the slide was created without one.
    #[error("Page {page}: image upload failed, slide created without image: {detail}")]
    MediaUploadFailed { page: usize, detail: String },

    /// The slide exists but could not be appended to the parent's slide list.
    #[error("Page {page}: slide {slide_id} created but parent update failed after {attempts} attempt(s): {detail}")]
    ParentUpdateFailed {
        page: usize,
        slide_id: String,
        attempts: u32,
        detail: String,
    },
}

impl PageError {
    /// Page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::WriteFailed { page, .. }
            | PageError::MediaUploadFailed { page, .. }
            | PageError::ParentUpdateFailed { page, .. } => *page,
        }
    }

    /// `true` when the page produced no slide at all.
    pub fn is_fatal_for_page(&self) -> bool {
        matches!(self, PageError::WriteFailed { .. })
    }
}

/// Errors surfaced by [`crate::store::ContentStore`] and [`crate::store::MediaStore`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The backend rejected a write because the document was locked or
    /// concurrently modified. Safe to retry.
    #[error("write contention on {resource}: {detail}")]
    Contention { resource: String, detail: String },

    /// The addressed record does not exist.
    #[error("{collection} '{id}' not found")]
    NotFound { collection: String, id: String },

    /// The backend refused the request (validation, permissions).
    #[error("request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// Network or connection failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a body we could not interpret.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Whether the writer should retry this error with backoff.
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention { .. })
    }
}
