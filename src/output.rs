//! Domain records and the invocation request/report.
//!
//! Only [`SlideRecord`]s outlive an invocation; everything else here
//! ([`PageTask`], [`RenderedAsset`], [`Classification`]) is built and dropped
//! inside one run. That is why continuation is inferred from slides alone.

use crate::error::PageError;
use crate::pipeline::input::DocumentSource;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ── Identifiers ──────────────────────────────────────────────────────────

/// Accepts both `12` and `"12"`: CMS backends disagree on id types.
fn id_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(i64),
        Str(String),
    }
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

/// Identifier of a persisted slide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlideId(#[serde(deserialize_with = "id_from_number_or_string")] pub String);

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlideId {
    fn from(s: &str) -> Self {
        SlideId(s.to_string())
    }
}

/// Reference to an uploaded media object (the rendered page image).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(#[serde(deserialize_with = "id_from_number_or_string")] pub String);

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Per-page artefacts ───────────────────────────────────────────────────

/// One page of work, derived once per invocation. Pages are 1-indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct PageTask {
    pub page_number: usize,
    /// Page width in PDF points.
    pub width: f32,
    /// Page height in PDF points.
    pub height: f32,
    /// Approximate page text from the segmenter; may be empty.
    pub text: String,
}

/// Which link of the render chain produced the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackendKind {
    Primary,
    Fallback,
    Placeholder,
}

/// Output of [`crate::pipeline::render::PageRenderer::render`].
#[derive(Clone, PartialEq)]
pub struct RenderedAsset {
    pub page_number: usize,
    /// PNG bytes; `None` only when image generation is switched off entirely.
    pub image: Option<Vec<u8>>,
    pub backend: RenderBackendKind,
}

impl fmt::Debug for RenderedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedAsset")
            .field("page_number", &self.page_number)
            .field("image", &self.image.as_ref().map(|b| format!("<{} bytes>", b.len())))
            .field("backend", &self.backend)
            .finish()
    }
}

/// Closed set of slide categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Regular,
    Quiz,
    Reference,
    Resources,
    Video,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Regular,
        Category::Quiz,
        Category::Reference,
        Category::Resources,
        Category::Video,
    ];

    /// Map free-form model output onto the closed set. Anything unknown is `Regular`.
    pub fn from_label(label: &str) -> Category {
        let normalised = label
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == ',' || c == '.')
            .to_ascii_lowercase();
        match normalised.as_str() {
            "quiz" => Category::Quiz,
            "reference" | "references" => Category::Reference,
            "resources" | "resource" => Category::Resources,
            "video" => Category::Video,
            _ => Category::Regular,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Regular => "regular",
            Category::Quiz => "quiz",
            Category::Reference => "reference",
            Category::Resources => "resources",
            Category::Video => "video",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Model,
    Heuristic,
}

/// Structured description of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub page_number: usize,
    pub title: String,
    pub summary: String,
    pub category: Category,
    pub links: Vec<String>,
    pub source: ClassificationSource,
}

// ── Persistent records (owned by the content store) ──────────────────────

/// Payload for creating a slide.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSlide {
    pub parent_id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub image: Option<MediaRef>,
    pub links: Vec<String>,
    pub source_page: usize,
    pub source_document_name: String,
}

/// A slide as read back from the store, reduced to what continuation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideRecord {
    pub id: SlideId,
    /// Missing on slides created by hand or by older tooling.
    pub source_page: Option<usize>,
    pub source_document_name: Option<String>,
}

/// The parent aggregate ("module") as far as this pipeline cares.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentModule {
    pub id: String,
    pub slides: Vec<SlideId>,
}

// ── Invocation request / report ──────────────────────────────────────────

/// One conversion invocation.
///
/// Unset optional fields fall back to [`crate::config::PipelineConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub parent_id: String,
    pub document_name: String,
    pub document: DocumentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

impl ConversionRequest {
    pub fn new(
        parent_id: impl Into<String>,
        document_name: impl Into<String>,
        document: DocumentSource,
    ) -> Self {
        Self {
            parent_id: parent_id.into(),
            document_name: document_name.into(),
            document,
            start_page: None,
            max_pages: None,
            timeout_ms: None,
            enable_images: None,
            batch_size: None,
        }
    }

    pub fn start_page(mut self, page: usize) -> Self {
        self.start_page = Some(page);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.max_pages = Some(n);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn enable_images(mut self, v: bool) -> Self {
        self.enable_images = Some(v);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = Some(n);
        self
    }
}

/// Terminal state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionState {
    /// Every page up to the document's page count is covered.
    Done,
    /// Stopped early (budget or page cap); resume at `next_start_page`.
    PartialDone,
    /// Nothing could be attempted.
    Failed,
}

/// One created slide, in page order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideSummary {
    pub page: usize,
    pub slide_id: SlideId,
    pub title: String,
    pub category: Category,
    pub backend: RenderBackendKind,
    pub classified_by: ClassificationSource,
    pub parent_linked: bool,
}

/// Structured result of an invocation. Never a bare error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReport {
    pub success: bool,
    pub state: ConversionState,
    pub slides_created: usize,
    pub slide_ids: Vec<SlideId>,
    pub total_pages: usize,
    pub pages_processed: usize,
    pub partial_success: bool,
    pub start_page: usize,
    pub next_start_page: Option<usize>,
    pub time_elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_errors: Vec<PageError>,
    #[serde(default)]
    pub slides: Vec<SlideSummary>,
}

impl ConversionReport {
    /// Report for an invocation that could not attempt any page.
    pub fn failed(error: impl fmt::Display, start_page: usize, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            state: ConversionState::Failed,
            slides_created: 0,
            slide_ids: Vec::new(),
            total_pages: 0,
            pages_processed: 0,
            partial_success: false,
            start_page,
            next_start_page: None,
            time_elapsed_ms: elapsed_ms,
            errors: vec![error.to_string()],
            warnings: Vec::new(),
            page_errors: Vec::new(),
            slides: Vec::new(),
        }
    }

    /// Page numbers that produced no slide.
    pub fn failed_pages(&self) -> Vec<usize> {
        self.page_errors
            .iter()
            .filter(|e| e.is_fatal_for_page())
            .map(PageError::page)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_closure_on_garbage() {
        assert_eq!(Category::from_label("QUIZ"), Category::Quiz);
        assert_eq!(Category::from_label("\"video\","), Category::Video);
        assert_eq!(Category::from_label("resource"), Category::Resources);
        assert_eq!(Category::from_label("lecture"), Category::Regular);
        assert_eq!(Category::from_label(""), Category::Regular);
        for c in Category::ALL {
            assert_eq!(Category::from_label(c.as_str()), c);
        }
    }

    #[test]
    fn ids_accept_numbers_and_strings() {
        let a: SlideId = serde_json::from_str("42").unwrap();
        let b: SlideId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(a.0, "42");
        assert_eq!(b.0, "abc");
    }

    #[test]
    fn report_serialises_camel_case_and_null_continuation() {
        let mut report = ConversionReport::failed("boom", 1, 12);
        report.state = ConversionState::Done;
        report.success = true;
        report.errors.clear();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["slidesCreated"], 0);
        assert!(json["nextStartPage"].is_null());
        assert_eq!(json["state"], "done");
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn request_parses_minimal_body() {
        let body = r#"{"parentId":"7","documentName":"deck.pdf","document":{"url":"https://x.test/deck.pdf"},"startPage":4}"#;
        let req: ConversionRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.parent_id, "7");
        assert_eq!(req.start_page, Some(4));
        assert!(req.max_pages.is_none());
    }
}
