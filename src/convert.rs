//! Budgeted, resumable conversion entry points.
//!
//! One call to [`ConversionCoordinator::run`] is one invocation: it converts
//! as many pages as the page cap and the wall-clock budget allow, then
//! returns a [`ConversionReport`] carrying `next_start_page`. The caller
//! resumes by invoking again with that start page, or with no start page at
//! all, in which case it is inferred from the slides already written.
//!
//! ## State machine
//!
//! ```text
//! Init ─► Extracting ─► BatchProcessing ─► Finalizing ─► Done | PartialDone
//!   │
//!   └──────────────► Failed   (document unreadable, parent missing, …)
//! ```
//!
//! `Failed` is only reachable before the first page is attempted. Past that
//! point every failure is page-scoped and ends up in the report.

use crate::config::{ImagePolicy, PipelineConfig};
use crate::error::{PageError, Pdf2SlidesError, StoreError};
use crate::output::{
    Classification, ConversionReport, ConversionRequest, ConversionState, PageTask, RenderBackendKind,
    SlideRecord, SlideSummary,
};
use crate::pipeline::budget::BudgetScheduler;
use crate::pipeline::classify::{ClassifyContext, ContentClassifier};
use crate::pipeline::document::{DocumentInfo, DocumentInspector, PdfiumInspector};
use crate::pipeline::input::{self, DocumentSource};
use crate::pipeline::render::PageRenderer;
use crate::pipeline::segment::{self, Segmented};
use crate::pipeline::writer::{SlideWriter, WriteOutcome, WriteTarget};
use crate::progress::{ConversionPhase, ConversionProgressCallback, ProgressCallback};
use crate::store::{ContentStore, MediaStore};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Orchestrates one invocation: inspect → segment → render/classify/write.
pub struct ConversionCoordinator {
    config: PipelineConfig,
    inspector: Arc<dyn DocumentInspector>,
    renderer: PageRenderer,
    classifier: ContentClassifier,
    content: Arc<dyn ContentStore>,
    writer: SlideWriter,
}

/// Everything `Init` establishes.
struct Prepared {
    document: Arc<[u8]>,
    info: DocumentInfo,
    start_page: usize,
}

/// Per-invocation settings after request overrides.
#[derive(Debug, Clone, Copy)]
struct Effective {
    max_pages: usize,
    batch_size: usize,
    timeout: Duration,
    policy: ImagePolicy,
}

struct PageOutcome {
    page: usize,
    backend: RenderBackendKind,
    classification: Classification,
    result: Result<WriteOutcome, PageError>,
}

impl ConversionCoordinator {
    /// Coordinator with pdfium inspection, the configured render chain and
    /// the configured classifier.
    pub fn new(config: PipelineConfig, content: Arc<dyn ContentStore>, media: Arc<dyn MediaStore>) -> Self {
        let writer = SlideWriter::new(Arc::clone(&content), media).with_retry(
            config.parent_update_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        );
        Self {
            inspector: Arc::new(PdfiumInspector::new()),
            renderer: PageRenderer::from_config(&config),
            classifier: ContentClassifier::from_config(&config),
            content,
            writer,
            config,
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn DocumentInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Replace the render chain. The image policy still comes from the
    /// config or the request.
    pub fn with_renderer(mut self, renderer: PageRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_classifier(mut self, classifier: ContentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one invocation. Never returns an error: fatal problems become a
    /// `Failed` report.
    pub async fn run(&self, request: &ConversionRequest) -> ConversionReport {
        self.run_observed(request, None).await
    }

    /// Like [`run`](Self::run), additionally reporting progress to `observer`
    /// (on top of any callback in the config).
    pub async fn run_observed(&self, request: &ConversionRequest, observer: Option<ProgressCallback>) -> ConversionReport {
        let observers = Observers(self.config.progress_callback.iter().cloned().chain(observer).collect());
        let report = self.execute(request, &observers).await;
        observers.on_conversion_complete(&report);
        report
    }

    async fn execute(&self, request: &ConversionRequest, observers: &Observers) -> ConversionReport {
        let explicit_start = request.start_page.unwrap_or(1);
        let effective = match self.effective(request) {
            Ok(e) => e,
            Err(e) => return ConversionReport::failed(e, explicit_start, 0),
        };
        let budget = BudgetScheduler::new(effective.timeout, Duration::from_millis(self.config.safety_margin_ms));

        info!(
            "Starting conversion of '{}' into module {} (max {} pages, {}ms budget)",
            request.document_name,
            request.parent_id,
            effective.max_pages,
            effective.timeout.as_millis()
        );

        // ── Init ─────────────────────────────────────────────────────────
        observers.on_phase(ConversionPhase::Init);
        let prepared = match self.prepare(request).await {
            Ok(p) => p,
            Err(e) => {
                warn!("Conversion of '{}' failed: {}", request.document_name, e);
                return ConversionReport::failed(e, explicit_start, elapsed_ms(&budget));
            }
        };
        let total_pages = prepared.info.page_count;
        let start_page = prepared.start_page;
        let last_page = total_pages.min(start_page.saturating_add(effective.max_pages - 1));
        observers.on_conversion_start(total_pages, start_page, last_page);

        let mut report = ConversionReport {
            success: true,
            state: ConversionState::Done,
            slides_created: 0,
            slide_ids: Vec::new(),
            total_pages,
            pages_processed: 0,
            partial_success: false,
            start_page,
            next_start_page: None,
            time_elapsed_ms: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            page_errors: Vec::new(),
            slides: Vec::new(),
        };

        if start_page > total_pages {
            info!(
                "Start page {} is past the last page ({}); nothing to do",
                start_page, total_pages
            );
            report.time_elapsed_ms = elapsed_ms(&budget);
            return report;
        }

        // ── Extracting ───────────────────────────────────────────────────
        if budget.is_exhausted() {
            return finalize(report, start_page, total_pages, &budget, observers);
        }
        observers.on_phase(ConversionPhase::Extracting);
        let segmented = self.extract(&prepared, &budget).await;

        // ── BatchProcessing ──────────────────────────────────────────────
        observers.on_phase(ConversionPhase::BatchProcessing);
        let ctx = ClassifyContext {
            document_name: &request.document_name,
            total_pages,
        };
        let target = WriteTarget {
            parent_id: &request.parent_id,
            document_name: &request.document_name,
        };
        let renderer = self.renderer.with_policy(effective.policy);
        let (prepared, segmented, renderer, ctx, target, budget_ref) =
            (&prepared, &segmented, &renderer, &ctx, &target, &budget);

        let mut next_page = start_page;
        while next_page <= last_page {
            if budget.is_exhausted() {
                info!("Stopping before page {}: budget exhausted", next_page);
                break;
            }
            let batch_end = last_page.min(next_page + effective.batch_size - 1);
            debug!("Processing pages {}..={}", next_page, batch_end);

            let mut outcomes: Vec<PageOutcome> = stream::iter(next_page..=batch_end)
                .map(move |page| {
                    self.process_page(page, prepared, segmented, renderer, ctx, target, budget_ref, observers)
                })
                .buffer_unordered(effective.batch_size)
                .collect()
                .await;
            outcomes.sort_by_key(|o| o.page);

            for outcome in outcomes {
                record(&mut report, outcome);
            }
            // Continuation follows the attempted range, not completion order.
            next_page = batch_end + 1;
        }

        finalize(report, next_page, total_pages, &budget, observers)
    }

    fn effective(&self, request: &ConversionRequest) -> Result<Effective, Pdf2SlidesError> {
        let max_pages = request.max_pages.unwrap_or(self.config.max_pages);
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        if max_pages == 0 {
            return Err(Pdf2SlidesError::InvalidConfig("maxPages must be at least 1".into()));
        }
        if batch_size == 0 {
            return Err(Pdf2SlidesError::InvalidConfig("batchSize must be at least 1".into()));
        }
        if request.start_page == Some(0) {
            return Err(Pdf2SlidesError::InvalidConfig("startPage is 1-indexed".into()));
        }
        Ok(Effective {
            max_pages,
            batch_size,
            timeout: Duration::from_millis(request.timeout_ms.unwrap_or(self.config.timeout_ms)),
            policy: request
                .enable_images
                .map(ImagePolicy::from_enable_images)
                .unwrap_or(self.config.image_policy),
        })
    }

    async fn prepare(&self, request: &ConversionRequest) -> Result<Prepared, Pdf2SlidesError> {
        let document = input::resolve_document(
            &request.document,
            &request.document_name,
            self.config.download_timeout_secs,
        )
        .await?;

        let info = self
            .inspector
            .inspect(Arc::clone(&document), &request.document_name)
            .await?;
        info!("'{}' has {} pages", request.document_name, info.page_count);

        self.content.get_parent(&request.parent_id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => Pdf2SlidesError::ParentNotFound {
                id: request.parent_id.clone(),
            },
            other => Pdf2SlidesError::Store(other),
        })?;

        let start_page = match request.start_page {
            Some(page) => page,
            None => {
                let existing = self
                    .content
                    .list_slides(&request.parent_id, &request.document_name)
                    .await?;
                let inferred = infer_start_page(&existing);
                info!(
                    "Inferred start page {} from {} existing slide(s)",
                    inferred,
                    existing.len()
                );
                inferred
            }
        };

        Ok(Prepared {
            document,
            info,
            start_page,
        })
    }

    /// Whole-document text, segmented. Failure or timeout means empty text.
    async fn extract(&self, prepared: &Prepared, budget: &BudgetScheduler) -> Segmented {
        let page_count = prepared.info.page_count;
        let text = match tokio::time::timeout(
            budget.usable(),
            self.inspector.extract_text(Arc::clone(&prepared.document)),
        )
        .await
        {
            Ok(text) => text,
            Err(_) => {
                warn!("Text extraction exceeded the budget; continuing without page text");
                None
            }
        };
        if text.is_none() {
            debug!("No document text; titles fall back to the document name");
        }
        segment::segment(text.as_deref(), page_count)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_page(
        &self,
        page: usize,
        prepared: &Prepared,
        segmented: &Segmented,
        renderer: &PageRenderer,
        ctx: &ClassifyContext<'_>,
        target: &WriteTarget<'_>,
        budget: &BudgetScheduler,
        observers: &Observers,
    ) -> PageOutcome {
        let total = prepared.info.page_count;
        observers.on_page_start(page, total);

        let (width, height) = prepared.info.page_size(page);
        let task = PageTask {
            page_number: page,
            width,
            height,
            text: segmented.page(page).to_string(),
        };

        let asset = renderer.render(&prepared.document, page).await;
        let backend = asset.backend;
        let classification = self
            .classifier
            .classify(&task, asset.image.as_deref(), ctx, budget)
            .await;
        let result = self.writer.write(asset, &classification, target).await;

        match &result {
            Ok(out) => observers.on_slide_created(page, total, &out.slide_id),
            Err(e) => observers.on_page_error(page, total, &e.to_string()),
        }

        PageOutcome {
            page,
            backend,
            classification,
            result,
        }
    }
}

fn record(report: &mut ConversionReport, outcome: PageOutcome) {
    report.pages_processed += 1;
    match outcome.result {
        Ok(written) => {
            for warning in written.warnings {
                report.warnings.push(warning.to_string());
                report.page_errors.push(warning);
            }
            report.slides_created += 1;
            report.slide_ids.push(written.slide_id.clone());
            report.slides.push(SlideSummary {
                page: outcome.page,
                slide_id: written.slide_id,
                title: outcome.classification.title,
                category: outcome.classification.category,
                backend: outcome.backend,
                classified_by: outcome.classification.source,
                parent_linked: written.parent_linked,
            });
        }
        Err(e) => {
            report.errors.push(e.to_string());
            report.page_errors.push(e);
        }
    }
}

fn finalize(
    mut report: ConversionReport,
    next_page: usize,
    total_pages: usize,
    budget: &BudgetScheduler,
    observers: &Observers,
) -> ConversionReport {
    observers.on_phase(ConversionPhase::Finalizing);

    if next_page > total_pages {
        report.state = ConversionState::Done;
        report.next_start_page = None;
    } else {
        report.state = ConversionState::PartialDone;
        report.next_start_page = Some(next_page);
    }
    report.partial_success = report.state == ConversionState::PartialDone;
    report.success = report.pages_processed == 0 || report.slides_created > 0;
    report.time_elapsed_ms = elapsed_ms(budget);

    info!(
        "Conversion finished: {} slide(s) from {} page(s), {} error(s), next start page {:?} ({}ms)",
        report.slides_created,
        report.pages_processed,
        report.errors.len(),
        report.next_start_page,
        report.time_elapsed_ms
    );
    report
}

fn elapsed_ms(budget: &BudgetScheduler) -> u64 {
    budget.elapsed().as_millis() as u64
}

/// Page to resume at, given the slides already written for a document:
/// `max(source_page) + 1`, or 1 when there are none.
///
/// Gaps are not backfilled: `{1, 2, 3, 5}` resumes at 6.
pub fn infer_start_page(existing: &[SlideRecord]) -> usize {
    existing
        .iter()
        .filter_map(|s| s.source_page)
        .max()
        .map_or(1, |max| max + 1)
}

/// Fans progress events out to the config callback and a per-run observer.
struct Observers(Vec<ProgressCallback>);

impl ConversionProgressCallback for Observers {
    fn on_phase(&self, phase: ConversionPhase) {
        self.0.iter().for_each(|cb| cb.on_phase(phase));
    }

    fn on_conversion_start(&self, total_pages: usize, first_page: usize, last_page: usize) {
        self.0
            .iter()
            .for_each(|cb| cb.on_conversion_start(total_pages, first_page, last_page));
    }

    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        self.0.iter().for_each(|cb| cb.on_page_start(page_num, total_pages));
    }

    fn on_slide_created(&self, page_num: usize, total_pages: usize, slide_id: &crate::output::SlideId) {
        self.0
            .iter()
            .for_each(|cb| cb.on_slide_created(page_num, total_pages, slide_id));
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        self.0.iter().for_each(|cb| cb.on_page_error(page_num, total_pages, error));
    }

    fn on_conversion_complete(&self, report: &ConversionReport) {
        self.0.iter().for_each(|cb| cb.on_conversion_complete(report));
    }
}

/// Convert one invocation's worth of pages with the default pdfium-backed
/// coordinator.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2slides::{convert, ConversionRequest, DocumentSource, PipelineConfig};
/// use edgequake_pdf2slides::store::MemoryStore;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(MemoryStore::with_parent("module-1"));
/// let config = PipelineConfig::from_env()?;
/// let request = ConversionRequest::new("module-1", "week1.pdf", DocumentSource::from_arg("week1.pdf"));
/// let report = convert(&request, &config, store.clone(), store).await;
/// println!("next start page: {:?}", report.next_start_page);
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    request: &ConversionRequest,
    config: &PipelineConfig,
    content: Arc<dyn ContentStore>,
    media: Arc<dyn MediaStore>,
) -> ConversionReport {
    ConversionCoordinator::new(config.clone(), content, media)
        .run(request)
        .await
}

/// Page count and page sizes, without converting anything.
///
/// Needs neither a content store nor an LLM provider.
pub async fn inspect(source: &DocumentSource, name: &str, download_timeout_secs: u64) -> Result<DocumentInfo, Pdf2SlidesError> {
    let document = input::resolve_document(source, name, download_timeout_secs).await?;
    PdfiumInspector::new().inspect(document, name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SlideId;

    fn record_at(page: Option<usize>) -> SlideRecord {
        SlideRecord {
            id: SlideId::from("x"),
            source_page: page,
            source_document_name: Some("deck.pdf".into()),
        }
    }

    #[test]
    fn inference_defaults_to_first_page() {
        assert_eq!(infer_start_page(&[]), 1);
        assert_eq!(infer_start_page(&[record_at(None)]), 1);
    }

    #[test]
    fn inference_does_not_backfill_gaps() {
        let existing: Vec<_> = [3, 1, 5, 2].into_iter().map(|p| record_at(Some(p))).collect();
        assert_eq!(infer_start_page(&existing), 6);
    }

    #[test]
    fn inference_ignores_slides_without_page() {
        let existing = vec![record_at(Some(2)), record_at(None)];
        assert_eq!(infer_start_page(&existing), 3);
    }
}
