//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the coordinator works through a page range. The CLI drives a
//! progress bar from it; [`crate::status::StatusTracker`] turns it into a
//! pollable status record.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2slides::{ConversionProgressCallback, PipelineConfig, SlideId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     created: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_slide_created(&self, page_num: usize, total_pages: usize, slide_id: &SlideId) {
//!         self.created.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} → slide {}", page_num, total_pages, slide_id);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { created: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{ConversionReport, SlideId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Coordinator phase, reported as it changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionPhase {
    /// Resolving the document, page count and start page.
    Init,
    /// Whole-document text extraction and segmentation.
    Extracting,
    /// Render → classify → write, page by page.
    BatchProcessing,
    /// Computing the report.
    Finalizing,
}

/// Called by the coordinator as it processes each page.
///
/// With `batch_size > 1` the page-level methods may be called concurrently
/// for different pages; protect shared state accordingly. All methods have
/// no-op defaults.
pub trait ConversionProgressCallback: Send + Sync {
    fn on_phase(&self, phase: ConversionPhase) {
        let _ = phase;
    }

    /// Called once the page range for this invocation is known.
    ///
    /// `first_page..=last_page` is the range that will be attempted if the
    /// budget allows; it is empty (`first_page > last_page`) when there is
    /// nothing left to do.
    fn on_conversion_start(&self, total_pages: usize, first_page: usize, last_page: usize) {
        let _ = (total_pages, first_page, last_page);
    }

    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    fn on_slide_created(&self, page_num: usize, total_pages: usize, slide_id: &SlideId) {
        let _ = (page_num, total_pages, slide_id);
    }

    /// A page produced no slide.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called exactly once per invocation, including failed ones.
    fn on_conversion_complete(&self, report: &ConversionReport) {
        let _ = report;
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        created: AtomicUsize,
        errors: AtomicUsize,
        phases: Mutex<Vec<ConversionPhase>>,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_phase(&self, phase: ConversionPhase) {
            self.phases.lock().push(phase);
        }

        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_slide_created(&self, _page_num: usize, _total_pages: usize, _slide_id: &SlideId) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page_num: usize, _total_pages: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_phase(ConversionPhase::Init);
        cb.on_conversion_start(5, 1, 3);
        cb.on_page_start(1, 5);
        cb.on_slide_created(1, 5, &SlideId::from("a"));
        cb.on_page_error(2, 5, "some error");
        cb.on_conversion_complete(&ConversionReport::failed("x", 1, 0));
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_phase(ConversionPhase::Init);
        tracker.on_phase(ConversionPhase::BatchProcessing);
        tracker.on_page_start(1, 3);
        tracker.on_slide_created(1, 3, &SlideId::from("s1"));
        tracker.on_page_start(2, 3);
        tracker.on_page_error(2, 3, "write failed");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.created.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.phases.lock(),
            vec![ConversionPhase::Init, ConversionPhase::BatchProcessing]
        );
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_conversion_start(10, 1, 10);
        cb.on_page_start(1, 10);
    }
}
