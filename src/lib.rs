//! # edgequake-pdf2slides
//!
//! Turn a PDF into an ordered set of slide records inside a content
//! management system, one slide per page, under a hard wall-clock budget.
//!
//! ## Why budgeted and resumable?
//!
//! Serverless hosts kill the process after a fixed number of seconds. A
//! 60-page course deck does not fit into one such invocation, so each call
//! converts as many pages as the budget allows and returns a continuation
//! token (`next_start_page`). The next call resumes there, or infers the
//! resume point from the slides already written when the caller omits it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes / path / URL
//!  │
//!  ├─ 1. Init       resolve bytes, page count, parent check, start page
//!  ├─ 2. Extract    whole-document text → per-page slices (once)
//!  ├─ 3. Render     pdfium → remote service → placeholder   (per page)
//!  ├─ 4. Classify   vision LLM → tolerant parse → heuristic  (per page)
//!  ├─ 5. Write      upload image → create slide → append to parent
//!  └─ 6. Report     slides created, errors, next start page
//! ```
//!
//! Every step after Init degrades per page instead of failing the run; see
//! [`error`] for the split between fatal and page-scoped errors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2slides::{ConversionCoordinator, ConversionRequest, DocumentSource, PipelineConfig};
//! use edgequake_pdf2slides::store::PayloadStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(PayloadStore::new("https://cms.example.com", Some("secret".into()), Duration::from_secs(30))?);
//!     let coordinator = ConversionCoordinator::new(PipelineConfig::from_env()?, store.clone(), store);
//!
//!     let mut request = ConversionRequest::new("42", "week1.pdf", DocumentSource::from_arg("week1.pdf"));
//!     loop {
//!         let report = coordinator.run(&request).await;
//!         eprintln!("{} slides, next {:?}", report.slides_created, report.next_start_page);
//!         match report.next_start_page {
//!             Some(next) => request = request.start_page(next),
//!             None => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2slides` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod status;
pub mod store;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ImagePolicy, PipelineConfig, PipelineConfigBuilder};
pub use convert::{convert, infer_start_page, inspect, ConversionCoordinator};
pub use error::{PageError, Pdf2SlidesError, StoreError};
pub use output::{
    Category, Classification, ConversionReport, ConversionRequest, ConversionState, SlideId, SlideSummary,
};
pub use pipeline::document::DocumentInfo;
pub use pipeline::input::DocumentSource;
pub use progress::{ConversionPhase, ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use status::{StatusRegistry, StatusSnapshot, StatusStage, StatusTracker};
pub use task::{TaskOutcome, TaskRunner};
