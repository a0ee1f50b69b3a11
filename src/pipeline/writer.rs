//! Persist one slide: upload image → create slide → append to parent.
//!
//! Only slide creation decides whether the page counts as done. A failed
//! upload degrades the slide to "no image"; a parent append that is still
//! contended after the last attempt leaves the slide created but unlinked.
//! Both come back as warnings on [`WriteOutcome`].
//!
//! The parent append is a read-modify-write of the whole slide list, done
//! per page. Appends from one writer run one at a time so pages of the same
//! batch cannot overwrite each other's ids; upload and creation stay
//! concurrent. Writers in other processes are detected by the backend:
//! contention is retried with exponential backoff (`backoff * 2^(n-1)`
//! before retry `n`), any other error is not.

use crate::error::{PageError, StoreError};
use crate::output::{Classification, NewSlide, RenderedAsset, SlideId};
use crate::pipeline::input::document_stem;
use crate::store::{ContentStore, MediaStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result of writing one page.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub slide_id: SlideId,
    /// `false` when the parent append failed; the slide still exists.
    pub parent_linked: bool,
    pub warnings: Vec<PageError>,
}

/// Where slides go.
#[derive(Debug, Clone, Copy)]
pub struct WriteTarget<'a> {
    pub parent_id: &'a str,
    pub document_name: &'a str,
}

pub struct SlideWriter {
    content: Arc<dyn ContentStore>,
    media: Arc<dyn MediaStore>,
    attempts: u32,
    backoff: Duration,
    append_turn: Mutex<()>,
}

impl SlideWriter {
    pub fn new(content: Arc<dyn ContentStore>, media: Arc<dyn MediaStore>) -> Self {
        Self {
            content,
            media,
            attempts: 3,
            backoff: Duration::from_millis(500),
            append_turn: Mutex::new(()),
        }
    }

    /// Parent-append attempts (at least one) and the base backoff.
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Write one page. `Err` means no slide was created for it.
    pub async fn write(
        &self,
        asset: RenderedAsset,
        classification: &Classification,
        target: &WriteTarget<'_>,
    ) -> Result<WriteOutcome, PageError> {
        let page = asset.page_number;
        let mut warnings = Vec::new();

        let image = match asset.image {
            Some(png) => {
                let name = format!("{}_page_{}.png", document_stem(target.document_name), page);
                let alt = format!("Page {} from {}", page, target.document_name);
                match self.media.upload(png, "image/png", &name, &alt).await {
                    Ok(media) => Some(media),
                    Err(e) => {
                        warn!("Page {}: image upload failed, creating slide without image: {}", page, e);
                        warnings.push(PageError::MediaUploadFailed {
                            page,
                            detail: e.to_string(),
                        });
                        None
                    }
                }
            }
            None => None,
        };

        let new_slide = NewSlide {
            parent_id: target.parent_id.to_string(),
            title: classification.title.clone(),
            description: classification.summary.clone(),
            category: classification.category,
            image,
            links: classification.links.clone(),
            source_page: page,
            source_document_name: target.document_name.to_string(),
        };

        let slide_id = self.content.create_slide(&new_slide).await.map_err(|e| {
            warn!("Page {}: slide creation failed: {}", page, e);
            PageError::WriteFailed {
                page,
                detail: e.to_string(),
            }
        })?;
        debug!("Page {}: created slide {}", page, slide_id);

        let appended = {
            let _turn = self.append_turn.lock().await;
            self.append_to_parent(target.parent_id, &slide_id, page).await
        };
        let parent_linked = match appended {
            Ok(()) => true,
            Err((attempts, e)) => {
                warn!(
                    "Page {}: slide {} created but not linked to parent {} after {} attempt(s): {}",
                    page, slide_id, target.parent_id, attempts, e
                );
                warnings.push(PageError::ParentUpdateFailed {
                    page,
                    slide_id: slide_id.0.clone(),
                    attempts,
                    detail: e.to_string(),
                });
                false
            }
        };

        Ok(WriteOutcome {
            slide_id,
            parent_linked,
            warnings,
        })
    }

    /// Append `slide_id` to the parent's list without duplicating it.
    /// On failure returns the number of attempts made and the last error.
    async fn append_to_parent(&self, parent_id: &str, slide_id: &SlideId, page: usize) -> Result<(), (u32, StoreError)> {
        let mut attempt = 1;
        loop {
            match self.try_append(parent_id, slide_id).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("Page {}: parent updated on attempt {}", page, attempt);
                    }
                    return Ok(());
                }
                Err(e) if e.is_contention() && attempt < self.attempts => {
                    let backoff = self.backoff * 2u32.pow(attempt - 1);
                    warn!(
                        "Page {}: parent update contended, retry {}/{} after {}ms",
                        page,
                        attempt,
                        self.attempts - 1,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    async fn try_append(&self, parent_id: &str, slide_id: &SlideId) -> Result<(), StoreError> {
        let parent = self.content.get_parent(parent_id).await?;
        if parent.slides.contains(slide_id) {
            return Ok(());
        }
        let mut slides = parent.slides;
        slides.push(slide_id.clone());
        self.content.update_parent_slides(parent_id, &slides).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Category, ClassificationSource, RenderBackendKind};
    use crate::store::MemoryStore;

    const TARGET: WriteTarget<'static> = WriteTarget {
        parent_id: "m1",
        document_name: "Week 2.pdf",
    };

    fn asset(page: usize, image: bool) -> RenderedAsset {
        RenderedAsset {
            page_number: page,
            image: image.then(|| vec![0x89, b'P', b'N', b'G']),
            backend: RenderBackendKind::Primary,
        }
    }

    fn classification(page: usize) -> Classification {
        Classification {
            page_number: page,
            title: format!("Title {page}"),
            summary: "Summary".into(),
            category: Category::Quiz,
            links: vec!["https://a.test".into()],
            source: ClassificationSource::Heuristic,
        }
    }

    fn writer(store: &Arc<MemoryStore>) -> SlideWriter {
        SlideWriter::new(store.clone(), store.clone()).with_retry(3, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn happy_path_uploads_creates_and_links() {
        let store = Arc::new(MemoryStore::with_parent("m1"));
        let out = writer(&store).write(asset(2, true), &classification(2), &TARGET).await.unwrap();

        assert!(out.parent_linked);
        assert!(out.warnings.is_empty());
        assert_eq!(store.parent_slides("m1"), Some(vec![out.slide_id.clone()]));
        assert_eq!(store.media_names(), vec!["Week 2_page_2.png"]);

        let stored = &store.slides()[0].slide;
        assert_eq!(stored.source_page, 2);
        assert_eq!(stored.category, Category::Quiz);
        assert!(stored.image.is_some());
        assert_eq!(stored.links, vec!["https://a.test"]);
    }

    #[tokio::test]
    async fn upload_failure_degrades_to_no_image() {
        let store = Arc::new(MemoryStore::with_parent("m1"));
        store.fail_uploads(true);
        let out = writer(&store).write(asset(1, true), &classification(1), &TARGET).await.unwrap();

        assert!(matches!(out.warnings[..], [PageError::MediaUploadFailed { page: 1, .. }]));
        assert!(store.slides()[0].slide.image.is_none());
        assert!(out.parent_linked);
    }

    #[tokio::test]
    async fn create_failure_is_write_failed() {
        let store = Arc::new(MemoryStore::with_parent("m1"));
        store.fail_slide_creation_for([5]);
        let err = writer(&store).write(asset(5, false), &classification(5), &TARGET).await.unwrap_err();
        assert!(matches!(err, PageError::WriteFailed { page: 5, .. }));
        assert_eq!(store.parent_slides("m1"), Some(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn contention_is_retried_with_backoff() {
        let store = Arc::new(MemoryStore::with_parent("m1"));
        store.fail_next_parent_updates(2);
        let start = tokio::time::Instant::now();
        let out = writer(&store).write(asset(1, false), &classification(1), &TARGET).await.unwrap();

        assert!(out.parent_linked);
        assert_eq!(store.parent_update_calls(), 3);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_contention_keeps_the_slide() {
        let store = Arc::new(MemoryStore::with_parent("m1"));
        store.fail_next_parent_updates(3);
        let out = writer(&store).write(asset(4, false), &classification(4), &TARGET).await.unwrap();

        assert!(!out.parent_linked);
        assert_eq!(store.slides().len(), 1);
        assert_eq!(store.parent_update_calls(), 3);
        match &out.warnings[..] {
            [PageError::ParentUpdateFailed { page, attempts, slide_id, .. }] => {
                assert_eq!(*page, 4);
                assert_eq!(*attempts, 3);
                assert_eq!(slide_id, &out.slide_id.0);
            }
            other => panic!("unexpected warnings: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_parent_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let out = writer(&store).write(asset(1, false), &classification(1), &TARGET).await.unwrap();
        assert!(!out.parent_linked);
        assert!(matches!(out.warnings[..], [PageError::ParentUpdateFailed { attempts: 1, .. }]));
    }

    #[tokio::test]
    async fn append_keeps_existing_order_and_skips_duplicates() {
        let store = Arc::new(MemoryStore::with_parent("m1"));
        let seeded = store.seed_slide("m1", "Week 2.pdf", 1);
        let w = writer(&store);
        let out = w.write(asset(2, false), &classification(2), &TARGET).await.unwrap();
        w.try_append("m1", &out.slide_id).await.unwrap();
        assert_eq!(store.parent_slides("m1"), Some(vec![seeded, out.slide_id]));
    }
}
