//! In-process content store.
//!
//! Backs the CLI's `--dry-run` and the test suite. Failure injection
//! (contention on the next N parent updates, failed creates for chosen
//! pages, failed uploads) lets tests exercise the writer's degradation paths
//! without a real backend.

use super::{ContentStore, MediaStore};
use crate::error::StoreError;
use crate::output::{MediaRef, NewSlide, ParentModule, SlideId, SlideRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A slide as kept by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSlide {
    pub id: SlideId,
    pub slide: NewSlide,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    slides: Vec<StoredSlide>,
    parents: HashMap<String, Vec<SlideId>>,
    media: Vec<(MediaRef, String, usize)>,
    contention_remaining: u32,
    parent_update_calls: u32,
    failing_pages: HashSet<usize>,
    failing_uploads: bool,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds one empty parent module.
    pub fn with_parent(parent_id: &str) -> Self {
        let store = Self::new();
        store.add_parent(parent_id);
        store
    }

    pub fn add_parent(&self, parent_id: &str) {
        self.inner.lock().parents.entry(parent_id.to_string()).or_default();
    }

    /// Seed a slide as if an earlier invocation had written it, and link it
    /// to the parent.
    pub fn seed_slide(&self, parent_id: &str, document_name: &str, source_page: usize) -> SlideId {
        let mut inner = self.inner.lock();
        let id = SlideId(inner.next_id("slide"));
        inner.slides.push(StoredSlide {
            id: id.clone(),
            slide: NewSlide {
                parent_id: parent_id.to_string(),
                title: format!("seeded page {source_page}"),
                description: String::new(),
                category: Default::default(),
                image: None,
                links: Vec::new(),
                source_page,
                source_document_name: document_name.to_string(),
            },
        });
        inner
            .parents
            .entry(parent_id.to_string())
            .or_default()
            .push(id.clone());
        id
    }

    /// The next `n` parent updates fail with [`StoreError::Contention`].
    pub fn fail_next_parent_updates(&self, n: u32) {
        self.inner.lock().contention_remaining = n;
    }

    /// Slide creation fails for these source pages.
    pub fn fail_slide_creation_for(&self, pages: impl IntoIterator<Item = usize>) {
        self.inner.lock().failing_pages.extend(pages);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.inner.lock().failing_uploads = fail;
    }

    /// All slides in creation order.
    pub fn slides(&self) -> Vec<StoredSlide> {
        self.inner.lock().slides.clone()
    }

    /// The parent's slide list, `None` if the parent does not exist.
    pub fn parent_slides(&self, parent_id: &str) -> Option<Vec<SlideId>> {
        self.inner.lock().parents.get(parent_id).cloned()
    }

    pub fn media_count(&self) -> usize {
        self.inner.lock().media.len()
    }

    /// Names of uploaded media, in upload order.
    pub fn media_names(&self) -> Vec<String> {
        self.inner.lock().media.iter().map(|(_, name, _)| name.clone()).collect()
    }

    /// How many times `update_parent_slides` was called (including failures).
    pub fn parent_update_calls(&self) -> u32 {
        self.inner.lock().parent_update_calls
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn create_slide(&self, slide: &NewSlide) -> Result<SlideId, StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing_pages.contains(&slide.source_page) {
            return Err(StoreError::Rejected {
                status: 400,
                detail: format!("injected failure for page {}", slide.source_page),
            });
        }
        let id = SlideId(inner.next_id("slide"));
        debug!("MemoryStore: created {} for page {}", id, slide.source_page);
        inner.slides.push(StoredSlide {
            id: id.clone(),
            slide: slide.clone(),
        });
        Ok(id)
    }

    async fn list_slides(&self, parent_id: &str, document_name: &str) -> Result<Vec<SlideRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .slides
            .iter()
            .filter(|s| s.slide.parent_id == parent_id && s.slide.source_document_name == document_name)
            .map(|s| SlideRecord {
                id: s.id.clone(),
                source_page: Some(s.slide.source_page),
                source_document_name: Some(s.slide.source_document_name.clone()),
            })
            .collect())
    }

    async fn get_parent(&self, parent_id: &str) -> Result<ParentModule, StoreError> {
        let inner = self.inner.lock();
        inner
            .parents
            .get(parent_id)
            .map(|slides| ParentModule {
                id: parent_id.to_string(),
                slides: slides.clone(),
            })
            .ok_or_else(|| StoreError::NotFound {
                collection: "modules".into(),
                id: parent_id.to_string(),
            })
    }

    async fn update_parent_slides(&self, parent_id: &str, slides: &[SlideId]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.parent_update_calls += 1;
        if inner.contention_remaining > 0 {
            inner.contention_remaining -= 1;
            return Err(StoreError::Contention {
                resource: format!("modules/{parent_id}"),
                detail: "document locked by another writer".into(),
            });
        }
        match inner.parents.get_mut(parent_id) {
            Some(list) => {
                *list = slides.to_vec();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                collection: "modules".into(),
                id: parent_id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn upload(&self, bytes: Vec<u8>, _mime_type: &str, name: &str, _alt: &str) -> Result<MediaRef, StoreError> {
        let mut inner = self.inner.lock();
        if inner.failing_uploads {
            return Err(StoreError::Transport("injected upload failure".into()));
        }
        let media = MediaRef(inner.next_id("media"));
        inner.media.push((media.clone(), name.to_string(), bytes.len()));
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Category;

    fn new_slide(page: usize) -> NewSlide {
        NewSlide {
            parent_id: "m1".into(),
            title: format!("p{page}"),
            description: String::new(),
            category: Category::Regular,
            image: None,
            links: vec![],
            source_page: page,
            source_document_name: "deck.pdf".into(),
        }
    }

    #[tokio::test]
    async fn list_filters_by_parent_and_document() {
        let store = MemoryStore::with_parent("m1");
        store.seed_slide("m1", "deck.pdf", 1);
        store.seed_slide("m1", "other.pdf", 1);
        store.seed_slide("m2", "deck.pdf", 4);
        store.create_slide(&new_slide(2)).await.unwrap();

        let pages: Vec<_> = store
            .list_slides("m1", "deck.pdf")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.source_page)
            .collect();
        assert_eq!(pages, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn contention_is_injected_then_clears() {
        let store = MemoryStore::with_parent("m1");
        store.fail_next_parent_updates(1);
        let ids = vec![SlideId::from("a")];
        let err = store.update_parent_slides("m1", &ids).await.unwrap_err();
        assert!(err.is_contention());
        store.update_parent_slides("m1", &ids).await.unwrap();
        assert_eq!(store.parent_slides("m1"), Some(ids));
        assert_eq!(store.parent_update_calls(), 2);
    }

    #[tokio::test]
    async fn missing_parent_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_parent("nope").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn injected_create_failure() {
        let store = MemoryStore::with_parent("m1");
        store.fail_slide_creation_for([3]);
        assert!(store.create_slide(&new_slide(3)).await.is_err());
        assert!(store.create_slide(&new_slide(4)).await.is_ok());
        assert_eq!(store.slides().len(), 1);
    }
}
