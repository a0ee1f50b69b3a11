//! Content-management collaborators.
//!
//! The pipeline owns no persistent state. Slides, media and the parent
//! module's slide list live in a content-management backend, reached through
//! two traits:
//!
//! * [`ContentStore`]: slide records and the parent aggregate
//! * [`MediaStore`]: uploaded page images
//!
//! [`MemoryStore`] implements both in process (tests, `--dry-run`);
//! [`PayloadStore`] talks to a Payload CMS over REST.
//!
//! The parent's slide list is the one shared mutable resource. Backends that
//! detect a concurrent modification must report it as
//! [`StoreError::Contention`](crate::error::StoreError::Contention); the
//! writer retries only that variant.

pub mod memory;
pub mod payload;

pub use memory::{MemoryStore, StoredSlide};
pub use payload::PayloadStore;

use crate::error::StoreError;
use crate::output::{MediaRef, NewSlide, ParentModule, SlideId, SlideRecord};
use async_trait::async_trait;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Create one slide record.
    async fn create_slide(&self, slide: &NewSlide) -> Result<SlideId, StoreError>;

    /// All slides of `parent_id` generated from `document_name`.
    async fn list_slides(&self, parent_id: &str, document_name: &str) -> Result<Vec<SlideRecord>, StoreError>;

    async fn get_parent(&self, parent_id: &str) -> Result<ParentModule, StoreError>;

    /// Replace the parent's slide list.
    async fn update_parent_slides(&self, parent_id: &str, slides: &[SlideId]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `bytes` and return a reference a slide can point at.
    async fn upload(&self, bytes: Vec<u8>, mime_type: &str, name: &str, alt: &str) -> Result<MediaRef, StoreError>;
}
