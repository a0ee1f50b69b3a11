//! Per-page pipeline stages.
//!
//! Each submodule does one thing and recovers from its own failures where
//! it can, so the coordinator only has to sequence them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ document ──▶ segment ──┐
//!                                  ▼
//!           render ──▶ encode ──▶ classify ──▶ writer
//!        (placeholder)                     (store)
//! ```
//!
//! * [`input`]: bytes, path or URL to validated PDF bytes
//! * [`budget`]: the wall-clock gate consulted before new work
//! * [`document`]: page count, page sizes, whole-document text
//! * [`segment`]: whole-document text to per-page slices
//! * [`render`]: primary → fallback → [`placeholder`] rasterisation
//! * [`encode`]: PNG to base64 for the vision model
//! * [`classify`]: model classification with heuristic fallback
//! * [`writer`]: upload, create, append to parent

pub mod budget;
pub mod classify;
pub mod document;
pub mod encode;
pub mod input;
pub mod placeholder;
pub mod render;
pub mod segment;
pub mod writer;
