//! Pollable conversion status.
//!
//! A [`StatusRegistry`] maps a caller-chosen key (typically the parent
//! module id) to the latest [`StatusSnapshot`]. Entries expire after a TTL
//! and the registry never holds more than `capacity` entries; the least
//! recently touched one is evicted first.
//!
//! [`StatusTracker`] is the [`ConversionProgressCallback`] that keeps one
//! entry current while a conversion runs.

use crate::output::{ConversionReport, ConversionState, SlideId};
use crate::progress::{ConversionPhase, ConversionProgressCallback};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Coarse stage shown to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusStage {
    #[default]
    Idle,
    /// Fetching and opening the document.
    Loading,
    /// Extracting page text.
    Converting,
    /// Writing slides.
    Creating,
    Complete,
    Error,
}

impl StatusStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusStage::Complete | StatusStage::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub stage: StatusStage,
    pub current_page: usize,
    pub total_pages: usize,
    pub slides_created: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_start_page: Option<usize>,
    /// Unix time in milliseconds.
    pub started_at_ms: u64,
}

struct Entry {
    snapshot: StatusSnapshot,
    touched: Instant,
}

/// TTL- and capacity-bounded status map.
pub struct StatusRegistry {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new(256, Duration::from_secs(3600))
    }
}

impl StatusRegistry {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Reset `key` to a fresh `Idle` snapshot.
    pub fn begin(&self, key: &str) {
        let snapshot = StatusSnapshot {
            started_at_ms: unix_ms(),
            ..Default::default()
        };
        self.entries.lock().put(
            key.to_string(),
            Entry {
                snapshot,
                touched: Instant::now(),
            },
        );
    }

    /// Apply `f` to the snapshot for `key`, creating it if absent.
    pub fn update(&self, key: &str, f: impl FnOnce(&mut StatusSnapshot)) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            f(&mut entry.snapshot);
            entry.touched = Instant::now();
            return;
        }
        let mut snapshot = StatusSnapshot {
            started_at_ms: unix_ms(),
            ..Default::default()
        };
        f(&mut snapshot);
        entries.put(
            key.to_string(),
            Entry {
                snapshot,
                touched: Instant::now(),
            },
        );
    }

    /// Latest snapshot, `None` if unknown or expired.
    pub fn get(&self, key: &str) -> Option<StatusSnapshot> {
        let mut entries = self.entries.lock();
        let expired = entries.peek(key)?.touched.elapsed() > self.ttl;
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|e| e.snapshot.clone())
    }

    pub fn remove(&self, key: &str) -> Option<StatusSnapshot> {
        self.entries.lock().pop(key).map(|e| e.snapshot)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.touched.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A progress callback that keeps `key` current.
    pub fn tracker(self: &Arc<Self>, key: impl Into<String>) -> StatusTracker {
        StatusTracker {
            registry: Arc::clone(self),
            key: key.into(),
        }
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Mirrors coordinator progress into a [`StatusRegistry`] entry.
pub struct StatusTracker {
    registry: Arc<StatusRegistry>,
    key: String,
}

impl ConversionProgressCallback for StatusTracker {
    fn on_phase(&self, phase: ConversionPhase) {
        let stage = match phase {
            ConversionPhase::Init => StatusStage::Loading,
            ConversionPhase::Extracting => StatusStage::Converting,
            ConversionPhase::BatchProcessing => StatusStage::Creating,
            ConversionPhase::Finalizing => return,
        };
        self.registry.update(&self.key, |s| s.stage = stage);
    }

    fn on_conversion_start(&self, total_pages: usize, _first_page: usize, _last_page: usize) {
        self.registry.update(&self.key, |s| s.total_pages = total_pages);
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.registry
            .update(&self.key, |s| s.current_page = s.current_page.max(page_num));
    }

    fn on_slide_created(&self, _page_num: usize, _total_pages: usize, _slide_id: &SlideId) {
        self.registry.update(&self.key, |s| s.slides_created += 1);
    }

    fn on_conversion_complete(&self, report: &ConversionReport) {
        self.registry.update(&self.key, |s| {
            s.slides_created = report.slides_created;
            s.total_pages = report.total_pages;
            s.next_start_page = report.next_start_page;
            if report.state == ConversionState::Failed {
                s.stage = StatusStage::Error;
                s.error = report.errors.first().cloned();
            } else {
                s.stage = StatusStage::Complete;
                s.error = None;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let registry = StatusRegistry::new(8, Duration::from_secs(60));
        registry.begin("m1");
        assert_eq!(registry.get("m1").map(|s| s.stage), Some(StatusStage::Idle));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.get("m1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_stale_entries() {
        let registry = StatusRegistry::new(8, Duration::from_secs(60));
        registry.begin("old");
        tokio::time::advance(Duration::from_secs(45)).await;
        registry.begin("new");
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.get("new").is_some());
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let registry = StatusRegistry::new(2, Duration::from_secs(60));
        registry.begin("a");
        registry.begin("b");
        registry.update("a", |s| s.current_page = 1);
        registry.begin("c");

        assert_eq!(registry.len(), 2);
        assert!(registry.get("b").is_none());
        assert_eq!(registry.get("a").map(|s| s.current_page), Some(1));
    }

    #[test]
    fn tracker_follows_a_run() {
        let registry = Arc::new(StatusRegistry::default());
        let tracker = registry.tracker("m1");

        tracker.on_phase(ConversionPhase::Init);
        assert_eq!(registry.get("m1").unwrap().stage, StatusStage::Loading);

        tracker.on_conversion_start(12, 1, 3);
        tracker.on_phase(ConversionPhase::BatchProcessing);
        tracker.on_page_start(1, 12);
        tracker.on_slide_created(1, 12, &SlideId::from("s1"));
        tracker.on_page_start(2, 12);

        let mid = registry.get("m1").unwrap();
        assert_eq!(mid.stage, StatusStage::Creating);
        assert_eq!((mid.current_page, mid.total_pages, mid.slides_created), (2, 12, 1));

        let mut report = ConversionReport::failed("x", 1, 0);
        report.state = ConversionState::PartialDone;
        report.success = true;
        report.slides_created = 3;
        report.total_pages = 12;
        report.next_start_page = Some(4);
        tracker.on_conversion_complete(&report);

        let done = registry.get("m1").unwrap();
        assert_eq!(done.stage, StatusStage::Complete);
        assert_eq!(done.next_start_page, Some(4));
        assert!(done.error.is_none());
    }

    #[test]
    fn failed_report_sets_error_stage() {
        let registry = Arc::new(StatusRegistry::default());
        registry
            .tracker("m9")
            .on_conversion_complete(&ConversionReport::failed("Parent module 'm9' not found", 1, 3));
        let snap = registry.get("m9").unwrap();
        assert_eq!(snap.stage, StatusStage::Error);
        assert!(snap.stage.is_terminal());
        assert!(snap.error.unwrap().contains("m9"));
    }

    #[test]
    fn snapshot_serialises_camel_case() {
        let json = serde_json::to_value(StatusSnapshot::default()).unwrap();
        assert_eq!(json["stage"], "idle");
        assert!(json.get("currentPage").is_some());
        assert!(json.get("error").is_none());
    }
}
