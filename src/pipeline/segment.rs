//! Split whole-document text into approximate per-page slices.
//!
//! Text extractors usually separate pages with a form feed, sometimes only
//! with a run of blank lines. When splitting on either yields exactly one
//! segment per page we trust it; otherwise we fall back to equal-length
//! character windows. The result always has `page_count` entries.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_PAGE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x0C|(?:\r?\n){3,}").unwrap());

/// Which strategy produced the slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStrategy {
    PageBreaks,
    EqualWindows,
    Empty,
}

/// Per-page text for a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmented {
    pub pages: Vec<String>,
    pub strategy: SegmentStrategy,
}

impl Segmented {
    /// Text for a 1-indexed page; empty for out-of-range pages.
    pub fn page(&self, page_number: usize) -> &str {
        page_number
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Segment `full_text` into `page_count` slices.
///
/// `None` or blank text yields `page_count` empty strings.
pub fn segment(full_text: Option<&str>, page_count: usize) -> Segmented {
    let text = full_text.map(str::trim_end).unwrap_or("");
    if page_count == 0 {
        return Segmented {
            pages: Vec::new(),
            strategy: SegmentStrategy::Empty,
        };
    }
    if text.trim().is_empty() {
        return Segmented {
            pages: vec![String::new(); page_count],
            strategy: SegmentStrategy::Empty,
        };
    }

    let split: Vec<&str> = RE_PAGE_BREAK.split(text).collect();
    if split.len() == page_count {
        debug!("Segmented text on page breaks into {} pages", page_count);
        return Segmented {
            pages: split.into_iter().map(|s| s.trim().to_string()).collect(),
            strategy: SegmentStrategy::PageBreaks,
        };
    }

    debug!(
        "Page-break split gave {} segments for {} pages; using equal windows",
        split.len(),
        page_count
    );
    Segmented {
        pages: equal_windows(text, page_count),
        strategy: SegmentStrategy::EqualWindows,
    }
}

/// Cut `text` into `n` windows of `ceil(chars / n)` characters.
fn equal_windows(text: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let per_page = chars.len().div_ceil(n).max(1);
    (0..n)
        .map(|i| {
            let start = (i * per_page).min(chars.len());
            let end = (start + per_page).min(chars.len());
            chars[start..end].iter().collect::<String>().trim().to_string()
        })
        .collect()
}
