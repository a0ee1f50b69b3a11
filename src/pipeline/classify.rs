//! Page classification: model-backed when available, heuristic otherwise.
//!
//! [`ContentClassifier::classify`] always returns a [`Classification`]. The
//! model path goes through a ladder of increasingly forgiving parsers:
//!
//! 1. strict JSON
//! 2. the first fenced code block
//! 3. the `{…}` slice with trailing commas and smart quotes repaired
//! 4. `key: value` scraping line by line
//!
//! and falls back to [`heuristic`] when all of them give up, when the call
//! errors or times out, or when the budget cannot afford the rate-limit delay.
//!
//! Calls are paced: consecutive model calls start at least `delay` apart,
//! across all pages of the invocation. The wait is spent from the same budget
//! as everything else.

use crate::config::PipelineConfig;
use crate::error::Pdf2SlidesError;
use crate::output::{Category, Classification, ClassificationSource, PageTask};
use crate::pipeline::budget::BudgetScheduler;
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::document_stem;
use crate::prompts::{classify_user_prompt, CLASSIFY_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_SUMMARY_CHARS: usize = 500;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

static RE_FENCED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static RE_KV_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\btitle["']?\s*[:=]\s*["']?([^"'\n]+)"#).unwrap());
static RE_KV_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:type|category)["']?\s*[:=]\s*["']?([A-Za-z]+)"#).unwrap());
static RE_KV_DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(?:description|summary)["']?\s*[:=]\s*["']?([^"'\n]+)"#).unwrap());
static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"'<>()\[\]{}]+"#).unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Category keywords, checked in order against lower-cased page text.
const KEYWORDS: [(Category, &[&str]); 4] = [
    (Category::Quiz, &["quiz", "question"]),
    (Category::Reference, &["reference", "citation"]),
    (Category::Resources, &["resource", "download"]),
    (Category::Video, &["video", "watch"]),
];

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("backend call failed: {0}")]
    Backend(String),
}

/// Anything that can turn a prompt (plus an optional page image) into text.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str, image: Option<ImageData>) -> Result<String, ClassifyError>;
}

/// [`ClassifierBackend`] over an `edgequake-llm` provider.
pub struct LlmClassifierBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmClassifierBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl ClassifierBackend for LlmClassifierBackend {
    async fn complete(&self, system: &str, user: &str, image: Option<ImageData>) -> Result<String, ClassifyError> {
        let messages = vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(user, image.into_iter().collect()),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| ClassifyError::Backend(e.to_string()))?;
        debug!(
            "Classifier call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Resolve the LLM provider, most specific first:
///
/// 1. a pre-built `config.provider`
/// 2. `config.provider_name` (+ `config.model`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set
/// 4. OpenAI when `OPENAI_API_KEY` is present
/// 5. `ProviderFactory::from_env` auto-detection
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, Pdf2SlidesError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Pdf2SlidesError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Pdf2SlidesError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Pdf2SlidesError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Document-level facts the classifier needs for every page.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub document_name: &'a str,
    pub total_pages: usize,
}

/// Model-or-heuristic page classifier with call pacing.
pub struct ContentClassifier {
    backend: Option<Arc<dyn ClassifierBackend>>,
    delay: Duration,
    call_timeout: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for ContentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentClassifier")
            .field("backend", &self.backend.as_ref().map(|_| "<dyn ClassifierBackend>"))
            .field("delay", &self.delay)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl ContentClassifier {
    pub fn new(backend: Option<Arc<dyn ClassifierBackend>>) -> Self {
        Self {
            backend,
            delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(30),
            last_call: Mutex::new(None),
        }
    }

    /// Heuristic only.
    pub fn heuristic_only() -> Self {
        Self::new(None)
    }

    /// Build from config. A provider that cannot be resolved is logged and
    /// leaves the classifier in heuristic mode.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let backend: Option<Arc<dyn ClassifierBackend>> = if !config.classification {
            info!("Classification disabled; using heuristic titles and categories");
            None
        } else {
            match resolve_provider(config) {
                Ok(provider) => {
                    info!(
                        "Classifier enabled (model: {})",
                        config.model.as_deref().unwrap_or(DEFAULT_MODEL)
                    );
                    Some(Arc::new(LlmClassifierBackend::new(
                        provider,
                        config.temperature,
                        config.max_tokens,
                    )))
                }
                Err(e) => {
                    warn!("No classifier provider, falling back to heuristic: {}", e);
                    None
                }
            }
        };
        Self::new(backend)
            .with_delay(Duration::from_millis(config.classify_delay_ms))
            .with_call_timeout(Duration::from_secs(config.api_timeout_secs))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Classify one page. Never fails.
    pub async fn classify(
        &self,
        page: &PageTask,
        image: Option<&[u8]>,
        ctx: &ClassifyContext<'_>,
        budget: &BudgetScheduler,
    ) -> Classification {
        let fallback = heuristic(page, ctx);
        let Some(backend) = &self.backend else {
            return fallback;
        };

        if !self.pace(budget).await {
            debug!("Page {}: no budget for rate-limit delay, using heuristic", page.page_number);
            return fallback;
        }

        let limit = self.call_timeout.min(budget.usable());
        if limit.is_zero() {
            return fallback;
        }

        let image_data = image.and_then(|png| match encode_png(png) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!("Page {}: image not sent to classifier: {}", page.page_number, e);
                None
            }
        });
        let user = classify_user_prompt(ctx.document_name, page.page_number, ctx.total_pages, &page.text);

        let raw = match tokio::time::timeout(limit, backend.complete(CLASSIFY_SYSTEM_PROMPT, &user, image_data)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("Page {}: classification failed, using heuristic: {}", page.page_number, e);
                return fallback;
            }
            Err(_) => {
                warn!(
                    "Page {}: classification timed out after {}ms, using heuristic",
                    page.page_number,
                    limit.as_millis()
                );
                return fallback;
            }
        };

        match parse_model_output(&raw) {
            Some(parsed) => merge(parsed, fallback),
            None => {
                warn!(
                    "Page {}: unparseable classifier output, using heuristic: {:?}",
                    page.page_number,
                    raw.chars().take(120).collect::<String>()
                );
                fallback
            }
        }
    }

    /// Wait until `delay` has passed since the previous call started.
    /// Returns `false` (without waiting) when the budget cannot cover the wait.
    async fn pace(&self, budget: &BudgetScheduler) -> bool {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready = prev + self.delay;
            let wait = ready.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                if wait >= budget.usable() {
                    return false;
                }
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
        true
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawClassification {
    #[serde(default, rename = "type", alias = "category")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "summary")]
    description: Option<String>,
    #[serde(default, alias = "urls")]
    links: Option<serde_json::Value>,
}

/// What the model told us; every field optional.
#[derive(Debug, Default, PartialEq)]
struct ParsedOutput {
    title: Option<String>,
    description: Option<String>,
    category: Option<Category>,
    links: Vec<String>,
}

impl ParsedOutput {
    fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.category.is_none()
    }
}

impl From<RawClassification> for ParsedOutput {
    fn from(raw: RawClassification) -> Self {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Self {
            title: non_empty(raw.title).map(|t| clean_text(&t, MAX_TITLE_CHARS)),
            description: non_empty(raw.description).map(|d| clean_text(&d, MAX_SUMMARY_CHARS)),
            category: non_empty(raw.kind).map(|k| Category::from_label(&k)),
            links: raw.links.as_ref().map(links_from_value).unwrap_or_default(),
        }
    }
}

fn parse_model_output(raw: &str) -> Option<ParsedOutput> {
    let attempts = [
        Some(raw.trim().to_string()),
        RE_FENCED.captures(raw).map(|c| c[1].to_string()),
        repaired_slice(raw),
    ];
    for candidate in attempts.into_iter().flatten() {
        if let Ok(parsed) = serde_json::from_str::<RawClassification>(&candidate) {
            let parsed = ParsedOutput::from(parsed);
            if !parsed.is_empty() {
                return Some(parsed);
            }
        }
    }
    let scraped = scrape_key_values(raw);
    (!scraped.is_empty()).then_some(scraped)
}

/// `{…}` from the first `{` to the last `}`, with trailing commas dropped
/// and typographic quotes straightened.
fn repaired_slice(raw: &str) -> Option<String> {
    let first = raw.find('{')?;
    let last = raw.rfind('}')?;
    if last <= first {
        return None;
    }
    let slice = RE_TRAILING_COMMA.replace_all(&raw[first..=last], "$1");
    Some(
        slice
            .replace(['\u{201C}', '\u{201D}'], "\"")
            .replace(['\u{2018}', '\u{2019}'], "'"),
    )
}

fn scrape_key_values(raw: &str) -> ParsedOutput {
    let mut out = ParsedOutput::default();
    for line in raw.lines() {
        if out.title.is_none() {
            if let Some(c) = RE_KV_TITLE.captures(line) {
                out.title = Some(clean_text(trim_value(&c[1]), MAX_TITLE_CHARS)).filter(|t| !t.is_empty());
            }
        }
        if out.category.is_none() {
            if let Some(c) = RE_KV_TYPE.captures(line) {
                out.category = Some(Category::from_label(&c[1]));
            }
        }
        if out.description.is_none() {
            if let Some(c) = RE_KV_DESCRIPTION.captures(line) {
                out.description =
                    Some(clean_text(trim_value(&c[1]), MAX_SUMMARY_CHARS)).filter(|d| !d.is_empty());
            }
        }
    }
    out.links = scrape_links(raw);
    out
}

fn trim_value(s: &str) -> &str {
    s.trim().trim_end_matches([',', '}', ';']).trim()
}

fn links_from_value(value: &serde_json::Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map.get("url").and_then(|u| u.as_str()).map(str::to_string),
            _ => None,
        })
        .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
        .collect()
}

fn scrape_links(text: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for m in RE_URL.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if !links.iter().any(|l| l == url) {
            links.push(url.to_string());
        }
    }
    links
}

/// Fill whatever the model left out from the heuristic result.
fn merge(parsed: ParsedOutput, fallback: Classification) -> Classification {
    let mut links = parsed.links;
    for l in fallback.links {
        if !links.contains(&l) {
            links.push(l);
        }
    }
    Classification {
        page_number: fallback.page_number,
        title: parsed.title.unwrap_or(fallback.title),
        summary: parsed.description.unwrap_or(fallback.summary),
        category: parsed.category.unwrap_or(fallback.category),
        links,
        source: ClassificationSource::Model,
    }
}

// ── Heuristic ────────────────────────────────────────────────────────────

/// Collapse whitespace and cut to `max` characters.
pub fn clean_text(text: &str, max: usize) -> String {
    let collapsed = RE_WS.replace_all(text.trim(), " ");
    collapsed.chars().take(max).collect::<String>().trim_end().to_string()
}

/// Deterministic classification from page text alone.
pub fn heuristic(page: &PageTask, ctx: &ClassifyContext<'_>) -> Classification {
    Classification {
        page_number: page.page_number,
        title: heuristic_title(&page.text, ctx.document_name, page.page_number),
        summary: heuristic_summary(page, ctx.total_pages),
        category: keyword_category(&page.text),
        links: scrape_links(&page.text),
        source: ClassificationSource::Heuristic,
    }
}

fn heuristic_title(text: &str, document_name: &str, page_number: usize) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && l.chars().count() < MAX_TITLE_CHARS)
        .map(|l| clean_text(l, MAX_TITLE_CHARS))
        .unwrap_or_else(|| format!("{} - Page {}", document_stem(document_name), page_number))
}

fn heuristic_summary(page: &PageTask, total_pages: usize) -> String {
    let header = format!(
        "Page {} of {} ({}x{}px)",
        page.page_number,
        total_pages,
        page.width.round() as i64,
        page.height.round() as i64
    );
    let body = RE_WS.replace_all(page.text.trim(), " ");
    if body.chars().count() < 20 {
        return header;
    }
    let budget = MAX_SUMMARY_CHARS.saturating_sub(header.chars().count() + 2);
    let mut snippet: String = body.chars().take(budget).collect();
    if body.chars().count() > budget {
        snippet.pop();
        snippet.push('…');
    }
    format!("{header}\n\n{snippet}")
}

/// First keyword group that matches wins; `Regular` otherwise.
pub fn keyword_category(text: &str) -> Category {
    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(c, _)| *c)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Canned {
        reply: Result<String, String>,
        calls: AtomicUsize,
        latency: Duration,
    }

    impl Canned {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
                latency: Duration::ZERO,
            })
        }
    }

    #[async_trait]
    impl ClassifierBackend for Canned {
        async fn complete(&self, _s: &str, _u: &str, _i: Option<ImageData>) -> Result<String, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.reply.clone().map_err(ClassifyError::Backend)
        }
    }

    fn page(n: usize, text: &str) -> PageTask {
        PageTask {
            page_number: n,
            width: 612.0,
            height: 792.4,
            text: text.to_string(),
        }
    }

    const CTX: ClassifyContext<'static> = ClassifyContext {
        document_name: "Week 1.pdf",
        total_pages: 12,
    };

    fn budget() -> BudgetScheduler {
        BudgetScheduler::new(Duration::from_secs(60), Duration::from_secs(3))
    }

    fn classifier(backend: Arc<Canned>) -> ContentClassifier {
        ContentClassifier::new(Some(backend)).with_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn non_json_reply_falls_back_to_heuristic() {
        let backend = Canned::ok("I cannot help with that");
        let c = classifier(backend.clone())
            .classify(&page(2, "Course overview\nWe start on Monday."), None, &CTX, &budget())
            .await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.source, ClassificationSource::Heuristic);
        assert_eq!(c.category, Category::Regular);
        assert_eq!(c.title, "Course overview");
    }

    #[tokio::test]
    async fn strict_json_is_used() {
        let backend = Canned::ok(r#"{"type":"quiz","title":"Check yourself","description":"Five questions","links":[]}"#);
        let c = classifier(backend)
            .classify(&page(1, "irrelevant"), None, &CTX, &budget())
            .await;
        assert_eq!(c.source, ClassificationSource::Model);
        assert_eq!(c.category, Category::Quiz);
        assert_eq!(c.title, "Check yourself");
        assert_eq!(c.summary, "Five questions");
    }

    #[test]
    fn fenced_block_is_extracted() {
        let raw = "Sure! Here you go:\n```json\n{\"type\": \"video\", \"title\": \"Watch this\"}\n```\nAnything else?";
        let p = parse_model_output(raw).unwrap();
        assert_eq!(p.category, Some(Category::Video));
        assert_eq!(p.title.as_deref(), Some("Watch this"));
    }

    #[test]
    fn trailing_commas_and_smart_quotes_are_repaired() {
        let raw = "Result: {\u{201C}type\u{201D}: \u{201C}reference\u{201D}, \"title\": \"Sources\", \"links\": [\"https://a.test\",],}";
        let p = parse_model_output(raw).unwrap();
        assert_eq!(p.category, Some(Category::Reference));
        assert_eq!(p.title.as_deref(), Some("Sources"));
        assert_eq!(p.links, vec!["https://a.test".to_string()]);
    }

    #[test]
    fn key_values_are_scraped() {
        let raw = "Title: Intro to Rust\nType: resources\nDescription: Links to the book, and more.";
        let p = parse_model_output(raw).unwrap();
        assert_eq!(p.title.as_deref(), Some("Intro to Rust"));
        assert_eq!(p.category, Some(Category::Resources));
        assert_eq!(p.description.as_deref(), Some("Links to the book, and more."));
    }

    #[test]
    fn unknown_type_is_regular() {
        let p = parse_model_output(r#"{"type":"lecture","title":"x"}"#).unwrap();
        assert_eq!(p.category, Some(Category::Regular));
    }

    #[test]
    fn empty_object_is_not_a_result() {
        assert_eq!(parse_model_output("{}"), None);
        assert_eq!(parse_model_output(""), None);
    }

    #[test]
    fn links_accept_strings_and_url_objects() {
        let v = serde_json::json!(["https://a.test", {"url": "http://b.test"}, 3, "ftp://c"]);
        assert_eq!(links_from_value(&v), vec!["https://a.test", "http://b.test"]);
    }

    #[tokio::test]
    async fn backend_error_falls_back() {
        let backend = Arc::new(Canned {
            reply: Err("503".into()),
            calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
        });
        let c = classifier(backend)
            .classify(&page(4, "Quiz time: answer all questions"), None, &CTX, &budget())
            .await;
        assert_eq!(c.source, ClassificationSource::Heuristic);
        assert_eq!(c.category, Category::Quiz);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = Arc::new(Canned {
            reply: Ok(r#"{"type":"quiz","title":"late"}"#.into()),
            calls: AtomicUsize::new(0),
            latency: Duration::from_secs(10),
        });
        let c = classifier(backend)
            .with_call_timeout(Duration::from_secs(1))
            .classify(&page(1, ""), None, &CTX, &budget())
            .await;
        assert_eq!(c.source, ClassificationSource::Heuristic);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_are_paced() {
        let backend = Canned::ok(r#"{"title":"t"}"#);
        let c = ContentClassifier::new(Some(backend.clone())).with_delay(Duration::from_secs(1));
        let b = budget();
        let start = Instant::now();
        c.classify(&page(1, ""), None, &CTX, &b).await;
        c.classify(&page(2, ""), None, &CTX, &b).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_that_would_blow_the_budget_uses_heuristic() {
        let backend = Canned::ok(r#"{"title":"t"}"#);
        let c = ContentClassifier::new(Some(backend.clone())).with_delay(Duration::from_secs(5));
        let tight = BudgetScheduler::new(Duration::from_secs(6), Duration::from_secs(3));
        let first = c.classify(&page(1, ""), None, &CTX, &tight).await;
        let second = c.classify(&page(2, ""), None, &CTX, &tight).await;
        assert_eq!(first.source, ClassificationSource::Model);
        assert_eq!(second.source, ClassificationSource::Heuristic);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn heuristic_title_rules() {
        assert_eq!(heuristic_title("", "Week 1.pdf", 3), "Week 1 - Page 3");
        assert_eq!(heuristic_title("  \n \t", "deck.PDF", 1), "deck - Page 1");
        assert_eq!(heuristic_title("Agenda", "Week 1.pdf", 2), "Agenda");
        assert_eq!(heuristic_title("Intro\nWelcome to the course", "Week 1.pdf", 2), "Intro");
        assert_eq!(
            heuristic_title("\n\n  Getting   Started ★ \nbody text here", "d.pdf", 1),
            "Getting Started ★"
        );
        let long = "x".repeat(150);
        assert_eq!(heuristic_title(&format!("{long}\n{long}"), "d.pdf", 9), "d - Page 9");

        let wide = "y".repeat(120);
        let text = format!("{wide}\n{wide}\n{wide}\n{wide}\n{wide}\nSummary slide");
        assert_eq!(heuristic_title(&text, "Week 1.pdf", 2), "Summary slide");

        let exactly_max = "z".repeat(MAX_TITLE_CHARS);
        assert_eq!(heuristic_title(&exactly_max, "d.pdf", 4), "d - Page 4");
    }

    #[test]
    fn heuristic_summary_has_dimensions_header() {
        let s = heuristic_summary(&page(2, "tiny"), 12);
        assert_eq!(s, "Page 2 of 12 (612x792px)");

        let body = "word ".repeat(200);
        let s = heuristic_summary(&page(2, &body), 12);
        assert!(s.starts_with("Page 2 of 12 (612x792px)\n\nword word"));
        assert!(s.ends_with('…'));
        assert!(s.chars().count() <= MAX_SUMMARY_CHARS);
    }

    #[test]
    fn keyword_categories() {
        assert_eq!(keyword_category("Question 3 of 10"), Category::Quiz);
        assert_eq!(keyword_category("The answer lies in the data"), Category::Regular);
        assert_eq!(keyword_category("See citation [3]"), Category::Reference);
        assert_eq!(keyword_category("Download the slides"), Category::Resources);
        assert_eq!(keyword_category("Watch the recording"), Category::Video);
        assert_eq!(keyword_category("Plain prose"), Category::Regular);
        assert_eq!(keyword_category(""), Category::Regular);
    }

    #[test]
    fn heuristic_scrapes_links() {
        let c = heuristic(
            &page(1, "Slides at https://example.test/a.pdf, notes at http://x.test."),
            &CTX,
        );
        assert_eq!(c.links, vec!["https://example.test/a.pdf", "http://x.test"]);
    }

    #[test]
    fn clean_text_collapses_and_truncates() {
        assert_eq!(clean_text("  a \n\t b  ", 10), "a b");
        assert_eq!(clean_text("abcdef", 3), "abc");
    }
}
