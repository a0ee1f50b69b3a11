//! Configuration for the slide conversion pipeline.
//!
//! Everything the coordinator and its components need is in one
//! [`PipelineConfig`], built via [`PipelineConfigBuilder`]. Per-deployment
//! defaults come from `PDF2SLIDES_*` environment variables
//! ([`PipelineConfig::from_env`]); per-invocation request fields
//! (`maxPages`, `timeoutMs`, `enableImages`, `batchSize`) override them for
//! one run only.

use crate::error::Pdf2SlidesError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// What to do about slide images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImagePolicy {
    /// Rasterise (primary, then fallback, then placeholder). (default)
    #[default]
    Render,
    /// Skip the rasterisers; every slide gets a placeholder image.
    Placeholder,
    /// No image at all.
    None,
}

impl ImagePolicy {
    /// Map a request's `enableImages` flag onto a policy.
    pub fn from_enable_images(enable: bool) -> Self {
        if enable {
            ImagePolicy::Render
        } else {
            ImagePolicy::Placeholder
        }
    }
}

impl FromStr for ImagePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "render" => Ok(ImagePolicy::Render),
            "false" | "0" | "no" | "placeholder" => Ok(ImagePolicy::Placeholder),
            "none" | "off" => Ok(ImagePolicy::None),
            other => Err(format!("unknown image policy '{other}'")),
        }
    }
}

/// Configuration for slide conversion.
///
/// # Example
/// ```rust
/// use edgequake_pdf2slides::{ImagePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .max_pages(5)
///     .timeout_ms(60_000)
///     .image_policy(ImagePolicy::Placeholder)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Pages attempted per invocation. Default: 10.
    pub max_pages: usize,

    /// Wall-clock budget per invocation in milliseconds. Default: 25 000.
    pub timeout_ms: u64,

    /// No new work starts once less than this is left. Default: 3 000.
    pub safety_margin_ms: u64,

    /// Default image handling. Default: [`ImagePolicy::Render`].
    pub image_policy: ImagePolicy,

    /// Pages processed concurrently within a batch. Default: 1.
    pub batch_size: usize,

    /// Whether to call the model at all. Default: true.
    pub classification: bool,

    /// Minimum spacing between classifier calls in milliseconds. Default: 1 000.
    pub classify_delay_ms: u64,

    /// Attempts at appending a slide to its parent. Default: 3.
    pub parent_update_attempts: u32,

    /// Base backoff between parent-append attempts, doubled each time. Default: 500.
    pub retry_backoff_ms: u64,

    /// Longest edge of a rasterised page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Placeholder canvas size. Default: 1200 × 900.
    pub placeholder_size: (u32, u32),

    /// Base URL of the remote conversion service used as fallback rasteriser.
    pub render_service_url: Option<String>,

    /// Bearer token for the remote conversion service.
    pub render_service_token: Option<String>,

    /// LLM model identifier. Default when unset: `gpt-4o-mini`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for classification. Default: 0.1.
    pub temperature: f32,

    /// Output token cap for one classification. Default: 512.
    pub max_tokens: usize,

    /// Upper bound for one classifier or remote-render call in seconds. Default: 30.
    pub api_timeout_secs: u64,

    /// Download timeout for URL documents in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages: 10,
            timeout_ms: 25_000,
            safety_margin_ms: 3_000,
            image_policy: ImagePolicy::default(),
            batch_size: 1,
            classification: true,
            classify_delay_ms: 1_000,
            parent_update_attempts: 3,
            retry_backoff_ms: 500,
            max_rendered_pixels: 2000,
            placeholder_size: (1200, 900),
            render_service_url: None,
            render_service_token: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 512,
            api_timeout_secs: 30,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_pages", &self.max_pages)
            .field("timeout_ms", &self.timeout_ms)
            .field("safety_margin_ms", &self.safety_margin_ms)
            .field("image_policy", &self.image_policy)
            .field("batch_size", &self.batch_size)
            .field("classification", &self.classification)
            .field("classify_delay_ms", &self.classify_delay_ms)
            .field("parent_update_attempts", &self.parent_update_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("render_service_url", &self.render_service_url)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `PDF2SLIDES_*` environment variables.
    pub fn from_env() -> Result<Self, Pdf2SlidesError> {
        Self::builder().env_overrides()?.build()
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn safety_margin_ms(mut self, ms: u64) -> Self {
        self.config.safety_margin_ms = ms;
        self
    }

    pub fn image_policy(mut self, policy: ImagePolicy) -> Self {
        self.config.image_policy = policy;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn classification(mut self, enabled: bool) -> Self {
        self.config.classification = enabled;
        self
    }

    pub fn classify_delay_ms(mut self, ms: u64) -> Self {
        self.config.classify_delay_ms = ms;
        self
    }

    pub fn parent_update_attempts(mut self, n: u32) -> Self {
        self.config.parent_update_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn placeholder_size(mut self, width: u32, height: u32) -> Self {
        self.config.placeholder_size = (width, height);
        self
    }

    pub fn render_service(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.config.render_service_url = Some(url.into());
        self.config.render_service_token = token;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Apply `PDF2SLIDES_*` variables from the process environment.
    pub fn env_overrides(self) -> Result<Self, Pdf2SlidesError> {
        self.overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `PDF2SLIDES_*` settings from any key lookup. Empty values are ignored.
    pub fn overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Pdf2SlidesError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let c = &mut self.config;

        if let Some(v) = get("PDF2SLIDES_MAX_PAGES") {
            c.max_pages = parse_var("PDF2SLIDES_MAX_PAGES", &v)?;
        }
        if let Some(v) = get("PDF2SLIDES_TIMEOUT_MS") {
            c.timeout_ms = parse_var("PDF2SLIDES_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("PDF2SLIDES_SAFETY_MARGIN_MS") {
            c.safety_margin_ms = parse_var("PDF2SLIDES_SAFETY_MARGIN_MS", &v)?;
        }
        if let Some(v) = get("PDF2SLIDES_ENABLE_IMAGES") {
            c.image_policy = v
                .parse()
                .map_err(|e| Pdf2SlidesError::InvalidConfig(format!("PDF2SLIDES_ENABLE_IMAGES: {e}")))?;
        }
        if let Some(v) = get("PDF2SLIDES_BATCH_SIZE") {
            c.batch_size = parse_var("PDF2SLIDES_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("PDF2SLIDES_CLASSIFY") {
            c.classification = parse_bool("PDF2SLIDES_CLASSIFY", &v)?;
        }
        if let Some(v) = get("PDF2SLIDES_CLASSIFY_DELAY_MS") {
            c.classify_delay_ms = parse_var("PDF2SLIDES_CLASSIFY_DELAY_MS", &v)?;
        }
        if let Some(v) = get("PDF2SLIDES_RENDER_SERVICE_URL") {
            c.render_service_url = Some(v);
        }
        if let Some(v) = get("PDF2SLIDES_RENDER_SERVICE_TOKEN") {
            c.render_service_token = Some(v);
        }
        Ok(self)
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Pdf2SlidesError> {
        let c = &self.config;
        if c.max_pages == 0 {
            return Err(Pdf2SlidesError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.batch_size == 0 {
            return Err(Pdf2SlidesError::InvalidConfig("batch_size must be ≥ 1".into()));
        }
        if c.timeout_ms == 0 {
            return Err(Pdf2SlidesError::InvalidConfig("timeout_ms must be > 0".into()));
        }
        if c.parent_update_attempts == 0 {
            return Err(Pdf2SlidesError::InvalidConfig(
                "parent_update_attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, Pdf2SlidesError>
where
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| Pdf2SlidesError::InvalidConfig(format!("{key}={value:?}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Pdf2SlidesError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Pdf2SlidesError::InvalidConfig(format!(
            "{key}={value:?}: expected true or false"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_pages, 10);
        assert_eq!(c.timeout_ms, 25_000);
        assert_eq!(c.safety_margin_ms, 3_000);
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.image_policy, ImagePolicy::Render);
        assert_eq!(c.parent_update_attempts, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let c = PipelineConfig::builder()
            .overrides_from(lookup(&[
                ("PDF2SLIDES_MAX_PAGES", "3"),
                ("PDF2SLIDES_TIMEOUT_MS", " 9000 "),
                ("PDF2SLIDES_ENABLE_IMAGES", "false"),
                ("PDF2SLIDES_CLASSIFY", "off"),
                ("PDF2SLIDES_RENDER_SERVICE_URL", "https://render.test"),
                ("PDF2SLIDES_BATCH_SIZE", ""),
            ]))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(c.max_pages, 3);
        assert_eq!(c.timeout_ms, 9000);
        assert_eq!(c.image_policy, ImagePolicy::Placeholder);
        assert!(!c.classification);
        assert_eq!(c.render_service_url.as_deref(), Some("https://render.test"));
        assert_eq!(c.batch_size, 1);
    }

    #[test]
    fn bad_env_value_is_invalid_config() {
        let err = PipelineConfig::builder()
            .overrides_from(lookup(&[("PDF2SLIDES_MAX_PAGES", "ten")]))
            .unwrap_err();
        assert!(matches!(err, Pdf2SlidesError::InvalidConfig(_)));
        assert!(err.to_string().contains("PDF2SLIDES_MAX_PAGES"));
    }

    #[test]
    fn build_rejects_zeroes() {
        assert!(PipelineConfig::builder().max_pages(0).build().is_err());
        assert!(PipelineConfig::builder().batch_size(0).build().is_err());
        assert!(PipelineConfig::builder().timeout_ms(0).build().is_err());
        assert!(PipelineConfig::builder().parent_update_attempts(0).build().is_err());
    }

    #[test]
    fn image_policy_parsing() {
        assert_eq!("TRUE".parse::<ImagePolicy>().unwrap(), ImagePolicy::Render);
        assert_eq!("0".parse::<ImagePolicy>().unwrap(), ImagePolicy::Placeholder);
        assert_eq!("none".parse::<ImagePolicy>().unwrap(), ImagePolicy::None);
        assert!("maybe".parse::<ImagePolicy>().is_err());
        assert_eq!(ImagePolicy::from_enable_images(false), ImagePolicy::Placeholder);
    }
}
