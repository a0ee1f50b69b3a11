//! Page rasterisation with a fixed fallback chain.
//!
//! Backends form a small closed set ([`RenderBackend`]): the in-process
//! pdfium rasteriser and a remote conversion service. A [`PageRenderer`]
//! holds at most one primary and one fallback, and always ends in the
//! synthetic placeholder, so [`PageRenderer::render`] cannot fail.
//!
//! pdfium runs inside `spawn_blocking` with its own `Pdfium` instance per
//! call: no state is shared between pages or with the async workers.
//!
//! Rendered images are capped on their longest edge (`max_pixels`) rather
//! than by DPI, so an A0 poster does not turn into a 12 000 px bitmap.

use crate::config::{ImagePolicy, PipelineConfig};
use crate::output::{RenderBackendKind, RenderedAsset};
use crate::pipeline::document::bind_pdfium;
use crate::pipeline::placeholder::placeholder_png;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use pdfium_render::prelude::*;
use serde::Deserialize;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Why one backend failed. Never leaves this module.
#[derive(Debug, Error)]
enum RenderError {
    #[error("pdfium: {0}")]
    Pdfium(String),
    #[error("page {page} out of range (document has {total})")]
    OutOfRange { page: usize, total: usize },
    #[error("remote service: {0}")]
    Remote(String),
    #[error("image encoding: {0}")]
    Encode(#[from] image::ImageError),
    #[error("render task panicked: {0}")]
    Join(String),
}

/// Client for an HTTP conversion service (`POST {base}/convert-pdf`).
///
/// The service takes the whole document as multipart field `pdf` and answers
/// `{"images": [...]}` where each entry is either a bare base64 string or
/// `{"page": n, "image": "<base64>"}`.
#[derive(Clone)]
pub struct RemoteRasterizer {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for RemoteRasterizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRasterizer")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl RemoteRasterizer {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn render(&self, document: &Arc<[u8]>, page_number: usize) -> Result<Vec<u8>, RenderError> {
        let part = reqwest::multipart::Part::bytes(document.to_vec())
            .file_name("document.pdf")
            .mime_str("application/pdf")
            .map_err(|e| RenderError::Remote(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("pdf", part)
            .text("page", page_number.to_string());

        let mut req = self
            .client
            .post(format!("{}/convert-pdf", self.base_url))
            .multipart(form);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RenderError::Remote(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RenderError::Remote(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        let parsed: ConvertResponse = resp
            .json()
            .await
            .map_err(|e| RenderError::Remote(format!("bad response body: {e}")))?;

        let encoded = select_remote_image(&parsed.images, page_number).ok_or_else(|| {
            RenderError::Remote(format!(
                "no image for page {} in response ({} images)",
                page_number,
                parsed.images.len()
            ))
        })?;
        let raw = STANDARD
            .decode(strip_data_uri(encoded).trim())
            .map_err(|e| RenderError::Remote(format!("invalid base64: {e}")))?;
        normalise_png(raw)
    }
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    #[serde(default)]
    images: Vec<RemoteImage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteImage {
    Paged { page: usize, image: String },
    Bare(String),
}

impl RemoteImage {
    fn data(&self) -> &str {
        match self {
            RemoteImage::Paged { image, .. } | RemoteImage::Bare(image) => image,
        }
    }
}

/// Pick the image for `page_number`: an explicit page match first, then a
/// single-image answer, then positional.
fn select_remote_image(images: &[RemoteImage], page_number: usize) -> Option<&str> {
    let paged = images.iter().find_map(|img| match img {
        RemoteImage::Paged { page, image } if *page == page_number => Some(image.as_str()),
        _ => None,
    });
    if paged.is_some() {
        return paged;
    }
    if images.len() == 1 {
        return images.first().map(RemoteImage::data);
    }
    if images.iter().any(|i| matches!(i, RemoteImage::Paged { .. })) {
        return None;
    }
    page_number
        .checked_sub(1)
        .and_then(|i| images.get(i))
        .map(RemoteImage::data)
}

fn strip_data_uri(s: &str) -> &str {
    match s.find(";base64,") {
        Some(idx) if s.starts_with("data:") => &s[idx + ";base64,".len()..],
        _ => s,
    }
}

/// Keep PNG bytes as-is; decode anything else and re-encode as PNG.
fn normalise_png(raw: Vec<u8>) -> Result<Vec<u8>, RenderError> {
    if raw.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Ok(raw);
    }
    let img = image::load_from_memory(&raw)?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// One rasterisation backend.
#[derive(Debug, Clone)]
pub enum RenderBackend {
    /// In-process pdfium, longest edge capped at `max_pixels`.
    Pdfium { max_pixels: u32 },
    /// HTTP conversion service.
    Remote(RemoteRasterizer),
}

impl RenderBackend {
    fn label(&self) -> &'static str {
        match self {
            RenderBackend::Pdfium { .. } => "pdfium",
            RenderBackend::Remote(_) => "remote",
        }
    }

    async fn render(&self, document: &Arc<[u8]>, page_number: usize) -> Result<Vec<u8>, RenderError> {
        match self {
            RenderBackend::Pdfium { max_pixels } => {
                let bytes = Arc::clone(document);
                let max_pixels = *max_pixels;
                tokio::task::spawn_blocking(move || render_pdfium_blocking(&bytes, page_number, max_pixels))
                    .await
                    .map_err(|e| RenderError::Join(e.to_string()))?
            }
            RenderBackend::Remote(remote) => remote.render(document, page_number).await,
        }
    }
}

fn render_pdfium_blocking(bytes: &[u8], page_number: usize, max_pixels: u32) -> Result<Vec<u8>, RenderError> {
    let pdfium = bind_pdfium().map_err(|e| RenderError::Pdfium(e.to_string()))?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| RenderError::Pdfium(format!("{:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if page_number == 0 || page_number > total {
        return Err(RenderError::OutOfRange { page: page_number, total });
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let page = pages
        .get((page_number - 1) as u16)
        .map_err(|e| RenderError::Pdfium(format!("{:?}", e)))?;
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| RenderError::Pdfium(format!("{:?}", e)))?;
    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_number,
        image.width(),
        image.height()
    );

    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Renders one page, falling back primary → fallback → placeholder.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    policy: ImagePolicy,
    primary: Option<RenderBackend>,
    fallback: Option<RenderBackend>,
    placeholder_size: (u32, u32),
}

impl PageRenderer {
    /// A renderer with no rasterisers: every page gets the placeholder
    /// (or no image under [`ImagePolicy::None`]).
    pub fn new(policy: ImagePolicy) -> Self {
        Self {
            policy,
            primary: None,
            fallback: None,
            placeholder_size: (1200, 900),
        }
    }

    /// pdfium as primary, the remote service (if configured) as fallback.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut renderer = Self::new(config.image_policy)
            .with_primary(RenderBackend::Pdfium {
                max_pixels: config.max_rendered_pixels,
            })
            .with_placeholder_size(config.placeholder_size.0, config.placeholder_size.1);

        if let Some(url) = &config.render_service_url {
            match RemoteRasterizer::new(
                url.clone(),
                config.render_service_token.clone(),
                Duration::from_secs(config.api_timeout_secs),
            ) {
                Ok(remote) => renderer = renderer.with_fallback(RenderBackend::Remote(remote)),
                Err(e) => warn!("Remote rasteriser disabled: {}", e),
            }
        }
        renderer
    }

    pub fn with_primary(mut self, backend: RenderBackend) -> Self {
        self.primary = Some(backend);
        self
    }

    pub fn with_fallback(mut self, backend: RenderBackend) -> Self {
        self.fallback = Some(backend);
        self
    }

    pub fn with_placeholder_size(mut self, width: u32, height: u32) -> Self {
        self.placeholder_size = (width, height);
        self
    }

    /// Same backends, different image policy (per-invocation override).
    pub fn with_policy(&self, policy: ImagePolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    pub fn policy(&self) -> ImagePolicy {
        self.policy
    }

    /// Render `page_number` (1-indexed) of `document`. Never fails.
    pub async fn render(&self, document: &Arc<[u8]>, page_number: usize) -> RenderedAsset {
        match self.policy {
            ImagePolicy::None => {
                return RenderedAsset {
                    page_number,
                    image: None,
                    backend: RenderBackendKind::Placeholder,
                }
            }
            ImagePolicy::Placeholder => return self.placeholder(page_number),
            ImagePolicy::Render => {}
        }

        let chain = [
            (self.primary.as_ref(), RenderBackendKind::Primary),
            (self.fallback.as_ref(), RenderBackendKind::Fallback),
        ];
        for (backend, kind) in chain {
            let Some(backend) = backend else { continue };
            match backend.render(document, page_number).await {
                Ok(png) => {
                    return RenderedAsset {
                        page_number,
                        image: Some(png),
                        backend: kind,
                    }
                }
                Err(e) => warn!(
                    "Page {}: {} rasteriser failed, falling through: {}",
                    page_number,
                    backend.label(),
                    e
                ),
            }
        }

        self.placeholder(page_number)
    }

    fn placeholder(&self, page_number: usize) -> RenderedAsset {
        let (w, h) = self.placeholder_size;
        let image = match placeholder_png(page_number, w, h) {
            Ok(png) => Some(png),
            Err(e) => {
                error!("Page {}: placeholder generation failed: {}", page_number, e);
                None
            }
        };
        debug!("Page {}: using placeholder image", page_number);
        RenderedAsset {
            page_number,
            image,
            backend: RenderBackendKind::Placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Arc<[u8]> {
        Arc::from(b"%PDF-1.4 not really a pdf".to_vec())
    }

    fn unreachable_remote(port: u16) -> RenderBackend {
        RenderBackend::Remote(
            RemoteRasterizer::new(format!("http://127.0.0.1:{port}"), None, Duration::from_secs(2)).unwrap(),
        )
    }

    #[tokio::test]
    async fn both_backends_failing_yields_placeholder() {
        let renderer = PageRenderer::new(ImagePolicy::Render)
            .with_primary(unreachable_remote(1))
            .with_fallback(unreachable_remote(2))
            .with_placeholder_size(200, 150);
        let asset = renderer.render(&doc(), 3).await;
        assert_eq!(asset.page_number, 3);
        assert_eq!(asset.backend, RenderBackendKind::Placeholder);
        assert!(asset.image.as_ref().is_some_and(|b| b.starts_with(&[0x89, b'P'])));
    }

    #[tokio::test]
    async fn placeholder_policy_skips_backends() {
        let renderer = PageRenderer::new(ImagePolicy::Render)
            .with_primary(unreachable_remote(1))
            .with_policy(ImagePolicy::Placeholder);
        let asset = renderer.render(&doc(), 1).await;
        assert_eq!(asset.backend, RenderBackendKind::Placeholder);
        assert!(asset.image.is_some());
    }

    #[tokio::test]
    async fn none_policy_produces_no_image() {
        let asset = PageRenderer::new(ImagePolicy::None).render(&doc(), 1).await;
        assert!(asset.image.is_none());
    }

    #[test]
    fn remote_image_selection() {
        let paged = vec![
            RemoteImage::Paged { page: 2, image: "B".into() },
            RemoteImage::Paged { page: 1, image: "A".into() },
        ];
        assert_eq!(select_remote_image(&paged, 1), Some("A"));
        assert_eq!(select_remote_image(&paged, 3), None);

        let bare = vec![RemoteImage::Bare("x".into()), RemoteImage::Bare("y".into())];
        assert_eq!(select_remote_image(&bare, 2), Some("y"));
        assert_eq!(select_remote_image(&bare, 3), None);

        let single = vec![RemoteImage::Bare("only".into())];
        assert_eq!(select_remote_image(&single, 7), Some("only"));
    }

    #[test]
    fn remote_response_accepts_both_shapes() {
        let body = r#"{"images":["AAA",{"page":2,"image":"BBB"}]}"#;
        let parsed: ConvertResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.images.len(), 2);
        assert_eq!(select_remote_image(&parsed.images, 2), Some("BBB"));
    }

    #[test]
    fn data_uri_prefix_is_stripped() {
        assert_eq!(strip_data_uri("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }
}
