//! Image encoding: rendered page PNG → base64 `ImageData` for the classifier.
//!
//! Vision APIs take images as base64 data embedded in the JSON body. The
//! render chain already hands us PNG bytes, so this is mostly a base64 pass;
//! oversized renders are scaled down first because classification only needs
//! the layout and headings, not fine print.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use std::io::Cursor;
use tracing::debug;

/// Longest edge sent to the classifier.
pub const CLASSIFIER_MAX_EDGE: u32 = 1024;

/// Wrap PNG bytes as `ImageData`, downscaling anything larger than
/// [`CLASSIFIER_MAX_EDGE`].
///
/// `detail: "low"` is enough for a single-tile overview of a slide.
pub fn encode_png(png: &[u8]) -> Result<ImageData, image::ImageError> {
    let img = image::load_from_memory(png)?;
    let bytes = if img.width().max(img.height()) > CLASSIFIER_MAX_EDGE {
        let scaled = img.resize(CLASSIFIER_MAX_EDGE, CLASSIFIER_MAX_EDGE, FilterType::Triangle);
        let mut buf = Vec::new();
        scaled.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        debug!(
            "Downscaled {}x{} → {}x{} for classification",
            img.width(),
            img.height(),
            scaled.width(),
            scaled.height()
        );
        buf
    } else {
        png.to_vec()
    };

    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("low"))
}
