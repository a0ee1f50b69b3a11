//! Synthetic placeholder image: a fixed-size canvas labelled with the page number.
//!
//! Last link of the render chain. It has no external dependency (no pdfium,
//! no network, no font file): digits are drawn as seven-segment glyphs with
//! `imageproc` rectangles, so the only way it can fail is allocation.

use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::io::Cursor;

const BACKGROUND: Rgb<u8> = Rgb([244, 245, 247]);
const FRAME: Rgb<u8> = Rgb([180, 186, 194]);
const INK: Rgb<u8> = Rgb([72, 80, 92]);

/// Segments a..g, clockwise from the top, g in the middle.
const DIGIT_SEGMENTS: [[bool; 7]; 10] = [
    [true, true, true, true, true, true, false],     // 0
    [false, true, true, false, false, false, false], // 1
    [true, true, false, true, true, false, true],    // 2
    [true, true, true, true, false, false, true],    // 3
    [false, true, true, false, false, true, true],   // 4
    [true, false, true, true, false, true, true],    // 5
    [true, false, true, true, true, true, true],     // 6
    [true, true, true, false, false, false, false],  // 7
    [true, true, true, true, true, true, true],      // 8
    [true, true, true, true, false, true, true],     // 9
];

/// Render the placeholder for `page_number` as PNG bytes.
pub fn placeholder_png(page_number: usize, width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let width = width.max(64);
    let height = height.max(48);
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    let inset = (width.min(height) / 20).max(4);
    draw_hollow_rect_mut(
        &mut img,
        Rect::at(inset as i32, inset as i32).of_size(width - 2 * inset, height - 2 * inset),
        FRAME,
    );
    // Title bar hint.
    draw_filled_rect_mut(
        &mut img,
        Rect::at((inset * 3) as i32, (inset * 3) as i32).of_size((width / 2).max(1), (inset / 2).max(2)),
        FRAME,
    );

    draw_number(&mut img, page_number);

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

fn draw_number(img: &mut RgbImage, number: usize) {
    let digits: Vec<usize> = number
        .to_string()
        .bytes()
        .map(|b| (b - b'0') as usize)
        .collect();

    let digit_h = (img.height() / 4).max(10);
    let digit_w = (digit_h / 2).max(5);
    let stroke = (digit_h / 9).max(2);
    let gap = stroke * 2;

    let total_w = digits.len() as u32 * digit_w + (digits.len() as u32).saturating_sub(1) * gap;
    let start_x = img.width().saturating_sub(total_w) / 2;
    let y = img.height().saturating_sub(digit_h) / 2;

    for (i, &d) in digits.iter().enumerate() {
        let x = start_x + i as u32 * (digit_w + gap);
        draw_digit(img, d, x, y, digit_w, digit_h, stroke);
    }
}

fn draw_digit(img: &mut RgbImage, digit: usize, x: u32, y: u32, w: u32, h: u32, t: u32) {
    let half = h / 2;
    let rects = [
        (x, y, w, t),                       // a
        (x + w - t, y, t, half),            // b
        (x + w - t, y + half, t, h - half), // c
        (x, y + h - t, w, t),               // d
        (x, y + half, t, h - half),         // e
        (x, y, t, half),                    // f
        (x, y + half - t / 2, w, t),        // g
    ];
    for (on, (rx, ry, rw, rh)) in DIGIT_SEGMENTS[digit % 10].iter().zip(rects) {
        if *on {
            draw_filled_rect_mut(img, Rect::at(rx as i32, ry as i32).of_size(rw, rh), INK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_decodable_png_of_requested_size() {
        let png = placeholder_png(12, 320, 240).expect("placeholder");
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        let decoded = image::load_from_memory(&png).expect("decodable");
        assert_eq!(decoded.width(), 320);
        assert_eq!(decoded.height(), 240);
    }

    #[test]
    fn tiny_sizes_are_clamped() {
        let png = placeholder_png(1, 1, 1).expect("placeholder");
        let decoded = image::load_from_memory(&png).expect("decodable");
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn digits_leave_ink_on_canvas() {
        let mut img = RgbImage::from_pixel(200, 200, BACKGROUND);
        draw_number(&mut img, 8);
        assert!(img.pixels().any(|p| *p == INK));
    }
}
