//! Warning label drawn onto drowsy frames.
//!
//! Text is rendered from a 5x7 bitmap glyph set covering the characters of
//! the label, scaled up by pixel replication.

use image::{Rgb, RgbImage};

/// Text drawn on drowsy frames.
pub const WARNING_LABEL: &str = "DROWSY!";

/// Left edge and baseline of the label.
pub const WARNING_ORIGIN: (u32, u32) = (50, 100);

/// Label colour.
pub const WARNING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Pixel replication factor for the label.
pub const WARNING_SCALE: u32 = 4;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// Rows of a 5x7 glyph, most significant of the low five bits leftmost.
fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c.to_ascii_uppercase() {
        ' ' => [0x00; 7],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        _ => return None,
    };
    Some(rows)
}

/// Draw `text` with its bottom-left corner at `origin`.
///
/// Characters without a glyph are skipped but still advance the pen. Pixels
/// falling outside the image are clipped.
pub fn draw_text(image: &mut RgbImage, text: &str, origin: (u32, u32), scale: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let advance = (GLYPH_WIDTH + 1) * scale;
    let top = origin.1.saturating_sub(GLYPH_HEIGHT * scale);

    let mut pen_x = origin.0;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (row, bits) in (0u32..).zip(rows) {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let x0 = pen_x + col * scale;
                    let y0 = top + row * scale;
                    for y in y0..(y0 + scale).min(height) {
                        for x in x0..(x0 + scale).min(width) {
                            image.put_pixel(x, y, color);
                        }
                    }
                }
            }
        }
        pen_x = pen_x.saturating_add(advance);
        if pen_x >= width {
            break;
        }
    }
}

/// Draw the drowsiness warning.
pub fn draw_warning(image: &mut RgbImage) {
    draw_text(image, WARNING_LABEL, WARNING_ORIGIN, WARNING_SCALE, WARNING_COLOR);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_color(image: &RgbImage, color: Rgb<u8>) -> usize {
        image.pixels().filter(|p| **p == color).count()
    }

    #[test]
    fn test_label_glyphs_exist() {
        assert!(WARNING_LABEL.chars().all(|c| glyph(c).is_some()));
    }

    #[test]
    fn test_draw_warning_marks_label_area() {
        let mut image = RgbImage::new(640, 480);
        draw_warning(&mut image);

        let painted = count_color(&image, WARNING_COLOR);
        assert!(painted > 0);

        // The first column of 'D' is solid from top to baseline.
        let top = WARNING_ORIGIN.1 - GLYPH_HEIGHT * WARNING_SCALE;
        assert_eq!(*image.get_pixel(WARNING_ORIGIN.0, top), WARNING_COLOR);
        assert_eq!(*image.get_pixel(WARNING_ORIGIN.0, WARNING_ORIGIN.1 - 1), WARNING_COLOR);

        // Nothing is drawn below the baseline or left of the origin.
        assert_ne!(*image.get_pixel(WARNING_ORIGIN.0, WARNING_ORIGIN.1), WARNING_COLOR);
        assert_ne!(*image.get_pixel(WARNING_ORIGIN.0 - 1, top), WARNING_COLOR);
    }

    #[test]
    fn test_draw_text_clips_to_small_image() {
        let mut image = RgbImage::new(80, 90);
        draw_warning(&mut image);
        assert!(count_color(&image, WARNING_COLOR) > 0);

        let mut tiny = RgbImage::new(10, 10);
        draw_warning(&mut tiny);
        assert_eq!(count_color(&tiny, WARNING_COLOR), 0);
    }

    #[test]
    fn test_unknown_characters_are_skipped() {
        let mut image = RgbImage::new(100, 20);
        draw_text(&mut image, "#", (0, 10), 1, WARNING_COLOR);
        assert_eq!(count_color(&image, WARNING_COLOR), 0);
    }

    #[test]
    fn test_pixel_count_matches_glyph_bits() {
        let mut image = RgbImage::new(20, 20);
        draw_text(&mut image, "!", (0, 10), 1, WARNING_COLOR);
        assert_eq!(count_color(&image, WARNING_COLOR), 6);

        let mut image = RgbImage::new(40, 40);
        draw_text(&mut image, "!", (0, 20), 2, WARNING_COLOR);
        assert_eq!(count_color(&image, WARNING_COLOR), 24);
    }
}
