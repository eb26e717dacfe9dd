//! Paints opaque masks over detected regions and re-encodes the image.

use image::{DynamicImage, ImageBuffer, ImageFormat, Pixel, Rgb, Rgba};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use std::io::Cursor;

use crate::constants::MASK_MARGIN;
use crate::models::{DetectionBox, DetectionReport};
use crate::services::error::ModerationError;

/// Padded mask for one box, clipped to the image. Both corners are covered,
/// so a box `10..50` paints `max(0, -10)..=70`, the first row and column
/// included.
pub fn mask_rect(detection: &DetectionBox, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    let x0 = (detection.left as i64 - MASK_MARGIN).max(0);
    let y0 = (detection.top as i64 - MASK_MARGIN).max(0);
    let x1 = (detection.right as i64 + MASK_MARGIN).min(width as i64 - 1);
    let y1 = (detection.bottom as i64 + MASK_MARGIN).min(height as i64 - 1);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some(Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32))
}

fn paint<P: Pixel>(canvas: &mut ImageBuffer<P, Vec<P::Subpixel>>, rects: &[Rect], color: P) {
    for rect in rects {
        draw_filled_rect_mut(canvas, *rect, color);
    }
}

/// Mask every box in `report` and encode in `format`.
///
/// Returns `Ok(None)` when there is nothing to censor; no encoding happens then.
/// An encode failure is an error, never an empty result.
pub fn censor(
    image: &DynamicImage,
    report: &DetectionReport,
    format: ImageFormat,
) -> Result<Option<Vec<u8>>, ModerationError> {
    let (width, height) = (image.width(), image.height());
    let rects: Vec<Rect> = report
        .boxes()
        .filter_map(|(_, b)| mask_rect(b, width, height))
        .collect();

    if rects.is_empty() {
        return Ok(None);
    }

    // JPEG and BMP cannot carry alpha, PNG keeps it
    let masked = if format == ImageFormat::Png && image.color().has_alpha() {
        let mut canvas = image.to_rgba8();
        paint(&mut canvas, &rects, Rgba([0, 0, 0, 255]));
        DynamicImage::ImageRgba8(canvas)
    } else {
        let mut canvas = image.to_rgb8();
        paint(&mut canvas, &rects, Rgb([0, 0, 0]));
        DynamicImage::ImageRgb8(canvas)
    };

    let mut output = Cursor::new(Vec::new());
    masked
        .write_to(&mut output, format)
        .map_err(|e| ModerationError::EncodingFailed(e.to_string()))?;

    Ok(Some(output.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use image::{GenericImageView, RgbImage, RgbaImage};

    fn detection(left: u32, top: u32, right: u32, bottom: u32) -> DetectionBox {
        DetectionBox {
            confidence_score: 90.0,
            top,
            left,
            bottom,
            right,
        }
    }

    fn white(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
    }

    #[test]
    fn test_mask_geometry_is_padded_and_clipped() {
        let rect = mask_rect(&detection(10, 10, 50, 50), 100, 100).unwrap();
        assert_eq!((rect.left(), rect.top()), (0, 0));
        assert_eq!((rect.right(), rect.bottom()), (70, 70));

        let rect = mask_rect(&detection(60, 70, 100, 100), 100, 100).unwrap();
        assert_eq!((rect.left(), rect.top()), (40, 50));
        assert_eq!((rect.right(), rect.bottom()), (99, 99));
    }

    #[test]
    fn test_no_boxes_produces_nothing() {
        let out = censor(&white(10, 10), &DetectionReport::empty(), ImageFormat::Png).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_masks_are_painted_black() {
        let mut report = DetectionReport::empty();
        report.push(Category::Buttocks, detection(10, 10, 50, 50));
        let bytes = censor(&white(100, 100), &report, ImageFormat::Png)
            .unwrap()
            .unwrap();
        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();

        assert_eq!(decoded.get_pixel(0, 0).to_rgb(), Rgb([0, 0, 0]));
        assert_eq!(decoded.get_pixel(1, 1).to_rgb(), Rgb([0, 0, 0]));
        assert_eq!(decoded.get_pixel(70, 70).to_rgb(), Rgb([0, 0, 0]));
        assert_eq!(decoded.get_pixel(30, 30).to_rgb(), Rgb([0, 0, 0]));
        assert_eq!(decoded.get_pixel(71, 71).to_rgb(), Rgb([255, 255, 255]));
        assert_eq!(decoded.get_pixel(80, 20).to_rgb(), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_box_at_image_corner_covers_edge_pixels() {
        // Aggregated boxes start at 1, the mask still reaches row and column 0
        let mut report = DetectionReport::empty();
        report.push(Category::FemaleGenitalia, detection(1, 1, 5, 5));
        let bytes = censor(&white(40, 40), &report, ImageFormat::Png)
            .unwrap()
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();

        for i in 0..40 {
            let expected = if i <= 25 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) };
            assert_eq!(decoded.get_pixel(i, 0).to_rgb(), expected, "row 0, x {}", i);
            assert_eq!(decoded.get_pixel(0, i).to_rgb(), expected, "column 0, y {}", i);
        }
    }

    #[test]
    fn test_encode_failure_is_an_error_not_an_empty_result() {
        let mut report = DetectionReport::empty();
        report.push(Category::Buttocks, detection(10, 10, 20, 20));

        // The HDR encoder only takes float RGB, so 8-bit input cannot be written
        let err = censor(&white(32, 32), &report, ImageFormat::Hdr).unwrap_err();
        assert!(matches!(err, ModerationError::EncodingFailed(_)), "{:?}", err);

        let nothing = censor(&white(32, 32), &DetectionReport::empty(), ImageFormat::Hdr).unwrap();
        assert!(nothing.is_none());
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let mut report = DetectionReport::empty();
        report.push(Category::FemaleBreast, detection(5, 5, 30, 30));
        report.push(Category::FemaleBreast, detection(20, 20, 40, 40));
        report.push(Category::MaleGenitalia, detection(5, 5, 30, 30));
        let image = white(64, 48);

        let first = censor(&image, &report, ImageFormat::Png).unwrap().unwrap();
        let second = censor(&image, &report, ImageFormat::Png).unwrap().unwrap();
        assert_eq!(first, second);

        let repainted = image::load_from_memory(&first).unwrap();
        let third = censor(&repainted, &report, ImageFormat::Png).unwrap().unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_keeps_alpha_for_png_and_encodes_jpeg_without_it() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 32, Rgba([200, 10, 10, 128])));
        let mut report = DetectionReport::empty();
        report.push(Category::Buttocks, detection(25, 25, 30, 30));

        let png = censor(&image, &report, ImageFormat::Png).unwrap().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.get_pixel(1, 1), Rgba([200, 10, 10, 128]));
        assert_eq!(decoded.get_pixel(20, 20), Rgba([0, 0, 0, 255]));

        let jpeg = censor(&image, &report, ImageFormat::Jpeg).unwrap().unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }
}
