use image::{DynamicImage, GrayImage};

const MAX_OCR_WIDTH: u32 = 6000;
const MAX_OCR_SCALE: u32 = 3;

/// Flattens transparency onto white, converts to luma and upscales small
/// captures so tesseract sees glyphs at a usable size. Returns the prepared
/// image and the integer scale applied to it.
pub(super) fn prepare_for_ocr(image: &DynamicImage) -> (DynamicImage, u32) {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        luma.put_pixel(x, y, image::Luma([value]));
    }

    let scale = ocr_scale(width);
    let prepared = if scale > 1 {
        image::imageops::resize(
            &luma,
            width.saturating_mul(scale),
            height.saturating_mul(scale),
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        luma
    };
    (DynamicImage::ImageLuma8(prepared), scale)
}

pub(super) fn ocr_scale(width: u32) -> u32 {
    let mut scale = MAX_OCR_SCALE;
    while width.saturating_mul(scale) > MAX_OCR_WIDTH && scale > 1 {
        scale -= 1;
    }
    scale.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_shrinks_for_wide_images() {
        assert_eq!(ocr_scale(400), 3);
        assert_eq!(ocr_scale(2500), 2);
        assert_eq!(ocr_scale(5000), 1);
    }

    #[test]
    fn transparent_pixels_become_white() {
        let image = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            4,
            2,
            image::Rgba([0, 0, 0, 0]),
        ));
        let (prepared, scale) = prepare_for_ocr(&image);
        assert_eq!(scale, 3);
        let gray = prepared.to_luma8();
        assert_eq!(gray.dimensions(), (12, 6));
        assert!(gray.pixels().all(|pixel| pixel[0] == 255));
    }
}
